//! Per-conversation turn serialization.
//!
//! Concurrent turns for the same conversation wait on a conversation
//! mutex so message append order is total; different conversations run
//! in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use uuid::Uuid;

/// Maps conversation IDs to single-permit semaphores.
pub struct ConversationLockMap {
    locks: Mutex<HashMap<Uuid, Arc<Semaphore>>>,
}

impl Default for ConversationLockMap {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationLockMap {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the turn lock for a conversation, waiting while another
    /// turn is in flight.  The permit releases on drop.
    pub async fn acquire(&self, conversation_id: Uuid) -> OwnedSemaphorePermit {
        let sem = {
            let mut locks = self.locks.lock();
            locks
                .entry(conversation_id)
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };

        // The semaphore is never closed, so acquisition only fails if the
        // map entry were dropped mid-wait — which `prune_idle` avoids by
        // retaining held locks.
        sem.acquire_owned()
            .await
            .expect("conversation lock semaphore closed")
    }

    pub fn conversation_count(&self) -> usize {
        self.locks.lock().len()
    }

    /// Drop lock entries that no turn currently holds.
    pub fn prune_idle(&self) {
        let mut locks = self.locks.lock();
        locks.retain(|_, sem| sem.available_permits() == 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_conversation_serializes() {
        let map = Arc::new(ConversationLockMap::new());
        let id = Uuid::new_v4();

        let permit = map.acquire(id).await;
        let map2 = map.clone();
        let waiter = tokio::spawn(async move {
            let _p = map2.acquire(id).await;
            7
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished(), "second turn must wait");

        drop(permit);
        assert_eq!(waiter.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn different_conversations_run_in_parallel() {
        let map = ConversationLockMap::new();
        let _a = map.acquire(Uuid::new_v4()).await;
        let _b = map.acquire(Uuid::new_v4()).await;
        assert_eq!(map.conversation_count(), 2);
    }

    #[tokio::test]
    async fn prune_keeps_held_locks() {
        let map = ConversationLockMap::new();
        let held = map.acquire(Uuid::new_v4()).await;
        let released = map.acquire(Uuid::new_v4()).await;
        drop(released);

        map.prune_idle();
        assert_eq!(map.conversation_count(), 1);
        drop(held);
    }
}
