//! Read-through policy snapshot cache.
//!
//! Publishes immutable [`Snapshot`] values behind a lock-held `Arc`;
//! readers clone the pointer and work on a frozen view, so refreshing
//! never blocks evaluation.  Refreshes are single-flight: concurrent
//! callers finding a stale snapshot coalesce onto one reload.
//!
//! Failure ladder when a refresh errors: keep serving the previous
//! snapshot for up to one extra TTL (stale grace), then fall back to the
//! built-in defaults when enabled, then surface `ConfigUnavailable`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use pal_domain::config::SafetyConfig;
use pal_domain::error::{Error, Result};
use pal_store::Store;

use crate::defaults::default_snapshot;
use crate::patterns::RegexCache;
use crate::snapshot::{Snapshot, SnapshotSource};

pub struct ConfigCache {
    store: Arc<Store>,
    ttl: Duration,
    fallback_to_defaults: bool,
    regexes: RegexCache,
    current: RwLock<Option<Arc<Snapshot>>>,
    /// Set by admin mutations; forces the next read to refresh.
    stale: AtomicBool,
    /// Single-flight refresh gate.
    refresh_gate: tokio::sync::Mutex<()>,
}

impl ConfigCache {
    pub fn new(store: Arc<Store>, cfg: &SafetyConfig) -> Self {
        Self {
            store,
            ttl: Duration::from_millis(cfg.cache_ttl_ms),
            fallback_to_defaults: cfg.fallback_to_defaults,
            regexes: RegexCache::new(),
            current: RwLock::new(None),
            stale: AtomicBool::new(true),
            refresh_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Mark the cache stale after an admin mutation; the next
    /// [`snapshot`](Self::snapshot) call reloads.
    pub fn invalidate(&self) {
        self.stale.store(true, Ordering::Release);
    }

    /// Get the current snapshot, refreshing when stale.
    pub async fn snapshot(&self) -> Result<Arc<Snapshot>> {
        if let Some(snapshot) = self.fresh_snapshot() {
            return Ok(snapshot);
        }

        // Single-flight: whoever wins the gate refreshes; everyone else
        // re-checks once the winner published.
        let _gate = self.refresh_gate.lock().await;
        if let Some(snapshot) = self.fresh_snapshot() {
            return Ok(snapshot);
        }

        match self.store.load_policy_bundle() {
            Ok(bundle) => {
                let snapshot = Arc::new(Snapshot::build(
                    bundle,
                    &self.regexes,
                    SnapshotSource::Store,
                ));
                *self.current.write() = Some(snapshot.clone());
                self.stale.store(false, Ordering::Release);
                tracing::debug!(
                    rules = snapshot.rules.len(),
                    knowledge = snapshot.knowledge.len(),
                    "policy snapshot refreshed"
                );
                Ok(snapshot)
            }
            Err(e) => self.degraded(e),
        }
    }

    /// The published snapshot, if it is still within its TTL and no admin
    /// mutation invalidated it.
    fn fresh_snapshot(&self) -> Option<Arc<Snapshot>> {
        if self.stale.load(Ordering::Acquire) {
            return None;
        }
        let guard = self.current.read();
        let snapshot = guard.as_ref()?;
        if snapshot.loaded_at.elapsed() <= self.effective_ttl(snapshot) {
            Some(snapshot.clone())
        } else {
            None
        }
    }

    /// TTL, honoring the snapshot's own `cache_ttl` system setting.
    fn effective_ttl(&self, snapshot: &Snapshot) -> Duration {
        snapshot
            .cache_ttl_secs()
            .map(Duration::from_secs)
            .unwrap_or(self.ttl)
    }

    /// Refresh failed: serve stale within grace, else defaults, else
    /// error.
    fn degraded(&self, cause: Error) -> Result<Arc<Snapshot>> {
        if let Some(snapshot) = self.current.read().as_ref() {
            let ttl = self.effective_ttl(snapshot);
            // One extra TTL of grace beyond normal staleness.
            if snapshot.loaded_at.elapsed() <= ttl * 2 {
                tracing::warn!(error = %cause, "policy refresh failed — serving stale snapshot");
                return Ok(snapshot.clone());
            }
        }

        if self.fallback_to_defaults {
            tracing::warn!(
                error = %cause,
                "policy store unreachable — serving built-in defaults (degraded mode)"
            );
            let snapshot = Arc::new(default_snapshot(&self.regexes));
            *self.current.write() = Some(snapshot.clone());
            // Leave `stale` set so recovery is attempted on the next read.
            return Ok(snapshot);
        }

        Err(Error::ConfigUnavailable(cause.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pal_domain::policy::{RuleAction, RuleType};
    use pal_store::RuleDraft;

    fn cache_with_store() -> (Arc<Store>, ConfigCache) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let cfg = SafetyConfig::default();
        let cache = ConfigCache::new(store.clone(), &cfg);
        (store, cache)
    }

    #[tokio::test]
    async fn snapshot_is_reused_until_invalidated() {
        let (_store, cache) = cache_with_store();
        let a = cache.snapshot().await.unwrap();
        let b = cache.snapshot().await.unwrap();
        assert!(Arc::ptr_eq(&a, &b), "fresh snapshot must be shared");
    }

    #[tokio::test]
    async fn invalidate_picks_up_admin_mutations() {
        let (store, cache) = cache_with_store();
        let before = cache.snapshot().await.unwrap().rules.len();

        store
            .insert_rule(&RuleDraft {
                rule_type: RuleType::BlockedKeyword,
                category: "test".into(),
                value: "freshly-added".into(),
                action: RuleAction::Flag,
                priority: 1,
                enabled: true,
                description: None,
            })
            .unwrap();

        // Without invalidation the old snapshot is still served.
        assert_eq!(cache.snapshot().await.unwrap().rules.len(), before);

        cache.invalidate();
        assert_eq!(cache.snapshot().await.unwrap().rules.len(), before + 1);
    }

    #[tokio::test]
    async fn snapshot_ttl_setting_overrides_config() {
        let (_store, cache) = cache_with_store();
        let snapshot = cache.snapshot().await.unwrap();
        // Seed sets cache_ttl = 300s.
        assert_eq!(cache.effective_ttl(&snapshot), Duration::from_secs(300));
    }
}
