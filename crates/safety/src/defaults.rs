//! Built-in fallback snapshot, served when persistence is unreachable and
//! `fallback_to_defaults` is set.  Reuses the seed rows that initialize a
//! fresh database, so degraded mode matches a first-boot posture (with an
//! empty knowledge corpus).

use pal_store::{
    default_escalation_settings, default_moderation_settings, default_rules,
    default_system_settings,
};

use crate::patterns::RegexCache;
use crate::snapshot::{snapshot_from_parts, Snapshot, SnapshotSource};

pub fn default_snapshot(cache: &RegexCache) -> Snapshot {
    snapshot_from_parts(
        default_rules(),
        default_moderation_settings(),
        default_escalation_settings(),
        default_system_settings(),
        Vec::new(),
        cache,
        SnapshotSource::Defaults,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_snapshot_is_usable() {
        let snapshot = default_snapshot(&RegexCache::new());
        assert!(!snapshot.rules.is_empty(), "seed rules must compile");
        assert!(!snapshot.escalation.is_empty());
        assert!(!snapshot.refusal_message().is_empty());
        assert_eq!(snapshot.rate_limit((99, 99)), (10, 60));
    }
}
