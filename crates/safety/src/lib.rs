//! The Palisade safety pipeline: input sanitization, the hot-reloadable
//! policy snapshot cache, compiled pattern matching, escalation
//! detection, and the rule engine that resolves everything into one
//! authoritative [`Decision`](engine::Decision) per message.

pub mod cache;
pub mod defaults;
pub mod engine;
pub mod escalation;
pub mod patterns;
pub mod sanitize;
pub mod snapshot;

pub use cache::ConfigCache;
pub use engine::{
    apply_thresholds, resolve_patterns_only, Decision, EngineOutcome, ModerationHit, Reason,
    ReasonSource, RuleEngine,
};
pub use escalation::{detect_escalation, Escalation};
pub use patterns::{CompiledRule, PatternMatch, PatternMatcher, RegexCache};
pub use sanitize::sanitize;
pub use snapshot::{snapshot_from_parts, Snapshot, SnapshotSource};
