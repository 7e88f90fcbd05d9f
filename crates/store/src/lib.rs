//! SQLite persistence for Palisade.
//!
//! One [`Store`] owns the database connection and exposes the chat tables
//! (sessions, conversations, messages, moderation logs), the policy tables
//! (safety rules, moderation/escalation/system settings, knowledge corpus),
//! seed data, and the aggregate stats queries.

mod chat;
mod policy;
mod schema;
mod seed;
mod stats;
mod store;

pub use policy::{PolicyBundle, RuleDraft};
pub use seed::{
    default_escalation_settings, default_moderation_settings, default_rules,
    default_system_settings,
};
pub use stats::GatewayStats;
pub use store::Store;
