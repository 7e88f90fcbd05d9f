pub mod escalation_settings;
pub mod guard;
pub mod knowledge;
pub mod logs;
pub mod moderation_settings;
pub mod rules;
pub mod stats;
pub mod system_settings;
