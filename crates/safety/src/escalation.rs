//! Priority-ordered escalation detection.
//!
//! Scans the (whitespace-normalized, lowercased) text for the keyword
//! lists of each enabled escalation category, highest priority first.
//! The first category with at least one hit wins and short-circuits
//! generation with its canned response template.

use pal_domain::policy::Urgency;

use crate::snapshot::Snapshot;

/// A detected escalation: the winning category plus the keywords that
/// triggered it.
#[derive(Debug, Clone)]
pub struct Escalation {
    pub category: String,
    pub urgency: Urgency,
    pub triggers: Vec<String>,
    pub response_template: String,
}

/// Lowercase and collapse all whitespace to single spaces, so keyword
/// phrases match across line breaks and odd spacing.
fn normalize(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Run the detector.  Returns `None` when no enabled category matches.
pub fn detect_escalation(text: &str, snapshot: &Snapshot) -> Option<Escalation> {
    let haystack = normalize(text);

    for setting in &snapshot.escalation {
        let triggers: Vec<String> = setting
            .keywords
            .iter()
            .filter(|keyword| {
                let needle = normalize(keyword);
                !needle.is_empty() && haystack.contains(&needle)
            })
            .cloned()
            .collect();

        if !triggers.is_empty() {
            return Some(Escalation {
                category: setting.category.clone(),
                urgency: Urgency::for_category(&setting.category),
                triggers,
                response_template: setting.response_template.clone(),
            });
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::RegexCache;
    use crate::snapshot::{snapshot_from_parts, SnapshotSource};
    use pal_domain::policy::EscalationSetting;

    fn setting(category: &str, keywords: &[&str], priority: i32) -> EscalationSetting {
        EscalationSetting {
            category: category.to_string(),
            enabled: true,
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            response_template: format!("{category} template"),
            priority,
        }
    }

    fn snapshot_with(escalation: Vec<EscalationSetting>) -> Snapshot {
        snapshot_from_parts(
            Vec::new(),
            Vec::new(),
            escalation,
            Vec::new(),
            Vec::new(),
            &RegexCache::new(),
            SnapshotSource::Store,
        )
    }

    #[test]
    fn highest_priority_category_wins() {
        let snapshot = snapshot_with(vec![
            setting("complaint", &["complaint"], 60),
            setting("crisis", &["end my life"], 100),
        ]);
        let hit =
            detect_escalation("I have a complaint and I want to end my life", &snapshot)
                .unwrap();
        assert_eq!(hit.category, "crisis");
        assert_eq!(hit.urgency, Urgency::Critical);
    }

    #[test]
    fn keywords_match_across_whitespace_and_case() {
        let snapshot = snapshot_with(vec![setting("crisis", &["end my life"], 100)]);
        let hit = detect_escalation("I want to END\n   my    LIFE", &snapshot).unwrap();
        assert_eq!(hit.triggers, vec!["end my life"]);
    }

    #[test]
    fn all_matching_keywords_reported_as_triggers() {
        let snapshot = snapshot_with(vec![setting(
            "legal",
            &["lawsuit", "my lawyer", "attorney"],
            80,
        )]);
        let hit = detect_escalation(
            "my lawyer says the lawsuit is ready",
            &snapshot,
        )
        .unwrap();
        assert_eq!(hit.triggers, vec!["lawsuit", "my lawyer"]);
        assert_eq!(hit.urgency, Urgency::High);
    }

    #[test]
    fn disabled_categories_are_skipped() {
        let mut disabled = setting("crisis", &["suicide"], 100);
        disabled.enabled = false;
        let snapshot = snapshot_with(vec![disabled]);
        assert!(detect_escalation("suicide", &snapshot).is_none());
    }

    #[test]
    fn priority_ties_break_by_category_name() {
        let snapshot = snapshot_with(vec![
            setting("zeta", &["hit"], 50),
            setting("alpha", &["hit"], 50),
        ]);
        let hit = detect_escalation("hit", &snapshot).unwrap();
        assert_eq!(hit.category, "alpha");
    }

    #[test]
    fn no_match_is_none() {
        let snapshot = snapshot_with(vec![setting("crisis", &["suicide"], 100)]);
        assert!(detect_escalation("how do I reset my password", &snapshot).is_none());
    }
}
