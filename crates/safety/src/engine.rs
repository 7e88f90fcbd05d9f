//! The rule engine: fans a text out through the pattern matcher, the
//! moderation provider, and the escalation detector, then resolves all
//! hits into one authoritative [`Decision`].
//!
//! Resolution is a pure function of `(text, snapshot)` — the moderation
//! provider is the only injected capability, so tests substitute
//! deterministic fakes and the same inputs always yield the same
//! decision.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use pal_domain::policy::{RuleAction, Urgency};
use pal_providers::{ModerationOutcome, ModerationProvider};

use crate::escalation::{detect_escalation, Escalation};
use crate::patterns::{PatternMatch, PatternMatcher};
use crate::snapshot::Snapshot;

/// Fallback template when an escalation has no configured category
/// template (e.g. an `escalate`-action rule fires for a category with no
/// escalation setting).
const DEFAULT_ESCALATION_TEMPLATE: &str =
    "I've escalated this conversation to our team — a person will review it and follow up.";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Decision & reasons
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasonSource {
    Pattern,
    Moderation,
    Escalation,
}

/// One contributing hit, kept for audit regardless of which action won.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reason {
    pub source: ReasonSource,
    pub category: String,
    pub action: RuleAction,
    /// Rule id + matched text, moderation score, or triggering keywords.
    pub detail: String,
}

/// The authoritative outcome for one evaluated text.
///
/// Only the dominant action controls downstream behavior; `reasons`
/// always carries every contributing hit.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "decision", rename_all = "lowercase")]
pub enum Decision {
    Allow,
    Warn {
        reasons: Vec<Reason>,
    },
    Flag {
        reasons: Vec<Reason>,
    },
    Escalate {
        category: String,
        urgency: Urgency,
        response_template: String,
        triggers: Vec<String>,
        reasons: Vec<Reason>,
    },
    Block {
        category: String,
        reasons: Vec<Reason>,
    },
}

impl Decision {
    pub fn label(&self) -> &'static str {
        match self {
            Decision::Allow => "allow",
            Decision::Warn { .. } => "warn",
            Decision::Flag { .. } => "flag",
            Decision::Escalate { .. } => "escalate",
            Decision::Block { .. } => "block",
        }
    }

    pub fn reasons(&self) -> &[Reason] {
        match self {
            Decision::Allow => &[],
            Decision::Warn { reasons }
            | Decision::Flag { reasons }
            | Decision::Escalate { reasons, .. }
            | Decision::Block { reasons, .. } => reasons,
        }
    }

    pub fn is_blocking(&self) -> bool {
        matches!(self, Decision::Block { .. })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One moderation category that crossed its local threshold.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationHit {
    pub category: String,
    pub score: f64,
    pub action: RuleAction,
}

/// Everything the pipeline needs from one evaluation: the decision plus
/// the raw moderation data for the audit record.
#[derive(Debug)]
pub struct EngineOutcome {
    pub decision: Decision,
    /// Raw provider outcome; `None` when moderation was skipped or
    /// disabled.
    pub moderation: Option<ModerationOutcome>,
    /// Locally-thresholded flag per scored category (for the audit log).
    pub local_flags: HashMap<String, bool>,
    pub moderation_skipped: bool,
}

impl EngineOutcome {
    /// Whether any moderation category tripped its local threshold.
    pub fn any_moderation_flag(&self) -> bool {
        self.local_flags.values().any(|v| *v)
    }
}

pub struct RuleEngine {
    matcher: Arc<PatternMatcher>,
    moderation: Option<Arc<dyn ModerationProvider>>,
}

impl RuleEngine {
    pub fn new(
        matcher: Arc<PatternMatcher>,
        moderation: Option<Arc<dyn ModerationProvider>>,
    ) -> Self {
        Self { matcher, moderation }
    }

    /// Evaluate a text against the snapshot.  The only I/O is the
    /// moderation call; its failure downgrades to a recorded skip rather
    /// than an error.
    pub async fn evaluate(&self, text: &str, snapshot: &Snapshot) -> EngineOutcome {
        let matches = self.matcher.find_matches(text, snapshot);

        let (moderation, moderation_skipped) = match &self.moderation {
            Some(provider) => match provider.moderate(text).await {
                Ok(outcome) => (Some(outcome), false),
                Err(e) => {
                    tracing::warn!(error = %e, "moderation unavailable — layer skipped");
                    (None, true)
                }
            },
            None => (None, true),
        };

        let escalation = detect_escalation(text, snapshot);

        let (hits, local_flags) = match &moderation {
            Some(outcome) => apply_thresholds(outcome, snapshot),
            None => (Vec::new(), HashMap::new()),
        };

        let decision = resolve(&matches, &hits, escalation, snapshot);
        tracing::debug!(
            decision = decision.label(),
            pattern_matches = matches.len(),
            moderation_hits = hits.len(),
            moderation_skipped,
            "rule engine resolved"
        );

        EngineOutcome {
            decision,
            moderation,
            local_flags,
            moderation_skipped,
        }
    }
}

/// Apply the snapshot's per-category thresholds to raw provider scores.
///
/// The local verdict overrides the provider's flagged bit: a category is
/// flagged iff its setting is enabled and `score ≥ threshold`.  Scored
/// categories without a setting are ignored (the category set is open).
pub fn apply_thresholds(
    outcome: &ModerationOutcome,
    snapshot: &Snapshot,
) -> (Vec<ModerationHit>, HashMap<String, bool>) {
    let mut hits = Vec::new();
    let mut local_flags = HashMap::new();

    let mut categories: Vec<&String> = outcome.scores.keys().collect();
    categories.sort();

    for category in categories {
        let Some(setting) = snapshot.moderation.get(category) else {
            continue;
        };
        if !setting.enabled {
            continue;
        }
        let score = outcome.scores[category];
        let flagged = score >= setting.threshold;
        local_flags.insert(category.clone(), flagged);
        if flagged {
            hits.push(ModerationHit {
                category: category.clone(),
                score,
                action: setting.action,
            });
        }
    }

    (hits, local_flags)
}

/// The resolution policy, evaluated in strict order; the first satisfied
/// step wins:
///
/// 1. pattern match with action `block`
/// 2. moderation category flagged with action `block`
/// 3. escalation detector hit
/// 4. pattern match or moderation category with action `escalate`
/// 5. any hit with action `warn`
/// 6. any hit with action `flag`
/// 7. allow
fn resolve(
    matches: &[PatternMatch],
    moderation_hits: &[ModerationHit],
    escalation: Option<Escalation>,
    snapshot: &Snapshot,
) -> Decision {
    let reasons = collect_reasons(matches, moderation_hits, escalation.as_ref());

    if let Some(hit) = matches.iter().find(|m| m.rule.action == RuleAction::Block) {
        return Decision::Block {
            category: hit.rule.category.clone(),
            reasons,
        };
    }

    if let Some(hit) = moderation_hits
        .iter()
        .find(|h| h.action == RuleAction::Block)
    {
        return Decision::Block {
            category: hit.category.clone(),
            reasons,
        };
    }

    if let Some(escalation) = escalation {
        return Decision::Escalate {
            category: escalation.category,
            urgency: escalation.urgency,
            response_template: escalation.response_template,
            triggers: escalation.triggers,
            reasons,
        };
    }

    let escalating_category = matches
        .iter()
        .find(|m| m.rule.action == RuleAction::Escalate)
        .map(|m| m.rule.category.clone())
        .or_else(|| {
            moderation_hits
                .iter()
                .find(|h| h.action == RuleAction::Escalate)
                .map(|h| h.category.clone())
        });
    if let Some(category) = escalating_category {
        let template = snapshot
            .escalation
            .iter()
            .find(|s| s.category == category)
            .map(|s| s.response_template.clone())
            .unwrap_or_else(|| DEFAULT_ESCALATION_TEMPLATE.to_string());
        return Decision::Escalate {
            category,
            urgency: Urgency::Normal,
            response_template: template,
            triggers: Vec::new(),
            reasons,
        };
    }

    let has_action = |action: RuleAction| {
        matches.iter().any(|m| m.rule.action == action)
            || moderation_hits.iter().any(|h| h.action == action)
    };

    if has_action(RuleAction::Warn) {
        return Decision::Warn { reasons };
    }
    if has_action(RuleAction::Flag) {
        return Decision::Flag { reasons };
    }

    Decision::Allow
}

/// Resolution without the moderation layer, for admin dry-runs of the
/// pattern rules and escalation keywords.
pub fn resolve_patterns_only(
    matches: &[PatternMatch],
    escalation: Option<Escalation>,
    snapshot: &Snapshot,
) -> Decision {
    resolve(matches, &[], escalation, snapshot)
}

/// The complete audit-reason list: pattern hits first (already in
/// priority order), then thresholded moderation categories (sorted by
/// name), then the escalation hit.
fn collect_reasons(
    matches: &[PatternMatch],
    moderation_hits: &[ModerationHit],
    escalation: Option<&Escalation>,
) -> Vec<Reason> {
    let mut reasons = Vec::new();

    for hit in matches {
        reasons.push(Reason {
            source: ReasonSource::Pattern,
            category: hit.rule.category.clone(),
            action: hit.rule.action,
            detail: format!("rule {} matched {:?}", hit.rule.id, hit.matched_text),
        });
    }
    for hit in moderation_hits {
        reasons.push(Reason {
            source: ReasonSource::Moderation,
            category: hit.category.clone(),
            action: hit.action,
            detail: format!("score {:.3}", hit.score),
        });
    }
    if let Some(escalation) = escalation {
        reasons.push(Reason {
            source: ReasonSource::Escalation,
            category: escalation.category.clone(),
            action: RuleAction::Escalate,
            detail: format!("keywords: {}", escalation.triggers.join(", ")),
        });
    }

    reasons
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
