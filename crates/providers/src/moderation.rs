//! Hosted moderation adapter (OpenAI-compatible `/moderations` contract).
//!
//! Returns raw category flags and scores; thresholding happens locally in
//! the rule engine against the current policy snapshot.


use serde_json::Value;

use pal_domain::config::ModerationClientConfig;
use pal_domain::error::{Error, Result};

use crate::traits::{ModerationOutcome, ModerationProvider};

pub struct HostedModerationProvider {
    id: String,
    base_url: String,
    api_key: String,
    model: Option<String>,
    client: reqwest::Client,
}

impl HostedModerationProvider {
    pub fn new(cfg: &ModerationClientConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| Error::ModerationUnavailable(e.to_string()))?;

        Ok(Self {
            id: "hosted-moderation".to_string(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: cfg.model.clone(),
            client,
        })
    }
}

/// Pull `{categories, category_scores}` out of the first result entry.
///
/// Scores are clamped to finite `[0, 1]` so the invariant holds even for
/// a misbehaving provider.
fn parse_response(value: &Value) -> ModerationOutcome {
    let mut outcome = ModerationOutcome::default();

    let Some(result) = value.pointer("/results/0") else {
        return outcome;
    };

    if let Some(categories) = result.get("categories").and_then(Value::as_object) {
        for (category, flagged) in categories {
            outcome
                .flags
                .insert(category.clone(), flagged.as_bool().unwrap_or(false));
        }
    }
    if let Some(scores) = result.get("category_scores").and_then(Value::as_object) {
        for (category, score) in scores {
            let score = score.as_f64().unwrap_or(0.0);
            let score = if score.is_finite() {
                score.clamp(0.0, 1.0)
            } else {
                0.0
            };
            outcome.scores.insert(category.clone(), score);
        }
    }

    outcome
}

#[async_trait::async_trait]
impl ModerationProvider for HostedModerationProvider {
    async fn moderate(&self, text: &str) -> Result<ModerationOutcome> {
        let url = format!("{}/moderations", self.base_url);
        let mut body = serde_json::json!({ "input": text });
        if let Some(ref model) = self.model {
            body["model"] = Value::String(model.clone());
        }

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::ModerationUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::ModerationUnavailable(format!(
                "moderation endpoint returned {status}"
            )));
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| Error::ModerationUnavailable(e.to_string()))?;
        Ok(parse_response(&value))
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Deterministic fake for tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Moderation fake returning fixed scores, for rule-engine and pipeline
/// tests.  Keyed substring → (category, score).
pub struct ScriptedModerationProvider {
    pub responses: Vec<(String, String, f64)>,
}

impl ScriptedModerationProvider {
    pub fn new(responses: Vec<(&str, &str, f64)>) -> Self {
        Self {
            responses: responses
                .into_iter()
                .map(|(needle, category, score)| {
                    (needle.to_string(), category.to_string(), score)
                })
                .collect(),
        }
    }

    /// A fake that scores everything zero.
    pub fn clean() -> Self {
        Self {
            responses: Vec::new(),
        }
    }
}

#[async_trait::async_trait]
impl ModerationProvider for ScriptedModerationProvider {
    async fn moderate(&self, text: &str) -> Result<ModerationOutcome> {
        let mut outcome = ModerationOutcome::default();
        for (needle, category, score) in &self.responses {
            if text.contains(needle.as_str()) {
                outcome.scores.insert(category.clone(), *score);
                outcome.flags.insert(category.clone(), *score >= 0.5);
            }
        }
        Ok(outcome)
    }

    fn provider_id(&self) -> &str {
        "scripted-moderation"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_parsing_extracts_both_maps() {
        let value: Value = serde_json::from_str(
            r#"{"results":[{"flagged":true,
                "categories":{"hate":true,"violence":false},
                "category_scores":{"hate":0.91,"violence":0.02}}]}"#,
        )
        .unwrap();
        let outcome = parse_response(&value);
        assert_eq!(outcome.flags.get("hate"), Some(&true));
        assert_eq!(outcome.flags.get("violence"), Some(&false));
        assert_eq!(outcome.scores.get("hate"), Some(&0.91));
    }

    #[test]
    fn scores_are_clamped_to_unit_interval() {
        let value: Value = serde_json::from_str(
            r#"{"results":[{"category_scores":{"hate":1.7,"spam":-0.2}}]}"#,
        )
        .unwrap();
        let outcome = parse_response(&value);
        assert_eq!(outcome.scores.get("hate"), Some(&1.0));
        assert_eq!(outcome.scores.get("spam"), Some(&0.0));
    }

    #[test]
    fn empty_results_yield_empty_outcome() {
        let value: Value = serde_json::from_str(r#"{"results":[]}"#).unwrap();
        let outcome = parse_response(&value);
        assert!(outcome.flags.is_empty());
        assert!(outcome.scores.is_empty());
    }

    #[tokio::test]
    async fn scripted_fake_matches_substrings() {
        let fake = ScriptedModerationProvider::new(vec![("hurt", "self-harm/intent", 0.35)]);
        let outcome = fake.moderate("I want to hurt myself").await.unwrap();
        assert_eq!(outcome.scores.get("self-harm/intent"), Some(&0.35));

        let clean = fake.moderate("what is the weather").await.unwrap();
        assert!(clean.scores.is_empty());
    }
}
