//! Turns a battery run into a persisted-ready snapshot and updates the
//! account's status fields.

use chrono::Utc;
use serde_json::{Value, json};

use crate::domain::{
    AccountCredential, Answer, ApiUsage, ERROR_SCORE, QueryEngine, Snapshot, question_hash,
};
use crate::error::AppError;
use crate::persistence::AccountRepository;

use super::fanout::FanOutOutcome;

/// Name of the synthesized quota answer appended to every snapshot.
pub const API_USAGE_ANSWER: &str = "API usage";

/// Metadata key the remote system adds to every record.
const METADATA_FIELD: &str = "attributes";

/// Abbreviates `n` with one decimal and a `k`/`m`/`b`/`t` suffix.
///
/// The unit is chosen after rounding, so `999_950` reads `1.0m`.
fn abbreviate(n: u64) -> String {
    const LARGER_UNITS: [&str; 3] = ["m", "b", "t"];
    if n < 1_000 {
        return format!("{n}.0");
    }
    let mut scaled = n as f64 / 1_000.0;
    let mut suffix = "k";
    for next in LARGER_UNITS {
        if (scaled * 10.0).round() < 10_000.0 {
            break;
        }
        scaled /= 1_000.0;
        suffix = next;
    }
    format!("{scaled:.1}{suffix}")
}

/// Renders API usage as `"15.2k out of 5.0m"`, or `"ERR"` when unknown.
#[must_use]
pub fn format_api_usage(usage: Option<ApiUsage>) -> String {
    match usage {
        Some(ApiUsage { used, limit }) if used > 0 && limit > 0 => {
            format!("{} out of {}", abbreviate(used), abbreviate(limit))
        }
        _ => ERROR_SCORE.to_string(),
    }
}

/// Reads the `Score` of the first record of the first answer.
///
/// Returns `"<score>%"`, or `"ERR"` when the answer failed or carries no
/// score.
#[must_use]
pub fn health_check_score(answers: &[Answer]) -> String {
    let score = answers
        .first()
        .and_then(|answer| answer.a.as_ref())
        .and_then(|payload| payload.get("records"))
        .and_then(|records| records.get(0))
        .and_then(|record| record.get("Score"));
    match score {
        Some(Value::Number(n)) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 => format!("{f:.0}%"),
            _ => format!("{n}%"),
        },
        Some(Value::String(s)) if !s.is_empty() => format!("{s}%"),
        _ => ERROR_SCORE.to_string(),
    }
}

/// Computes the new failure flag, or `None` when it does not change.
///
/// The flag is set when every question failed and cleared as soon as one
/// succeeds. An empty battery never sets it.
#[must_use]
pub fn failure_transition(currently_failed: bool, error_count: usize, total: usize) -> Option<bool> {
    let all_failed = total > 0 && error_count >= total;
    match (all_failed, currently_failed) {
        (true, false) => Some(true),
        (false, true) => Some(false),
        _ => None,
    }
}

/// Removes `field` from every object nested in `value`.
pub fn strip_field(value: &mut Value, field: &str) {
    match value {
        Value::Object(map) => {
            map.remove(field);
            for nested in map.values_mut() {
                strip_field(nested, field);
            }
        }
        Value::Array(items) => {
            for item in items {
                strip_field(item, field);
            }
        }
        _ => {}
    }
}

fn api_usage_answer(usage: Option<ApiUsage>) -> Answer {
    Answer {
        name: API_USAGE_ANSWER.to_string(),
        hash: question_hash(API_USAGE_ANSWER),
        icon: Some("fa-terminal".to_string()),
        engine: QueryEngine::Default,
        q: None,
        a: Some(json!({ "totalSize": format_api_usage(usage) })),
        error: None,
    }
}

/// Builds snapshots and writes the derived status back to the credential.
#[derive(Debug, Clone)]
pub struct SnapshotAssembler {
    repository: AccountRepository,
}

impl SnapshotAssembler {
    /// Creates an assembler writing through `repository`.
    #[must_use]
    pub fn new(repository: AccountRepository) -> Self {
        Self { repository }
    }

    /// Assembles the snapshot of one refresh.
    ///
    /// Appends the API usage answer, stores the health score and failure
    /// flag on the credential, and strips record metadata from every
    /// payload. The snapshot itself is not persisted.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] if the account was deleted while it
    /// was being refreshed, or [`AppError::Persistence`] on storage failure.
    pub async fn assemble(
        &self,
        credential: &AccountCredential,
        outcome: FanOutOutcome,
        total_questions: usize,
        api_usage: Option<ApiUsage>,
    ) -> Result<Snapshot, AppError> {
        let account_id = &credential.account_id;
        let FanOutOutcome {
            mut answers,
            error_count,
        } = outcome;
        answers.push(api_usage_answer(api_usage));

        let score = health_check_score(&answers);
        let transition = failure_transition(credential.failed, error_count, total_questions);
        tracing::info!(%account_id, errors = error_count, score = %score, "sync complete");
        match transition {
            Some(true) => tracing::warn!(%account_id, "all queries failed"),
            Some(false) => tracing::info!(%account_id, "account recovered"),
            None => {}
        }

        self.repository
            .patch_credential(account_id, |stored| {
                stored.health_check_score = score;
                if let Some(failed) = transition {
                    stored.failed = failed;
                }
            })
            .await?;

        for answer in &mut answers {
            if let Some(payload) = answer.a.as_mut() {
                strip_field(payload, METADATA_FIELD);
            }
        }

        Ok(Snapshot {
            time: Utc::now(),
            account_id: account_id.clone(),
            answers,
        })
    }
}
