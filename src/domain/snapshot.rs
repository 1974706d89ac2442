//! Snapshot documents: query results, answers and API usage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::question::{Question, QueryEngine};
use super::AccountId;

/// Fully materialized result of one paginated query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    /// Total matching records as reported by the last page.
    pub total_size: u64,
    /// Whether the last page closed the result set.
    pub done: bool,
    /// Continuation locator of the page, absent on the last one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_records_url: Option<String>,
    /// Records in page order.
    #[serde(default)]
    pub records: Vec<Value>,
    /// Set when the record list was dropped for exceeding the size threshold.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub records_suppressed: bool,
}

impl QueryResult {
    /// Builds a single page.
    #[must_use]
    pub fn page(records: Vec<Value>, total_size: u64, next_records_url: Option<String>) -> Self {
        Self {
            total_size,
            done: next_records_url.is_none(),
            next_records_url,
            records,
            records_suppressed: false,
        }
    }
}

/// Result (or error) of one question for one account in one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    /// Question name.
    pub name: String,
    /// Lowercase alphanumeric hash of the name.
    pub hash: String,
    /// Icon class, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// Engine selector; omitted for the default engine.
    #[serde(default, skip_serializing_if = "QueryEngine::is_default")]
    pub engine: QueryEngine,
    /// Query text; absent on synthesized answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
    /// Result payload, `null` when the question failed.
    pub a: Option<Value>,
    /// Error descriptor when the question failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Answer {
    /// Builds the successful answer to `question`.
    #[must_use]
    pub fn success(question: &Question, payload: Value) -> Self {
        Self {
            a: Some(payload),
            error: None,
            ..Self::blank(question)
        }
    }

    /// Builds the failed answer to `question` with the given descriptor.
    #[must_use]
    pub fn failure(question: &Question, descriptor: String) -> Self {
        Self {
            a: None,
            error: Some(descriptor),
            ..Self::blank(question)
        }
    }

    fn blank(question: &Question) -> Self {
        Self {
            name: question.name.clone(),
            hash: question.hash(),
            icon: question.icon.clone(),
            engine: question.engine,
            q: Some(question.query.clone()),
            a: None,
            error: None,
        }
    }

    /// Returns `true` when the answer carries an error descriptor.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// One persisted bundle of answers for one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Assembly time.
    pub time: DateTime<Utc>,
    /// Owning account.
    pub account_id: AccountId,
    /// One answer per question, then the API usage answer.
    pub answers: Vec<Answer>,
}

/// Daily API request quota reported by the remote system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiUsage {
    /// Requests used so far.
    pub used: u64,
    /// Request allowance.
    pub limit: u64,
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn answer_omits_default_engine_and_keeps_null_payload() {
        let question = Question::new("Profiles", "select count() from Profile");
        let answer = Answer::failure(&question, "INVALID_FIELD".into());
        let Ok(doc) = serde_json::to_value(&answer) else {
            panic!("serialize failed");
        };
        assert!(doc.get("engine").is_none());
        assert_eq!(doc.get("a"), Some(&Value::Null));
        assert_eq!(doc.get("error"), Some(&json!("INVALID_FIELD")));
        assert_eq!(doc.get("hash"), Some(&json!("profiles")));
    }

    #[test]
    fn tooling_answer_serializes_engine() {
        let question = Question::new("sObjects", "select x from entitydefinition").tooling();
        let answer = Answer::success(&question, json!({"totalSize": 0}));
        let Ok(doc) = serde_json::to_value(&answer) else {
            panic!("serialize failed");
        };
        assert_eq!(doc.get("engine"), Some(&json!("tooling")));
        assert!(!answer.is_error());
    }

    #[test]
    fn page_is_done_without_continuation() {
        let last = QueryResult::page(vec![json!({"Id": 1})], 1, None);
        assert!(last.done);
        let first = QueryResult::page(vec![], 30, Some("/next".into()));
        assert!(!first.done);
    }

    #[test]
    fn query_result_uses_wire_names() {
        let Ok(result) = serde_json::from_value::<QueryResult>(json!({
            "totalSize": 2,
            "done": false,
            "nextRecordsUrl": "/services/data/v59.0/query/01g-2000",
            "records": [{"Id": "a"}, {"Id": "b"}]
        })) else {
            panic!("deserialize failed");
        };
        assert_eq!(result.total_size, 2);
        assert_eq!(result.records.len(), 2);
        assert!(!result.records_suppressed);
    }
}
