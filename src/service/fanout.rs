//! Bounded-concurrency execution of the question battery.

use futures_util::stream::{self, StreamExt};

use crate::domain::{AccountId, Answer, Question};
use crate::remote::{RemoteClient, run_query};

/// Answers of one battery run.
#[derive(Debug, Clone, PartialEq)]
pub struct FanOutOutcome {
    /// One answer per question, in question order.
    pub answers: Vec<Answer>,
    /// Number of questions that failed.
    pub error_count: usize,
}

/// Runs every question against one account with a cap on in-flight queries.
#[derive(Debug, Clone, Copy)]
pub struct FanOutExecutor {
    concurrency: usize,
    large_result_threshold: usize,
}

impl FanOutExecutor {
    /// Creates an executor. A zero `concurrency` is treated as one.
    #[must_use]
    pub fn new(concurrency: usize, large_result_threshold: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            large_result_threshold,
        }
    }

    /// Runs `questions` and collects their answers in input order.
    ///
    /// A slot frees as soon as any query finishes, so one slow question
    /// does not hold back the ones queued behind it.
    ///
    /// A failing question yields an answer with a `null` payload and an
    /// error descriptor; it never aborts the batch.
    pub async fn run_all(
        &self,
        account_id: &AccountId,
        client: &dyn RemoteClient,
        questions: &[Question],
    ) -> FanOutOutcome {
        let pending: Vec<_> = questions
            .iter()
            .enumerate()
            .map(|(index, question)| async move {
                (index, self.answer(account_id, client, question).await)
            })
            .collect();
        let mut indexed: Vec<(usize, Answer)> = stream::iter(pending)
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        indexed.sort_unstable_by_key(|(index, _)| *index);
        let answers: Vec<Answer> = indexed.into_iter().map(|(_, answer)| answer).collect();
        let error_count = answers.iter().filter(|a| a.is_error()).count();
        FanOutOutcome {
            answers,
            error_count,
        }
    }

    async fn answer(
        &self,
        account_id: &AccountId,
        client: &dyn RemoteClient,
        question: &Question,
    ) -> Answer {
        let mut result = match run_query(client, question).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(
                    %account_id,
                    question = %question.name,
                    query = %question.query,
                    error = %e,
                    "non-blocking error while querying data"
                );
                return Answer::failure(question, e.descriptor());
            }
        };

        if !question.keep_large_results && result.records.len() > self.large_result_threshold {
            tracing::info!(
                %account_id,
                question = %question.name,
                records = result.records.len(),
                "suppressing large result"
            );
            result.records.clear();
            result.records_suppressed = true;
        }

        match serde_json::to_value(&result) {
            Ok(payload) => Answer::success(question, payload),
            Err(e) => Answer::failure(question, format!("SerializationError: {e}")),
        }
    }
}
