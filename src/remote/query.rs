//! Paginated query execution.

use crate::domain::{QueryResult, Question};

use super::{RemoteClient, RemoteError};

/// Runs `question` to completion and returns every record.
///
/// Follows `nextRecordsUrl` until the remote reports `done`, appending
/// records in page order. The question's post-filter, if any, is applied
/// to the accumulated records; the rest of the result keeps the last
/// page's metadata. A failure on any page discards everything fetched so
/// far.
///
/// # Errors
///
/// Returns the [`RemoteError`] of the first failing page, or a protocol
/// error when a page is not done yet has no continuation locator.
pub async fn run_query(
    client: &dyn RemoteClient,
    question: &Question,
) -> Result<QueryResult, RemoteError> {
    let mut page = client.query(question.engine, &question.query).await?;
    let mut records = std::mem::take(&mut page.records);

    while !page.done {
        let Some(next) = page.next_records_url.take() else {
            return Err(RemoteError::named(
                "ProtocolError",
                "result page is not done but has no nextRecordsUrl",
            ));
        };
        tracing::debug!(question = %question.name, fetched = records.len(), "querying more records");
        page = client.query_more(question.engine, &next).await?;
        records.append(&mut page.records);
    }

    if let Some(filter) = question.filter {
        records.retain(filter);
    }
    page.records = records;
    Ok(page)
}
