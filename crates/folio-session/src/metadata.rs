//! Descriptive metadata lookup over HTTP.
//!
//! `GET {metadata_url}{book_id}` answers with
//! `{"success": true, "data": {"results": [{title, author, ...}]}}`.
//! Only the first result is used.

use folio_core::{BookMetadata, FolioError, FolioResult};
use serde_json::Value;
use tracing::debug;

pub async fn fetch_metadata(
    client: &reqwest::Client,
    base_url: &str,
    book_id: u64,
) -> FolioResult<BookMetadata> {
    let url = metadata_url(base_url, book_id);
    debug!(book_id, %url, "looking up metadata");

    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| FolioError::Transport(format!("GET {url}: {e}")))?;

    let status = response.status();
    if status != reqwest::StatusCode::OK {
        return Err(FolioError::Metadata(format!(
            "unexpected response from server ({})",
            status.as_u16()
        )));
    }

    let body: Value = response
        .json()
        .await
        .map_err(|e| FolioError::Metadata(format!("response is not JSON: {e}")))?;
    parse_metadata_response(book_id, body)
}

/// Validate the lookup envelope and extract the first result.
pub fn parse_metadata_response(book_id: u64, body: Value) -> FolioResult<BookMetadata> {
    if body.get("success").and_then(Value::as_bool) != Some(true) {
        return Err(FolioError::Metadata(format!(
            "received error response from server: {body}"
        )));
    }

    let first = body
        .pointer("/data/results/0")
        .cloned()
        .ok_or_else(|| FolioError::Metadata(format!("no results found for book id {book_id}")))?;

    serde_json::from_value(first)
        .map_err(|e| FolioError::Metadata(format!("invalid metadata for book id {book_id}: {e}")))
}

fn metadata_url(base_url: &str, book_id: u64) -> String {
    format!("{}/{book_id}", base_url.trim_end_matches('/'))
}
