//! Wire message shapes of the page delivery service.
//!
//! Outbound:
//! ```text
//! {"action":"initialise","data":{"authToken","reCaptchaToken","bookId"}}
//! {"action":"loadPage","data":"<base64 envelope of LoadPageData>"}
//! ```
//! Inbound:
//! ```text
//! {"event":"initialisationDataChunk","data":{"numberOfChunks","chunkNumber","content"}}
//! {"event":"pageChunk-<n>","data":{"numberOfChunks","chunkNumber","mergedChapterNumber"?,"numberOfMergedChapters"?,"content"}}
//! {"event":"error","data":{"code","message"}}
//! ```

use folio_core::{FolioError, FolioResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub const INIT_CHUNK_EVENT: &str = "initialisationDataChunk";
pub const PAGE_CHUNK_EVENT_PREFIX: &str = "pageChunk-";
pub const ERROR_EVENT: &str = "error";

/// A request sent by the client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", content = "data")]
pub enum Command {
    #[serde(rename = "initialise")]
    Initialise(InitialiseData),
    /// Payload is the encrypted envelope of a [`LoadPageData`]
    #[serde(rename = "loadPage")]
    LoadPage(String),
}

impl Command {
    pub fn to_json(&self) -> FolioResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialiseData {
    pub auth_token: String,
    #[serde(rename = "reCaptchaToken")]
    pub recaptcha_token: String,
    pub book_id: u64,
}

/// Plaintext of a `loadPage` request before encryption
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadPageData {
    pub auth_token: String,
    pub page_id: u64,
    pub book_type: String,
    pub window_width: u32,
    pub merged_chapter_part_index: u64,
    /// Milliseconds since the Unix epoch
    pub client_timestamp: u64,
}

/// One fragment of the structural metadata
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitChunk {
    pub number_of_chunks: u32,
    pub chunk_number: u32,
    pub content: String,
}

/// One fragment of a page, possibly belonging to one of several merged groups.
///
/// The server's field names read backwards: `mergedChapterNumber` carries the
/// number of merged groups, `numberOfMergedChapters` the group this chunk
/// belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageChunk {
    pub number_of_chunks: u32,
    pub chunk_number: u32,
    /// Number of merged groups making up the page (absent → 1)
    #[serde(default)]
    pub merged_chapter_number: Option<u32>,
    /// Index of the merged group this chunk belongs to (absent → 0)
    #[serde(default)]
    pub number_of_merged_chapters: Option<u32>,
    pub content: String,
}

impl PageChunk {
    pub fn group(&self) -> u32 {
        self.number_of_merged_chapters.unwrap_or(0)
    }

    pub fn expected_groups(&self) -> u32 {
        self.merged_chapter_number.unwrap_or(1)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorDetails {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Parse an inbound message expected during initialisation.
pub fn parse_init_event(text: &str) -> FolioResult<InitChunk> {
    let raw = parse_raw(text)?;
    match raw.event.as_str() {
        INIT_CHUNK_EVENT => decode_data(&raw),
        ERROR_EVENT => Err(server_error(raw)),
        other => Err(unexpected_event(other)),
    }
}

/// Parse an inbound message expected while a page is loading.
pub fn parse_page_event(text: &str) -> FolioResult<PageChunk> {
    let raw = parse_raw(text)?;
    if raw.event == ERROR_EVENT {
        return Err(server_error(raw));
    }
    if !is_page_chunk_event(&raw.event) {
        return Err(unexpected_event(&raw.event));
    }
    decode_data(&raw)
}

/// `pageChunk-` followed by one or more ASCII digits
pub fn is_page_chunk_event(event: &str) -> bool {
    event
        .strip_prefix(PAGE_CHUNK_EVENT_PREFIX)
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

fn parse_raw(text: &str) -> FolioResult<RawEvent> {
    serde_json::from_str(text).map_err(|e| FolioError::protocol(format!("malformed message: {e}")))
}

fn decode_data<T: DeserializeOwned>(raw: &RawEvent) -> FolioResult<T> {
    T::deserialize(&raw.data).map_err(|e| {
        FolioError::protocol(format!("malformed `{}` payload: {e}", raw.event))
    })
}

fn server_error(raw: RawEvent) -> FolioError {
    match serde_json::from_value::<ErrorDetails>(raw.data) {
        Ok(details) => FolioError::server(details.code, details.message),
        Err(e) => FolioError::protocol(format!("malformed error event: {e}")),
    }
}

fn unexpected_event(event: &str) -> FolioError {
    FolioError::protocol(format!("unexpected event: {event}"))
}
