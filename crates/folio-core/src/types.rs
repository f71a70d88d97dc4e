use serde::{Deserialize, Deserializer, Serialize};

/// Position of a content unit within one book: top-level unit key + sub-unit offset.
///
/// Used as the cache key and as the merge order of the rendered document.
pub type UnitIndex = u64;

/// One unit of decrypted content produced by a fetch session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedUnit {
    pub index: UnitIndex,
    pub content: String,
    /// Number of units in the whole book, for progress reporting
    pub total_units: usize,
    /// true if served from the local content cache without network I/O
    pub from_cache: bool,
}

/// Descriptive metadata returned by the metadata lookup service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookMetadata {
    pub title: String,
    pub author: String,
    #[serde(default)]
    pub subtitle: Option<String>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub num_pages: Option<u64>,
    #[serde(default)]
    pub isbn13: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
}

/// Accepts a number, a numeric string, an empty string, or null.
fn lenient_count<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Num(n)) => Ok(Some(n)),
        Some(Raw::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(Raw::Text(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid page count: {s:?}"))),
    }
}
