//! Structural metadata returned by `initialise`, and the unit plan derived from it.

use std::collections::BTreeMap;

use folio_core::{FolioError, FolioResult, UnitIndex};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

/// Layout of one content item as described by the server
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuralMetadata {
    pub book_type: String,
    #[serde(rename = "numberOfChapters")]
    pub num_chapters: u64,
    /// Top-level unit key → boundaries of its extra sub-units
    #[serde(default)]
    pub book_map: Option<BTreeMap<u64, Vec<Value>>>,
}

/// One fetchable unit: the request coordinates plus its global index
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct UnitRef {
    /// Top-level unit key, sent as `pageId`
    pub page_id: u64,
    /// Sub-unit offset, sent as `mergedChapterPartIndex`
    pub part_index: u64,
    pub index: UnitIndex,
}

impl StructuralMetadata {
    /// Parse the reassembled `initialise` payload.
    ///
    /// The server sometimes double-encodes it: the JSON document is a string
    /// whose contents are the actual object. One extra layer is unwrapped.
    pub fn parse(text: &str) -> FolioResult<Self> {
        let value: Value = serde_json::from_str(text).map_err(malformed)?;
        let value = match value {
            Value::String(inner) => serde_json::from_str(&inner).map_err(malformed)?,
            other => other,
        };
        serde_json::from_value(value).map_err(malformed)
    }

    /// Sub-unit count per top-level unit key. Every unit has at least one.
    pub fn unit_lengths(&self) -> BTreeMap<u64, u64> {
        match &self.book_map {
            Some(map) => map
                .iter()
                .map(|(key, parts)| (*key, parts.len() as u64 + 1))
                .collect(),
            None => (1..=self.num_chapters).map(|key| (key, 1)).collect(),
        }
    }

    /// Every unit in ascending (key, offset) order, with `index = key + offset`.
    pub fn plan(&self) -> Vec<UnitRef> {
        let mut plan: Vec<UnitRef> = Vec::new();
        for (page_id, parts) in self.unit_lengths() {
            for part_index in 0..parts {
                let index = page_id + part_index;
                if plan.last().is_some_and(|prev| prev.index >= index) {
                    warn!(page_id, part_index, index, "unit index overlaps the previous unit");
                }
                plan.push(UnitRef {
                    page_id,
                    part_index,
                    index,
                });
            }
        }
        plan
    }
}

fn malformed(e: serde_json::Error) -> FolioError {
    FolioError::protocol(format!("malformed structural metadata: {e}"))
}
