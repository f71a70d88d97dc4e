//! Chunk reassembly with count-based completion.
//!
//! A [`ChunkGroup`] collects fragments by chunk number and is complete once it
//! holds as many distinct chunks as the sender declared. A [`UnitAssembler`]
//! nests groups for pages the server splits into merged groups: it is complete
//! when every expected group has been seen and each group is itself complete.
//!
//! Completion is never inferred from silence. A sender that under-reports its
//! counts stalls the exchange until the session's receive timeout fires.

use std::collections::BTreeMap;

use crate::protocol::PageChunk;

/// Fragments of one chunked payload, keyed by chunk number
#[derive(Debug, Default, Clone)]
pub struct ChunkGroup {
    expected: Option<u32>,
    chunks: BTreeMap<u32, String>,
}

impl ChunkGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one fragment. A repeated chunk number replaces the earlier fragment;
    /// the most recent declared total wins.
    pub fn insert(&mut self, chunk_number: u32, total: u32, content: String) {
        self.expected = Some(total);
        self.chunks.insert(chunk_number, content);
    }

    #[cfg(test)]
    fn received(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_complete(&self) -> bool {
        self.expected
            .is_some_and(|expected| self.chunks.len() >= expected as usize)
    }

    /// Fragments concatenated in ascending chunk order
    #[cfg(test)]
    fn concat(&self) -> String {
        self.chunks.values().map(String::as_str).collect()
    }

    pub fn into_content(self) -> String {
        self.chunks.into_values().collect()
    }
}

/// Two-level reassembly of one page: merged group → chunk
#[derive(Debug, Clone)]
pub struct UnitAssembler {
    expected_groups: u32,
    groups: BTreeMap<u32, ChunkGroup>,
}

impl Default for UnitAssembler {
    fn default() -> Self {
        Self {
            expected_groups: 1,
            groups: BTreeMap::new(),
        }
    }
}

impl UnitAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one page chunk and report whether the page is now complete.
    pub fn push(&mut self, chunk: PageChunk) -> bool {
        self.expected_groups = chunk.expected_groups();
        self.groups.entry(chunk.group()).or_default().insert(
            chunk.chunk_number,
            chunk.number_of_chunks,
            chunk.content,
        );
        self.is_complete()
    }

    pub fn is_complete(&self) -> bool {
        self.groups.len() >= self.expected_groups as usize
            && self.groups.values().all(ChunkGroup::is_complete)
    }

    #[cfg(test)]
    fn groups_seen(&self) -> usize {
        self.groups.len()
    }

    /// Groups in ascending order, each with its chunks in ascending order
    pub fn into_content(self) -> String {
        self.groups
            .into_values()
            .map(ChunkGroup::into_content)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn chunk(group: u32, groups: u32, number: u32, total: u32, content: &str) -> PageChunk {
        PageChunk {
            number_of_chunks: total,
            chunk_number: number,
            merged_chapter_number: Some(groups),
            number_of_merged_chapters: Some(group),
            content: content.into(),
        }
    }

    #[test]
    fn test_chunk_group_out_of_order() {
        let mut group = ChunkGroup::new();
        group.insert(2, 3, "c".into());
        assert!(!group.is_complete());
        group.insert(0, 3, "a".into());
        assert!(!group.is_complete());
        group.insert(1, 3, "b".into());

        assert!(group.is_complete());
        assert_eq!(group.concat(), "abc");
    }

    #[test]
    fn test_chunk_group_duplicate_does_not_complete() {
        let mut group = ChunkGroup::new();
        group.insert(0, 2, "a".into());
        group.insert(0, 2, "a".into());
        assert_eq!(group.received(), 1);
        assert!(!group.is_complete());
    }

    #[test]
    fn test_empty_group_is_incomplete() {
        assert!(!ChunkGroup::new().is_complete());
    }

    #[test]
    fn test_single_group_defaults() {
        let mut unit = UnitAssembler::new();
        let complete = unit.push(PageChunk {
            number_of_chunks: 1,
            chunk_number: 0,
            merged_chapter_number: None,
            number_of_merged_chapters: None,
            content: "<p>only</p>".into(),
        });

        assert!(complete);
        assert_eq!(unit.into_content(), "<p>only</p>");
    }

    #[test]
    fn test_two_level_completion() {
        // group 1 declares 2 chunks, group 2 declares 1 chunk
        let mut unit = UnitAssembler::new();

        assert!(!unit.push(chunk(1, 2, 0, 2, "g1c0 ")));
        assert!(!unit.push(chunk(2, 2, 0, 1, "g2c0")));
        assert_eq!(unit.groups_seen(), 2);
        assert!(unit.push(chunk(1, 2, 1, 2, "g1c1 ")));

        assert_eq!(unit.into_content(), "g1c0 g1c1 g2c0");
    }

    #[test]
    fn test_complete_groups_wait_for_missing_group() {
        let mut unit = UnitAssembler::new();
        assert!(!unit.push(chunk(0, 3, 0, 1, "a")));
        assert!(!unit.push(chunk(2, 3, 0, 1, "c")));
        assert!(unit.push(chunk(1, 3, 0, 1, "b")));
        assert_eq!(unit.into_content(), "abc");
    }

    #[test]
    fn test_server_field_layout() {
        // mergedChapterNumber is the group count, numberOfMergedChapters the group
        let first: PageChunk = serde_json::from_value(serde_json::json!({
            "numberOfChunks": 1, "chunkNumber": 0,
            "mergedChapterNumber": 2, "numberOfMergedChapters": 0,
            "content": "AAA"
        }))
        .unwrap();
        let second: PageChunk = serde_json::from_value(serde_json::json!({
            "numberOfChunks": 1, "chunkNumber": 0,
            "mergedChapterNumber": 2, "numberOfMergedChapters": 1,
            "content": "BBB"
        }))
        .unwrap();

        let mut unit = UnitAssembler::new();
        assert!(!unit.push(first));
        assert!(unit.push(second));
        assert_eq!(unit.into_content(), "AAABBB");
    }

    #[test]
    fn test_group_without_declared_total() {
        let only: PageChunk = serde_json::from_value(serde_json::json!({
            "numberOfChunks": 2, "chunkNumber": 1,
            "numberOfMergedChapters": 0,
            "content": "tail"
        }))
        .unwrap();

        let mut unit = UnitAssembler::new();
        assert!(!unit.push(only));
        assert!(unit.push(chunk(0, 1, 0, 2, "head ")));
        assert_eq!(unit.into_content(), "head tail");
    }

    fn merged_page() -> Vec<PageChunk> {
        let mut chunks = Vec::new();
        for (group, total) in [(0u32, 3u32), (1, 1), (2, 4)] {
            for number in 0..total {
                chunks.push(chunk(group, 3, number, total, &format!("[{group}.{number}]")));
            }
        }
        chunks
    }

    proptest! {
        #[test]
        fn order_independent(chunks in Just(merged_page()).prop_shuffle()) {
            let mut unit = UnitAssembler::new();
            let last = chunks.len() - 1;
            for (i, c) in chunks.into_iter().enumerate() {
                let complete = unit.push(c);
                prop_assert_eq!(complete, i == last);
            }
            prop_assert_eq!(
                unit.into_content(),
                "[0.0][0.1][0.2][1.0][2.0][2.1][2.2][2.3]"
            );
        }

        #[test]
        fn chunk_group_order_independent(
            order in Just((0u32..16).collect::<Vec<_>>()).prop_shuffle()
        ) {
            let mut group = ChunkGroup::new();
            for n in order {
                group.insert(n, 16, format!("{n:02}"));
            }
            prop_assert!(group.is_complete());
            prop_assert_eq!(
                group.concat(),
                (0..16).map(|n| format!("{n:02}")).collect::<String>()
            );
        }
    }
}
