//! Per-book content cache: unit index → decrypted page content.
//!
//! The snapshot is a flat JSON object with decimal string keys, stored at
//! `{cache_dir}/{book_id}/chunks.dat`. It is loaded in full when a session
//! starts and written back in full at teardown, whether the session
//! succeeded or not, so completed pages survive a failure in a later one.
//!
//! Single writer only: nothing guards against two sessions sharing a path.

use folio_core::{FolioResult, UnitIndex};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub struct ContentCache {
    /// Path to the JSON snapshot on disk
    path: PathBuf,
    entries: BTreeMap<UnitIndex, String>,
    /// Whether there are entries not yet written to disk
    dirty: bool,
}

impl ContentCache {
    /// Load the snapshot at `path`, or start empty if there is none.
    pub fn open(path: &Path) -> FolioResult<Self> {
        let entries = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let entries: BTreeMap<UnitIndex, String> = serde_json::from_str(&content)?;
            debug!(path = %path.display(), units = entries.len(), "loaded content cache");
            entries
        } else {
            BTreeMap::new()
        };

        Ok(ContentCache {
            path: path.to_path_buf(),
            entries,
            dirty: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, index: UnitIndex) -> Option<&str> {
        self.entries.get(&index).map(String::as_str)
    }

    pub fn contains(&self, index: UnitIndex) -> bool {
        self.entries.contains_key(&index)
    }

    /// Insert (or replace) a unit's content.
    pub fn put(&mut self, index: UnitIndex, content: String) {
        self.entries.insert(index, content);
        self.dirty = true;
    }

    /// Cached unit indices in ascending order
    pub fn indices(&self) -> impl Iterator<Item = UnitIndex> + '_ {
        self.entries.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write the full snapshot using an atomic write (write then rename).
    pub fn flush(&mut self) -> FolioResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string(&self.entries)?;

        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, &self.path)?;

        debug!(path = %self.path.display(), units = self.entries.len(), "flushed content cache");
        self.dirty = false;
        Ok(())
    }
}

impl Drop for ContentCache {
    fn drop(&mut self) {
        if self.dirty {
            if let Err(e) = self.flush() {
                warn!("failed to flush content cache on drop: {e}");
            }
        }
    }
}
