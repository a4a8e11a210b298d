//! On-disk tile index with atomic rewrites.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info, warn};

use crate::error::IndexError;
use crate::identity::TileId;
use crate::index::record::TileSetRecord;
use crate::zoom;

/// Name of the index file inside the tiles root.
pub const INDEX_FILE_NAME: &str = "tile_index.json";

pub type IndexMap = HashMap<TileId, TileSetRecord>;

/// Reads the index file. A missing file is an empty index; an unreadable or
/// malformed one is an error.
pub fn load_index(path: &Path) -> Result<IndexMap, IndexError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(IndexMap::new()),
        Err(e) => {
            return Err(IndexError::Read {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };

    serde_json::from_str(&content).map_err(|e| IndexError::Corrupt {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Rewrites the index file via a sibling temp file and a rename, so a crash
/// mid-write leaves the previous version intact.
pub fn save_index(path: &Path, records: &IndexMap) -> Result<(), IndexError> {
    let json = serde_json::to_string_pretty(records)?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| IndexError::Write {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, json).map_err(|e| IndexError::Write {
        path: tmp_path.clone(),
        source: e,
    })?;
    std::fs::rename(&tmp_path, path).map_err(|e| IndexError::Write {
        path: path.to_path_buf(),
        source: e,
    })?;

    Ok(())
}

/// Persisted map of tile identifier to finished tile set.
///
/// Reads go through an `RwLock`; writers additionally hold `write_lock` for
/// the whole insert-and-rewrite so concurrent completions never interleave
/// their file writes.
pub struct TileIndex {
    tiles_root: PathBuf,
    path: PathBuf,
    records: RwLock<IndexMap>,
    write_lock: Mutex<()>,
}

impl TileIndex {
    /// Loads the index stored under `tiles_root`.
    pub fn load<P: AsRef<Path>>(tiles_root: P) -> Result<Self, IndexError> {
        let tiles_root = tiles_root.as_ref().to_path_buf();
        let path = tiles_root.join(INDEX_FILE_NAME);
        let records = load_index(&path)?;

        info!(
            "Loaded tile index from {} ({} entries)",
            path.display(),
            records.len()
        );

        Ok(Self {
            tiles_root,
            path,
            records: RwLock::new(records),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tiles_root(&self) -> &Path {
        &self.tiles_root
    }

    fn read(&self) -> RwLockReadGuard<'_, IndexMap> {
        match self.records.read() {
            Ok(g) => g,
            Err(poisoned) => {
                warn!("Tile index lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexMap> {
        match self.records.write() {
            Ok(g) => g,
            Err(poisoned) => {
                warn!("Tile index lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    pub fn get(&self, id: &TileId) -> Option<TileSetRecord> {
        self.read().get(id).cloned()
    }

    /// True when a completed record exists and its tiles are still on disk.
    pub fn contains_completed(&self, id: &TileId) -> bool {
        let Some(record) = self.get(id) else {
            return false;
        };
        if !record.is_completed() {
            return false;
        }

        let tiles_dir = self.tiles_root.join(&record.tiles_path);
        if zoom::discover_zoom_range(&tiles_dir).is_none() {
            warn!(
                "Index entry {} is completed but {} has no zoom levels; ignoring it",
                id,
                tiles_dir.display()
            );
            return false;
        }
        true
    }

    /// Inserts or replaces a record and rewrites the file.
    pub fn put(&self, record: TileSetRecord) -> Result<(), IndexError> {
        let _writer = match self.write_lock.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };

        let id = record.tile_id.clone();
        let snapshot = {
            let mut records = self.write();
            records.insert(id.clone(), record);
            records.clone()
        };

        save_index(&self.path, &snapshot)?;
        debug!("Tile index rewritten after storing {}", id);
        Ok(())
    }

    /// Rewrites the file from the in-memory map.
    pub fn save(&self) -> Result<(), IndexError> {
        let _writer = match self.write_lock.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let snapshot = self.read().clone();
        save_index(&self.path, &snapshot)
    }

    /// All records, oldest first.
    pub fn records(&self) -> Vec<TileSetRecord> {
        let mut records: Vec<TileSetRecord> = self.read().values().cloned().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        records
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
