//! Persisted index of finished tile sets.

pub mod record;
pub mod store;

pub use record::{Metadata, TileSetRecord, TileSetStatus, DATASET_ID_KEY};
pub use store::{load_index, save_index, IndexMap, TileIndex, INDEX_FILE_NAME};
