//! Stable tile identifiers derived from source URLs.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Number of digest bytes kept in an identifier (128 bits).
const ID_BYTES: usize = 16;

/// Opaque identifier of a tile set, used as index key and directory name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TileId(String);

impl TileId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wraps an already-derived identifier, e.g. one read back from a URL path.
    ///
    /// Returns `None` unless `raw` is 32 lower-case hex characters, which keeps
    /// arbitrary strings out of filesystem paths.
    pub fn parse(raw: &str) -> Option<Self> {
        let valid = raw.len() == ID_BYTES * 2
            && raw
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
        valid.then(|| Self(raw.to_string()))
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TileId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Derives the identifier for a source URL.
///
/// The URL is trimmed of surrounding whitespace, hashed with SHA-256 and the
/// first 128 bits are hex-encoded.
pub fn identifier_for(url: &str) -> TileId {
    let digest = Sha256::digest(url.trim().as_bytes());
    TileId(hex::encode(&digest[..ID_BYTES]))
}
