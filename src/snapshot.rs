use std::path::Path;

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::{Error, Result};

/// Bumped whenever the serialized engine state changes shape.
const FORMAT_VERSION: u32 = 2;

/// Serialized state of a fully built [`MatchEngine`](crate::MatchEngine).
///
/// A snapshot is produced once per indexing round, moved by value from the
/// worker to the coordinator and never mutated afterwards. The next round's
/// snapshot replaces it wholesale.
#[derive(Clone, PartialEq, Eq)]
pub struct Snapshot {
    bytes: Vec<u8>,
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    version: u32,
    state: &'a T,
}

#[derive(Deserialize)]
struct Envelope<T> {
    version: u32,
    state: T,
}

impl Snapshot {
    pub(crate) fn encode<T: Serialize>(state: &T) -> Result<Self> {
        let bytes = serde_json::to_vec(&EnvelopeRef {
            version: FORMAT_VERSION,
            state,
        })
        .map_err(|e| Error::Snapshot(format!("encode failed: {e}")))?;
        Ok(Self { bytes })
    }

    pub(crate) fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        let envelope: Envelope<T> = serde_json::from_slice(&self.bytes)
            .map_err(|e| Error::Snapshot(format!("decode failed: {e}")))?;
        if envelope.version != FORMAT_VERSION {
            return Err(Error::Snapshot(format!(
                "unsupported snapshot version {} (expected {FORMAT_VERSION})",
                envelope.version
            )));
        }
        Ok(envelope.state)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Encoded size in bytes.
    pub(crate) fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        std::fs::write(path, &self.bytes)?;
        Ok(())
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        Ok(Self::from_bytes(std::fs::read(path)?))
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("len", &self.bytes.len())
            .finish_non_exhaustive()
    }
}
