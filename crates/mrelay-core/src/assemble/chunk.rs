//! Size-chunked payloads: serialize once, cut on byte offsets, reassemble.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

/// One byte range of a serialized payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PayloadChunk {
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub bytes: Vec<u8>,
}

/// Cut `payload` into `chunk_size` slices. Boundaries are byte offsets only.
///
/// An empty payload still yields one (empty) chunk so the receiver always
/// learns `total_chunks`.
pub fn chunk_payload(payload: &[u8], chunk_size: usize) -> Vec<PayloadChunk> {
    let chunk_size = chunk_size.max(1);
    if payload.is_empty() {
        return vec![PayloadChunk {
            chunk_index: 0,
            total_chunks: 1,
            bytes: Vec::new(),
        }];
    }

    let total_chunks = payload.len().div_ceil(chunk_size);
    payload
        .chunks(chunk_size)
        .enumerate()
        .map(|(chunk_index, bytes)| PayloadChunk {
            chunk_index,
            total_chunks,
            bytes: bytes.to_vec(),
        })
        .collect()
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ReassemblyError {
    #[error("no chunks")]
    Empty,
    #[error("chunks disagree on total count")]
    InconsistentTotal,
    #[error("chunk {0} is missing")]
    Missing(usize),
    #[error("chunk {0} appears more than once")]
    Duplicate(usize),
    #[error("chunk {0} is out of range")]
    OutOfRange(usize),
    #[error("chunk data is not valid base64")]
    Encoding,
}

/// Rebuild the payload from chunks received in any order.
pub fn reassemble(chunks: &[PayloadChunk]) -> Result<Vec<u8>, ReassemblyError> {
    let first = chunks.first().ok_or(ReassemblyError::Empty)?;
    let total = first.total_chunks;
    if chunks.iter().any(|c| c.total_chunks != total) {
        return Err(ReassemblyError::InconsistentTotal);
    }

    let mut slots: Vec<Option<&PayloadChunk>> = vec![None; total];
    for c in chunks {
        let slot = slots
            .get_mut(c.chunk_index)
            .ok_or(ReassemblyError::OutOfRange(c.chunk_index))?;
        if slot.is_some() {
            return Err(ReassemblyError::Duplicate(c.chunk_index));
        }
        *slot = Some(c);
    }

    let mut out = Vec::new();
    for (idx, slot) in slots.into_iter().enumerate() {
        let chunk = slot.ok_or(ReassemblyError::Missing(idx))?;
        out.extend_from_slice(&chunk.bytes);
    }
    Ok(out)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub url: String,
}

/// On-the-wire form of one chunk: a small JSON document the receiving app
/// collects and stitches back together.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkEnvelope {
    pub metadata: ChunkMetadata,
    /// Base64 of the chunk bytes.
    pub data: String,
}

impl ChunkEnvelope {
    pub fn wrap(chunk: &PayloadChunk, url: &str) -> Self {
        Self {
            metadata: ChunkMetadata {
                chunk_index: chunk.chunk_index,
                total_chunks: chunk.total_chunks,
                url: url.to_string(),
            },
            data: STANDARD.encode(&chunk.bytes),
        }
    }

    pub fn into_chunk(self) -> Result<PayloadChunk, ReassemblyError> {
        let bytes = STANDARD
            .decode(self.data.as_bytes())
            .map_err(|_| ReassemblyError::Encoding)?;
        Ok(PayloadChunk {
            chunk_index: self.metadata.chunk_index,
            total_chunks: self.metadata.total_chunks,
            bytes,
        })
    }
}

/// A fetched page with its images embedded, as delivered to the receiver.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub url: String,
    pub title: String,
    pub content: String,
    pub resources: Vec<EmbeddedResource>,
    pub timestamp: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddedResource {
    /// The locator as it was fetched; receivers substitute it in `content`.
    pub locator: String,
    pub data_uri: String,
}

impl EmbeddedResource {
    pub fn new(locator: &str, media_type: &str, bytes: &[u8]) -> Self {
        Self {
            locator: locator.to_string(),
            data_uri: format!("data:{media_type};base64,{}", STANDARD.encode(bytes)),
        }
    }
}
