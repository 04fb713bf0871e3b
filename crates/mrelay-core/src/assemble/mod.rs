//! Turning fetched content into bounded-size, deliverable artifacts.
//!
//! Two strategies:
//! - paginated document: sub-resources become PDF pages, split across as many
//!   documents as the size ceiling requires, order preserved;
//! - chunked payload: a page snapshot is serialized to JSON and cut into
//!   fixed-size byte chunks with index/total metadata.
//!
//! Artifacts are spooled to the run's scratch directory; the dispatcher reads
//! them back at upload time.

use std::{
    fs,
    path::{Path, PathBuf},
};

use tracing::{debug, info, warn};

use crate::{
    domain::FetchJob,
    fetch::{AssemblyKind, FetchedContent},
    scratch::sanitize_file_name,
};

pub mod chunk;
pub mod document;

use chunk::{chunk_payload, ChunkEnvelope, EmbeddedResource, PageSnapshot};
use document::{normalize_page, plan_documents, write_pdf, Page};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArtifactKind {
    Document,
    PayloadChunk,
}

/// One deliverable unit, spooled to disk.
#[derive(Clone, Debug)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub file_name: String,
    pub media_type: String,
    pub caption: String,
    pub sequence_index: usize,
    pub total_count: usize,
    pub size: u64,
}

/// An input unit that could not be placed in any artifact.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DroppedUnit {
    pub index: usize,
    pub locator: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct Assembly {
    pub artifacts: Vec<Artifact>,
    pub dropped: Vec<DroppedUnit>,
}

#[derive(Debug, thiserror::Error)]
pub enum AssemblyError {
    #[error("nothing to assemble")]
    EmptyInput,

    #[error("none of the {} fetched item(s) fit within the size limit", .dropped.len())]
    NothingDeliverable { dropped: Vec<DroppedUnit> },

    #[error("failed to write artifact: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Clone, Debug)]
pub struct Assembler {
    /// Platform size ceiling for one document, bytes.
    pub document_limit: usize,
    /// Payload chunk size, bytes.
    pub chunk_size: usize,
    pub jpeg_quality: u8,
}

impl Assembler {
    pub fn new(document_limit: usize, chunk_size: usize) -> Self {
        Self {
            document_limit,
            chunk_size,
            jpeg_quality: document::DEFAULT_JPEG_QUALITY,
        }
    }

    /// Blocking: image decoding and encoding happen here. Call from a
    /// blocking context.
    pub fn assemble(
        &self,
        kind: AssemblyKind,
        job: &FetchJob,
        content: &FetchedContent,
        out_dir: &Path,
    ) -> Result<Assembly, AssemblyError> {
        match kind {
            AssemblyKind::PaginatedDocument => self.documents(job, content, out_dir),
            AssemblyKind::ChunkedPayload => self.chunks(job, content, out_dir),
        }
    }

    fn documents(
        &self,
        job: &FetchJob,
        content: &FetchedContent,
        out_dir: &Path,
    ) -> Result<Assembly, AssemblyError> {
        if content.resources.is_empty() {
            return Err(AssemblyError::EmptyInput);
        }

        let mut dropped = Vec::new();
        let mut pages: Vec<(usize, Page)> = Vec::with_capacity(content.resources.len());
        for (idx, res) in content.resources.iter().enumerate() {
            match normalize_page(&res.content, self.jpeg_quality) {
                Ok(page) => pages.push((idx, page)),
                Err(e) => {
                    warn!(locator = %res.locator, error = %e, "undecodable image dropped");
                    dropped.push(DroppedUnit {
                        index: idx,
                        locator: res.locator.clone(),
                        reason: format!("not a readable image: {e}"),
                    });
                }
            }
        }

        let costs: Vec<usize> = pages.iter().map(|(_, p)| p.cost()).collect();
        let plan = plan_documents(&costs, self.document_limit);
        for &pos in &plan.oversized {
            let (idx, page) = &pages[pos];
            let locator = content.resources[*idx].locator.clone();
            warn!(locator = %locator, bytes = page.jpeg.len(), "page exceeds document limit on its own, dropped");
            dropped.push(DroppedUnit {
                index: *idx,
                locator,
                reason: format!("image alone exceeds the {} byte limit", self.document_limit),
            });
        }
        dropped.sort_by_key(|d| d.index);

        if plan.documents.is_empty() {
            return Err(AssemblyError::NothingDeliverable { dropped });
        }

        let label = display_label(job);
        let total = plan.documents.len();
        let mut artifacts = Vec::with_capacity(total);
        for (seq, doc) in plan.documents.iter().enumerate() {
            let doc_pages: Vec<&Page> = doc.iter().map(|&pos| &pages[pos].1).collect();
            let bytes = write_pdf(&doc_pages);

            let (stem, caption) = if total == 1 {
                (
                    format!("{}_{}", job.derived_title, label),
                    format!("{} - {}", job.derived_title, label),
                )
            } else {
                (
                    format!("{}_{}_part{}", job.derived_title, label, seq + 1),
                    format!("{} - {} (part {}/{})", job.derived_title, label, seq + 1, total),
                )
            };
            let file_name = sanitize_file_name(&format!("{stem}.pdf"));
            let path = out_dir.join(&file_name);
            fs::write(&path, &bytes)?;
            debug!(file = %file_name, pages = doc_pages.len(), bytes = bytes.len(), "document written");

            artifacts.push(Artifact {
                kind: ArtifactKind::Document,
                path,
                file_name,
                media_type: "application/pdf".to_string(),
                caption,
                sequence_index: seq,
                total_count: total,
                size: bytes.len() as u64,
            });
        }

        info!(documents = total, pages = pages.len() - plan.oversized.len(), dropped = dropped.len(), "documents assembled");
        Ok(Assembly { artifacts, dropped })
    }

    fn chunks(
        &self,
        job: &FetchJob,
        content: &FetchedContent,
        out_dir: &Path,
    ) -> Result<Assembly, AssemblyError> {
        let body = content.body.clone().unwrap_or_default();
        if content.resources.is_empty() && body.trim().is_empty() {
            return Err(AssemblyError::EmptyInput);
        }

        let snapshot = PageSnapshot {
            url: job.source_url.clone(),
            title: content
                .title
                .clone()
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| "Untitled".to_string()),
            content: body,
            resources: content
                .resources
                .iter()
                .map(|r| EmbeddedResource::new(&r.locator, &r.media_type, &r.content))
                .collect(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        let payload = serde_json::to_vec(&snapshot)?;
        let chunks = chunk_payload(&payload, self.chunk_size);
        let total = chunks.len();

        let mut artifacts = Vec::with_capacity(total);
        for chunk in &chunks {
            let envelope = serde_json::to_vec(&ChunkEnvelope::wrap(chunk, &job.source_url))?;
            let file_name = format!("webpage_chunk_{}.json", chunk.chunk_index);
            let path = out_dir.join(&file_name);
            fs::write(&path, &envelope)?;

            artifacts.push(Artifact {
                kind: ArtifactKind::PayloadChunk,
                path,
                file_name,
                media_type: "application/json".to_string(),
                caption: format!("Chunk {} of {}", chunk.chunk_index + 1, total),
                sequence_index: chunk.chunk_index,
                total_count: total,
                size: envelope.len() as u64,
            });
        }

        info!(payload_bytes = payload.len(), chunks = total, "payload assembled");
        Ok(Assembly {
            artifacts,
            dropped: Vec::new(),
        })
    }
}

/// "Chapter 12" for numeric identifiers, otherwise the slug made readable.
pub fn display_label(job: &FetchJob) -> String {
    let id = job.derived_identifier.trim();
    if !id.is_empty() && id.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return format!("Chapter {id}");
    }
    id.split(['-', '_'])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
