//! Document-level reconciliation: derive overall status from persisted
//! chunk records and hand completed documents off to post-processing.
//!
//! Reconciliation never consults in-memory state. Everything is re-derived
//! from the filesystem on every pass, which is what lets a fresh process (or
//! the next cron tick) pick up exactly where the last one stopped.
//!
//! The terminal action — moving the source and all its artifacts to the
//! done area — is irreversible and must happen at most once. Idempotence is
//! structural rather than recorded: the move removes the source from the
//! input folder, so the next scan simply no longer sees the document.

use crate::config::PipelineConfig;
use crate::document::{base_name, ChunkArtifact, DocumentFormat};
use crate::error::Chunk2MdError;
use crate::planner::parse_range_suffix;
use crate::store::ChunkStateStore;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Derived completion status for one source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentStatus {
    /// No chunk artifacts exist yet.
    NotStarted,
    /// At least one chunk has an outstanding lock or a missing output.
    InProgress,
    /// Every chunk has a Markdown output and no lock remains.
    FullyComplete,
}

/// Read-only observer over a document's chunk set, plus the terminal
/// done-area move.
pub struct DocumentReconciler<'a> {
    config: &'a PipelineConfig,
}

impl<'a> DocumentReconciler<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    /// The identity prefix a source's chunks are keyed under. DJVU sources
    /// chunk their converted PDF, so their prefix carries the `_converted`
    /// suffix.
    pub fn search_base(source: &Path) -> String {
        let base = base_name(source);
        match DocumentFormat::from_path(source) {
            Some(DocumentFormat::Djvu) => format!("{base}_converted"),
            _ => base,
        }
    }

    /// Enumerate the chunk artifacts currently materialized for a source,
    /// sorted ascending by start page.
    pub fn chunk_artifacts(
        &self,
        source: &Path,
        store: &ChunkStateStore,
    ) -> Result<Vec<ChunkArtifact>, Chunk2MdError> {
        let prefix = format!("{}_pages_", Self::search_base(source));
        let mut artifacts = Vec::new();

        let entries =
            fs::read_dir(store.root()).map_err(|e| Chunk2MdError::persistence(store.root(), e))?;
        for entry in entries {
            let entry = entry.map_err(|e| Chunk2MdError::persistence(store.root(), e))?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with(&prefix) || !name.ends_with(".pdf") {
                continue;
            }
            let Some(range) = parse_range_suffix(&name) else {
                warn!(file = %name, "chunk-like file does not match the naming grammar");
                continue;
            };
            let id = name.trim_end_matches(".pdf").to_string();
            artifacts.push(ChunkArtifact {
                id,
                range,
                path: entry.path(),
            });
        }

        artifacts.sort_by_key(|a| a.range.start);
        Ok(artifacts)
    }

    /// Whether any chunk of this source still has a lock outstanding.
    pub fn has_outstanding_locks(
        &self,
        source: &Path,
        store: &ChunkStateStore,
    ) -> Result<bool, Chunk2MdError> {
        let artifacts = self.chunk_artifacts(source, store)?;
        Ok(artifacts.iter().any(|a| store.lock_path(&a.id).exists()))
    }

    /// Classify the document by inspecting every chunk's sentinel files.
    pub fn status(
        &self,
        source: &Path,
        store: &ChunkStateStore,
    ) -> Result<DocumentStatus, Chunk2MdError> {
        let artifacts = self.chunk_artifacts(source, store)?;
        if artifacts.is_empty() {
            return Ok(DocumentStatus::NotStarted);
        }
        for a in &artifacts {
            if store.lock_path(&a.id).exists() || !store.output_path(&a.id).exists() {
                return Ok(DocumentStatus::InProgress);
            }
        }
        Ok(DocumentStatus::FullyComplete)
    }

    /// Move the source document and every related artifact into the done
    /// area. Irreversible; callers invoke this exactly once, after
    /// concatenation, on a `FullyComplete` document.
    pub fn move_to_done(
        &self,
        source: &Path,
        store: &ChunkStateStore,
    ) -> Result<(), Chunk2MdError> {
        let done = &self.config.done_folder;
        fs::create_dir_all(done).map_err(|e| Chunk2MdError::persistence(done, e))?;

        info!(source = %source.display(), "moving completed document to done area");
        move_into(source, done)?;

        // DJVU sources also leave a converted PDF in the output folder.
        if DocumentFormat::from_path(source) == Some(DocumentFormat::Djvu) {
            let converted = store
                .root()
                .join(format!("{}_converted.pdf", base_name(source)));
            if converted.exists() {
                move_into(&converted, done)?;
            }
        }

        for artifact in self.chunk_artifacts(source, store)? {
            move_into(&artifact.path, done)?;
            let md = store.output_path(&artifact.id);
            if md.exists() {
                move_into(&md, done)?;
            }
        }

        // The concatenated file, if the post-processing step produced one.
        let concat_prefix = format!("{}_concat_", Self::search_base(source));
        let entries =
            fs::read_dir(store.root()).map_err(|e| Chunk2MdError::persistence(store.root(), e))?;
        for entry in entries.flatten() {
            if entry
                .file_name()
                .to_string_lossy()
                .starts_with(&concat_prefix)
            {
                move_into(&entry.path(), done)?;
            }
        }

        info!("all files moved to done area");
        Ok(())
    }
}

/// Move one file into `dir`, keeping its file name. Falls back to
/// copy-and-remove when rename crosses a filesystem boundary.
fn move_into(file: &Path, dir: &Path) -> Result<(), Chunk2MdError> {
    let target = dir.join(
        file.file_name()
            .ok_or_else(|| Chunk2MdError::Internal(format!("no file name: {}", file.display())))?,
    );
    match fs::rename(file, &target) {
        Ok(()) => {}
        Err(_) => {
            fs::copy(file, &target).map_err(|e| Chunk2MdError::persistence(&target, e))?;
            fs::remove_file(file).map_err(|e| Chunk2MdError::persistence(file, e))?;
        }
    }
    info!(file = %file.display(), "moved to done/");
    Ok(())
}
