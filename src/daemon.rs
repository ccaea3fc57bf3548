//! Folder-watching daemon pass, designed to run under cron.
//!
//! One invocation performs exactly one pass over the input folder and exits.
//! The pass works oldest obligations first:
//!
//! 1. retrievals — poll every document with outstanding locks once;
//! 2. finished — concatenate and move fully complete documents to done/;
//! 3. new — plan, materialize and submit documents not yet started.
//!
//! That order means a pass never submits new work while completed work is
//! sitting unassembled, and a document finished by step 1 is swept by step 2
//! of the *same* pass.
//!
//! An advisory file lock makes overlapping passes (a slow pass still running
//! when the next cron tick fires) exit immediately instead of double-polling.

use crate::assemble::concatenate_markdown_files;
use crate::config::PipelineConfig;
use crate::document::DocumentFormat;
use crate::error::Chunk2MdError;
use crate::process::{process_document, ProcessOptions, RunReport};
use crate::reconcile::{DocumentReconciler, DocumentStatus};
use crate::service::ExtractionService;
use crate::store::ChunkStateStore;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Advisory single-instance lock held for the duration of one daemon pass.
///
/// The lock is tied to the open file handle, so a crashed pass releases it
/// automatically — no stale-pid recovery dance needed. The pid written into
/// the file is informational, for an operator running `cat` on it.
pub struct InstanceLock {
    file: File,
    path: PathBuf,
}

impl InstanceLock {
    pub fn acquire(path: &Path) -> Result<Self, Chunk2MdError> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| Chunk2MdError::persistence(path, e))?;

        if file.try_lock_exclusive().is_err() {
            return Err(Chunk2MdError::AnotherInstanceRunning { path: path.into() });
        }

        let mut lock = Self {
            file,
            path: path.into(),
        };
        lock.file
            .set_len(0)
            .and_then(|()| write!(lock.file, "{}", std::process::id()))
            .map_err(|e| Chunk2MdError::persistence(path, e))?;
        Ok(lock)
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        // Best effort; the OS releases the lock with the handle anyway.
        let _ = fs2::FileExt::unlock(&self.file);
        let _ = fs::remove_file(&self.path);
    }
}

/// Tally of one daemon pass.
#[derive(Debug, Clone, Default)]
pub struct PassReport {
    /// Input documents seen by this pass.
    pub documents_seen: usize,
    /// Chunk outcomes from polling documents with outstanding locks.
    pub retrieval: RunReport,
    /// Documents concatenated and moved to the done area this pass.
    pub finished: usize,
    /// Chunk outcomes from processing newly discovered documents.
    pub new_work: RunReport,
    /// Documents skipped because their pass step errored; see the logs.
    pub errored: usize,
}

/// Enumerate the PDF and DJVU documents in the input folder, sorted by name
/// so pass order is stable across runs.
pub fn find_input_documents(config: &PipelineConfig) -> Result<Vec<PathBuf>, Chunk2MdError> {
    let dir = &config.input_folder;
    let mut documents = Vec::new();
    let entries = fs::read_dir(dir).map_err(|e| Chunk2MdError::persistence(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| Chunk2MdError::persistence(dir, e))?;
        let path = entry.path();
        if path.is_file() && DocumentFormat::from_path(&path).is_some() {
            documents.push(path);
        }
    }
    documents.sort();
    Ok(documents)
}

/// Run one daemon pass: retrievals, then finished documents, then new ones.
///
/// Per-document failures are logged and tallied, never propagated — one
/// corrupt PDF must not stall the rest of the folder. Only setup failures
/// (folders, instance lock) abort the pass.
pub async fn run_pass(
    config: &PipelineConfig,
    service: Arc<dyn ExtractionService>,
) -> Result<PassReport, Chunk2MdError> {
    let _lock = InstanceLock::acquire(&config.instance_lock_path)?;

    for dir in [&config.input_folder, &config.output_folder, &config.done_folder] {
        fs::create_dir_all(dir).map_err(|e| Chunk2MdError::persistence(dir, e))?;
    }

    let store = ChunkStateStore::open(&config.output_folder)?;
    let reconciler = DocumentReconciler::new(config);
    let documents = find_input_documents(config)?;

    let mut report = PassReport {
        documents_seen: documents.len(),
        ..Default::default()
    };
    if documents.is_empty() {
        info!(input = %config.input_folder.display(), "no documents to process");
        return Ok(report);
    }
    info!(count = documents.len(), "daemon pass starting");

    // 1. Poll everything already in flight.
    for source in &documents {
        if !reconciler.has_outstanding_locks(source, &store)? {
            continue;
        }
        info!(document = %source.display(), "checking pending retrievals");
        let options = ProcessOptions {
            retrieve_only: true,
            ..Default::default()
        };
        match process_document(source, config, service.clone(), options).await {
            Ok(run) => merge(&mut report.retrieval, &run),
            Err(e) => {
                error!(document = %source.display(), error = %e, "retrieval pass failed");
                report.errored += 1;
            }
        }
    }

    // 2. Assemble and archive everything that is now complete.
    for source in &documents {
        if reconciler.status(source, &store)? != DocumentStatus::FullyComplete {
            continue;
        }
        info!(document = %source.display(), "document complete, assembling");
        let swept = concatenate_markdown_files(source, store.root())
            .and_then(|_| reconciler.move_to_done(source, &store));
        match swept {
            Ok(()) => report.finished += 1,
            Err(e) => {
                error!(document = %source.display(), error = %e, "finishing failed");
                report.errored += 1;
            }
        }
    }

    // 3. Start documents the store has never seen.
    for source in &documents {
        if !source.exists() {
            // Moved to done/ by step 2.
            continue;
        }
        if reconciler.status(source, &store)? != DocumentStatus::NotStarted {
            continue;
        }
        info!(document = %source.display(), "processing new document");
        match process_document(source, config, service.clone(), ProcessOptions::default()).await {
            Ok(run) => merge(&mut report.new_work, &run),
            Err(e) => {
                error!(document = %source.display(), error = %e, "processing failed");
                report.errored += 1;
            }
        }
    }

    if report.errored > 0 {
        warn!(errored = report.errored, "daemon pass finished with errors");
    } else {
        info!(
            retrieved = report.retrieval.completed,
            finished = report.finished,
            submitted = report.new_work.submitted,
            "daemon pass finished"
        );
    }
    Ok(report)
}

fn merge(into: &mut RunReport, from: &RunReport) {
    into.submitted += from.submitted;
    into.completed += from.completed;
    into.processing += from.processing;
    into.failed += from.failed;
    into.skipped += from.skipped;
}
