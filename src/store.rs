//! Filesystem-backed chunk state store.
//!
//! ## Filesystem as database
//!
//! Each chunk's lifecycle is encoded entirely in the presence and content of
//! three sentinel files under the output folder, keyed by the chunk identity
//! `{base}_pages_{start}_{end}`:
//!
//! | key              | meaning                                    |
//! |------------------|--------------------------------------------|
//! | `{id}.pdf`       | materialized sub-document (the artifact)   |
//! | `{id}.pdf.lock`  | submission outstanding; content = handle   |
//! | `{id}.md`        | extraction finished; content = Markdown    |
//!
//! The lock record is the exclusive arbiter of "in flight": it is written
//! only after the service has accepted a submission, and its removal is the
//! single atomic signal of finalization. `finalize` writes the output with a
//! temp-file-plus-rename discipline *before* clearing the lock, so a crash
//! between the two steps leaves a chunk that is both "completed" and
//! "in flight" — a state [`ChunkStateStore::state`] resolves in favour of
//! `Completed` (output presence wins).
//!
//! There is deliberately no `abandon` operation. A lock whose poll keeps
//! failing stays in place so the *same* handle is retried on the next run;
//! duplicate submissions cost real money and duplicate service work, a stuck
//! chunk only costs time. Removing the lock file by hand is the documented
//! operator escape hatch.

use crate::error::Chunk2MdError;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Verdict of the idempotence check performed before submitting a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeginSubmission {
    /// A completed output already exists and no lock is outstanding;
    /// submission would be a duplicate.
    AlreadyCompleted,
    /// A lock record exists — a submission is already in flight.
    AlreadyInFlight,
    /// Neither record exists; the caller may submit.
    Proceed,
}

/// Lifecycle state of one chunk, derived from the sentinel files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkState {
    /// No lock, no output.
    Unstarted,
    /// A lock record holds this submission handle; no output yet.
    Submitted(String),
    /// An output artifact exists. When a stale lock also exists (crash
    /// between output write and lock removal), output wins.
    Completed,
}

/// Filesystem-backed key-value store for chunk lifecycle records.
#[derive(Debug, Clone)]
pub struct ChunkStateStore {
    root: PathBuf,
}

impl ChunkStateStore {
    /// Create a store rooted at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, Chunk2MdError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| Chunk2MdError::persistence(&root, e))?;
        Ok(Self { root })
    }

    /// The directory all records live in.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the chunk artifact for an identity.
    pub fn artifact_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.pdf"))
    }

    /// Path of the lock record for an identity.
    pub fn lock_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.pdf.lock"))
    }

    /// Path of the Markdown output for an identity.
    pub fn output_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.md"))
    }

    /// Check whether a submission for `id` may proceed.
    ///
    /// Checked in order: completed output with no lock → `AlreadyCompleted`;
    /// any lock record → `AlreadyInFlight`; otherwise `Proceed`. This is the
    /// idempotence guard that makes the submit pass a no-op when re-run.
    pub fn try_begin_submission(&self, id: &str) -> BeginSubmission {
        let lock_exists = self.lock_path(id).exists();
        if self.output_path(id).exists() && !lock_exists {
            return BeginSubmission::AlreadyCompleted;
        }
        if lock_exists {
            return BeginSubmission::AlreadyInFlight;
        }
        BeginSubmission::Proceed
    }

    /// Persist the lock record for an accepted submission.
    ///
    /// Must only be called after the external service accepted the upload —
    /// a submission that failed externally writes nothing, so no phantom
    /// lock can outlive a job that never started.
    pub fn record_submission(&self, id: &str, handle: &str) -> Result<(), Chunk2MdError> {
        let path = self.lock_path(id);
        write_atomic(&path, handle.as_bytes())?;
        debug!(chunk = id, handle, "lock record written");
        Ok(())
    }

    /// Read the persisted handle for polling. `None` when no lock exists.
    ///
    /// An existing but empty lock is an error the operator must resolve;
    /// guessing a handle is not possible and silently resubmitting would
    /// violate at-most-one-active-submission.
    pub fn read_handle(&self, id: &str) -> Result<Option<String>, Chunk2MdError> {
        let path = self.lock_path(id);
        let raw = match fs::read_to_string(&path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Chunk2MdError::persistence(&path, e)),
        };
        let handle = raw.trim().to_string();
        if handle.is_empty() {
            return Err(Chunk2MdError::EmptyLockRecord { chunk: id.into() });
        }
        Ok(Some(handle))
    }

    /// Atomically materialize the output and clear the lock.
    ///
    /// Write order is load-bearing: the output is durably renamed into place
    /// *before* the lock is removed. A crash in between leaves both records
    /// on disk, which [`state`](Self::state) already classifies as
    /// `Completed` — never the reverse, where a cleared lock points at no
    /// output.
    pub fn finalize(&self, id: &str, content: &str) -> Result<PathBuf, Chunk2MdError> {
        let out = self.output_path(id);
        write_atomic(&out, content.as_bytes())?;

        let lock = self.lock_path(id);
        match fs::remove_file(&lock) {
            Ok(()) => {}
            // Lock already gone: the output is what matters, keep going.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(chunk = id, "finalize found no lock record to remove");
            }
            Err(e) => return Err(Chunk2MdError::persistence(&lock, e)),
        }
        debug!(chunk = id, output = %out.display(), "chunk finalized");
        Ok(out)
    }

    /// Derive the current lifecycle state from the sentinel files.
    pub fn state(&self, id: &str) -> Result<ChunkState, Chunk2MdError> {
        if self.output_path(id).exists() {
            return Ok(ChunkState::Completed);
        }
        match self.read_handle(id)? {
            Some(handle) => Ok(ChunkState::Submitted(handle)),
            None => Ok(ChunkState::Unstarted),
        }
    }
}

/// Write `bytes` to `path` via a temp file in the same directory plus an
/// atomic rename, so readers never observe a half-written record.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), Chunk2MdError> {
    let dir = path
        .parent()
        .ok_or_else(|| Chunk2MdError::Internal(format!("no parent dir for {}", path.display())))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| Chunk2MdError::persistence(dir, e))?;
    tmp.write_all(bytes)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| Chunk2MdError::persistence(path, e))?;
    tmp.persist(path)
        .map_err(|e| Chunk2MdError::persistence(path, e.error))?;
    Ok(())
}
