//! Error types for the chunk2md library.
//!
//! The taxonomy mirrors the lifecycle's recovery semantics:
//!
//! * Planning errors (`EmptyDocument`, `InvalidMetadata`) are fatal to the
//!   single-document run — nothing sane can be chunked.
//! * `Submission` is recoverable by retry on the next run and never writes a
//!   lock record, so failed uploads leave no state behind.
//! * `PollTransport` is a network/parse failure distinct from the service
//!   declaring the job failed; the lock record is left untouched so the same
//!   handle is polled again on the next pass.
//! * A service-declared job failure is not an error at this level — it is
//!   reported as `PollStatus::Failed`, and the lock is retained for operator
//!   inspection and manual resubmission.
//! * `Persistence` wraps any state-store I/O failure; the store never
//!   swallows a partial write.

use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the chunk2md library.
#[derive(Debug, Error)]
pub enum Chunk2MdError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("File not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// PDF parsing failed (corrupt xref, bad object stream, …).
    #[error("Failed to parse PDF '{path}': {detail}")]
    PdfParse { path: PathBuf, detail: String },

    // ── Planning errors ───────────────────────────────────────────────────
    /// The document reports zero pages; there is nothing to chunk.
    #[error("Document '{path}' has no pages")]
    EmptyDocument { path: PathBuf },

    /// Size or page metadata is nonsensical (negative, NaN).
    #[error("Invalid document metadata: {detail}")]
    InvalidMetadata { detail: String },

    // ── Service errors ────────────────────────────────────────────────────
    /// Upload to the extraction service failed. No lock record was written,
    /// so the chunk is safe to resubmit on the next run.
    #[error("Submission failed for '{chunk}': {detail}")]
    Submission { chunk: String, detail: String },

    /// Network or parse failure while polling a handle — distinct from the
    /// service reporting the job itself as failed.
    #[error("Poll failed for handle '{handle}': {detail}")]
    PollTransport { handle: String, detail: String },

    // ── State-store errors ────────────────────────────────────────────────
    /// I/O failure reading or writing a state-store record.
    #[error("State-store I/O failed for '{path}': {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A lock record exists but holds no handle. Retrieval cannot proceed;
    /// the operator must remove the lock to allow resubmission.
    #[error("Lock record for '{chunk}' is empty — remove it to resubmit")]
    EmptyLockRecord { chunk: String },

    // ── External tool errors ──────────────────────────────────────────────
    /// A required external tool is missing from PATH.
    #[error(
        "'{tool}' not found. Install the djvulibre package:\n  \
         Ubuntu/Debian: sudo apt-get install djvulibre-bin\n  \
         macOS: brew install djvulibre"
    )]
    ToolNotInstalled { tool: String },

    /// DJVU→PDF conversion ran but produced no usable output.
    #[error("DJVU conversion failed for '{path}': {detail}")]
    ConversionFailed { path: PathBuf, detail: String },

    /// DJVU→PDF conversion exceeded its timeout.
    #[error("DJVU conversion timed out after {secs}s for '{path}'")]
    ConversionTimeout { path: PathBuf, secs: u64 },

    // ── Daemon errors ─────────────────────────────────────────────────────
    /// Another scheduler instance holds the advisory lock.
    #[error("Another chunk2md instance is already running (lock: '{path}')")]
    AnotherInstanceRunning { path: PathBuf },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Chunk2MdError {
    /// Wrap an I/O error as a persistence failure for the given path.
    pub(crate) fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }
}
