//! # chunk2md
//!
//! Resumable conversion of large PDF and DJVU documents to Markdown through
//! an asynchronous extraction service, with automatic splitting into
//! service-sized page-range chunks.
//!
//! The extraction service caps each request at 50 MB and 200 pages and works
//! asynchronously (submit now, poll later), while real scans routinely run
//! to hundreds of megabytes and take minutes per chunk. chunk2md bridges the
//! gap by planning deterministic page-range chunks, persisting every chunk's
//! lifecycle as sentinel files on disk, and advancing each chunk by exactly
//! one step per run — so the same command can be re-run (or cron-scheduled)
//! until the document is done, surviving crashes and restarts in between.
//!
//! ## Pipeline
//!
//! ```text
//!  input/book.pdf
//!        │ analyze (size, pages)          [document]
//!        ▼
//!  chunk plan: book_pages_1_190, …        [planner]
//!        │ materialize sub-PDFs           [document]
//!        ▼
//!  submit ──▶ {id}.pdf.lock (handle)      [lifecycle + store]
//!        │ poll once per run
//!        ▼
//!  {id}.md written, lock removed          [lifecycle + store]
//!        │ all chunks complete            [reconcile]
//!        ▼
//!  renumber + concat ──▶ done/            [assemble + reconcile]
//! ```
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use chunk2md::{process_document, NanonetsClient, PipelineConfig, ProcessOptions};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), chunk2md::Chunk2MdError> {
//! let config = PipelineConfig::builder().output_folder("output").build()?;
//! let client = Arc::new(NanonetsClient::new("api-key", config.api_timeout_secs)?);
//!
//! // Run once to submit; run again later to collect results.
//! let report = process_document(
//!     Path::new("input/book.pdf"),
//!     &config,
//!     client,
//!     ProcessOptions::default(),
//! )
//! .await?;
//! println!("{report:?}");
//! # Ok(())
//! # }
//! ```
//!
//! For unattended operation, [`run_pass`] performs one scan of the input
//! folder (retrievals, then finished documents, then new ones) and exits —
//! the intended cron entry point.

pub mod assemble;
pub mod config;
pub mod daemon;
pub mod djvu;
pub mod document;
pub mod error;
pub mod lifecycle;
pub mod planner;
pub mod process;
pub mod reconcile;
pub mod service;
pub mod store;

pub use assemble::{concatenate_markdown_files, renumber_markdown_files};
pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use daemon::{find_input_documents, run_pass, InstanceLock, PassReport};
pub use djvu::{convert_djvu_to_pdf, converted_pdf_name};
pub use document::{analyze, materialize_chunks, ChunkArtifact, DocumentFormat, DocumentInfo};
pub use error::Chunk2MdError;
pub use lifecycle::{ChunkLifecycleEngine, ChunkOutcome, Phase};
pub use planner::{parse_range_suffix, plan, ChunkRange};
pub use process::{process_document, resolve_pdf_source, ProcessOptions, RunReport};
pub use reconcile::{DocumentReconciler, DocumentStatus};
pub use service::{ExtractionService, FileStatus, NanonetsClient, PollStatus, Progress};
pub use store::{BeginSubmission, ChunkState, ChunkStateStore};
