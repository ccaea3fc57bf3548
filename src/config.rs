//! Configuration for the chunking pipeline.
//!
//! All behaviour is controlled through [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`]. Keeping every knob in one struct makes it
//! trivial to share a config across the planner, the state store, and the
//! daemon pass, and to diff two runs to understand why their plans differ.
//!
//! # Design choice: builder over constructor
//! The folder layout and the four splitting thresholds rarely change
//! together; the builder lets callers set only what they care about and rely
//! on documented defaults for the rest.

use crate::error::Chunk2MdError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for document chunking and conversion.
///
/// Built via [`PipelineConfig::builder()`] or [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use chunk2md::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .output_folder("out")
///     .max_pages_per_chunk(100)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Folder scanned by the daemon pass for new PDF/DJVU files. Default: `input`.
    pub input_folder: PathBuf,

    /// Folder holding chunk artifacts, lock records, and Markdown outputs.
    /// This is the state store's root. Default: `output`.
    pub output_folder: PathBuf,

    /// Terminal area for fully converted documents. Default: `output/done`.
    ///
    /// Moving a document here is the irreversible final action of the
    /// reconciler; the move itself removes the document from future scans,
    /// which is what makes completion detection idempotent.
    pub done_folder: PathBuf,

    /// Documents larger than this are split by size. Default: 50.0.
    ///
    /// Matches the extraction service's hard per-request size limit. The
    /// comparison is strict: a document of exactly 50 MB is not split.
    pub size_threshold_mb: f64,

    /// Documents with more pages than this are split by page count. Default: 200.
    ///
    /// Matches the service's hard per-request page limit. Strict comparison,
    /// same as the size threshold.
    pub page_threshold: usize,

    /// Target chunk size when splitting by size. Default: 40.0.
    ///
    /// Deliberately below the 50 MB hard limit so container-format overhead
    /// in the extracted sub-document never pushes a chunk over the ceiling.
    pub target_chunk_size_mb: f64,

    /// Hard cap on pages per chunk. Default: 190.
    ///
    /// Safety margin under the 200-page service limit, applied in both
    /// splitting modes.
    pub max_pages_per_chunk: usize,

    /// Per-request timeout for extraction API calls in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Timeout for the external `ddjvu` conversion in seconds. Default: 300.
    pub djvu_timeout_secs: u64,

    /// Path of the advisory lock preventing concurrent daemon passes.
    /// Default: `/tmp/chunk2md.lock`.
    pub instance_lock_path: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_folder: PathBuf::from("input"),
            output_folder: PathBuf::from("output"),
            done_folder: PathBuf::from("output/done"),
            size_threshold_mb: 50.0,
            page_threshold: 200,
            target_chunk_size_mb: 40.0,
            max_pages_per_chunk: 190,
            api_timeout_secs: 120,
            djvu_timeout_secs: 300,
            instance_lock_path: std::env::temp_dir().join("chunk2md.lock"),
        }
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn input_folder(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.input_folder = path.into();
        self
    }

    /// Set the output folder; the done folder follows it as `<output>/done`
    /// unless overridden afterwards.
    pub fn output_folder(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.config.done_folder = path.join("done");
        self.config.output_folder = path;
        self
    }

    pub fn done_folder(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.done_folder = path.into();
        self
    }

    pub fn size_threshold_mb(mut self, mb: f64) -> Self {
        self.config.size_threshold_mb = mb;
        self
    }

    pub fn page_threshold(mut self, pages: usize) -> Self {
        self.config.page_threshold = pages;
        self
    }

    pub fn target_chunk_size_mb(mut self, mb: f64) -> Self {
        self.config.target_chunk_size_mb = mb;
        self
    }

    pub fn max_pages_per_chunk(mut self, pages: usize) -> Self {
        self.config.max_pages_per_chunk = pages.max(1);
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn djvu_timeout_secs(mut self, secs: u64) -> Self {
        self.config.djvu_timeout_secs = secs;
        self
    }

    pub fn instance_lock_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.instance_lock_path = path.into();
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, Chunk2MdError> {
        let c = &self.config;
        if !c.size_threshold_mb.is_finite() || c.size_threshold_mb <= 0.0 {
            return Err(Chunk2MdError::InvalidConfig(format!(
                "size_threshold_mb must be positive and finite, got {}",
                c.size_threshold_mb
            )));
        }
        if !c.target_chunk_size_mb.is_finite() || c.target_chunk_size_mb <= 0.0 {
            return Err(Chunk2MdError::InvalidConfig(format!(
                "target_chunk_size_mb must be positive and finite, got {}",
                c.target_chunk_size_mb
            )));
        }
        if c.target_chunk_size_mb > c.size_threshold_mb {
            return Err(Chunk2MdError::InvalidConfig(
                "target_chunk_size_mb must not exceed size_threshold_mb".into(),
            ));
        }
        if c.page_threshold == 0 {
            return Err(Chunk2MdError::InvalidConfig(
                "page_threshold must be ≥ 1".into(),
            ));
        }
        if c.max_pages_per_chunk == 0 {
            return Err(Chunk2MdError::InvalidConfig(
                "max_pages_per_chunk must be ≥ 1".into(),
            ));
        }
        if c.max_pages_per_chunk > c.page_threshold {
            return Err(Chunk2MdError::InvalidConfig(
                "max_pages_per_chunk must not exceed page_threshold".into(),
            ));
        }
        Ok(self.config)
    }
}
