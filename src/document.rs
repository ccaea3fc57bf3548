//! Document analysis and page-range splitting (lopdf).
//!
//! Metadata is measured exactly once, before any chunking decision: byte
//! size from the filesystem, page count from the parsed PDF. DJVU sources
//! are converted to a PDF counterpart first (see [`crate::djvu`]), after
//! which everything here is format-agnostic.
//!
//! Splitting clones the parsed document once per range and deletes the
//! out-of-range pages, which keeps shared resources (fonts, images) intact
//! in each sub-document — the service sees a self-contained PDF per chunk.

use crate::error::Chunk2MdError;
use crate::planner::ChunkRange;
use crate::store::ChunkStateStore;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Source document format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Djvu,
}

impl DocumentFormat {
    /// Classify by file extension (case-insensitive). `None` for anything
    /// the pipeline does not handle.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "djvu" => Some(Self::Djvu),
            _ => None,
        }
    }
}

/// Measured metadata for one source document.
#[derive(Debug, Clone)]
pub struct DocumentInfo {
    pub path: PathBuf,
    pub size_mb: f64,
    pub page_count: usize,
    pub format: DocumentFormat,
}

/// The materialized sub-document for one chunk range.
#[derive(Debug, Clone)]
pub struct ChunkArtifact {
    /// Primary key: `{base}_pages_{start}_{end}`.
    pub id: String,
    pub range: ChunkRange,
    pub path: PathBuf,
}

/// Base name of a document: file stem, no extension.
pub fn base_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Measure a PDF's size and page count.
///
/// Validates the `%PDF` magic bytes before handing the file to the parser
/// so callers get a meaningful error rather than a parse failure deep in
/// lopdf. Zero-page documents are rejected here — there is nothing to plan.
pub fn analyze(path: &Path) -> Result<DocumentInfo, Chunk2MdError> {
    if !path.exists() {
        return Err(Chunk2MdError::FileNotFound { path: path.into() });
    }

    let meta = fs::metadata(path).map_err(|e| Chunk2MdError::persistence(path, e))?;
    let size_mb = meta.len() as f64 / (1024.0 * 1024.0);

    verify_pdf_magic(path)?;

    let doc = lopdf::Document::load(path).map_err(|e| Chunk2MdError::PdfParse {
        path: path.into(),
        detail: e.to_string(),
    })?;
    let page_count = doc.get_pages().len();
    if page_count == 0 {
        return Err(Chunk2MdError::EmptyDocument { path: path.into() });
    }

    debug!(path = %path.display(), size_mb, page_count, "analyzed document");
    Ok(DocumentInfo {
        path: path.into(),
        size_mb,
        page_count,
        format: DocumentFormat::Pdf,
    })
}

/// Extract an inclusive page range from a parsed document as PDF bytes.
pub fn extract_page_range(
    doc: &lopdf::Document,
    range: ChunkRange,
    source: &Path,
) -> Result<Vec<u8>, Chunk2MdError> {
    let mut sub = doc.clone();
    let to_delete: Vec<u32> = sub
        .get_pages()
        .keys()
        .copied()
        .filter(|&p| (p as usize) < range.start || (p as usize) > range.end)
        .collect();
    sub.delete_pages(&to_delete);
    sub.prune_objects();
    sub.renumber_objects();

    let mut bytes = Vec::new();
    sub.save_to(&mut bytes)
        .map_err(|e| Chunk2MdError::PdfParse {
            path: source.into(),
            detail: format!("saving {range}: {e}"),
        })?;
    Ok(bytes)
}

/// Materialize one chunk artifact per range under the state store.
///
/// A single-range plan still produces a `{base}_pages_1_{n}.pdf` copy so the
/// naming grammar is uniform for the lifecycle engine, the renumberer, and
/// the reconciler. Artifacts that already exist are left alone — a resumed
/// run must not rewrite the bytes a recorded submission was made from.
pub fn materialize_chunks(
    source: &Path,
    ranges: &[ChunkRange],
    store: &ChunkStateStore,
) -> Result<Vec<ChunkArtifact>, Chunk2MdError> {
    let base = base_name(source);
    let mut artifacts = Vec::with_capacity(ranges.len());

    // Whole-document copy: no parse needed.
    if ranges.len() == 1 {
        let range = ranges[0];
        let id = range.identity(&base);
        let path = store.artifact_path(&id);
        if !path.exists() {
            fs::copy(source, &path).map_err(|e| Chunk2MdError::persistence(&path, e))?;
            info!(chunk = id, "copied whole document as single chunk");
        }
        artifacts.push(ChunkArtifact { id, range, path });
        return Ok(artifacts);
    }

    let doc = lopdf::Document::load(source).map_err(|e| Chunk2MdError::PdfParse {
        path: source.into(),
        detail: e.to_string(),
    })?;

    for &range in ranges {
        let id = range.identity(&base);
        let path = store.artifact_path(&id);
        if path.exists() {
            debug!(chunk = id, "artifact already materialized, skipping");
        } else {
            let bytes = extract_page_range(&doc, range, source)?;
            fs::write(&path, &bytes).map_err(|e| Chunk2MdError::persistence(&path, e))?;
            info!(chunk = id, pages = range.page_count(), "materialized chunk artifact");
        }
        artifacts.push(ChunkArtifact { id, range, path });
    }

    Ok(artifacts)
}

fn verify_pdf_magic(path: &Path) -> Result<(), Chunk2MdError> {
    use std::io::Read;
    let mut f = fs::File::open(path).map_err(|e| Chunk2MdError::persistence(path, e))?;
    let mut magic = [0u8; 4];
    if f.read_exact(&mut magic).is_ok() && &magic != b"%PDF" {
        return Err(Chunk2MdError::NotAPdf {
            path: path.into(),
            magic,
        });
    }
    Ok(())
}
