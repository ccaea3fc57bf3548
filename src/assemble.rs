//! Post-processing: page-marker renumbering and chunk concatenation.
//!
//! The extraction service numbers `## Page N` markers from 1 within each
//! chunk, because each chunk arrives as a standalone document. Before the
//! chunks are stitched together, every marker is rewritten to the absolute
//! page number implied by the chunk's `_pages_{start}_{end}` file name, so
//! the concatenated Markdown reads as one continuously numbered document.
//!
//! Both operations are deterministic text transforms over the chunk outputs
//! sorted by start page — no service interaction, no lifecycle state.

use crate::document::base_name;
use crate::error::Chunk2MdError;
use crate::planner::{parse_range_suffix, ChunkRange};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

static RE_PAGE_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"## Page (\d+)").unwrap());

/// Separator inserted between chunk documents during concatenation.
const CONCAT_SEPARATOR: &str = "\n\n---\n\n";

/// Find all chunk Markdown outputs for a source's search base, sorted
/// ascending by start page.
fn chunk_markdown_files(
    search_base: &str,
    output_dir: &Path,
) -> Result<Vec<(PathBuf, ChunkRange)>, Chunk2MdError> {
    let prefix = format!("{search_base}_pages_");
    let mut files = Vec::new();

    let entries = fs::read_dir(output_dir).map_err(|e| Chunk2MdError::persistence(output_dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| Chunk2MdError::persistence(output_dir, e))?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with(&prefix) || !name.ends_with(".md") {
            continue;
        }
        match parse_range_suffix(&name) {
            Some(range) => files.push((entry.path(), range)),
            None => warn!(file = %name, "markdown file does not match the chunk naming grammar"),
        }
    }

    files.sort_by_key(|(_, range)| range.start);
    Ok(files)
}

/// Rewrite the `## Page N` markers of every chunk Markdown file for a
/// source so numbering matches the absolute pages named in each file name.
///
/// Files whose first in-content marker already equals the file name's start
/// page are left untouched. Returns the number of files rewritten.
pub fn renumber_markdown_files(
    source: &Path,
    output_dir: &Path,
) -> Result<usize, Chunk2MdError> {
    let search_base = crate::reconcile::DocumentReconciler::search_base(source);
    let files = chunk_markdown_files(&search_base, output_dir)?;
    if files.is_empty() {
        info!(base = search_base, "no markdown files to renumber");
        return Ok(0);
    }

    let mut rewritten = 0;
    for (path, range) in files {
        if renumber_single_file(&path, range)? {
            rewritten += 1;
        }
    }
    Ok(rewritten)
}

/// Renumber one chunk file. Returns whether the file was rewritten.
fn renumber_single_file(path: &Path, range: ChunkRange) -> Result<bool, Chunk2MdError> {
    let content = fs::read_to_string(path).map_err(|e| Chunk2MdError::persistence(path, e))?;

    let markers: Vec<usize> = RE_PAGE_MARKER
        .captures_iter(&content)
        .filter_map(|c| c[1].parse().ok())
        .collect();
    if markers.is_empty() {
        debug!(file = %path.display(), "no page markers, skipping");
        return Ok(false);
    }

    if markers[0] == range.start {
        debug!(file = %path.display(), "page numbering already correct");
        return Ok(false);
    }

    if markers.len() != range.page_count() {
        warn!(
            file = %path.display(),
            markers = markers.len(),
            expected = range.page_count(),
            "marker count does not match the range in the file name"
        );
    }

    let mut counter = range.start;
    let renumbered = RE_PAGE_MARKER.replace_all(&content, |_: &Captures| {
        let marker = format!("## Page {counter}");
        counter += 1;
        marker
    });

    let last = counter - 1;
    if last != range.end {
        warn!(
            file = %path.display(),
            last_renumbered = last,
            expected_end = range.end,
            "last renumbered page does not match the file name"
        );
    }

    fs::write(path, renumbered.as_bytes()).map_err(|e| Chunk2MdError::persistence(path, e))?;
    info!(file = %path.display(), from = range.start, to = last, "renumbered page markers");
    Ok(true)
}

/// Renumber (pre-check) and then concatenate all chunk Markdown files for a
/// source into `{base}_concat_pages_1_{last_end}.md`.
///
/// Returns the path of the concatenated file.
pub fn concatenate_markdown_files(
    source: &Path,
    output_dir: &Path,
) -> Result<PathBuf, Chunk2MdError> {
    renumber_markdown_files(source, output_dir)?;

    let search_base = crate::reconcile::DocumentReconciler::search_base(source);
    let files = chunk_markdown_files(&search_base, output_dir)?;
    if files.is_empty() {
        return Err(Chunk2MdError::Internal(format!(
            "no markdown files to concatenate for '{}'",
            base_name(source)
        )));
    }

    let last_end = files.last().map(|(_, r)| r.end).unwrap_or(0);
    let final_name = format!("{search_base}_concat_pages_1_{last_end}.md");
    let final_path = output_dir.join(final_name);

    let mut parts = Vec::with_capacity(files.len());
    for (path, _) in &files {
        let content =
            fs::read_to_string(path).map_err(|e| Chunk2MdError::persistence(path, e))?;
        parts.push(content);
    }

    fs::write(&final_path, parts.join(CONCAT_SEPARATOR))
        .map_err(|e| Chunk2MdError::persistence(&final_path, e))?;
    info!(file = %final_path.display(), chunks = files.len(), "concatenated markdown");
    Ok(final_path)
}
