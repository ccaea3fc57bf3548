//! Chunk planning: partition a document into page ranges the extraction
//! service will accept.
//!
//! ## Why two splitting modes?
//!
//! The service enforces both a byte-size ceiling (50 MB) and a page-count
//! ceiling (200 pages) per request. A 120 MB scan of 150 pages trips only the
//! size limit; a 30 MB text book of 600 pages trips only the page limit. The
//! planner therefore checks size first (splitting at ~40 MB worth of average
//! pages) and falls back to fixed 190-page chunks, leaving safety margin
//! under both hard limits so container-format overhead in the extracted
//! sub-document can never push a chunk over the ceiling.
//!
//! Planning is a pure function of `(size_mb, page_count)` — no I/O, fully
//! deterministic, so the same document always yields the same chunk
//! identities across runs. That determinism is what the resumable state
//! store keys off.

use crate::config::PipelineConfig;
use crate::error::Chunk2MdError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

/// An inclusive, 1-based page range for one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ChunkRange {
    /// First page of the chunk (1-based, inclusive).
    pub start: usize,
    /// Last page of the chunk (1-based, inclusive).
    pub end: usize,
}

impl ChunkRange {
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start >= 1 && end >= start);
        Self { start, end }
    }

    /// Number of pages covered by this range.
    pub fn page_count(&self) -> usize {
        self.end - self.start + 1
    }

    /// The chunk identity for a document base name, e.g.
    /// `book_pages_1_190`. This string is the primary key of the state
    /// store; the grammar must stay bit-exact for the renumbering and
    /// concatenation steps downstream.
    pub fn identity(&self, base_name: &str) -> String {
        format!("{}_pages_{}_{}", base_name, self.start, self.end)
    }
}

impl fmt::Display for ChunkRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pages {}-{}", self.start, self.end)
    }
}

static RE_RANGE_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"_pages_(\d+)_(\d+)(?:\.[A-Za-z0-9.]+)?$").unwrap());

/// Parse the `_pages_{start}_{end}` suffix out of a chunk file name
/// (with or without extension). Returns `None` when the name does not
/// follow the chunk naming grammar.
pub fn parse_range_suffix(file_name: &str) -> Option<ChunkRange> {
    let caps = RE_RANGE_SUFFIX.captures(file_name)?;
    let start: usize = caps[1].parse().ok()?;
    let end: usize = caps[2].parse().ok()?;
    if start >= 1 && end >= start {
        Some(ChunkRange { start, end })
    } else {
        None
    }
}

/// Produce the ordered splitting plan for a document.
///
/// Tie-break policy (strict comparisons, size checked first):
/// 1. `size_mb > size_threshold_mb` → split by size: pages per chunk is
///    `floor(target_chunk_size_mb / avg_page_size_mb)` clamped to
///    `[1, max_pages_per_chunk]`.
/// 2. else `page_count > page_threshold` → fixed `max_pages_per_chunk`
///    pages per chunk.
/// 3. else → single chunk `(1, page_count)`.
///
/// The degenerate clamp to 1 page matters: with huge average page sizes the
/// floor would otherwise produce a zero-page chunk and the walk would never
/// advance.
///
/// # Errors
/// `EmptyDocument`-class metadata is rejected here as `InvalidMetadata`
/// (zero pages, negative or non-finite size) — fatal to the document run.
pub fn plan(
    size_mb: f64,
    page_count: usize,
    config: &PipelineConfig,
) -> Result<Vec<ChunkRange>, Chunk2MdError> {
    if page_count == 0 {
        return Err(Chunk2MdError::InvalidMetadata {
            detail: "page count is zero".into(),
        });
    }
    if !size_mb.is_finite() || size_mb < 0.0 {
        return Err(Chunk2MdError::InvalidMetadata {
            detail: format!("size is not a valid byte count: {size_mb} MB"),
        });
    }

    if size_mb > config.size_threshold_mb {
        let avg_page_size_mb = size_mb / page_count as f64;
        let per_target = (config.target_chunk_size_mb / avg_page_size_mb).floor() as usize;
        let pages_per_chunk = per_target.clamp(1, config.max_pages_per_chunk);
        Ok(walk(page_count, pages_per_chunk))
    } else if page_count > config.page_threshold {
        Ok(walk(page_count, config.max_pages_per_chunk))
    } else {
        Ok(vec![ChunkRange::new(1, page_count)])
    }
}

/// Cut `[1, page_count]` into consecutive ranges of `pages_per_chunk` pages,
/// the last range truncated at `page_count`.
fn walk(page_count: usize, pages_per_chunk: usize) -> Vec<ChunkRange> {
    let mut ranges = Vec::with_capacity(page_count.div_ceil(pages_per_chunk));
    let mut current = 1;
    while current <= page_count {
        let end = (current + pages_per_chunk - 1).min(page_count);
        ranges.push(ChunkRange::new(current, end));
        current = end + 1;
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> PipelineConfig {
        PipelineConfig::default()
    }

    /// Every plan must tile `[1, page_count]` exactly: first range starts at
    /// 1, last ends at `page_count`, and consecutive ranges are adjacent.
    fn assert_covers(ranges: &[ChunkRange], page_count: usize) {
        assert!(!ranges.is_empty());
        assert_eq!(ranges[0].start, 1);
        assert_eq!(ranges.last().unwrap().end, page_count);
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].end + 1, pair[1].start, "gap or overlap: {pair:?}");
        }
        for r in ranges {
            assert!(r.end >= r.start);
        }
    }

    #[test]
    fn small_file_is_not_split() {
        let ranges = plan(30.0, 100, &cfg()).unwrap();
        assert_eq!(ranges, vec![ChunkRange::new(1, 100)]);
    }

    #[test]
    fn boundary_document_is_not_split() {
        // Both thresholds use strict comparison: exactly 50 MB / 200 pages
        // stays in one chunk.
        let ranges = plan(50.0, 200, &cfg()).unwrap();
        assert_eq!(ranges, vec![ChunkRange::new(1, 200)]);
    }

    #[test]
    fn split_by_size_uses_40mb_worth_of_pages() {
        // 100 MB / 100 pages → 1 MB per page → 40 pages per chunk.
        let ranges = plan(100.0, 100, &cfg()).unwrap();
        assert_covers(&ranges, 100);
        for r in &ranges[..ranges.len() - 1] {
            assert_eq!(r.page_count(), 40);
        }
        assert!(ranges.last().unwrap().page_count() <= 40);
    }

    #[test]
    fn split_by_page_count_uses_190_page_chunks() {
        let ranges = plan(40.0, 400, &cfg()).unwrap();
        assert_covers(&ranges, 400);
        assert_eq!(ranges[0], ChunkRange::new(1, 190));
        for r in &ranges[..ranges.len() - 1] {
            assert_eq!(r.page_count(), 190);
        }
    }

    #[test]
    fn size_split_is_capped_at_max_pages() {
        // 60 MB over 6000 tiny pages → floor(40 / 0.01) = 4000, clamped to 190.
        let ranges = plan(60.0, 6000, &cfg()).unwrap();
        assert_covers(&ranges, 6000);
        assert_eq!(ranges[0].page_count(), 190);
    }

    #[test]
    fn huge_pages_clamp_to_one_page_per_chunk() {
        // 500 MB over 5 pages → avg 100 MB/page → floor(40/100) = 0, clamped
        // up to 1 so the walk terminates and no chunk is empty.
        let ranges = plan(500.0, 5, &cfg()).unwrap();
        assert_covers(&ranges, 5);
        assert_eq!(ranges.len(), 5);
        for r in &ranges {
            assert_eq!(r.page_count(), 1);
        }
    }

    #[test]
    fn coverage_holds_across_a_grid_of_inputs() {
        for &size in &[0.5, 10.0, 49.9, 50.1, 64.0, 100.0, 250.0] {
            for &pages in &[1usize, 2, 50, 190, 200, 201, 400, 1000] {
                let ranges = plan(size, pages, &cfg()).unwrap();
                assert_covers(&ranges, pages);
            }
        }
    }

    #[test]
    fn zero_pages_is_a_planning_error() {
        assert!(matches!(
            plan(10.0, 0, &cfg()),
            Err(Chunk2MdError::InvalidMetadata { .. })
        ));
    }

    #[test]
    fn negative_and_nan_sizes_are_planning_errors() {
        assert!(plan(-1.0, 10, &cfg()).is_err());
        assert!(plan(f64::NAN, 10, &cfg()).is_err());
    }

    #[test]
    fn identity_grammar_is_bit_exact() {
        let r = ChunkRange::new(191, 380);
        assert_eq!(r.identity("Общая психология"), "Общая психология_pages_191_380");
        assert_eq!(ChunkRange::new(1, 1).identity("book"), "book_pages_1_1");
    }

    #[test]
    fn range_suffix_round_trips_through_file_names() {
        assert_eq!(
            parse_range_suffix("book_pages_21_40.pdf"),
            Some(ChunkRange::new(21, 40))
        );
        assert_eq!(
            parse_range_suffix("book_pages_21_40.pdf.lock"),
            Some(ChunkRange::new(21, 40))
        );
        assert_eq!(
            parse_range_suffix("book_pages_1_190.md"),
            Some(ChunkRange::new(1, 190))
        );
        assert_eq!(parse_range_suffix("book.pdf"), None);
        assert_eq!(parse_range_suffix("book_pages_9_3.pdf"), None);
    }
}
