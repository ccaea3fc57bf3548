//! Single-document orchestration: one resumable pass over one source file.
//!
//! `process_document` strings the pieces together in a fixed order — analyze,
//! plan, materialize, submit, retrieve — and stops after a single pass. It
//! holds no state of its own; re-running it against the same folders resumes
//! from whatever the chunk store recorded, so the same call serves both the
//! first run and every follow-up.

use crate::config::PipelineConfig;
use crate::djvu::{convert_djvu_to_pdf, converted_pdf_name};
use crate::document::{analyze, base_name, materialize_chunks, DocumentFormat, DocumentInfo};
use crate::error::Chunk2MdError;
use crate::lifecycle::{ChunkLifecycleEngine, ChunkOutcome, Phase};
use crate::planner::plan;
use crate::service::ExtractionService;
use crate::store::ChunkStateStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Knobs for a single `process_document` run.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessOptions {
    /// Analyze and print the plan; touch nothing, call nothing.
    pub dry_run: bool,
    /// Skip the submit phase: only poll outstanding locks.
    pub retrieve_only: bool,
}

/// Tally of chunk outcomes from one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub submitted: usize,
    pub completed: usize,
    pub processing: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl RunReport {
    fn record(&mut self, outcome: &ChunkOutcome) {
        match outcome {
            ChunkOutcome::Submitted => self.submitted += 1,
            ChunkOutcome::Completed(_) => self.completed += 1,
            ChunkOutcome::StillProcessing => self.processing += 1,
            ChunkOutcome::Failed => self.failed += 1,
            ChunkOutcome::Skipped => self.skipped += 1,
        }
    }

    /// Whether anything in this pass still needs a future pass.
    pub fn has_pending_work(&self) -> bool {
        self.processing > 0 || self.failed > 0
    }
}

/// Resolve the PDF the pipeline actually chunks: the source itself, or for
/// DJVU inputs the converted counterpart (converting on first encounter,
/// reusing the file on resume).
pub async fn resolve_pdf_source(
    source: &Path,
    config: &PipelineConfig,
) -> Result<PathBuf, Chunk2MdError> {
    match DocumentFormat::from_path(source) {
        Some(DocumentFormat::Pdf) => Ok(source.to_path_buf()),
        Some(DocumentFormat::Djvu) => {
            let converted = config.output_folder.join(converted_pdf_name(source));
            if converted.exists() {
                info!(pdf = %converted.display(), "reusing previously converted PDF");
                return Ok(converted);
            }
            convert_djvu_to_pdf(source, &converted, config.djvu_timeout_secs).await
        }
        None => Err(Chunk2MdError::InvalidConfig(format!(
            "unsupported input format: {}",
            source.display()
        ))),
    }
}

/// Run one submit-then-retrieve pass over a single document.
///
/// Each chunk advances independently; a chunk that fails to upload or poll
/// is tallied in the report and never aborts its siblings. The retrieve
/// phase runs even directly after submission — a fast service may already
/// have small chunks finished by the time the pass reaches them.
pub async fn process_document(
    source: &Path,
    config: &PipelineConfig,
    service: Arc<dyn ExtractionService>,
    options: ProcessOptions,
) -> Result<RunReport, Chunk2MdError> {
    let pdf = resolve_pdf_source(source, config).await?;
    let info = analyze(&pdf)?;
    let ranges = plan(info.size_mb, info.page_count, config)?;

    log_plan(&info, ranges.len());
    if options.dry_run {
        for range in &ranges {
            info!(chunk = range.identity(&base_name(&pdf)), "planned");
        }
        return Ok(RunReport::default());
    }

    let store = ChunkStateStore::open(&config.output_folder)?;
    let artifacts = materialize_chunks(&pdf, &ranges, &store)?;
    let engine = ChunkLifecycleEngine::new(&store, service);

    let mut report = RunReport::default();

    if options.retrieve_only {
        info!("retrieve-only pass, skipping submissions");
    } else {
        for artifact in &artifacts {
            // Isolation: a chunk whose store records are unreadable is
            // tallied as failed; its siblings still advance this pass.
            match engine.advance(artifact, Phase::Submit).await {
                Ok(outcome) => report.record(&outcome),
                Err(e) => {
                    error!(chunk = artifact.id, error = %e, "submit step failed for this chunk");
                    report.failed += 1;
                }
            }
        }
    }

    for artifact in &artifacts {
        match engine.advance(artifact, Phase::Retrieve).await {
            Ok(outcome) => report.record(&outcome),
            Err(e) => {
                error!(chunk = artifact.id, error = %e, "retrieve step failed for this chunk");
                report.failed += 1;
            }
        }
    }

    if report.has_pending_work() {
        info!(
            processing = report.processing,
            failed = report.failed,
            "pass finished with pending work, re-run to continue"
        );
    } else {
        info!(completed = report.completed, "pass finished");
    }
    Ok(report)
}

fn log_plan(info: &DocumentInfo, chunks: usize) {
    if chunks == 1 {
        info!(
            document = %info.path.display(),
            size_mb = format!("{:.1}", info.size_mb).as_str(),
            pages = info.page_count,
            "processing as a single chunk"
        );
    } else {
        warn!(
            document = %info.path.display(),
            size_mb = format!("{:.1}", info.size_mb).as_str(),
            pages = info.page_count,
            chunks,
            "document exceeds thresholds, splitting"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::PollStatus;
    use async_trait::async_trait;
    use lopdf::{dictionary, Object, Stream};
    use std::sync::Mutex;
    use tempfile::tempdir;

    struct EchoService {
        submits: Mutex<usize>,
        polls: Mutex<usize>,
        poll_result: PollStatus,
    }

    impl EchoService {
        fn new(poll_result: PollStatus) -> Self {
            Self {
                submits: Mutex::new(0),
                polls: Mutex::new(0),
                poll_result,
            }
        }
    }

    #[async_trait]
    impl ExtractionService for EchoService {
        async fn submit(&self, _name: &str, _bytes: Vec<u8>) -> Result<String, Chunk2MdError> {
            let mut n = self.submits.lock().unwrap();
            *n += 1;
            Ok(format!("handle-{n}"))
        }

        async fn poll(&self, _handle: &str) -> Result<PollStatus, Chunk2MdError> {
            *self.polls.lock().unwrap() += 1;
            Ok(self.poll_result.clone())
        }
    }

    fn write_pdf(path: &Path, pages: usize) {
        let mut doc = lopdf::Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let kids: Vec<Object> = (0..pages)
            .map(|_| {
                let content_id = doc.add_object(Stream::new(dictionary! {}, Vec::new()));
                doc.add_object(dictionary! {
                    "Type" => "Page",
                    "Parent" => pages_id,
                    "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                    "Contents" => content_id,
                })
                .into()
            })
            .collect();
        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.save(path).unwrap();
    }

    fn config(dir: &Path) -> PipelineConfig {
        PipelineConfig::builder()
            .input_folder(dir.join("input"))
            .output_folder(dir.join("output"))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn small_document_completes_in_one_pass() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        std::fs::create_dir_all(&config.input_folder).unwrap();
        let source = config.input_folder.join("doc.pdf");
        write_pdf(&source, 3);

        let svc = Arc::new(EchoService::new(PollStatus::Completed("# out".into())));
        let report = process_document(&source, &config, svc, ProcessOptions::default())
            .await
            .unwrap();

        assert_eq!(report.submitted, 1);
        assert_eq!(report.completed, 1);
        assert!(!report.has_pending_work());
        assert!(config.output_folder.join("doc_pages_1_3.md").exists());
        assert!(!config.output_folder.join("doc_pages_1_3.pdf.lock").exists());
    }

    #[tokio::test]
    async fn processing_result_leaves_pass_pending() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        std::fs::create_dir_all(&config.input_folder).unwrap();
        let source = config.input_folder.join("doc.pdf");
        write_pdf(&source, 2);

        let svc = Arc::new(EchoService::new(PollStatus::Processing(Default::default())));
        let report = process_document(&source, &config, svc, ProcessOptions::default())
            .await
            .unwrap();

        assert_eq!(report.submitted, 1);
        assert_eq!(report.processing, 1);
        assert!(report.has_pending_work());
        assert!(config.output_folder.join("doc_pages_1_2.pdf.lock").exists());
    }

    #[tokio::test]
    async fn dry_run_touches_nothing() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        std::fs::create_dir_all(&config.input_folder).unwrap();
        let source = config.input_folder.join("doc.pdf");
        write_pdf(&source, 2);

        let svc = Arc::new(EchoService::new(PollStatus::Completed("x".into())));
        let report = process_document(
            &source,
            &config,
            svc.clone(),
            ProcessOptions {
                dry_run: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(report, RunReport::default());
        assert_eq!(*svc.submits.lock().unwrap(), 0);
        assert!(!config.output_folder.join("doc_pages_1_2.pdf").exists());
    }

    #[tokio::test]
    async fn retrieve_only_skips_submission() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        std::fs::create_dir_all(&config.input_folder).unwrap();
        let source = config.input_folder.join("doc.pdf");
        write_pdf(&source, 2);

        let svc = Arc::new(EchoService::new(PollStatus::Completed("x".into())));
        let report = process_document(
            &source,
            &config,
            svc.clone(),
            ProcessOptions {
                retrieve_only: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(*svc.submits.lock().unwrap(), 0);
        // No lock was ever recorded, so retrieval has nothing to poll.
        assert_eq!(report.skipped, 1);
        assert_eq!(*svc.polls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn resumed_pass_does_not_resubmit() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        std::fs::create_dir_all(&config.input_folder).unwrap();
        let source = config.input_folder.join("doc.pdf");
        write_pdf(&source, 2);

        let svc = Arc::new(EchoService::new(PollStatus::Processing(Default::default())));
        process_document(&source, &config, svc.clone(), ProcessOptions::default())
            .await
            .unwrap();
        process_document(&source, &config, svc.clone(), ProcessOptions::default())
            .await
            .unwrap();

        assert_eq!(*svc.submits.lock().unwrap(), 1, "one upload across both passes");
        assert_eq!(*svc.polls.lock().unwrap(), 2, "one poll per pass");
    }

    #[tokio::test]
    async fn corrupt_lock_does_not_starve_sibling_chunks() {
        // An empty lock record makes one chunk unretrievable, but its
        // siblings must still be polled and finalized in the same pass.
        let dir = tempdir().unwrap();
        let mut config = config(dir.path());
        config.page_threshold = 4;
        config.max_pages_per_chunk = 4;
        std::fs::create_dir_all(&config.input_folder).unwrap();
        let source = config.input_folder.join("book.pdf");
        write_pdf(&source, 10);

        // Submit all three chunks; everything still in flight.
        let svc = Arc::new(EchoService::new(PollStatus::Processing(Default::default())));
        let report = process_document(&source, &config, svc, ProcessOptions::default())
            .await
            .unwrap();
        assert_eq!(report.submitted, 3);

        // Corrupt one lock record.
        std::fs::write(config.output_folder.join("book_pages_1_4.pdf.lock"), "").unwrap();

        let svc = Arc::new(EchoService::new(PollStatus::Completed("# done".into())));
        let report = process_document(
            &source,
            &config,
            svc.clone(),
            ProcessOptions {
                retrieve_only: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(report.failed, 1, "the corrupt chunk is tallied, not fatal");
        assert_eq!(report.completed, 2, "healthy siblings finalized");
        assert_eq!(*svc.polls.lock().unwrap(), 2);
        assert!(config.output_folder.join("book_pages_5_8.md").exists());
        assert!(config.output_folder.join("book_pages_9_10.md").exists());
        assert!(
            config.output_folder.join("book_pages_1_4.pdf.lock").exists(),
            "the bad lock stays for the operator"
        );
    }

    #[tokio::test]
    async fn unsupported_extension_is_rejected() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        let err = resolve_pdf_source(Path::new("notes.txt"), &config)
            .await
            .unwrap_err();
        assert!(matches!(err, Chunk2MdError::InvalidConfig(_)));
    }
}
