//! Chunk lifecycle engine: drive each chunk through submit → poll → finalize.
//!
//! ## One check-and-act pass per chunk
//!
//! The engine never loops or sleeps. A submit pass performs at most one
//! upload per chunk; a retrieve pass performs at most one status poll per
//! chunk and returns whatever it saw. "Wait and try again" belongs to the
//! outer scheduler (the daemon pass, cron, or a human re-running the CLI) —
//! that separation is what makes the whole pipeline resumable instead of a
//! long-lived blocking process.
//!
//! ## Idempotence
//!
//! The store's [`try_begin_submission`](crate::store::ChunkStateStore::try_begin_submission)
//! guard makes the submit pass a no-op when re-run: chunks with an output or
//! an outstanding lock are skipped, so running the same command twice never
//! double-submits. The lock record is written only *after* the service
//! accepts the upload, so a failed upload leaves the chunk `Unstarted` and
//! safe to retry.
//!
//! Per-chunk failures are isolated: the engine reports them through
//! [`ChunkOutcome`] and the caller decides; one bad chunk never aborts its
//! siblings.

use crate::document::ChunkArtifact;
use crate::error::Chunk2MdError;
use crate::service::{ExtractionService, PollStatus};
use crate::store::{BeginSubmission, ChunkStateStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Which half of the lifecycle a pass is driving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Upload chunks that have no output and no outstanding lock.
    Submit,
    /// Poll outstanding locks once and finalize completed results.
    Retrieve,
}

/// Result of advancing one chunk through one phase.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkOutcome {
    /// Submit phase: upload accepted, lock recorded.
    Submitted,
    /// Retrieve phase: output finalized at this path; lock cleared.
    Completed(PathBuf),
    /// Retrieve phase: the service is still working; lock untouched.
    StillProcessing,
    /// The chunk could not advance this pass (upload error, poll transport
    /// error, or service-reported failure). State was left retry-safe; see
    /// the logs for the reason.
    Failed,
    /// Nothing to do: already completed / already in flight (submit phase),
    /// or no lock to poll (retrieve phase).
    Skipped,
}

/// Drives chunks through their lifecycle against a state store and an
/// extraction service.
pub struct ChunkLifecycleEngine<'a> {
    store: &'a ChunkStateStore,
    service: Arc<dyn ExtractionService>,
}

impl<'a> ChunkLifecycleEngine<'a> {
    pub fn new(store: &'a ChunkStateStore, service: Arc<dyn ExtractionService>) -> Self {
        Self { store, service }
    }

    /// Advance one chunk through one phase. Never blocks beyond a single
    /// service call; never performs more than one poll.
    pub async fn advance(
        &self,
        artifact: &ChunkArtifact,
        phase: Phase,
    ) -> Result<ChunkOutcome, Chunk2MdError> {
        match phase {
            Phase::Submit => self.submit(artifact).await,
            Phase::Retrieve => self.retrieve(artifact).await,
        }
    }

    /// Submit phase for one chunk.
    async fn submit(&self, artifact: &ChunkArtifact) -> Result<ChunkOutcome, Chunk2MdError> {
        match self.store.try_begin_submission(&artifact.id) {
            BeginSubmission::AlreadyCompleted => {
                info!(chunk = artifact.id, "output already exists, skipping upload");
                return Ok(ChunkOutcome::Skipped);
            }
            BeginSubmission::AlreadyInFlight => {
                info!(chunk = artifact.id, "lock record exists, skipping upload");
                return Ok(ChunkOutcome::Skipped);
            }
            BeginSubmission::Proceed => {}
        }

        let bytes = std::fs::read(&artifact.path)
            .map_err(|e| Chunk2MdError::persistence(&artifact.path, e))?;
        let file_name = format!("{}.pdf", artifact.id);

        match self.service.submit(&file_name, bytes).await {
            Ok(handle) => {
                // Lock after acceptance, never before: a crash on the way
                // here leaves the chunk Unstarted, not phantom-locked.
                self.store.record_submission(&artifact.id, &handle)?;
                info!(chunk = artifact.id, handle, "chunk submitted");
                Ok(ChunkOutcome::Submitted)
            }
            Err(e) => {
                error!(chunk = artifact.id, error = %e, "upload failed, no state recorded");
                Ok(ChunkOutcome::Failed)
            }
        }
    }

    /// Retrieve phase for one chunk: poll the persisted handle exactly once.
    async fn retrieve(&self, artifact: &ChunkArtifact) -> Result<ChunkOutcome, Chunk2MdError> {
        let handle = match self.store.read_handle(&artifact.id)? {
            Some(h) => h,
            None => {
                info!(chunk = artifact.id, "no lock record, nothing to retrieve");
                return Ok(ChunkOutcome::Skipped);
            }
        };

        match self.service.poll(&handle).await {
            Ok(PollStatus::Completed(content)) => {
                if content.is_empty() {
                    // A blank scan legitimately extracts to nothing; flag it
                    // but finalize anyway.
                    warn!(chunk = artifact.id, handle, "completed with empty content");
                }
                let path = self.store.finalize(&artifact.id, &content)?;
                info!(chunk = artifact.id, output = %path.display(), "chunk completed");
                Ok(ChunkOutcome::Completed(path))
            }
            Ok(PollStatus::Processing(progress)) => {
                info!(
                    chunk = artifact.id,
                    handle,
                    pages_done = progress.pages_done,
                    total_pages = artifact.range.page_count(),
                    elapsed_secs = progress.elapsed_secs,
                    "still processing, will check again next run"
                );
                Ok(ChunkOutcome::StillProcessing)
            }
            Ok(PollStatus::Failed { retryable }) => {
                // Lock stays for inspection; this engine never auto-clears a
                // service-declared failure.
                error!(
                    chunk = artifact.id,
                    handle, retryable, "service reported failure, lock retained"
                );
                Ok(ChunkOutcome::Failed)
            }
            Err(e) => {
                // Transport-level problem: keep the lock, retry the same
                // handle on the next pass.
                warn!(chunk = artifact.id, handle, error = %e, "poll failed, will retry next run");
                Ok(ChunkOutcome::Failed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::ChunkRange;
    use crate::service::Progress;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Scripted service: pops pre-loaded responses and counts calls.
    #[derive(Default)]
    struct ScriptedService {
        submit_responses: Mutex<VecDeque<Result<String, Chunk2MdError>>>,
        poll_responses: Mutex<VecDeque<Result<PollStatus, Chunk2MdError>>>,
        submits: Mutex<usize>,
        polls: Mutex<usize>,
    }

    impl ScriptedService {
        fn submit_count(&self) -> usize {
            *self.submits.lock().unwrap()
        }
        fn poll_count(&self) -> usize {
            *self.polls.lock().unwrap()
        }
        fn push_submit(&self, r: Result<String, Chunk2MdError>) {
            self.submit_responses.lock().unwrap().push_back(r);
        }
        fn push_poll(&self, r: Result<PollStatus, Chunk2MdError>) {
            self.poll_responses.lock().unwrap().push_back(r);
        }
    }

    #[async_trait]
    impl ExtractionService for ScriptedService {
        async fn submit(&self, _name: &str, _bytes: Vec<u8>) -> Result<String, Chunk2MdError> {
            *self.submits.lock().unwrap() += 1;
            self.submit_responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("999".into()))
        }

        async fn poll(&self, _handle: &str) -> Result<PollStatus, Chunk2MdError> {
            *self.polls.lock().unwrap() += 1;
            self.poll_responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(PollStatus::Processing(Progress::default())))
        }
    }

    fn artifact(store: &ChunkStateStore) -> ChunkArtifact {
        let range = ChunkRange::new(1, 1);
        let id = range.identity("doc");
        let path = store.artifact_path(&id);
        std::fs::write(&path, b"%PDF-1.5 fake").unwrap();
        ChunkArtifact { id, range, path }
    }

    #[tokio::test]
    async fn submit_records_lock_on_acceptance() {
        let dir = tempdir().unwrap();
        let store = ChunkStateStore::open(dir.path()).unwrap();
        let svc = Arc::new(ScriptedService::default());
        svc.push_submit(Ok("123456789".into()));
        let engine = ChunkLifecycleEngine::new(&store, svc.clone());
        let a = artifact(&store);

        let outcome = engine.advance(&a, Phase::Submit).await.unwrap();
        assert_eq!(outcome, ChunkOutcome::Submitted);
        assert_eq!(store.read_handle(&a.id).unwrap().as_deref(), Some("123456789"));
    }

    #[tokio::test]
    async fn second_submit_pass_is_a_no_op() {
        let dir = tempdir().unwrap();
        let store = ChunkStateStore::open(dir.path()).unwrap();
        let svc = Arc::new(ScriptedService::default());
        svc.push_submit(Ok("42".into()));
        let engine = ChunkLifecycleEngine::new(&store, svc.clone());
        let a = artifact(&store);

        engine.advance(&a, Phase::Submit).await.unwrap();
        let lock_before = std::fs::read_to_string(store.lock_path(&a.id)).unwrap();

        let outcome = engine.advance(&a, Phase::Submit).await.unwrap();
        assert_eq!(outcome, ChunkOutcome::Skipped);
        assert_eq!(svc.submit_count(), 1, "no second upload may happen");
        assert_eq!(
            std::fs::read_to_string(store.lock_path(&a.id)).unwrap(),
            lock_before,
            "state store must be unchanged by the repeated pass"
        );
    }

    #[tokio::test]
    async fn failed_upload_leaves_chunk_unstarted() {
        let dir = tempdir().unwrap();
        let store = ChunkStateStore::open(dir.path()).unwrap();
        let svc = Arc::new(ScriptedService::default());
        svc.push_submit(Err(Chunk2MdError::Submission {
            chunk: "doc_pages_1_1".into(),
            detail: "HTTP 503".into(),
        }));
        let engine = ChunkLifecycleEngine::new(&store, svc.clone());
        let a = artifact(&store);

        let outcome = engine.advance(&a, Phase::Submit).await.unwrap();
        assert_eq!(outcome, ChunkOutcome::Failed);
        assert!(!store.lock_path(&a.id).exists(), "no phantom lock");
        // Retry next run is allowed.
        assert_eq!(
            store.try_begin_submission(&a.id),
            crate::store::BeginSubmission::Proceed
        );
    }

    #[tokio::test]
    async fn retrieve_without_lock_skips_and_makes_no_calls() {
        let dir = tempdir().unwrap();
        let store = ChunkStateStore::open(dir.path()).unwrap();
        let svc = Arc::new(ScriptedService::default());
        let engine = ChunkLifecycleEngine::new(&store, svc.clone());
        let a = artifact(&store);

        let outcome = engine.advance(&a, Phase::Retrieve).await.unwrap();
        assert_eq!(outcome, ChunkOutcome::Skipped);
        assert_eq!(svc.poll_count(), 0);
    }

    #[tokio::test]
    async fn processing_poll_leaves_lock_untouched() {
        let dir = tempdir().unwrap();
        let store = ChunkStateStore::open(dir.path()).unwrap();
        let svc = Arc::new(ScriptedService::default());
        svc.push_poll(Ok(PollStatus::Processing(Progress {
            pages_done: 3,
            elapsed_secs: 12.5,
        })));
        let engine = ChunkLifecycleEngine::new(&store, svc.clone());
        let a = artifact(&store);
        store.record_submission(&a.id, "123456789").unwrap();

        let outcome = engine.advance(&a, Phase::Retrieve).await.unwrap();
        assert_eq!(outcome, ChunkOutcome::StillProcessing);
        assert_eq!(store.read_handle(&a.id).unwrap().as_deref(), Some("123456789"));
        assert_eq!(svc.poll_count(), 1, "exactly one poll per pass");
    }

    #[tokio::test]
    async fn completed_poll_finalizes_and_clears_lock() {
        let dir = tempdir().unwrap();
        let store = ChunkStateStore::open(dir.path()).unwrap();
        let svc = Arc::new(ScriptedService::default());
        svc.push_poll(Ok(PollStatus::Completed("# Success".into())));
        let engine = ChunkLifecycleEngine::new(&store, svc.clone());
        let a = artifact(&store);
        store.record_submission(&a.id, "123456789").unwrap();

        let outcome = engine.advance(&a, Phase::Retrieve).await.unwrap();
        match outcome {
            ChunkOutcome::Completed(path) => {
                assert_eq!(std::fs::read_to_string(path).unwrap(), "# Success");
            }
            other => panic!("expected Completed, got {other:?}"),
        }
        assert!(!store.lock_path(&a.id).exists());
    }

    #[tokio::test]
    async fn service_failure_retains_lock_for_inspection() {
        let dir = tempdir().unwrap();
        let store = ChunkStateStore::open(dir.path()).unwrap();
        let svc = Arc::new(ScriptedService::default());
        svc.push_poll(Ok(PollStatus::Failed { retryable: false }));
        let engine = ChunkLifecycleEngine::new(&store, svc.clone());
        let a = artifact(&store);
        store.record_submission(&a.id, "123456789").unwrap();

        let outcome = engine.advance(&a, Phase::Retrieve).await.unwrap();
        assert_eq!(outcome, ChunkOutcome::Failed);
        assert!(store.lock_path(&a.id).exists(), "lock kept for the operator");
    }

    #[tokio::test]
    async fn transport_error_retains_lock_for_retry() {
        let dir = tempdir().unwrap();
        let store = ChunkStateStore::open(dir.path()).unwrap();
        let svc = Arc::new(ScriptedService::default());
        svc.push_poll(Err(Chunk2MdError::PollTransport {
            handle: "123456789".into(),
            detail: "connection reset".into(),
        }));
        let engine = ChunkLifecycleEngine::new(&store, svc.clone());
        let a = artifact(&store);
        store.record_submission(&a.id, "123456789").unwrap();

        let outcome = engine.advance(&a, Phase::Retrieve).await.unwrap();
        assert_eq!(outcome, ChunkOutcome::Failed);
        assert!(store.lock_path(&a.id).exists(), "same handle retried next run");
    }

    #[tokio::test]
    async fn empty_completed_content_is_finalized_with_warning() {
        let dir = tempdir().unwrap();
        let store = ChunkStateStore::open(dir.path()).unwrap();
        let svc = Arc::new(ScriptedService::default());
        svc.push_poll(Ok(PollStatus::Completed(String::new())));
        let engine = ChunkLifecycleEngine::new(&store, svc.clone());
        let a = artifact(&store);
        store.record_submission(&a.id, "7").unwrap();

        let outcome = engine.advance(&a, Phase::Retrieve).await.unwrap();
        assert!(matches!(outcome, ChunkOutcome::Completed(_)));
        assert_eq!(
            std::fs::read_to_string(store.output_path(&a.id)).unwrap(),
            ""
        );
    }
}
