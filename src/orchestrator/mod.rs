//! The sequential pagination controller.
//!
//! Drives the state machine in [`machine`]: at most one pagination step is
//! in flight at any time, while workers consume previously enqueued
//! messages fully in parallel and independently of orchestrator progress.
//! Cancelling or failing the run does not retract already-enqueued messages.

pub mod machine;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;

use crate::loader::{Loader, LoaderError};
use crate::models::{ErrorInfo, FailureRecord, OrchestrationState};
use crate::notify::{FailureSink, NotifyError};
use crate::storage::ObjectStore;

pub use machine::{transition, Event, InvalidTransition, Phase};

/// Default bound on a whole run; generous so arbitrarily large backlogs
/// expressed as many sequential pages still finish.
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Configuration for the [`Orchestrator`].
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Upper bound on the whole run.
    pub run_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            run_timeout: DEFAULT_RUN_TIMEOUT,
        }
    }
}

/// One pagination step, as the orchestrator sees it.
///
/// [`Loader`] is the production implementation; tests drive the machine with
/// scripted steps instead.
#[async_trait]
pub trait LoadStep: Send + Sync {
    /// Loads one page and returns the next orchestration state.
    async fn load(&self, state: &OrchestrationState) -> Result<OrchestrationState, LoaderError>;
}

#[async_trait]
impl<S: ObjectStore> LoadStep for Loader<S> {
    async fn load(&self, state: &OrchestrationState) -> Result<OrchestrationState, LoaderError> {
        self.load_page(state).await
    }
}

/// Terminal outcome of a run.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// The enumeration completed; every page was loaded exactly once.
    Success {
        /// Final orchestration state with the run totals.
        state: OrchestrationState,
    },
    /// A pagination step failed; the record was published to the
    /// notification channel.
    Failure {
        /// The published failure record.
        record: FailureRecord,
    },
}

/// Errors that abort a run outside the state machine's own failure path.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// The run exceeded its overall deadline.
    #[error("Run exceeded its {0:?} deadline")]
    DeadlineExceeded(Duration),

    /// The fallback chain could not publish the failure notification.
    #[error("Failed to publish failure notification: {0}")]
    Notification(#[from] NotifyError),

    /// The machine was driven off its transition table. Indicates a bug in
    /// the driver, not in the input.
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
}

/// Sequential controller for the paginate -> enqueue -> fan out pattern.
pub struct Orchestrator<L, N> {
    loader: L,
    notifier: N,
    config: OrchestratorConfig,
}

impl<L: LoadStep, N: FailureSink> Orchestrator<L, N> {
    /// Creates an orchestrator over a load step and a failure sink.
    #[must_use]
    pub const fn new(loader: L, notifier: N, config: OrchestratorConfig) -> Self {
        Self {
            loader,
            notifier,
            config,
        }
    }

    /// Runs the pagination loop to a terminal state.
    ///
    /// Starts at `Load` with an optional caller-supplied cursor and follows
    /// the transition table until `Success` or `Failure`. On any load error
    /// the fallback chain publishes the failing payload before the machine
    /// reaches `Failure`.
    ///
    /// # Errors
    ///
    /// Returns `OrchestrationError::DeadlineExceeded` if the run outlives
    /// its configured bound, or `OrchestrationError::Notification` if the
    /// fallback publish itself fails.
    pub async fn run(
        &self,
        starting_cursor: Option<String>,
    ) -> Result<RunOutcome, OrchestrationError> {
        let started = Instant::now();
        let mut phase = Phase::Load;
        let mut state = OrchestrationState::starting_at(starting_cursor);
        let mut failure: Option<FailureRecord> = None;

        loop {
            match phase {
                Phase::Load => {
                    if started.elapsed() >= self.config.run_timeout {
                        return Err(OrchestrationError::DeadlineExceeded(
                            self.config.run_timeout,
                        ));
                    }

                    match self.loader.load(&state).await {
                        Ok(next) => {
                            state = next;
                            phase = transition(phase, Event::PageLoaded)?;
                        }
                        Err(err) => {
                            tracing::error!(
                                cursor = state.cursor.as_deref().unwrap_or("<start>"),
                                error = %err,
                                "Load step failed"
                            );
                            state.error = Some(ErrorInfo::from(&err));
                            phase = transition(phase, Event::LoadFailed)?;
                        }
                    }
                }
                Phase::Decide => {
                    let event = if state.has_more() {
                        Event::MorePages
                    } else {
                        Event::Exhausted
                    };
                    phase = transition(phase, event)?;
                }
                Phase::Fallback => {
                    let error = state
                        .error
                        .clone()
                        .unwrap_or_else(|| ErrorInfo::new("unknown", "load step failed"));
                    let record = FailureRecord {
                        state: state.clone(),
                        error,
                    };
                    self.notifier.publish(&record).await?;
                    failure = Some(record);
                    phase = transition(phase, Event::FallbackPublished)?;
                }
                Phase::Success => {
                    tracing::info!(
                        pages = state.pages_loaded,
                        objects = state.objects_enqueued,
                        "Backfill enumeration complete"
                    );
                    return Ok(RunOutcome::Success { state });
                }
                Phase::Failure => {
                    let record = failure.take().unwrap_or_else(|| FailureRecord {
                        state: state.clone(),
                        error: ErrorInfo::new("unknown", "load step failed"),
                    });
                    return Ok(RunOutcome::Failure { record });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    /// A load step scripted with per-call results.
    struct ScriptedLoader {
        pages: Mutex<Vec<Result<Option<&'static str>, &'static str>>>,
        calls: Mutex<Vec<Option<String>>>,
    }

    impl ScriptedLoader {
        fn new(pages: Vec<Result<Option<&'static str>, &'static str>>) -> Self {
            Self {
                pages: Mutex::new(pages),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LoadStep for ScriptedLoader {
        async fn load(
            &self,
            state: &OrchestrationState,
        ) -> Result<OrchestrationState, LoaderError> {
            self.calls.lock().unwrap().push(state.cursor.clone());
            let next = self.pages.lock().unwrap().remove(0);
            match next {
                Ok(cursor) => Ok(OrchestrationState {
                    cursor: cursor.map(str::to_string),
                    objects_enqueued: state.objects_enqueued + 2,
                    pages_loaded: state.pages_loaded + 1,
                    error: None,
                }),
                Err(message) => Err(LoaderError::List {
                    container: "source".to_string(),
                    prefix: String::new(),
                    source: crate::storage::StorageError::ServiceError(message.to_string()),
                }),
            }
        }
    }

    /// Records published failure records.
    #[derive(Default)]
    struct RecordingSink {
        records: Mutex<Vec<FailureRecord>>,
    }

    #[async_trait]
    impl FailureSink for RecordingSink {
        async fn publish(&self, record: &FailureRecord) -> Result<(), NotifyError> {
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn follows_cursors_to_success() {
        let loader = ScriptedLoader::new(vec![Ok(Some("t1")), Ok(Some("t2")), Ok(None)]);
        let sink = RecordingSink::default();
        let orchestrator = Orchestrator::new(loader, sink, OrchestratorConfig::default());

        let outcome = orchestrator.run(None).await.unwrap();
        let RunOutcome::Success { state } = outcome else {
            panic!("expected success");
        };
        assert_eq!(state.pages_loaded, 3);
        assert!(state.cursor.is_none());
        assert!(state.error.is_none());

        // Each page visited exactly once, in cursor order.
        let calls = orchestrator.loader.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![None, Some("t1".to_string()), Some("t2".to_string())]
        );
        assert!(orchestrator.notifier.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn load_failure_publishes_and_fails_exactly_once() {
        let loader = ScriptedLoader::new(vec![Ok(Some("t1")), Ok(Some("t2")), Err("boom")]);
        let sink = RecordingSink::default();
        let orchestrator = Orchestrator::new(loader, sink, OrchestratorConfig::default());

        let outcome = orchestrator.run(None).await.unwrap();
        let RunOutcome::Failure { record } = outcome else {
            panic!("expected failure");
        };

        // The notification carries the failing invocation's cursor and error.
        assert_eq!(record.state.cursor.as_deref(), Some("t2"));
        assert_eq!(record.error.kind, "list_failed");
        assert!(record.error.message.contains("boom"));

        let published = orchestrator.notifier.records.lock().unwrap().clone();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0], record);
    }

    #[tokio::test]
    async fn resumes_from_a_caller_supplied_cursor() {
        let loader = ScriptedLoader::new(vec![Ok(None)]);
        let sink = RecordingSink::default();
        let orchestrator = Orchestrator::new(loader, sink, OrchestratorConfig::default());

        orchestrator
            .run(Some("resume-here".to_string()))
            .await
            .unwrap();

        let calls = orchestrator.loader.calls.lock().unwrap().clone();
        assert_eq!(calls, vec![Some("resume-here".to_string())]);
    }

    #[tokio::test]
    async fn deadline_bounds_the_run() {
        // A loader that never exhausts, with a deadline that has already
        // passed by the second iteration.
        let loader = ScriptedLoader::new(vec![Ok(Some("t1")), Ok(Some("t2")), Ok(Some("t3"))]);
        let sink = RecordingSink::default();
        let orchestrator = Orchestrator::new(
            loader,
            sink,
            OrchestratorConfig {
                run_timeout: Duration::ZERO,
            },
        );

        let err = orchestrator.run(None).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::DeadlineExceeded(_)));
    }
}
