//! Runs the pipes of a fixture and classifies each one.
//!
//! Pipes of a fixture run strictly one after another. Each pipe executes on a
//! worker thread (a fresh one per pipe, or the fixture's affinity worker) while
//! the engine waits on the result, the pipe's time bound and run cancellation.
//! The bound is the fixture timeout or the tightest `Timeout` maximum declared
//! on the unit, whichever is smaller.
//! When the timeout expires or the run is cancelled the pipe's token is
//! cancelled, the engine waits at most the cancel grace for the worker, and
//! then classifies the pipe whether or not the worker stopped.
mod affinity;

use crate::context::{CancellationToken, Target, TestContext};
use crate::outcome::{Cause, FailureKind, Fault, Outcome, SkipKind};
use crate::pipe::{FixturePlan, PipePlan};
use crate::report::{NodeKind, ReportNode};
use crate::runner::RunEvent;
use crate::unit::{Body, TestUnit, invoke, panic_message};
use affinity::{AffinityWorker, Job, spawn_detached};
use serde_json::Value;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;
use tracing::{debug, instrument, warn};

/// Lifecycle of a single pipe. `Finished` is terminal.
#[derive(Debug, Clone, PartialEq)]
pub enum PipeState {
    Pending,
    Running,
    Finished(Outcome),
}

impl PipeState {
    pub fn start(self) -> PipeState {
        match self {
            PipeState::Pending => PipeState::Running,
            other => other,
        }
    }

    /// The first outcome recorded sticks.
    pub fn finish(self, outcome: Outcome) -> PipeState {
        match self {
            PipeState::Finished(done) => PipeState::Finished(done),
            _ => PipeState::Finished(outcome),
        }
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        match self {
            PipeState::Finished(outcome) => Some(outcome),
            _ => None,
        }
    }
}

/// What the engine observed while waiting on a pipe.
enum Wait {
    Reported(Result<Outcome, oneshot::error::RecvError>),
    TimedOut(Duration),
    Cancelled,
}

/// Hooks and instance shared by every pipe of a fixture.
struct FixtureShared {
    target: Target,
    set_up: Vec<Body>,
    tear_down: Vec<Body>,
}

pub struct Engine {
    cancel_grace: Duration,
    cancel: CancellationToken,
    events: Option<UnboundedSender<RunEvent>>,
}

impl Engine {
    pub fn new(cancel_grace: Duration, cancel: CancellationToken) -> Self {
        Self {
            cancel_grace,
            cancel,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Option<UnboundedSender<RunEvent>>) -> Self {
        self.events = events;
        self
    }

    fn emit(&self, event: RunEvent) {
        if let Some(events) = &self.events {
            // A front end that stopped listening does not affect the run.
            let _ = events.send(event);
        }
    }

    /// Runs every pipe of `plan` and returns the fixture's report node.
    #[instrument(skip_all, fields(suite = %suite, fixture = %plan.id))]
    pub async fn run_fixture(&self, suite: &str, plan: FixturePlan) -> ReportNode {
        let mut node = ReportNode::branch(NodeKind::Fixture, &plan.id);
        let shared = Arc::new(FixtureShared {
            target: plan.target,
            set_up: plan.set_up,
            tear_down: plan.tear_down,
        });

        let needs_worker = plan.thread_affinity
            && plan
                .pipes
                .iter()
                .any(|p| matches!(p.plan, PipePlan::Run { .. }));
        let mut worker = None;
        let mut worker_error = None;
        if needs_worker {
            match AffinityWorker::spawn(&plan.id) {
                Ok(w) => worker = Some(w),
                Err(err) => {
                    warn!(%err, "Could not start affinity worker");
                    worker_error = Some(err.to_string());
                }
            }
        }

        for pipe in plan.pipes {
            let mut state = PipeState::Pending;
            let mut duration = None;
            match pipe.plan {
                PipePlan::Ignored(reason) => state = state.finish(Outcome::ignored(reason)),
                PipePlan::Failed(cause) => state = state.finish(Outcome::Failure(cause)),
                PipePlan::Run { .. } if self.cancel.is_cancelled() => {
                    state = state.finish(Outcome::skipped(
                        SkipKind::Cancelled,
                        "Run was cancelled before this pipe started",
                    ));
                }
                PipePlan::Run { .. } if worker_error.is_some() => {
                    let err = worker_error.as_deref().unwrap_or_default();
                    state = state.finish(Outcome::failure(
                        FailureKind::Internal,
                        format!("Could not start affinity worker: {err}"),
                    ));
                }
                PipePlan::Run {
                    unit,
                    args,
                    timeout,
                } => {
                    state = state.start();
                    debug!(pipe = %pipe.name, "Running pipe");
                    self.emit(RunEvent::PipeStarted {
                        suite: suite.to_string(),
                        fixture: node.name.clone(),
                        pipe: pipe.name.clone(),
                    });
                    let started = Instant::now();
                    let outcome = self
                        .run_pipe(&pipe.name, &shared, unit, args, timeout, worker.as_mut())
                        .await;
                    duration = Some(started.elapsed());
                    state = state.finish(outcome);
                }
            }

            let outcome = state.outcome().cloned().unwrap_or_else(|| {
                Outcome::failure(FailureKind::Internal, "Pipe finished without an outcome")
            });
            debug!(pipe = %pipe.name, outcome = ?outcome.kind(), "Pipe finished");
            self.emit(RunEvent::PipeFinished {
                suite: suite.to_string(),
                fixture: node.name.clone(),
                pipe: pipe.name.clone(),
                outcome: outcome.clone(),
            });
            node.push(ReportNode::leaf(&pipe.name, outcome, duration));
        }

        if let Some(worker) = worker {
            worker.shutdown().await;
        }
        node
    }

    async fn run_pipe(
        &self,
        name: &str,
        shared: &Arc<FixtureShared>,
        unit: Arc<dyn TestUnit>,
        args: Vec<Value>,
        timeout: Option<Duration>,
        worker: Option<&mut AffinityWorker>,
    ) -> Outcome {
        let pipe_cancel = CancellationToken::new();
        let (sender, mut receiver) = oneshot::channel();
        let ctx = TestContext::new(name, shared.target.clone(), args, pipe_cancel.clone());
        let job_shared = shared.clone();
        let job: Job = Box::new(move || {
            let outcome = execute_pipe(&job_shared, unit.as_ref(), &ctx);
            // The engine may have stopped waiting.
            let _ = sender.send(outcome);
        });

        let dispatched = match &worker {
            Some(worker) => worker.submit(job),
            None => spawn_detached(name, job),
        };
        if let Err(err) = dispatched {
            warn!(pipe = name, %err, "Could not dispatch pipe");
            return Outcome::failure(FailureKind::Internal, format!("Could not start pipe: {err}"));
        }

        let expiry = async {
            match timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };
        let wait = tokio::select! {
            biased;
            reported = &mut receiver => Wait::Reported(reported),
            _ = expiry => Wait::TimedOut(timeout.unwrap_or_default()),
            _ = self.cancel.cancelled() => Wait::Cancelled,
        };

        let outcome = match wait {
            Wait::Reported(Ok(outcome)) => return outcome,
            Wait::Reported(Err(_)) => {
                return Outcome::failure(
                    FailureKind::Internal,
                    "Worker stopped without reporting an outcome",
                );
            }
            Wait::TimedOut(limit) => {
                warn!(pipe = name, ?limit, "Pipe timed out");
                Outcome::failure(
                    FailureKind::Timeout,
                    format!("Pipe did not finish within {}ms", limit.as_millis()),
                )
            }
            Wait::Cancelled => {
                Outcome::skipped(SkipKind::Cancelled, "Run was cancelled while this pipe ran")
            }
        };

        pipe_cancel.cancel();
        if tokio::time::timeout(self.cancel_grace, &mut receiver)
            .await
            .is_err()
        {
            warn!(pipe = name, grace = ?self.cancel_grace, "Abandoning worker that did not stop");
            if let Some(worker) = worker {
                worker.abandon();
                // Later pipes must not queue behind the stuck job.
                match AffinityWorker::spawn(name) {
                    Ok(fresh) => {
                        let stuck = std::mem::replace(worker, fresh);
                        stuck.shutdown().await;
                    }
                    Err(err) => warn!(pipe = name, %err, "Could not replace affinity worker"),
                }
            }
        }
        outcome
    }
}

/// setUp hooks, then the unit if they all passed, then every tearDown hook.
/// A tearDown failure turns a success into a failure.
fn execute_pipe(shared: &FixtureShared, unit: &dyn TestUnit, ctx: &TestContext) -> Outcome {
    let mut outcome = match run_hooks(&shared.set_up, ctx) {
        Ok(()) => match catch_unwind(AssertUnwindSafe(|| unit.execute(ctx))) {
            Ok(outcome) => outcome,
            Err(payload) => Outcome::Failure(Fault::panic(panic_message(payload.as_ref())).into()),
        },
        Err(fault) => Outcome::Failure(setup_cause(fault, "setUp")),
    };
    for hook in &shared.tear_down {
        if let Err(fault) = invoke(hook, ctx)
            && outcome.is_success()
        {
            outcome = Outcome::Failure(setup_cause(fault, "tearDown"));
        }
    }
    outcome
}

fn run_hooks(hooks: &[Body], ctx: &TestContext) -> Result<(), Fault> {
    hooks.iter().try_for_each(|hook| invoke(hook, ctx))
}

fn setup_cause(fault: Fault, phase: &str) -> Cause {
    let mut cause = Cause::from(fault);
    cause.message = format!("{phase} failed: {}", cause.message);
    cause
}
