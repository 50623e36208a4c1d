//! Running a set of suites into one report.
use crate::config::RunConfig;
use crate::context::CancellationToken;
use crate::engine::Engine;
use crate::error::{LoadFailure, RunError};
use crate::filter::Filter;
use crate::fixture::Fixture;
use crate::graph::DependencyGraph;
use crate::outcome::{FailureKind, Outcome, SkipKind};
use crate::pipe::Flattener;
use crate::registry::Registry;
use crate::report::{NodeKind, Report, ReportCounter, ReportNode};
use crate::scoped::CultureGuard;
use crate::suite::Suite;
use crate::unit::panic_message;
use chrono::Local;
use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, instrument, warn};

/// Name of the leaf reported for a suite whose load failed.
pub const LOAD_PIPE: &str = "[load]";
/// Name of the leaf reported for a suite on a dependency cycle.
pub const CYCLE_PIPE: &str = "[cycle]";

/// Progress notifications for front ends.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    SuiteStarted {
        suite: String,
    },
    PipeStarted {
        suite: String,
        fixture: String,
        pipe: String,
    },
    PipeFinished {
        suite: String,
        fixture: String,
        pipe: String,
        outcome: Outcome,
    },
    SuiteFinished {
        suite: String,
        counter: ReportCounter,
    },
    CycleDetected {
        members: Vec<String>,
    },
}

pub struct Runner {
    config: RunConfig,
    registry: Arc<Registry>,
    cancel: CancellationToken,
    events: Option<UnboundedSender<RunEvent>>,
}

impl Runner {
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            registry: Arc::new(Registry::new()),
            cancel: CancellationToken::new(),
            events: None,
        }
    }

    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn with_events(mut self, events: UnboundedSender<RunEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// A handle that cancels the run. Pipes that have not started are
    /// skipped; a running pipe gets the configured grace to stop.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn emit(&self, event: RunEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    /// Runs `suites` in dependency order, keeping only the pipes `filter`
    /// accepts.
    ///
    /// A suite whose load fails reports a single build failure and every suite
    /// depending on it, directly or not, is skipped without being loaded.
    /// Suites on a dependency cycle report a cycle failure and their
    /// dependents are skipped; with `fail_on_cycle` the run is refused
    /// instead.
    #[instrument(skip_all, fields(suites = suites.len()))]
    pub async fn run(&self, suites: &[Suite], filter: &Filter) -> Result<Report, RunError> {
        let started_at = Local::now();
        let graph = DependencyGraph::build(suites)?;
        let resolution = graph.resolve();

        let cycles: Vec<Vec<String>> = resolution
            .cycles
            .iter()
            .map(|c| graph.ids_of(c))
            .collect();
        for members in &cycles {
            self.emit(RunEvent::CycleDetected {
                members: members.clone(),
            });
        }
        if self.config.fail_on_cycle
            && let Some(members) = cycles.first()
        {
            return Err(RunError::Cycle {
                members: members.clone(),
            });
        }

        let _culture = self.config.culture.as_deref().map(CultureGuard::enter);
        let engine = Engine::new(self.config.cancel_grace(), self.cancel.clone())
            .with_events(self.events.clone());

        let mut nodes: Vec<Option<ReportNode>> = vec![None; suites.len()];
        // Per suite: the suite whose load failure blocks it, if any.
        let mut blocked_by: Vec<Option<String>> = vec![None; suites.len()];

        for &i in &resolution.order {
            let suite = &suites[i];
            self.emit(RunEvent::SuiteStarted {
                suite: suite.id.clone(),
            });

            let root = graph
                .dependencies(i)
                .iter()
                .find_map(|&d| blocked_by[d].clone());
            let node = if let Some(root) = root {
                warn!(suite = %suite.id, cause = %root, "Skipping suite blocked by a failed load");
                let node = skipped_suite(
                    suite,
                    &self.flattener(suite, filter),
                    SkipKind::DependencyBlocked,
                    &format!("Suite '{root}' failed to load"),
                );
                blocked_by[i] = Some(root);
                node
            } else if self.cancel.is_cancelled() {
                skipped_suite(
                    suite,
                    &self.flattener(suite, filter),
                    SkipKind::Cancelled,
                    "Run was cancelled before this suite started",
                )
            } else {
                match self.load(suite).await {
                    Ok(fixtures) => self.run_suite(&engine, suite, &fixtures, filter).await,
                    Err(failure) => {
                        blocked_by[i] = Some(suite.id.clone());
                        structural_suite(
                            suite,
                            LOAD_PIPE,
                            Outcome::failure(FailureKind::Build, failure.message),
                        )
                    }
                }
            };

            self.finish_suite(suite, &node);
            nodes[i] = Some(node);
        }

        for (members, indices) in cycles.iter().zip(&resolution.cycles) {
            let message = RunError::Cycle {
                members: members.clone(),
            }
            .to_string();
            for &i in indices {
                let node = structural_suite(
                    &suites[i],
                    CYCLE_PIPE,
                    Outcome::failure(FailureKind::Cycle, message.clone()),
                );
                self.finish_suite(&suites[i], &node);
                nodes[i] = Some(node);
            }
        }
        for &i in &resolution.blocked {
            let node = skipped_suite(
                &suites[i],
                &self.flattener(&suites[i], filter),
                SkipKind::DependencyBlocked,
                "Depends on a suite dependency cycle",
            );
            self.finish_suite(&suites[i], &node);
            nodes[i] = Some(node);
        }

        let mut root = ReportNode::branch(NodeKind::Run, "run");
        for node in nodes.into_iter().flatten() {
            root.push(node);
        }
        let report = Report::new(root, started_at, cycles);
        let counter = report.counter();
        info!(
            run = counter.run,
            success = counter.success,
            failure = counter.failure,
            ignore = counter.ignore,
            skip = counter.skip,
            "Run finished"
        );
        Ok(report)
    }

    #[instrument(skip_all, fields(suite = %suite.id))]
    async fn load(&self, suite: &Suite) -> Result<Vec<Fixture>, LoadFailure> {
        let loaded = match AssertUnwindSafe(suite.load()).catch_unwind().await {
            Ok(loaded) => loaded,
            Err(payload) => Err(LoadFailure::new(format!(
                "Loader panicked: {}",
                panic_message(payload.as_ref())
            ))),
        };
        if let Err(failure) = &loaded {
            warn!(%failure, "Suite failed to load");
        }
        loaded
    }

    fn flattener<'a>(&'a self, suite: &'a Suite, filter: &'a Filter) -> Flattener<'a> {
        Flattener::new(
            &suite.id,
            filter,
            &self.registry,
            self.config.default_timeout(),
        )
    }

    async fn run_suite(
        &self,
        engine: &Engine,
        suite: &Suite,
        fixtures: &[Fixture],
        filter: &Filter,
    ) -> ReportNode {
        let plans = self.flattener(suite, filter).flatten(fixtures);

        let mut node = ReportNode::branch(NodeKind::Suite, &suite.id);
        for plan in plans {
            node.push(engine.run_fixture(&suite.id, plan).await);
        }
        node
    }

    fn finish_suite(&self, suite: &Suite, node: &ReportNode) {
        let counter = node.counter();
        info!(
            suite = %suite.id,
            run = counter.run,
            failure = counter.failure,
            skip = counter.skip,
            "Suite finished"
        );
        self.emit(RunEvent::SuiteFinished {
            suite: suite.id.clone(),
            counter,
        });
    }
}

/// A suite reported through a single leaf instead of its pipes.
fn structural_suite(suite: &Suite, leaf: &str, outcome: Outcome) -> ReportNode {
    let mut node = ReportNode::branch(NodeKind::Suite, &suite.id);
    node.push(ReportNode::leaf(leaf, outcome, None));
    node
}

/// One skipped leaf per declared pipe the filter accepts. Nothing is loaded,
/// constructed or expanded through a factory.
fn skipped_suite(suite: &Suite, flattener: &Flattener<'_>, kind: SkipKind, message: &str) -> ReportNode {
    let mut node = ReportNode::branch(NodeKind::Suite, &suite.id);
    for fixture in &suite.fixtures {
        let mut fixture_node = ReportNode::branch(NodeKind::Fixture, &fixture.id);
        for name in flattener.declared(fixture) {
            fixture_node.push(ReportNode::leaf(&name, Outcome::skipped(kind, message), None));
        }
        if !fixture_node.children().is_empty() {
            node.push(fixture_node);
        }
    }
    node
}
