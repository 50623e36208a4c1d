//! Flattening fixtures into ordered run pipes.
use crate::context::Target;
use crate::data::{declared_cases, expand};
use crate::decorator::{build_chain, priority, repeat_count, time_limit, validate};
use crate::error::BuildError;
use crate::filter::{Filter, PipeInfo};
use crate::fixture::{Constructor, Fixture, UnitSpec};
use crate::outcome::{Cause, FailureKind, Fault};
use crate::registry::Registry;
use crate::unit::{Body, BodyUnit, TestUnit, panic_message};
use serde_json::Value;
use std::cmp::Reverse;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Name of the single pipe reported for a fixture whose constructor failed.
pub const CONSTRUCTION_PIPE: &str = "[construct]";

/// What the engine does with a pipe.
#[derive(Clone)]
pub enum PipePlan {
    /// Run setUp, the decorated unit and tearDown. The engine stops waiting
    /// once `timeout` has passed.
    Run {
        unit: Arc<dyn TestUnit>,
        args: Vec<Value>,
        timeout: Option<Duration>,
    },
    /// Short-circuits without invoking anything.
    Ignored(String),
    /// Could not be built; reported without running.
    Failed(Cause),
}

/// One fully resolved, independently reportable execution.
#[derive(Clone)]
pub struct RunPipe {
    /// Stable name used for reporting and filtering.
    pub name: String,
    pub unit: String,
    pub plan: PipePlan,
}

/// The pipes of one fixture with the policy they run under.
#[derive(Clone)]
pub struct FixturePlan {
    pub id: String,
    pub target: Target,
    pub set_up: Vec<Body>,
    pub tear_down: Vec<Body>,
    pub thread_affinity: bool,
    pub pipes: Vec<RunPipe>,
}

fn build_failure(err: &BuildError) -> Cause {
    Cause::new(FailureKind::Build, err.to_string())
}

/// Names of the sibling pipes one argument tuple becomes.
fn case_names(unit: &str, label: Option<&str>, repeat: usize) -> Vec<String> {
    let base_name = match label {
        Some(label) => format!("{unit}({label})"),
        None => unit.to_string(),
    };
    if repeat <= 1 {
        return vec![base_name];
    }
    (1..=repeat)
        .map(|iteration| format!("{base_name} [{iteration}/{repeat}]"))
        .collect()
}

fn by_priority(fixture: &Fixture) -> Vec<&UnitSpec> {
    let mut units: Vec<&UnitSpec> = fixture.units.iter().collect();
    // Stable: equal priorities keep declaration order.
    units.sort_by_key(|u| Reverse(priority(&u.decorators)));
    units
}

/// Turns a suite's fixtures into fixture plans, in declaration order.
pub struct Flattener<'a> {
    suite: &'a str,
    filter: &'a Filter,
    registry: &'a Registry,
    default_timeout: Option<Duration>,
}

impl<'a> Flattener<'a> {
    pub fn new(
        suite: &'a str,
        filter: &'a Filter,
        registry: &'a Registry,
        default_timeout: Option<Duration>,
    ) -> Self {
        Self {
            suite,
            filter,
            registry,
            default_timeout,
        }
    }

    /// Fixtures left with no pipes after filtering are dropped.
    pub fn flatten(&self, fixtures: &[Fixture]) -> Vec<FixturePlan> {
        fixtures
            .iter()
            .map(|f| self.fixture(f))
            .filter(|plan| !plan.pipes.is_empty())
            .collect()
    }

    /// Names of the pipes `fixture` declares that the filter accepts, in run
    /// order, without constructing it or calling any data factory. A unit whose
    /// data comes from a factory counts as a single pipe named after the unit.
    pub fn declared(&self, fixture: &Fixture) -> Vec<String> {
        let mut names = Vec::new();
        for unit in by_priority(fixture) {
            let expanded = match (&fixture.ignored, &unit.ignored) {
                (None, None) => declared_cases(&unit.data).map(|cases| {
                    let repeat = repeat_count(&unit.decorators).max(1);
                    cases
                        .flat_map(|case| case_names(&unit.name, case.label.as_deref(), repeat))
                        .collect::<Vec<_>>()
                }),
                _ => None,
            };
            names.extend(
                expanded
                    .unwrap_or_else(|| vec![unit.name.clone()])
                    .into_iter()
                    .filter(|name| self.accepts(fixture, unit, name)),
            );
        }
        names
    }

    fn fixture(&self, fixture: &Fixture) -> FixturePlan {
        let units = by_priority(fixture);
        let bound = fixture.default_timeout.or(self.default_timeout);
        let mut pipes = Vec::new();
        for unit in units {
            match &fixture.ignored {
                Some(reason) => self.ignored(fixture, unit, reason, &mut pipes),
                None => self.unit(fixture, unit, bound, &mut pipes),
            }
        }

        let mut target: Target = Arc::new(());
        if fixture.ignored.is_none()
            && !pipes.is_empty()
            && let Some(constructor) = &fixture.constructor
        {
            match construct(constructor) {
                Ok(instance) => target = instance,
                Err(fault) => {
                    warn!(suite = self.suite, fixture = %fixture.id, %fault, "Fixture failed to load");
                    pipes = vec![RunPipe {
                        name: CONSTRUCTION_PIPE.to_string(),
                        unit: CONSTRUCTION_PIPE.to_string(),
                        plan: PipePlan::Failed(build_failure(&BuildError::Construction(
                            fault.to_string(),
                        ))),
                    }];
                }
            }
        }

        debug!(suite = self.suite, fixture = %fixture.id, pipes = pipes.len(), "Flattened fixture");
        FixturePlan {
            id: fixture.id.clone(),
            target,
            set_up: fixture.set_up.clone(),
            tear_down: fixture.tear_down.clone(),
            thread_affinity: fixture.thread_affinity,
            pipes,
        }
    }

    fn accepts(&self, fixture: &Fixture, unit: &UnitSpec, name: &str) -> bool {
        self.filter.matches(&PipeInfo {
            suite: self.suite,
            fixture: &fixture.id,
            unit: &unit.name,
            name,
            categories: &unit.categories,
        })
    }

    /// Ignored units and units of ignored fixtures become one ignored pipe
    /// each; their data sources are never evaluated.
    fn ignored(&self, fixture: &Fixture, unit: &UnitSpec, reason: &str, out: &mut Vec<RunPipe>) {
        if self.accepts(fixture, unit, &unit.name) {
            out.push(RunPipe {
                name: unit.name.clone(),
                unit: unit.name.clone(),
                plan: PipePlan::Ignored(reason.to_string()),
            });
        }
    }

    fn structural(&self, fixture: &Fixture, unit: &UnitSpec, err: &BuildError, out: &mut Vec<RunPipe>) {
        if self.accepts(fixture, unit, &unit.name) {
            warn!(suite = self.suite, fixture = %fixture.id, unit = %unit.name, %err, "Unit failed to build");
            out.push(RunPipe {
                name: unit.name.clone(),
                unit: unit.name.clone(),
                plan: PipePlan::Failed(build_failure(err)),
            });
        }
    }

    fn unit(
        &self,
        fixture: &Fixture,
        unit: &UnitSpec,
        bound: Option<Duration>,
        out: &mut Vec<RunPipe>,
    ) {
        if let Some(reason) = &unit.ignored {
            self.ignored(fixture, unit, reason, out);
            return;
        }
        if let Err(err) = validate(&unit.decorators, self.registry) {
            self.structural(fixture, unit, &err, out);
            return;
        }
        let cases = match expand(&unit.data, self.registry) {
            Ok(cases) => cases,
            Err(err) => {
                self.structural(fixture, unit, &err, out);
                return;
            }
        };

        let repeat = repeat_count(&unit.decorators);
        let timeout = match (bound, time_limit(&unit.decorators)) {
            (Some(bound), Some(limit)) => Some(bound.min(limit)),
            (bound, limit) => bound.or(limit),
        };
        let mut chain: Option<Arc<dyn TestUnit>> = None;

        for case in cases {
            for name in case_names(&unit.name, case.label.as_deref(), repeat) {
                if !self.accepts(fixture, unit, &name) {
                    continue;
                }
                let args = match &case.args {
                    Ok(args) => args.clone(),
                    Err(err) => {
                        out.push(RunPipe {
                            name,
                            unit: unit.name.clone(),
                            plan: PipePlan::Failed(build_failure(err)),
                        });
                        continue;
                    }
                };
                let built = match &chain {
                    Some(built) => built.clone(),
                    None => {
                        let base = Box::new(BodyUnit::new(&unit.name, unit.body.clone()));
                        match build_chain(base, &unit.decorators, self.registry) {
                            Ok(built) => {
                                let built: Arc<dyn TestUnit> = Arc::from(built);
                                chain = Some(built.clone());
                                built
                            }
                            Err(err) => {
                                // Reported once for the unit, not per case.
                                out.retain(|p| p.unit != unit.name);
                                self.structural(fixture, unit, &err, out);
                                return;
                            }
                        }
                    }
                };
                out.push(RunPipe {
                    name,
                    unit: unit.name.clone(),
                    plan: PipePlan::Run {
                        unit: built,
                        args,
                        timeout,
                    },
                });
            }
        }
    }
}

fn construct(constructor: &Constructor) -> Result<Target, Fault> {
    match catch_unwind(AssertUnwindSafe(|| constructor())) {
        Ok(result) => result,
        Err(payload) => Err(Fault::panic(panic_message(payload.as_ref()))),
    }
}
