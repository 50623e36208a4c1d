mod scoped;

pub mod config;
pub mod context;
pub mod data;
pub mod decorator;
pub mod engine;
pub mod error;
pub mod filter;
pub mod fixture;
pub mod graph;
pub mod log;
pub mod outcome;
pub mod pipe;
pub mod registry;
pub mod report;
pub mod runner;
pub mod suite;
pub mod unit;

#[cfg(test)]
mod test_utils;

pub use crate::config::{RunConfig, TrellisConfigError, config_dir, load_config};
pub use crate::log::{LogTarget, data_dir, setup_logging};
pub use crate::context::{Capability, CapabilitySet, CancellationToken, TestContext};
pub use crate::data::{ParamKind, Parameter};
pub use crate::decorator::{DecoratorFactory, DecoratorSpec, ExpectedFault};
pub use crate::error::{BuildError, LoadFailure, RunError};
pub use crate::filter::Filter;
pub use crate::fixture::{Fixture, UnitSpec, constructor};
pub use crate::outcome::{FailureKind, Fault, FaultType, Outcome, OutcomeKind, SkipKind, check, check_eq};
pub use crate::registry::Registry;
pub use crate::report::{Report, ReportCounter, ReportNode};
pub use crate::runner::{RunEvent, Runner};
pub use crate::scoped::{CultureGuard, EnvGuard, current_culture};
pub use crate::suite::{FnLoader, Suite, SuiteLoader};
pub use crate::unit::{Body, TestUnit, body};
