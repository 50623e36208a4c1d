use crate::data::ParamKind;
use thiserror::Error;

/// A fixture, unit, data row or decorator chain could not be constructed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BuildError {
    #[error("Decorator factory '{0}' is not registered")]
    MissingDecoratorFactory(String),
    #[error("Data factory '{0}' is not registered")]
    MissingDataFactory(String),
    #[error("Invalid decorator: {0}")]
    InvalidDecorator(String),
    #[error("Factory '{factory}' failed: {message}")]
    FactoryFailed { factory: String, message: String },
    #[error("Row has {actual} values but {expected} parameters are declared")]
    RowArity { expected: usize, actual: usize },
    #[error("Parameter '{param}' expects {expected}, got {actual}")]
    RowType {
        param: String,
        expected: ParamKind,
        actual: String,
    },
    #[error("Fixture construction failed: {0}")]
    Construction(String),
}

/// The signal a suite loader returns when a suite cannot be loaded.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct LoadFailure {
    pub message: String,
}

impl LoadFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for LoadFailure {
    fn from(err: anyhow::Error) -> Self {
        // Keep the whole context chain in the message.
        Self::new(format!("{err:#}"))
    }
}

/// The suite set cannot be run at all.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RunError {
    #[error("Suite '{0}' is declared more than once")]
    DuplicateSuite(String),
    #[error("Suite '{suite}' depends on undeclared suite '{dependency}'")]
    UnknownDependency { suite: String, dependency: String },
    #[error("Suite dependency cycle: {}", members.join(" -> "))]
    Cycle { members: Vec<String> },
}
