//! Terminal classification of a run pipe, and the faults test bodies raise.
use serde::Serialize;
use std::fmt;

/// Why a pipe ended in `Outcome::Failure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The fixture, unit, data row or decorator chain could not be built.
    Build,
    /// The body signalled a failed expectation.
    Assertion,
    /// The body raised something it did not mean to, including panics.
    Unhandled,
    Timeout,
    SandboxViolation,
    /// The owning suite sits on a dependency cycle.
    Cycle,
    /// The engine itself failed while running the pipe.
    Internal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Build => "build",
            FailureKind::Assertion => "assertion",
            FailureKind::Unhandled => "unhandled",
            FailureKind::Timeout => "timeout",
            FailureKind::SandboxViolation => "sandbox",
            FailureKind::Cycle => "cycle",
            FailureKind::Internal => "internal",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipKind {
    /// A suite this pipe depends on failed to load.
    DependencyBlocked,
    Cancelled,
}

/// The kind of fault a body raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    Assertion,
    Unhandled,
    SandboxViolation,
}

/// A named fault type together with its ancestors, most derived first.
///
/// Assignability is decided by name: a fault of type `ArgumentNull` built with
/// `FaultType::new("ArgumentNull").extends(&argument)` is assignable to
/// `Argument` and to everything `Argument` extends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultType {
    lineage: Vec<String>,
}

impl FaultType {
    pub fn new(name: &str) -> Self {
        Self {
            lineage: vec![name.to_string()],
        }
    }

    pub fn extends(mut self, parent: &FaultType) -> Self {
        self.lineage.truncate(1);
        self.lineage.extend(parent.lineage.iter().cloned());
        self
    }

    pub fn name(&self) -> &str {
        &self.lineage[0]
    }

    pub fn is_a(&self, type_name: &str) -> bool {
        self.lineage.iter().any(|t| t == type_name)
    }
}

/// What a test body, setUp or tearDown raises.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fault {
    pub kind: FaultKind,
    lineage: Vec<String>,
    pub message: String,
    pub inner: Option<Box<Fault>>,
}

impl Fault {
    /// A failed expectation.
    pub fn assertion(message: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::Assertion,
            lineage: vec!["AssertionFailure".to_string()],
            message: message.into(),
            inner: None,
        }
    }

    /// An unexpected error of the given type.
    pub fn raised(fault_type: &FaultType, message: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::Unhandled,
            lineage: fault_type.lineage.clone(),
            message: message.into(),
            inner: None,
        }
    }

    pub fn sandbox(message: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::SandboxViolation,
            lineage: vec!["SandboxViolation".to_string()],
            message: message.into(),
            inner: None,
        }
    }

    pub(crate) fn panic(message: String) -> Self {
        Self::raised(&FaultType::new("Panic"), message)
    }

    pub fn with_inner(mut self, inner: Fault) -> Self {
        self.inner = Some(Box::new(inner));
        self
    }

    pub fn type_name(&self) -> &str {
        &self.lineage[0]
    }

    pub fn is_a(&self, type_name: &str) -> bool {
        self.lineage.iter().any(|t| t == type_name)
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self.kind {
            FaultKind::Assertion => FailureKind::Assertion,
            FaultKind::Unhandled => FailureKind::Unhandled,
            FaultKind::SandboxViolation => FailureKind::SandboxViolation,
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.type_name(), self.message)?;
        if let Some(inner) = &self.inner {
            write!(f, " ---> {inner}")?;
        }
        Ok(())
    }
}

/// Lets bodies use `?` on ordinary errors; they surface as unhandled faults.
impl<E> From<E> for Fault
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        let full = std::any::type_name::<E>();
        let short = full.rsplit("::").next().unwrap_or(full);
        let mut fault = Fault::raised(&FaultType::new(short), err.to_string());
        if let Some(source) = err.source() {
            fault = fault.with_inner(Fault::raised(
                &FaultType::new("Error"),
                source.to_string(),
            ));
        }
        fault
    }
}

/// Fails with an assertion fault unless `condition` holds.
pub fn check(condition: bool, message: impl FnOnce() -> String) -> Result<(), Fault> {
    if condition {
        Ok(())
    } else {
        Err(Fault::assertion(message()))
    }
}

pub fn check_eq<T: PartialEq + fmt::Debug>(actual: T, expected: T) -> Result<(), Fault> {
    check(actual == expected, || {
        format!("expected {expected:?}, got {actual:?}")
    })
}

/// The cause attached to a failed pipe.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cause {
    pub kind: FailureKind,
    pub message: String,
    /// The raised fault, when the failure came from one.
    pub fault: Option<Fault>,
}

impl Cause {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            fault: None,
        }
    }
}

impl From<Fault> for Cause {
    fn from(fault: Fault) -> Self {
        Self {
            kind: fault.failure_kind(),
            message: fault.to_string(),
            fault: Some(fault),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkipReason {
    pub kind: SkipKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Success,
    Failure,
    Ignored,
    Skipped,
}

/// Terminal result of a run pipe. Once a pipe has an outcome it never changes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure(Cause),
    Ignored { reason: String },
    Skipped(SkipReason),
}

impl Outcome {
    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        Outcome::Failure(Cause::new(kind, message))
    }

    pub fn ignored(reason: impl Into<String>) -> Self {
        Outcome::Ignored {
            reason: reason.into(),
        }
    }

    pub fn skipped(kind: SkipKind, message: impl Into<String>) -> Self {
        Outcome::Skipped(SkipReason {
            kind,
            message: message.into(),
        })
    }

    pub fn kind(&self) -> OutcomeKind {
        match self {
            Outcome::Success => OutcomeKind::Success,
            Outcome::Failure(_) => OutcomeKind::Failure,
            Outcome::Ignored { .. } => OutcomeKind::Ignored,
            Outcome::Skipped(_) => OutcomeKind::Skipped,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }

    pub fn cause(&self) -> Option<&Cause> {
        match self {
            Outcome::Failure(cause) => Some(cause),
            _ => None,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.cause().map(|c| c.kind)
    }

    /// Human readable diagnostic, empty for successes.
    pub fn diagnostic(&self) -> String {
        match self {
            Outcome::Success => String::new(),
            Outcome::Failure(cause) => format!("[{}] {}", cause.kind.as_str(), cause.message),
            Outcome::Ignored { reason } => reason.clone(),
            Outcome::Skipped(skip) => skip.message.clone(),
        }
    }
}

impl From<Result<(), Fault>> for Outcome {
    fn from(result: Result<(), Fault>) -> Self {
        match result {
            Ok(()) => Outcome::Success,
            Err(fault) => Outcome::Failure(fault.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_type_lineage_assignability() {
        let base = FaultType::new("Error");
        let argument = FaultType::new("Argument").extends(&base);
        let null = FaultType::new("ArgumentNull").extends(&argument);

        let fault = Fault::raised(&null, "value was null");
        assert_eq!(fault.type_name(), "ArgumentNull");
        assert!(fault.is_a("ArgumentNull"));
        assert!(fault.is_a("Argument"));
        assert!(fault.is_a("Error"));
        assert!(!fault.is_a("Io"));
        assert!(!Fault::raised(&argument, "x").is_a("ArgumentNull"));
    }

    #[test]
    fn test_fault_from_std_error() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing file");
        let fault: Fault = io.into();
        assert_eq!(fault.kind, FaultKind::Unhandled);
        assert_eq!(fault.type_name(), "Error");
        assert!(fault.message.contains("missing file"));
    }

    #[test]
    fn test_fault_display_includes_inner() {
        let fault = Fault::raised(&FaultType::new("Outer"), "wrapped")
            .with_inner(Fault::raised(&FaultType::new("Inner"), "root"));
        assert_eq!(fault.to_string(), "Outer: wrapped ---> Inner: root");
    }

    #[test]
    fn test_outcome_from_result() {
        assert_eq!(Outcome::from(Ok(())), Outcome::Success);
        let outcome = Outcome::from(check_eq(1, 2));
        assert_eq!(outcome.failure_kind(), Some(FailureKind::Assertion));
        assert!(outcome.diagnostic().contains("expected 2, got 1"));
    }

    #[test]
    fn test_sandbox_fault_maps_to_distinct_kind() {
        let cause: Cause = Fault::sandbox("network denied").into();
        assert_eq!(cause.kind, FailureKind::SandboxViolation);
        assert!(cause.fault.is_some());
    }
}
