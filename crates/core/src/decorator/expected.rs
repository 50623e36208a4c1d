use crate::context::TestContext;
use crate::outcome::{FailureKind, Fault, Outcome};
use crate::unit::TestUnit;

/// What an expected-failure unit must raise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedFault {
    /// The raised fault must be of this type or a subtype of it.
    pub type_name: String,
    /// When set, the fault message must equal this.
    pub message: Option<String>,
    /// When set, the fault's inner cause must be of this type or a subtype.
    pub inner_type: Option<String>,
}

impl ExpectedFault {
    pub fn new(type_name: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            message: None,
            inner_type: None,
        }
    }

    pub fn with_message(mut self, message: &str) -> Self {
        self.message = Some(message.to_string());
        self
    }

    pub fn with_inner(mut self, type_name: &str) -> Self {
        self.inner_type = Some(type_name.to_string());
        self
    }

    /// Describes the first way `fault` fails to match, if any.
    fn mismatch(&self, fault: &Fault) -> Option<String> {
        if !fault.is_a(&self.type_name) {
            return Some(format!(
                "expected {} but {} was raised: {}",
                self.type_name,
                fault.type_name(),
                fault.message
            ));
        }
        if let Some(message) = &self.message
            && &fault.message != message
        {
            return Some(format!(
                "expected {} with message {message:?}, got {:?}",
                self.type_name, fault.message
            ));
        }
        if let Some(inner_type) = &self.inner_type {
            match &fault.inner {
                Some(inner) if inner.is_a(inner_type) => {}
                Some(inner) => {
                    return Some(format!(
                        "expected inner {inner_type}, got inner {}",
                        inner.type_name()
                    ));
                }
                None => {
                    return Some(format!(
                        "expected inner {inner_type}, but {} has no inner cause",
                        fault.type_name()
                    ));
                }
            }
        }
        None
    }
}

/// Succeeds only when the wrapped unit raises the expected fault.
pub struct ExpectedFailureUnit {
    inner: Box<dyn TestUnit>,
    expected: ExpectedFault,
}

impl ExpectedFailureUnit {
    pub fn new(inner: Box<dyn TestUnit>, expected: ExpectedFault) -> Self {
        Self { inner, expected }
    }
}

impl TestUnit for ExpectedFailureUnit {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn execute(&self, ctx: &TestContext) -> Outcome {
        match self.inner.execute(ctx) {
            Outcome::Success => Outcome::failure(
                FailureKind::Assertion,
                format!("expected {} but nothing was raised", self.expected.type_name),
            ),
            Outcome::Failure(cause) => match &cause.fault {
                Some(fault) => match self.expected.mismatch(fault) {
                    None => Outcome::Success,
                    Some(diagnostic) => Outcome::failure(FailureKind::Assertion, diagnostic),
                },
                None => Outcome::failure(
                    FailureKind::Assertion,
                    format!(
                        "expected {} but the unit failed with {}: {}",
                        self.expected.type_name,
                        cause.kind.as_str(),
                        cause.message
                    ),
                ),
            },
            other => other,
        }
    }
}
