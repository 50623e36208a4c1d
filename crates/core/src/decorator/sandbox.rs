use crate::context::{CapabilitySet, TestContext};
use crate::outcome::{FailureKind, Outcome};
use crate::unit::TestUnit;
use tracing::warn;

/// Runs the wrapped unit with only `granted` capabilities. A refused demand
/// fails the pipe as a sandbox violation even when the body swallowed the
/// error it got back.
pub struct SandboxUnit {
    inner: Box<dyn TestUnit>,
    granted: CapabilitySet,
}

impl SandboxUnit {
    pub fn new(inner: Box<dyn TestUnit>, granted: CapabilitySet) -> Self {
        Self { inner, granted }
    }
}

impl TestUnit for SandboxUnit {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn execute(&self, ctx: &TestContext) -> Outcome {
        let sandboxed = ctx.restricted(&self.granted);
        let outcome = self.inner.execute(&sandboxed);
        if outcome.failure_kind() == Some(FailureKind::SandboxViolation) {
            return outcome;
        }
        match sandboxed.first_violation() {
            Some(violation) => {
                warn!(pipe = ctx.pipe_name(), %violation, "Sandbox violation");
                Outcome::failure(FailureKind::SandboxViolation, violation)
            }
            None => outcome,
        }
    }
}
