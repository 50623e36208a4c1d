//! Executable test units.
use crate::context::TestContext;
use crate::outcome::{Fault, Outcome};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

/// A test body, setUp or tearDown hook.
pub type Body = Arc<dyn Fn(&TestContext) -> Result<(), Fault> + Send + Sync>;

/// Wraps a closure as a [`Body`].
pub fn body<F>(f: F) -> Body
where
    F: Fn(&TestContext) -> Result<(), Fault> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Something that can be executed against a context and yields an outcome.
/// Decorators are units that wrap another unit.
pub trait TestUnit: Send + Sync {
    fn name(&self) -> &str;

    fn execute(&self, ctx: &TestContext) -> Outcome;
}

/// Runs `body`, turning a panic into an unhandled fault.
pub(crate) fn invoke(body: &Body, ctx: &TestContext) -> Result<(), Fault> {
    match catch_unwind(AssertUnwindSafe(|| body(ctx))) {
        Ok(result) => result,
        Err(payload) => Err(Fault::panic(panic_message(payload.as_ref()))),
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// The undecorated unit: a named body.
pub struct BodyUnit {
    name: String,
    body: Body,
}

impl BodyUnit {
    pub fn new(name: &str, body: Body) -> Self {
        Self {
            name: name.to_string(),
            body,
        }
    }
}

impl TestUnit for BodyUnit {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, ctx: &TestContext) -> Outcome {
        invoke(&self.body, ctx).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::FailureKind;

    #[test]
    fn test_body_unit_success_and_failure() {
        let ok = BodyUnit::new("ok", body(|_| Ok(())));
        assert_eq!(ok.execute(&TestContext::detached("ok")), Outcome::Success);

        let bad = BodyUnit::new("bad", body(|_| Err(Fault::assertion("nope"))));
        let outcome = bad.execute(&TestContext::detached("bad"));
        assert_eq!(outcome.failure_kind(), Some(FailureKind::Assertion));
    }

    #[test]
    fn test_body_unit_panic_becomes_unhandled() {
        let unit = BodyUnit::new("panics", body(|_| panic!("kaboom")));
        let outcome = unit.execute(&TestContext::detached("panics"));
        let cause = outcome.cause().unwrap();
        assert_eq!(cause.kind, FailureKind::Unhandled);
        assert!(cause.message.contains("kaboom"));
        assert!(cause.fault.as_ref().unwrap().is_a("Panic"));
    }
}
