use crate::context::TestContext;
use crate::outcome::{FailureKind, Outcome};
use crate::unit::TestUnit;
use std::time::{Duration, Instant};
use tracing::debug;

/// Measures the wrapped unit and fails it when its wall-clock duration falls
/// outside `[min, max)`. Inside the window the inner outcome passes through.
///
/// This decorator only measures. Bounding how long the engine waits for a
/// pipe is the fixture timeout's job.
pub struct TimeoutUnit {
    inner: Box<dyn TestUnit>,
    min: Duration,
    max: Duration,
}

impl TimeoutUnit {
    pub fn new(inner: Box<dyn TestUnit>, min: Duration, max: Duration) -> Self {
        Self { inner, min, max }
    }
}

impl TestUnit for TimeoutUnit {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn execute(&self, ctx: &TestContext) -> Outcome {
        let start = Instant::now();
        let outcome = self.inner.execute(ctx);
        let elapsed = start.elapsed();
        debug!(pipe = ctx.pipe_name(), ?elapsed, "Timed unit finished");

        if elapsed < self.min {
            Outcome::failure(
                FailureKind::Timeout,
                format!(
                    "completed in {elapsed:?}, faster than the minimum of {:?}",
                    self.min
                ),
            )
        } else if elapsed >= self.max {
            Outcome::failure(
                FailureKind::Timeout,
                format!("took {elapsed:?}, exceeding the maximum of {:?}", self.max),
            )
        } else {
            outcome
        }
    }
}
