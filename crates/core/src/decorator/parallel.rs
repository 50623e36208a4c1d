use crate::context::TestContext;
use crate::outcome::{Cause, FailureKind, Outcome};
use crate::unit::{TestUnit, panic_message};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc;
use tracing::debug;

/// Runs the wrapped unit `count` times at once, one worker thread per
/// iteration. Every worker is joined before the results are reduced; the
/// first failure in completion order decides the outcome.
pub struct ParallelRepeatUnit {
    inner: Box<dyn TestUnit>,
    count: usize,
}

impl ParallelRepeatUnit {
    pub fn new(inner: Box<dyn TestUnit>, count: usize) -> Self {
        Self { inner, count }
    }
}

impl TestUnit for ParallelRepeatUnit {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn execute(&self, ctx: &TestContext) -> Outcome {
        let (tx, rx) = mpsc::channel::<(usize, Outcome)>();
        let inner = self.inner.as_ref();

        std::thread::scope(|scope| {
            for iteration in 0..self.count {
                let worker_tx = tx.clone();
                let ctx = ctx.clone();
                let spawned = std::thread::Builder::new()
                    .name(format!("{}#{}", ctx.pipe_name(), iteration + 1))
                    .spawn_scoped(scope, move || {
                        let outcome = catch_unwind(AssertUnwindSafe(|| inner.execute(&ctx)))
                            .unwrap_or_else(|payload| {
                                Outcome::failure(
                                    FailureKind::Unhandled,
                                    panic_message(payload.as_ref()),
                                )
                            });
                        let _ = worker_tx.send((iteration, outcome));
                    });
                if let Err(err) = spawned {
                    let _ = tx.send((
                        iteration,
                        Outcome::failure(
                            FailureKind::Internal,
                            format!("could not start worker: {err}"),
                        ),
                    ));
                }
            }
        });
        drop(tx);

        // The scope has joined every worker; the channel holds the results in
        // the order the workers finished.
        let results: Vec<(usize, Outcome)> = rx.into_iter().collect();
        debug!(pipe = ctx.pipe_name(), workers = results.len(), "Parallel repeat joined");

        match results.into_iter().find(|(_, o)| !o.is_success()) {
            None => Outcome::Success,
            Some((iteration, Outcome::Failure(cause))) => Outcome::Failure(Cause {
                message: format!(
                    "iteration {} of {}: {}",
                    iteration + 1,
                    self.count,
                    cause.message
                ),
                ..cause
            }),
            Some((_, other)) => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::Fault;
    use crate::unit::{BodyUnit, body};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[test]
    fn test_all_workers_run_and_join() {
        let calls = Arc::new(AtomicUsize::new(0));
        let threads = Arc::new(Mutex::new(HashSet::new()));
        let (c, t) = (calls.clone(), threads.clone());
        let unit = BodyUnit::new(
            "par",
            body(move |_| {
                std::thread::sleep(Duration::from_millis(10));
                c.fetch_add(1, Ordering::SeqCst);
                t.lock().unwrap().insert(std::thread::current().id());
                Ok(())
            }),
        );
        let outcome = ParallelRepeatUnit::new(Box::new(unit), 4).execute(&TestContext::detached("par"));
        assert_eq!(outcome, Outcome::Success);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(threads.lock().unwrap().len(), 4);
    }

    #[test]
    fn test_panicking_worker_is_joined_and_reported() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let unit = BodyUnit::new(
            "par",
            body(move |_| {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("worker exploded");
                }
                Ok(())
            }),
        );
        let outcome = ParallelRepeatUnit::new(Box::new(unit), 3).execute(&TestContext::detached("par"));
        let cause = outcome.cause().unwrap();
        assert_eq!(cause.kind, FailureKind::Unhandled);
        assert!(cause.message.contains("worker exploded"), "{}", cause.message);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_first_failure_by_completion_order_reported() {
        let calls = Arc::new(AtomicUsize::new(0));
        let finished = calls.clone();
        let unit = BodyUnit::new(
            "par",
            body(move |_| {
                let n = finished.fetch_add(1, Ordering::SeqCst);
                match n {
                    // Slow failure finishes after the fast one.
                    0 => {
                        std::thread::sleep(Duration::from_millis(60));
                        Err(Fault::assertion("slow failure"))
                    }
                    1 => Err(Fault::assertion("fast failure")),
                    _ => Ok(()),
                }
            }),
        );
        let outcome = ParallelRepeatUnit::new(Box::new(unit), 3).execute(&TestContext::detached("par"));
        let cause = outcome.cause().unwrap();
        assert_eq!(cause.kind, FailureKind::Assertion);
        assert!(cause.message.contains("fast failure"), "{}", cause.message);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
