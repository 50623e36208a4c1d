//! Decorator descriptors and the fold that turns them into a unit chain.
//!
//! Decorators are declared as an ordered list of [`DecoratorSpec`] values.
//! [`build_chain`] folds that list over the base unit: each decorator wraps
//! the unit built so far, so the **last declared decorator is the outermost**.
//! `Repeat` and `Priority` are structural: the flattener reads them to decide
//! how many pipes a unit becomes and in which order, and the fold skips them.
mod expected;
mod parallel;
mod sandbox;
mod timeout;

pub use expected::{ExpectedFault, ExpectedFailureUnit};
pub use parallel::ParallelRepeatUnit;
pub use sandbox::SandboxUnit;
pub use timeout::TimeoutUnit;

use crate::context::{CapabilitySet, TestContext};
use crate::error::BuildError;
use crate::outcome::Outcome;
use crate::registry::Registry;
use crate::scoped::{CultureGuard, EnvGuard};
use crate::unit::TestUnit;
use serde_json::Value;
use std::time::Duration;

/// A decorator as declared on a unit.
#[derive(Debug, Clone, PartialEq)]
pub enum DecoratorSpec {
    /// Expands into `n` sibling pipes.
    Repeat(usize),
    /// Runs the unit `n` times concurrently inside one pipe.
    ParallelRepeat(usize),
    /// Fails unless the wrapped unit takes at least `min` and less than `max`.
    Timeout { min: Duration, max: Duration },
    ExpectedFailure(ExpectedFault),
    Sandbox(CapabilitySet),
    Culture(String),
    /// Sets (or with `None`, removes) an environment variable.
    Environment { key: String, value: Option<String> },
    /// Higher priorities run first within a fixture.
    Priority(i32),
    /// A decorator built by a factory from the [`Registry`].
    Custom { factory: String, args: Value },
}

impl DecoratorSpec {
    fn is_structural(&self) -> bool {
        matches!(self, DecoratorSpec::Repeat(_) | DecoratorSpec::Priority(_))
    }
}

/// Builds a user-defined decorator around an inner unit.
pub trait DecoratorFactory: Send + Sync {
    fn decorate(
        &self,
        inner: Box<dyn TestUnit>,
        args: &Value,
    ) -> Result<Box<dyn TestUnit>, BuildError>;
}

/// Checks a decorator list without building anything.
pub fn validate(specs: &[DecoratorSpec], registry: &Registry) -> Result<(), BuildError> {
    for spec in specs {
        match spec {
            DecoratorSpec::Repeat(0) | DecoratorSpec::ParallelRepeat(0) => {
                return Err(BuildError::InvalidDecorator(
                    "repeat count must be at least 1".to_string(),
                ));
            }
            DecoratorSpec::Timeout { min, max } if min > max => {
                return Err(BuildError::InvalidDecorator(format!(
                    "timeout minimum {min:?} exceeds maximum {max:?}"
                )));
            }
            DecoratorSpec::Custom { factory, .. } if registry.decorator(factory).is_none() => {
                return Err(BuildError::MissingDecoratorFactory(factory.clone()));
            }
            _ => {}
        }
    }
    Ok(())
}

/// Number of sibling pipes the declared `Repeat`s expand into.
pub fn repeat_count(specs: &[DecoratorSpec]) -> usize {
    specs
        .iter()
        .filter_map(|s| match s {
            DecoratorSpec::Repeat(n) => Some(*n),
            _ => None,
        })
        .product()
}

/// The effective priority; the last declared `Priority` wins.
pub fn priority(specs: &[DecoratorSpec]) -> i32 {
    specs
        .iter()
        .rev()
        .find_map(|s| match s {
            DecoratorSpec::Priority(p) => Some(*p),
            _ => None,
        })
        .unwrap_or(0)
}

/// The tightest `max` among the declared `Timeout`s. A pipe still running past
/// it has failed whatever happens next, so the engine stops waiting there.
pub fn time_limit(specs: &[DecoratorSpec]) -> Option<Duration> {
    specs
        .iter()
        .filter_map(|s| match s {
            DecoratorSpec::Timeout { max, .. } => Some(*max),
            _ => None,
        })
        .min()
}

/// Folds `specs` over `base`, last declared outermost.
pub fn build_chain(
    base: Box<dyn TestUnit>,
    specs: &[DecoratorSpec],
    registry: &Registry,
) -> Result<Box<dyn TestUnit>, BuildError> {
    validate(specs, registry)?;
    specs
        .iter()
        .filter(|s| !s.is_structural())
        .try_fold(base, |inner, spec| decorate(inner, spec, registry))
}

fn decorate(
    inner: Box<dyn TestUnit>,
    spec: &DecoratorSpec,
    registry: &Registry,
) -> Result<Box<dyn TestUnit>, BuildError> {
    let unit: Box<dyn TestUnit> = match spec {
        DecoratorSpec::ParallelRepeat(n) => Box::new(ParallelRepeatUnit::new(inner, *n)),
        DecoratorSpec::Timeout { min, max } => Box::new(TimeoutUnit::new(inner, *min, *max)),
        DecoratorSpec::ExpectedFailure(expected) => {
            Box::new(ExpectedFailureUnit::new(inner, expected.clone()))
        }
        DecoratorSpec::Sandbox(granted) => Box::new(SandboxUnit::new(inner, granted.clone())),
        DecoratorSpec::Culture(name) => Box::new(CultureUnit {
            inner,
            culture: name.clone(),
        }),
        DecoratorSpec::Environment { key, value } => Box::new(EnvironmentUnit {
            inner,
            key: key.clone(),
            value: value.clone(),
        }),
        DecoratorSpec::Custom { factory, args } => registry
            .decorator(factory)
            .ok_or_else(|| BuildError::MissingDecoratorFactory(factory.clone()))?
            .decorate(inner, args)?,
        DecoratorSpec::Repeat(_) | DecoratorSpec::Priority(_) => inner,
    };
    Ok(unit)
}

/// Runs the inner unit with the process culture switched.
struct CultureUnit {
    inner: Box<dyn TestUnit>,
    culture: String,
}

impl TestUnit for CultureUnit {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn execute(&self, ctx: &TestContext) -> Outcome {
        let _guard = CultureGuard::enter(&self.culture);
        self.inner.execute(ctx)
    }
}

/// Runs the inner unit with one environment variable switched.
struct EnvironmentUnit {
    inner: Box<dyn TestUnit>,
    key: String,
    value: Option<String>,
}

impl TestUnit for EnvironmentUnit {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn execute(&self, ctx: &TestContext) -> Outcome {
        let _guard = EnvGuard::enter(&self.key, self.value.as_deref());
        self.inner.execute(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::{FailureKind, Fault};
    use crate::scoped::current_culture;
    use crate::scoped::tests::GLOBAL_STATE;
    use crate::unit::{BodyUnit, body};
    use std::sync::{Arc, Mutex};

    /// Records its tag before delegating, to observe nesting order.
    struct Tagging {
        inner: Box<dyn TestUnit>,
        tag: String,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl TestUnit for Tagging {
        fn name(&self) -> &str {
            self.inner.name()
        }

        fn execute(&self, ctx: &TestContext) -> Outcome {
            self.log.lock().unwrap().push(self.tag.clone());
            self.inner.execute(ctx)
        }
    }

    struct TaggingFactory {
        log: Arc<Mutex<Vec<String>>>,
    }

    impl DecoratorFactory for TaggingFactory {
        fn decorate(
            &self,
            inner: Box<dyn TestUnit>,
            args: &Value,
        ) -> Result<Box<dyn TestUnit>, BuildError> {
            let tag = args
                .as_str()
                .ok_or_else(|| BuildError::InvalidDecorator("tag must be a string".into()))?;
            Ok(Box::new(Tagging {
                inner,
                tag: tag.to_string(),
                log: self.log.clone(),
            }))
        }
    }

    fn base(name: &str) -> Box<dyn TestUnit> {
        Box::new(BodyUnit::new(name, body(|_| Ok(()))))
    }

    fn tag(t: &str) -> DecoratorSpec {
        DecoratorSpec::Custom {
            factory: "tag".to_string(),
            args: Value::from(t),
        }
    }

    #[test]
    fn test_last_declared_decorator_is_outermost() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = Registry::new();
        registry.register_decorator("tag", Arc::new(TaggingFactory { log: log.clone() }));

        let chain = build_chain(base("unit"), &[tag("first"), tag("second")], &registry).unwrap();
        assert_eq!(chain.execute(&TestContext::detached("unit")), Outcome::Success);
        assert_eq!(*log.lock().unwrap(), vec!["second", "first"]);
    }

    #[test]
    fn test_missing_factory_fails_build() {
        let err = build_chain(base("unit"), &[tag("x")], &Registry::new())
            .err()
            .unwrap();
        assert_eq!(err, BuildError::MissingDecoratorFactory("tag".to_string()));
    }

    #[test]
    fn test_invalid_decorators_rejected() {
        let registry = Registry::new();
        assert!(validate(&[DecoratorSpec::Repeat(0)], &registry).is_err());
        assert!(
            validate(
                &[DecoratorSpec::Timeout {
                    min: Duration::from_millis(10),
                    max: Duration::from_millis(5),
                }],
                &registry
            )
            .is_err()
        );
        assert!(validate(&[DecoratorSpec::Repeat(2)], &registry).is_ok());
    }

    #[test]
    fn test_repeat_count_and_priority() {
        let specs = [
            DecoratorSpec::Repeat(2),
            DecoratorSpec::Priority(1),
            DecoratorSpec::Repeat(3),
            DecoratorSpec::Priority(5),
        ];
        assert_eq!(repeat_count(&specs), 6);
        assert_eq!(priority(&specs), 5);
        assert_eq!(repeat_count(&[]), 1);
        assert_eq!(priority(&[]), 0);
    }

    #[test]
    fn test_time_limit_is_tightest_maximum() {
        let window = |max| DecoratorSpec::Timeout {
            min: Duration::ZERO,
            max: Duration::from_millis(max),
        };
        assert_eq!(
            time_limit(&[window(200), DecoratorSpec::Repeat(2), window(50)]),
            Some(Duration::from_millis(50))
        );
        assert_eq!(time_limit(&[DecoratorSpec::Priority(1)]), None);
    }

    #[test]
    fn test_culture_restored_after_failure() {
        let _lock = GLOBAL_STATE.lock().unwrap_or_else(|e| e.into_inner());
        let before = current_culture();
        let seen = Arc::new(Mutex::new(String::new()));
        let seen_in_body = seen.clone();
        let unit = Box::new(BodyUnit::new(
            "culture",
            body(move |_| {
                *seen_in_body.lock().unwrap() = current_culture();
                Err(Fault::assertion("fails under culture"))
            }),
        ));
        let chain = build_chain(
            unit,
            &[DecoratorSpec::Culture("tr-TR".to_string())],
            &Registry::new(),
        )
        .unwrap();
        let outcome = chain.execute(&TestContext::detached("culture"));
        assert_eq!(outcome.failure_kind(), Some(FailureKind::Assertion));
        assert_eq!(*seen.lock().unwrap(), "tr-TR");
        assert_eq!(current_culture(), before);
    }

    #[test]
    fn test_environment_switch_restored_after_panic() {
        let _lock = GLOBAL_STATE.lock().unwrap_or_else(|e| e.into_inner());
        let key = "TRELLIS_DECORATOR_ENV";
        let unit = Box::new(BodyUnit::new(
            "env",
            body(move |_| {
                assert_eq!(std::env::var(key).as_deref(), Ok("1"));
                panic!("body blew up");
            }),
        ));
        let chain = build_chain(
            unit,
            &[DecoratorSpec::Environment {
                key: key.to_string(),
                value: Some("1".to_string()),
            }],
            &Registry::new(),
        )
        .unwrap();
        let outcome = chain.execute(&TestContext::detached("env"));
        assert_eq!(outcome.failure_kind(), Some(FailureKind::Unhandled));
        assert!(std::env::var(key).is_err());
    }
}
