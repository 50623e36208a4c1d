//! Fixture and unit descriptors supplied by a front end.
use crate::context::Target;
use crate::data::{DataBinding, ParamKind, Parameter, Validator};
use crate::decorator::DecoratorSpec;
use crate::outcome::Fault;
use crate::unit::Body;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Builds the fixture instance shared by the fixture's pipes.
pub type Constructor = Arc<dyn Fn() -> Result<Target, Fault> + Send + Sync>;

pub fn constructor<F>(f: F) -> Constructor
where
    F: Fn() -> Result<Target, Fault> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// One declared test unit: a body plus its decorators, data and metadata.
#[derive(Clone)]
pub struct UnitSpec {
    pub name: String,
    pub body: Body,
    pub decorators: Vec<DecoratorSpec>,
    pub data: DataBinding,
    pub categories: Vec<String>,
    pub ignored: Option<String>,
}

impl UnitSpec {
    pub fn new(name: &str, body: Body) -> Self {
        Self {
            name: name.to_string(),
            body,
            decorators: Vec::new(),
            data: DataBinding::None,
            categories: Vec::new(),
            ignored: None,
        }
    }

    pub fn decorate(mut self, decorator: DecoratorSpec) -> Self {
        self.decorators.push(decorator);
        self
    }

    pub fn category(mut self, category: &str) -> Self {
        self.categories.push(category.to_string());
        self
    }

    pub fn ignore(mut self, reason: &str) -> Self {
        self.ignored = Some(reason.to_string());
        self
    }

    /// Cartesian data: one pipe per combination of parameter values.
    pub fn cartesian(mut self, params: Vec<Parameter>) -> Self {
        self.data = DataBinding::Cartesian {
            params,
            validator: None,
        };
        self
    }

    /// Cartesian data with combinations excluded by `validator`.
    pub fn cartesian_where(mut self, params: Vec<Parameter>, validator: Validator) -> Self {
        self.data = DataBinding::Cartesian {
            params,
            validator: Some(validator),
        };
        self
    }

    /// Row data: one pipe per literal row.
    pub fn rows(mut self, params: &[(&str, ParamKind)], rows: Vec<Vec<Value>>) -> Self {
        self.data = DataBinding::Rows {
            params: params.iter().map(|(n, k)| (n.to_string(), *k)).collect(),
            rows,
        };
        self
    }
}

/// A group of units sharing setUp/tearDown and execution policy.
#[derive(Clone)]
pub struct Fixture {
    pub id: String,
    pub constructor: Option<Constructor>,
    pub set_up: Vec<Body>,
    pub tear_down: Vec<Body>,
    pub ignored: Option<String>,
    /// Upper bound on how long the engine waits for each pipe.
    pub default_timeout: Option<Duration>,
    /// Run every pipe on one dedicated worker thread.
    pub thread_affinity: bool,
    pub units: Vec<UnitSpec>,
}

impl Fixture {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            constructor: None,
            set_up: Vec::new(),
            tear_down: Vec::new(),
            ignored: None,
            default_timeout: None,
            thread_affinity: false,
            units: Vec::new(),
        }
    }

    pub fn with_constructor(mut self, constructor: Constructor) -> Self {
        self.constructor = Some(constructor);
        self
    }

    pub fn set_up(mut self, hook: Body) -> Self {
        self.set_up.push(hook);
        self
    }

    pub fn tear_down(mut self, hook: Body) -> Self {
        self.tear_down.push(hook);
        self
    }

    pub fn ignore(mut self, reason: &str) -> Self {
        self.ignored = Some(reason.to_string());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    pub fn thread_affinity(mut self) -> Self {
        self.thread_affinity = true;
        self
    }

    pub fn unit(mut self, unit: UnitSpec) -> Self {
        self.units.push(unit);
        self
    }
}
