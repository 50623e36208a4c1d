//! Data expansion: turning a parameterized unit into argument tuples.
//!
//! Expansion is lazy. Sources are resolved up front (they are just value
//! lists), but tuples are produced one at a time so the flattener can filter
//! them by name before anything else is built for them.
use crate::error::BuildError;
use crate::registry::Registry;
use crate::unit::panic_message;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

/// Declared type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    Any,
    Bool,
    Int,
    Float,
    Str,
    List,
    Object,
}

impl ParamKind {
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamKind::Any => true,
            ParamKind::Bool => value.is_boolean(),
            ParamKind::Int => value.is_i64() || value.is_u64(),
            ParamKind::Float => value.is_number(),
            ParamKind::Str => value.is_string(),
            ParamKind::List => value.is_array(),
            ParamKind::Object => value.is_object(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ParamKind::Any => "any",
            ParamKind::Bool => "bool",
            ParamKind::Int => "int",
            ParamKind::Float => "float",
            ParamKind::Str => "str",
            ParamKind::List => "list",
            ParamKind::Object => "object",
        }
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn describe(value: &Value) -> String {
    let kind = match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    };
    format!("{kind} {value}")
}

/// Produces the values of one parameter.
pub type DataFactory = Arc<dyn Fn() -> anyhow::Result<Vec<Value>> + Send + Sync>;

pub fn factory<F>(f: F) -> DataFactory
where
    F: Fn() -> anyhow::Result<Vec<Value>> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Filters out argument tuples that should not become pipes at all.
pub type Validator = Arc<dyn Fn(&[Value]) -> bool + Send + Sync>;

#[derive(Clone)]
pub enum DataSource {
    Values(Vec<Value>),
    Factory(DataFactory),
    /// A factory registered under this name.
    Named(String),
}

#[derive(Clone)]
pub struct Parameter {
    pub name: String,
    pub kind: ParamKind,
    pub sources: Vec<DataSource>,
}

impl Parameter {
    pub fn new(name: &str, kind: ParamKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            sources: Vec::new(),
        }
    }

    pub fn values<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.sources
            .push(DataSource::Values(values.into_iter().map(Into::into).collect()));
        self
    }

    pub fn factory(mut self, factory: DataFactory) -> Self {
        self.sources.push(DataSource::Factory(factory));
        self
    }

    pub fn named(mut self, name: &str) -> Self {
        self.sources.push(DataSource::Named(name.to_string()));
        self
    }

    fn resolve(&self, registry: &Registry) -> Result<Vec<Value>, BuildError> {
        let mut values = Vec::new();
        for source in &self.sources {
            match source {
                DataSource::Values(v) => values.extend(v.iter().cloned()),
                DataSource::Factory(f) => values.extend(call_factory(&self.name, f)?),
                DataSource::Named(name) => {
                    let f = registry
                        .data_factory(name)
                        .ok_or_else(|| BuildError::MissingDataFactory(name.clone()))?;
                    values.extend(call_factory(name, f)?);
                }
            }
        }
        Ok(values)
    }

    /// The values written inline, or `None` if any come from a factory.
    fn inline(&self) -> Option<Vec<Value>> {
        let mut values = Vec::new();
        for source in &self.sources {
            match source {
                DataSource::Values(v) => values.extend(v.iter().cloned()),
                DataSource::Factory(_) | DataSource::Named(_) => return None,
            }
        }
        Some(values)
    }
}

fn call_factory(label: &str, f: &DataFactory) -> Result<Vec<Value>, BuildError> {
    match catch_unwind(AssertUnwindSafe(|| f())) {
        Ok(Ok(values)) => Ok(values),
        Ok(Err(err)) => Err(BuildError::FactoryFailed {
            factory: label.to_string(),
            message: format!("{err:#}"),
        }),
        Err(payload) => Err(BuildError::FactoryFailed {
            factory: label.to_string(),
            message: panic_message(payload.as_ref()),
        }),
    }
}

/// How a unit receives its arguments.
#[derive(Clone, Default)]
pub enum DataBinding {
    /// No parameters: exactly one pipe.
    #[default]
    None,
    /// The full product of every parameter's values.
    Cartesian {
        params: Vec<Parameter>,
        validator: Option<Validator>,
    },
    /// One pipe per literal row.
    Rows {
        params: Vec<(String, ParamKind)>,
        rows: Vec<Vec<Value>>,
    },
}

/// One argument tuple. A row that does not fit its parameters still yields a
/// case so the failure is reported against that one pipe.
#[derive(Debug, Clone, PartialEq)]
pub struct Case {
    pub label: Option<String>,
    pub args: Result<Vec<Value>, BuildError>,
}

fn label(values: &[Value]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn typed_case(kinds: &[(&str, ParamKind)], values: Vec<Value>) -> Case {
    let label = Some(label(&values));
    if values.len() != kinds.len() {
        return Case {
            label,
            args: Err(BuildError::RowArity {
                expected: kinds.len(),
                actual: values.len(),
            }),
        };
    }
    let mismatch = kinds
        .iter()
        .zip(&values)
        .find(|((_, kind), value)| !kind.accepts(value));
    let args = match mismatch {
        Some(((name, kind), value)) => Err(BuildError::RowType {
            param: name.to_string(),
            expected: *kind,
            actual: describe(value),
        }),
        None => Ok(values),
    };
    Case { label, args }
}

/// Lazy sequence of cases for one unit.
pub struct Cases {
    inner: CasesInner,
}

enum CasesInner {
    Single(bool),
    Product {
        kinds: Vec<(String, ParamKind)>,
        columns: Vec<Vec<Value>>,
        indices: Option<Vec<usize>>,
        validator: Option<Validator>,
    },
    Rows {
        kinds: Vec<(String, ParamKind)>,
        rows: std::vec::IntoIter<Vec<Value>>,
    },
}

/// Resolves the data sources of `binding` and returns its cases.
pub fn expand(binding: &DataBinding, registry: &Registry) -> Result<Cases, BuildError> {
    cases(binding, |p| p.resolve(registry))
}

/// The cases of `binding` worked out from inline values alone. No factory is
/// called; `None` when some parameter draws on one.
pub fn declared_cases(binding: &DataBinding) -> Option<Cases> {
    cases(binding, |p| p.inline().ok_or(())).ok()
}

fn cases<E>(
    binding: &DataBinding,
    column: impl Fn(&Parameter) -> Result<Vec<Value>, E>,
) -> Result<Cases, E> {
    let inner = match binding {
        DataBinding::None => CasesInner::Single(false),
        // No parameters is a single empty tuple, as with no binding at all.
        DataBinding::Cartesian { params, .. } if params.is_empty() => CasesInner::Single(false),
        DataBinding::Cartesian { params, validator } => {
            let columns = params
                .iter()
                .map(|p| column(p))
                .collect::<Result<Vec<_>, _>>()?;
            let start = (!columns.is_empty() && columns.iter().all(|c| !c.is_empty()))
                .then(|| vec![0; columns.len()]);
            CasesInner::Product {
                kinds: params.iter().map(|p| (p.name.clone(), p.kind)).collect(),
                columns,
                indices: start,
                validator: validator.clone(),
            }
        }
        DataBinding::Rows { params, rows } => CasesInner::Rows {
            kinds: params.clone(),
            rows: rows.clone().into_iter(),
        },
    };
    Ok(Cases { inner })
}

impl Iterator for Cases {
    type Item = Case;

    fn next(&mut self) -> Option<Case> {
        match &mut self.inner {
            CasesInner::Single(done) => {
                if *done {
                    return None;
                }
                *done = true;
                Some(Case {
                    label: None,
                    args: Ok(Vec::new()),
                })
            }
            CasesInner::Product {
                kinds,
                columns,
                indices,
                validator,
            } => loop {
                let current = indices.as_mut()?;
                let tuple: Vec<Value> = current
                    .iter()
                    .zip(columns.iter())
                    .map(|(&i, column)| column[i].clone())
                    .collect();
                // Advance the odometer; the last parameter varies fastest.
                let mut pos = current.len();
                let mut exhausted = true;
                while pos > 0 {
                    pos -= 1;
                    current[pos] += 1;
                    if current[pos] < columns[pos].len() {
                        exhausted = false;
                        break;
                    }
                    current[pos] = 0;
                }
                if exhausted {
                    *indices = None;
                }
                if validator.as_ref().is_some_and(|v| !v(tuple.as_slice())) {
                    continue;
                }
                let kinds: Vec<(&str, ParamKind)> =
                    kinds.iter().map(|(n, k)| (n.as_str(), *k)).collect();
                return Some(typed_case(&kinds, tuple));
            },
            CasesInner::Rows { kinds, rows } => {
                let row = rows.next()?;
                let kinds: Vec<(&str, ParamKind)> =
                    kinds.iter().map(|(n, k)| (n.as_str(), *k)).collect();
                Some(typed_case(&kinds, row))
            }
        }
    }
}
