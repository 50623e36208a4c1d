//! Selecting which pipes take part in a run.
//!
//! Filters are evaluated while units are being expanded, against a
//! [`PipeInfo`] built from the argument tuple, so excluded pipes are never
//! materialized.
use regex::Regex;
use std::sync::Arc;

/// What a filter can see about a prospective pipe.
#[derive(Debug, Clone, Copy)]
pub struct PipeInfo<'a> {
    pub suite: &'a str,
    pub fixture: &'a str,
    pub unit: &'a str,
    pub name: &'a str,
    pub categories: &'a [String],
}

impl PipeInfo<'_> {
    /// `suite/fixture/pipe`, the same path the report uses.
    pub fn path(&self) -> String {
        format!("{}/{}/{}", self.suite, self.fixture, self.name)
    }
}

pub type Predicate = Arc<dyn Fn(&PipeInfo<'_>) -> bool + Send + Sync>;

#[derive(Clone, Default)]
pub enum Filter {
    #[default]
    All,
    /// Matches the pipe path.
    Name(Regex),
    Category(String),
    Predicate(Predicate),
    Not(Box<Filter>),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn name(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Filter::Name(Regex::new(pattern)?))
    }

    pub fn category(category: &str) -> Self {
        Filter::Category(category.to_string())
    }

    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&PipeInfo<'_>) -> bool + Send + Sync + 'static,
    {
        Filter::Predicate(Arc::new(f))
    }

    pub fn not(self) -> Self {
        Filter::Not(Box::new(self))
    }

    pub fn and(self, other: Filter) -> Self {
        match self {
            Filter::All => other,
            Filter::And(mut all) => {
                all.push(other);
                Filter::And(all)
            }
            this => Filter::And(vec![this, other]),
        }
    }

    pub fn matches(&self, info: &PipeInfo<'_>) -> bool {
        match self {
            Filter::All => true,
            Filter::Name(re) => re.is_match(&info.path()),
            Filter::Category(c) => info.categories.iter().any(|x| x == c),
            Filter::Predicate(f) => f(info),
            Filter::Not(inner) => !inner.matches(info),
            Filter::And(all) => all.iter().all(|f| f.matches(info)),
            Filter::Or(any) => any.iter().any(|f| f.matches(info)),
        }
    }
}
