//! Suites: fixtures plus the suites they depend on, and how they load.
use crate::error::LoadFailure;
use crate::fixture::Fixture;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Produces a suite's fixtures, or the failure that keeps it from running.
///
/// How a suite is isolated or where its fixtures come from is up to the
/// implementation; the runner only sees success or a [`LoadFailure`].
#[async_trait]
pub trait SuiteLoader: Send + Sync {
    async fn load(&self, suite: &Suite) -> Result<Vec<Fixture>, LoadFailure>;
}

/// Loads the fixtures declared on the suite itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeclaredFixtures;

#[async_trait]
impl SuiteLoader for DeclaredFixtures {
    async fn load(&self, suite: &Suite) -> Result<Vec<Fixture>, LoadFailure> {
        Ok(suite.fixtures.clone())
    }
}

type LoadFn = dyn Fn(&Suite) -> anyhow::Result<Vec<Fixture>> + Send + Sync;

/// Loads through a closure; errors keep their `anyhow` context chain.
pub struct FnLoader {
    load: Box<LoadFn>,
}

impl FnLoader {
    pub fn new<F>(load: F) -> Self
    where
        F: Fn(&Suite) -> anyhow::Result<Vec<Fixture>> + Send + Sync + 'static,
    {
        Self {
            load: Box::new(load),
        }
    }
}

#[async_trait]
impl SuiteLoader for FnLoader {
    async fn load(&self, suite: &Suite) -> Result<Vec<Fixture>, LoadFailure> {
        (self.load)(suite).map_err(LoadFailure::from)
    }
}

#[derive(Clone)]
pub struct Suite {
    pub id: String,
    /// Ids of the suites that must load before this one.
    pub dependencies: Vec<String>,
    /// Declared fixtures. Also used to enumerate the pipes of a suite that is
    /// skipped without being loaded.
    pub fixtures: Vec<Fixture>,
    loader: Arc<dyn SuiteLoader>,
}

impl Suite {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            dependencies: Vec::new(),
            fixtures: Vec::new(),
            loader: Arc::new(DeclaredFixtures),
        }
    }

    pub fn depends_on(mut self, id: &str) -> Self {
        self.dependencies.push(id.to_string());
        self
    }

    pub fn fixture(mut self, fixture: Fixture) -> Self {
        self.fixtures.push(fixture);
        self
    }

    pub fn with_loader(mut self, loader: Arc<dyn SuiteLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub async fn load(&self) -> Result<Vec<Fixture>, LoadFailure> {
        self.loader.load(self).await
    }
}

impl fmt::Debug for Suite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Suite")
            .field("id", &self.id)
            .field("dependencies", &self.dependencies)
            .field("fixtures", &self.fixtures.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[tokio::test]
    async fn test_declared_fixtures_are_loaded_by_default() {
        let suite = Suite::new("core")
            .fixture(Fixture::new("a"))
            .fixture(Fixture::new("b"));
        let fixtures = suite.load().await.unwrap();
        let ids: Vec<_> = fixtures.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_fn_loader_failure_keeps_context() {
        let suite = Suite::new("plugins").with_loader(Arc::new(FnLoader::new(|suite| {
            std::fs::read_to_string("/definitely/not/here.dll")
                .with_context(|| format!("Failed to load suite '{}'", suite.id))?;
            Ok(Vec::new())
        })));
        let Err(err) = suite.load().await else {
            panic!("loader should have failed");
        };
        assert!(err.message.starts_with("Failed to load suite 'plugins': "));
    }
}
