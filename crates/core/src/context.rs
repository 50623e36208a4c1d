//! Per-pipe execution context handed to bodies, hooks and decorators.
use crate::outcome::Fault;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::collections::BTreeSet;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};
use tokio::sync::Notify;

/// Cloneable cancellation flag. Clones observe the same state.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    inner: Arc<TokenState>,
}

#[derive(Debug, Default)]
struct TokenState {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokenState::default()),
        }
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Something a sandboxed body has to be granted before using it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    FileRead,
    FileWrite,
    Network,
    Environment,
    Process,
    Threads,
    Custom(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn grant(mut self, capability: Capability) -> Self {
        self.0.insert(capability);
        self
    }

    pub fn allows(&self, capability: &Capability) -> bool {
        self.0.contains(capability)
    }

    pub fn intersect(&self, other: &CapabilitySet) -> CapabilitySet {
        CapabilitySet(self.0.intersection(&other.0).cloned().collect())
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        CapabilitySet(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, Default)]
struct Sandbox {
    granted: CapabilitySet,
    violations: Arc<Mutex<Vec<String>>>,
}

/// The fixture instance shared by every pipe of a fixture.
pub type Target = Arc<dyn Any + Send + Sync>;

/// What a running pipe can see: its name, fixture instance, arguments,
/// cancellation state and (inside a sandbox) its granted capabilities.
#[derive(Clone)]
pub struct TestContext {
    pipe: Arc<str>,
    target: Target,
    args: Arc<[Value]>,
    cancel: CancellationToken,
    sandbox: Option<Sandbox>,
}

impl TestContext {
    pub fn new(pipe: &str, target: Target, args: Vec<Value>, cancel: CancellationToken) -> Self {
        Self {
            pipe: Arc::from(pipe),
            target,
            args: Arc::from(args),
            cancel,
            sandbox: None,
        }
    }

    /// A context with no fixture instance and no arguments.
    pub fn detached(pipe: &str) -> Self {
        Self::new(pipe, Arc::new(()), Vec::new(), CancellationToken::new())
    }

    pub fn pipe_name(&self) -> &str {
        &self.pipe
    }

    /// The fixture instance, if it is a `T`.
    pub fn target<T: Any>(&self) -> Option<&T> {
        self.target.downcast_ref::<T>()
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn arg(&self, index: usize) -> Result<&Value, Fault> {
        self.args
            .get(index)
            .ok_or_else(|| Fault::assertion(format!("no argument at position {index}")))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Fails with a sandbox fault unless `capability` has been granted.
    /// Outside of any sandbox everything is granted.
    pub fn demand(&self, capability: Capability) -> Result<(), Fault> {
        let Some(sandbox) = &self.sandbox else {
            return Ok(());
        };
        if sandbox.granted.allows(&capability) {
            return Ok(());
        }
        let message = format!("{capability:?} was not granted to '{}'", self.pipe);
        sandbox
            .violations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message.clone());
        Err(Fault::sandbox(message))
    }

    /// A copy of this context restricted to `granted`. Nested sandboxes only
    /// ever narrow what is allowed.
    pub(crate) fn restricted(&self, granted: &CapabilitySet) -> TestContext {
        let granted = match &self.sandbox {
            Some(outer) => outer.granted.intersect(granted),
            None => granted.clone(),
        };
        TestContext {
            sandbox: Some(Sandbox {
                granted,
                violations: Arc::new(Mutex::new(Vec::new())),
            }),
            ..self.clone()
        }
    }

    /// The first capability demand refused inside this context's sandbox.
    pub(crate) fn first_violation(&self) -> Option<String> {
        self.sandbox.as_ref().and_then(|s| {
            s.violations
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .first()
                .cloned()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_token() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());

        let cloned_token = token.clone();
        assert!(cloned_token.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_resolves_after_cancel() {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        token.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_target_downcast() {
        let ctx = TestContext::new(
            "pipe",
            Arc::new(42u32),
            vec![Value::from(1)],
            CancellationToken::new(),
        );
        assert_eq!(ctx.target::<u32>(), Some(&42));
        assert!(ctx.target::<String>().is_none());
        assert_eq!(ctx.arg(0).unwrap(), &Value::from(1));
        assert!(ctx.arg(1).is_err());
    }

    #[test]
    fn test_demand_outside_sandbox_is_granted() {
        let ctx = TestContext::detached("pipe");
        assert!(ctx.demand(Capability::Network).is_ok());
        assert!(ctx.first_violation().is_none());
    }

    #[test]
    fn test_nested_sandbox_narrows() {
        let ctx = TestContext::detached("pipe");
        let outer = ctx.restricted(
            &CapabilitySet::none()
                .grant(Capability::FileRead)
                .grant(Capability::Network),
        );
        let inner = outer.restricted(&CapabilitySet::none().grant(Capability::Network));
        assert!(inner.demand(Capability::Network).is_ok());
        assert!(inner.demand(Capability::FileRead).is_err());
        assert!(inner.first_violation().unwrap().contains("FileRead"));
        assert!(outer.first_violation().is_none());
    }
}
