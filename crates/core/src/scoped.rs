//! Scoped mutation of process-wide state.
//!
//! The culture name and environment variables are global to the process. A
//! decorator that switches either holds a guard for the duration of the
//! wrapped unit. Guards need not drop in the order they were entered: a pipe
//! abandoned after a timeout releases its switch whenever its worker finally
//! returns. Each guard therefore registers an active switch, dropping it
//! removes only that switch, and the value in effect is always that of the
//! newest switch still active, or the value seen before the first one.
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

pub const INVARIANT_CULTURE: &str = "invariant";

/// Active switches of one piece of state, oldest first.
struct Switches<T> {
    base: T,
    next_id: u64,
    active: Vec<(u64, T)>,
}

impl<T: Clone> Switches<T> {
    fn new(base: T) -> Self {
        Self {
            base,
            next_id: 0,
            active: Vec::new(),
        }
    }

    fn current(&self) -> &T {
        self.active.last().map_or(&self.base, |(_, value)| value)
    }

    fn push(&mut self, value: T) -> u64 {
        self.next_id += 1;
        self.active.push((self.next_id, value));
        self.next_id
    }

    /// Removes switch `id`; returns the value now in effect if it changed.
    fn remove(&mut self, id: u64) -> Option<T> {
        let pos = self.active.iter().position(|(i, _)| *i == id)?;
        self.active.remove(pos);
        (pos == self.active.len()).then(|| self.current().clone())
    }
}

fn lock<T>(state: &Mutex<T>) -> MutexGuard<'_, T> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

static CULTURE: Lazy<Mutex<Switches<String>>> =
    Lazy::new(|| Mutex::new(Switches::new(culture_from_env())));

fn culture_from_env() -> String {
    std::env::var("LANG")
        .ok()
        .and_then(|lang| {
            let name = lang.split('.').next().unwrap_or_default().replace('_', "-");
            (!name.is_empty() && name != "C" && name != "POSIX").then_some(name)
        })
        .unwrap_or_else(|| INVARIANT_CULTURE.to_string())
}

/// The culture currently in effect for the process.
pub fn current_culture() -> String {
    lock(&CULTURE).current().clone()
}

/// Switches the process culture until dropped.
#[must_use]
pub struct CultureGuard {
    id: u64,
}

impl CultureGuard {
    pub fn enter(name: &str) -> Self {
        let mut culture = lock(&CULTURE);
        let from = culture.current().clone();
        let id = culture.push(name.to_string());
        debug!(%from, to = name, "Switched culture");
        Self { id }
    }
}

impl Drop for CultureGuard {
    fn drop(&mut self) {
        lock(&CULTURE).remove(self.id);
    }
}

/// Environment switches per variable. A variable leaves the map, with its
/// original value restored, once its last switch is dropped.
static ENVIRONMENT: Lazy<Mutex<HashMap<String, Switches<Option<String>>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn write_env(key: &str, value: Option<&str>) {
    // SAFETY: every environment write in this crate happens here, with the
    // ENVIRONMENT lock held by the caller, so writes never race each other.
    // Readers going through `std::env` synchronize with writers inside std.
    // Foreign code reading the environment on another thread while a switch
    // is entered or dropped is not covered; using the `Environment` decorator
    // means accepting that.
    unsafe {
        match value {
            Some(v) => std::env::set_var(key, v),
            None => std::env::remove_var(key),
        }
    }
}

/// Sets (or with `None`, removes) an environment variable until dropped.
#[must_use]
pub struct EnvGuard {
    key: String,
    id: u64,
}

impl EnvGuard {
    pub fn enter(key: &str, value: Option<&str>) -> Self {
        let mut environment = lock(&ENVIRONMENT);
        let switches = environment
            .entry(key.to_string())
            .or_insert_with(|| Switches::new(std::env::var(key).ok()));
        let id = switches.push(value.map(str::to_string));
        write_env(key, value);
        Self {
            key: key.to_string(),
            id,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        let mut environment = lock(&ENVIRONMENT);
        let Some(switches) = environment.get_mut(&self.key) else {
            return;
        };
        if let Some(value) = switches.remove(self.id) {
            write_env(&self.key, value.as_deref());
        }
        if switches.active.is_empty() {
            environment.remove(&self.key);
        }
    }
}
