//! Test helpers shared by the unit tests of this crate.

use crate::outcome::Fault;
use crate::unit::{Body, body};
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::Builder;

/// Creates a temporary config file with the given content.
/// Uses tempfile::Builder to ensure unique directories for parallel tests.
///
/// # Panics
/// Panics if temp directory creation or file writing fails.
pub fn create_temp_config(content: &str) -> PathBuf {
    let temp_dir = Builder::new()
        .prefix("trellis-test")
        .rand_bytes(8)
        .tempdir()
        .unwrap();
    let config_path = temp_dir.path().join("trellis.yml");
    File::create(&config_path)
        .unwrap()
        .write_all(content.as_bytes())
        .unwrap();
    // Keep the temp directory alive by leaking it (this is just for tests)
    let _ = Box::leak(Box::new(temp_dir));
    config_path
}

/// A passing body that counts its calls.
pub fn counting_body() -> (Body, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let b = body(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    (b, calls)
}

/// A body that fails on the given 1-based calls and passes otherwise.
pub fn flaky_body(failing_calls: &[usize]) -> Body {
    let calls = AtomicUsize::new(0);
    let failing = failing_calls.to_vec();
    body(move |_| {
        let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
        if failing.contains(&call) {
            Err(Fault::assertion(format!("call {call} fails")))
        } else {
            Ok(())
        }
    })
}

/// A passing body that takes `duration`.
pub fn sleeping_body(duration: Duration) -> Body {
    body(move |_| {
        std::thread::sleep(duration);
        Ok(())
    })
}
