//! Logging setup for front ends embedding the engine.
use anyhow::Context;
use std::io::LineWriter;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::OffsetTime;

/// Environment variable overriding the default filter directives.
pub const LOG_ENV: &str = "TRELLIS_LOG";
const DEFAULT_DIRECTIVES: &str = "trellis_core=info";
const MAX_LOG_SIZE: u64 = 100 * 1024;

/// Where log lines go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    Stderr,
    /// `trellis.log` in the data directory.
    DataDir,
    File(PathBuf),
}

/// `$XDG_DATA_HOME/trellis`, else `trellis` under the platform local data
/// directory. Created if missing.
pub fn data_dir() -> std::io::Result<PathBuf> {
    let dir = std::env::var_os("XDG_DATA_HOME")
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .or_else(dirs::data_local_dir)
        .unwrap_or_default()
        .join("trellis");
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

fn env_filter() -> EnvFilter {
    match std::env::var(LOG_ENV) {
        Ok(directives) if !directives.is_empty() => EnvFilter::new(directives),
        _ => EnvFilter::new(DEFAULT_DIRECTIVES),
    }
}

/// Moves `log_path` aside to `<name>.old` once it grows past 100KB.
fn rotate(log_path: &Path) -> anyhow::Result<()> {
    if !log_path.exists() {
        return Ok(());
    }
    let metadata = std::fs::metadata(log_path)?;
    if metadata.len() > MAX_LOG_SIZE {
        let mut backup = log_path.as_os_str().to_owned();
        backup.push(".old");
        let backup_path = PathBuf::from(backup);
        if backup_path.exists() {
            std::fs::remove_file(&backup_path)?;
        }
        std::fs::rename(log_path, backup_path)?;
    }
    Ok(())
}

/// Installs the global `tracing` subscriber.
///
/// File targets are rotated, flushed after every line and written without
/// ANSI escapes. Fails if a subscriber is already installed.
pub fn setup_logging(target: LogTarget) -> anyhow::Result<()> {
    let timer = OffsetTime::local_rfc_3339().context("Failed to determine local time offset")?;
    let log_path = match target {
        LogTarget::Stderr => {
            return tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_writer(std::io::stderr)
                .with_timer(timer)
                .try_init()
                .map_err(|e| anyhow::anyhow!(e))
                .context("Failed to install log subscriber");
        }
        LogTarget::DataDir => data_dir()
            .context("Failed to get data directory")?
            .join("trellis.log"),
        LogTarget::File(path) => path,
    };

    rotate(&log_path).context("Failed to rotate log file")?;
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file {}", log_path.display()))?;

    // Ensure the logs are flushed after every line
    let writer = Mutex::new(LineWriter::new(log_file));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(writer)
        .with_ansi(false)
        .with_timer(timer)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))
        .context("Failed to install log subscriber")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoped::EnvGuard;
    use crate::scoped::tests::GLOBAL_STATE;

    #[test]
    fn test_data_dir_follows_xdg_and_is_created() {
        let _lock = GLOBAL_STATE.lock().unwrap_or_else(|e| e.into_inner());
        let root = tempfile::tempdir().unwrap();
        let _xdg = EnvGuard::enter("XDG_DATA_HOME", root.path().to_str());

        let dir = data_dir().unwrap();
        assert_eq!(dir, root.path().join("trellis"));
        assert!(dir.is_dir());
    }

    #[test]
    fn test_rotate_moves_large_log_aside() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("trellis.log");
        std::fs::write(&log_path, vec![b'x'; (MAX_LOG_SIZE + 1) as usize]).unwrap();
        std::fs::write(dir.path().join("trellis.log.old"), b"stale").unwrap();

        rotate(&log_path).unwrap();

        assert!(!log_path.exists());
        let old = std::fs::read(dir.path().join("trellis.log.old")).unwrap();
        assert_eq!(old.len() as u64, MAX_LOG_SIZE + 1);
    }

    #[test]
    fn test_rotate_keeps_small_log() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("trellis.log");
        std::fs::write(&log_path, b"short").unwrap();
        rotate(&log_path).unwrap();
        assert!(log_path.exists());
        assert!(!dir.path().join("trellis.log.old").exists());
    }
}
