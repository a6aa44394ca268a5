pub mod agent_core;
pub mod inference;
pub mod mcp_client;

pub use agent_core::{
    AgentError, OrchestrationOutcome, OrchestrationRequest, Orchestrator, ToolExecutor,
};
pub use inference::{AppConfig, ProtocolVariant, ToolChoice};
pub use mcp_client::McpDiscovery;

use std::path::{Path, PathBuf};

/// Default log filter when `RUST_LOG` is unset.
const DEFAULT_LOG_FILTER: &str = "mcp_autonomy=info,warn";

/// Rotated log files kept next to `agent.log`.
const KEPT_LOGS: u32 = 3;

/// Return the platform-standard data directory.
///
/// - macOS: `~/Library/Application Support/mcp-autonomy/`
/// - Windows: `{FOLDERID_RoamingAppData}\mcp-autonomy\`
/// - Linux: `$XDG_DATA_HOME/mcp-autonomy/` (fallback `~/.local/share/...`)
///
/// Falls back to `~/.mcp-autonomy/` only if none of the above can be resolved.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("mcp-autonomy");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mcp-autonomy")
}

fn env_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Initialize the tracing subscriber, writing structured logs to the data directory.
///
/// On each start:
/// 1. Rotates existing logs (agent.log → agent.log.1 → .2 → .3, keeps last 3).
/// 2. Opens a fresh agent.log with a line-flushing writer for crash resilience.
/// 3. Logs a startup banner with the log path for discoverability.
///
/// Returns the path of the log file.
pub fn init_tracing() -> std::io::Result<PathBuf> {
    let log_dir = data_dir();
    std::fs::create_dir_all(&log_dir)?;

    let log_path = log_dir.join("agent.log");
    rotate_log_file(&log_path, KEPT_LOGS);

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(FlushingWriter::new(log_file))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %log_dir.display(),
        log_file = %log_path.display(),
        pid = std::process::id(),
        "=== mcp-autonomy starting ==="
    );
    Ok(log_path)
}

/// Initialize tracing to stderr for interactive use.
///
/// `json` switches to one JSON object per line.
pub fn init_stderr_tracing(json: bool) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .with_target(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Rotate log files: `agent.log` → `agent.log.1` → `.2` → … → `.{keep}`.
///
/// Oldest file beyond `keep` is deleted. Missing files in the chain are skipped.
fn rotate_log_file(base_path: &Path, keep: u32) {
    let oldest = format!("{}.{keep}", base_path.display());
    let _ = std::fs::remove_file(&oldest);

    for i in (1..keep).rev() {
        let from = format!("{}.{i}", base_path.display());
        let to = format!("{}.{}", base_path.display(), i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    if base_path.exists() {
        let to = format!("{}.1", base_path.display());
        let _ = std::fs::rename(base_path, &to);
    }
}

/// A writer that wraps `std::fs::File` and flushes after every write.
///
/// Each log line reaches the file immediately, so a crash mid-round still
/// leaves the preceding rounds on disk.
#[derive(Clone)]
struct FlushingWriter {
    file: std::sync::Arc<std::sync::Mutex<std::fs::File>>,
}

impl FlushingWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: std::sync::Arc::new(std::sync::Mutex::new(file)),
        }
    }
}

impl std::io::Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        let n = std::io::Write::write(&mut *f, buf)?;
        std::io::Write::flush(&mut *f)?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        std::io::Write::flush(&mut *f)
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_rotate_keeps_last_three() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("agent.log");

        for run in 0..5 {
            rotate_log_file(&log, KEPT_LOGS);
            std::fs::write(&log, format!("run {run}")).unwrap();
        }

        assert_eq!(std::fs::read_to_string(&log).unwrap(), "run 4");
        assert_eq!(std::fs::read_to_string(dir.path().join("agent.log.1")).unwrap(), "run 3");
        assert_eq!(std::fs::read_to_string(dir.path().join("agent.log.3")).unwrap(), "run 1");
        assert!(!dir.path().join("agent.log.4").exists());
    }

    #[test]
    fn test_flushing_writer_writes_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.log");
        let file = std::fs::File::create(&path).unwrap();

        let mut writer = FlushingWriter::new(file);
        writer.write_all(b"round 1 complete\n").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "round 1 complete\n");
    }

    #[test]
    fn test_data_dir_is_named_for_crate() {
        let dir = data_dir();
        let name = dir.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name == "mcp-autonomy" || name == ".mcp-autonomy");
    }
}
