//! MCP server discovery — locate and read the `mcpServers` discovery file.
//!
//! The file is re-read on every lookup. Nothing parsed here outlives the call
//! that parsed it, so a server added to the file is usable by the very next
//! orchestration call without restarting the process.
//!
//! Location order (first existing file wins):
//! 1. `$MCP_CONFIG_PATH`
//! 2. `~/.lmstudio/mcp.json`
//! 3. `./mcp.json`
//! 4. `~/mcp.json`
//! 5. `../mcp.json`

use std::path::{Path, PathBuf};

use super::errors::McpError;
use super::types::{DiscoveryFile, ServerDescriptor};

/// Environment variable that overrides the discovery file location.
pub const CONFIG_PATH_ENV: &str = "MCP_CONFIG_PATH";

/// File name searched for in the working, home and parent directories.
const DISCOVERY_FILE_NAME: &str = "mcp.json";

// ─── McpDiscovery ────────────────────────────────────────────────────────────

/// Connection registry backed by the discovery file.
///
/// Holds only where to look; the file content is never cached.
#[derive(Debug, Clone)]
pub struct McpDiscovery {
    search: SearchOrder,
}

#[derive(Debug, Clone)]
enum SearchOrder {
    /// Standard locations, recomputed from the environment on every lookup.
    Standard,
    Fixed(Vec<PathBuf>),
}

impl McpDiscovery {
    /// Build the registry with the standard search order.
    ///
    /// `$MCP_CONFIG_PATH`, the home directory and the working directory are
    /// read at each lookup, not here.
    pub fn from_env() -> Self {
        Self {
            search: SearchOrder::Standard,
        }
    }

    /// Build a registry that reads exactly one file.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self::with_candidates(vec![path.into()])
    }

    /// Build a registry with an explicit search order.
    pub fn with_candidates(candidates: Vec<PathBuf>) -> Self {
        Self {
            search: SearchOrder::Fixed(candidates),
        }
    }

    /// The locations searched right now, in order.
    pub fn candidates(&self) -> Vec<PathBuf> {
        match &self.search {
            SearchOrder::Standard => default_candidates(),
            SearchOrder::Fixed(paths) => paths.clone(),
        }
    }

    /// First candidate that exists on disk.
    pub fn resolve_path(&self) -> Result<PathBuf, McpError> {
        let candidates = self.candidates();
        match candidates.iter().find(|p| p.is_file()) {
            Some(path) => Ok(path.clone()),
            None => Err(McpError::DiscoveryFileMissing {
                searched: candidates.iter().map(|p| p.display().to_string()).collect(),
            }),
        }
    }

    /// Read and parse the discovery file fresh from disk.
    pub fn load(&self) -> Result<DiscoveryFile, McpError> {
        let path = self.resolve_path()?;
        load_discovery_file(&path)
    }

    /// Names of enabled servers, sorted.
    pub fn list_available_servers(&self) -> Result<Vec<String>, McpError> {
        let file = self.load()?;
        Ok(file
            .mcp_servers
            .iter()
            .filter(|(_, entry)| !entry.disabled)
            .map(|(name, _)| name.clone())
            .collect())
    }

    /// Names of every configured server with its enabled flag, sorted.
    pub fn list_all_servers(&self) -> Result<Vec<(String, bool)>, McpError> {
        let file = self.load()?;
        Ok(file
            .mcp_servers
            .iter()
            .map(|(name, entry)| (name.clone(), !entry.disabled))
            .collect())
    }

    /// Connection parameters for `name`.
    ///
    /// Disabled servers are treated as absent.
    pub fn get_connection_params(&self, name: &str) -> Result<ServerDescriptor, McpError> {
        let file = self.load()?;
        match file.mcp_servers.get(name) {
            Some(entry) if !entry.disabled => Ok(ServerDescriptor::from_entry(name, entry)),
            _ => Err(McpError::ServerNotFound {
                name: name.to_string(),
                available: file
                    .mcp_servers
                    .iter()
                    .filter(|(_, e)| !e.disabled)
                    .map(|(n, _)| n.clone())
                    .collect(),
            }),
        }
    }
}

impl Default for McpDiscovery {
    fn default() -> Self {
        Self::from_env()
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Parse one discovery file.
pub fn load_discovery_file(path: &Path) -> Result<DiscoveryFile, McpError> {
    let raw = std::fs::read_to_string(path).map_err(|e| McpError::ConfigError {
        reason: format!("failed to read {}: {e}", path.display()),
    })?;

    let file: DiscoveryFile = serde_json::from_str(&raw).map_err(|e| McpError::ConfigError {
        reason: format!("failed to parse {}: {e}", path.display()),
    })?;

    tracing::trace!(
        path = %path.display(),
        servers = file.mcp_servers.len(),
        "read MCP discovery file"
    );
    Ok(file)
}

/// The standard candidate list, honoring `$MCP_CONFIG_PATH`.
fn default_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    if let Ok(explicit) = std::env::var(CONFIG_PATH_ENV) {
        if !explicit.is_empty() {
            candidates.push(PathBuf::from(explicit));
        }
    }

    let home = dirs::home_dir();
    if let Some(home) = &home {
        candidates.push(home.join(".lmstudio").join(DISCOVERY_FILE_NAME));
    }

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    candidates.push(cwd.join(DISCOVERY_FILE_NAME));

    if let Some(home) = &home {
        candidates.push(home.join(DISCOVERY_FILE_NAME));
    }

    if let Some(parent) = cwd.parent() {
        candidates.push(parent.join(DISCOVERY_FILE_NAME));
    }

    candidates
}

// ─── Tests ──────────────────────────────────────────────────────────────────
