//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` relative to the current working directory
//! (or the file named by `JUNAI_CONFIG`), then applies `JUNAI_LOG_LEVEL` and
//! `JUNAI_OWNER_ID` env overrides.

use std::{
    collections::{BTreeMap, HashSet},
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::error::AppError;
use crate::subsystems::agents::DEFAULT_REQUEST_TIMEOUT;

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Message bus settings.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Default deadline for `request_agent`.
    pub request_timeout: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self { request_timeout: DEFAULT_REQUEST_TIMEOUT }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistenceBackend {
    Memory,
    File,
}

#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    pub backend: PersistenceBackend,
    /// Store file for the `file` backend (already expanded, no `~`).
    pub path: PathBuf,
}

/// Agents subsystem configuration.
#[derive(Debug, Clone, Default)]
pub struct AgentsConfig {
    /// Agent ids whose `[agents.<id>]` section has `enabled = false`.
    pub disabled: HashSet<String>,
}

impl AgentsConfig {
    /// Agents are on unless explicitly disabled.
    pub fn is_enabled(&self, id: &str) -> bool {
        !self.disabled.contains(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayKind {
    Http,
    Dummy,
}

/// One `[gateways.<name>]` section.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub kind: GatewayKind,
    pub base_url: String,
    /// Env var holding the API key.  Keys are never read from TOML.
    pub api_key_env: Option<String>,
    /// Header carrying the key; `None` means `Authorization: Bearer`.
    pub auth_header: Option<String>,
    pub min_interval: Duration,
    pub timeout_seconds: u64,
}

/// Fully-resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub system_name: String,
    pub log_level: String,
    /// Optional log file (appended to, in addition to stderr).
    pub log_file: Option<PathBuf>,
    /// Acting user for agents that work on behalf of one.
    pub owner_id: Option<String>,
    /// Run the stdio slash-command adapter.
    pub stdio_adapter: bool,
    pub bus: BusConfig,
    pub persistence: PersistenceConfig,
    pub agents: AgentsConfig,
    pub gateways: BTreeMap<String, GatewayConfig>,
}

/// Raw TOML shape, the `serde` target before resolution.
#[derive(Deserialize)]
struct RawConfig {
    supervisor: RawSupervisor,
    #[serde(default)]
    bus: RawBus,
    #[serde(default)]
    persistence: RawPersistence,
    #[serde(default)]
    agents: BTreeMap<String, RawAgentEntry>,
    #[serde(default)]
    gateways: BTreeMap<String, RawGateway>,
}

#[derive(Deserialize)]
struct RawSupervisor {
    system_name: String,
    log_level: String,
    #[serde(default)]
    log_file: Option<String>,
    #[serde(default)]
    owner_id: Option<String>,
    #[serde(default = "default_true")]
    stdio_adapter: bool,
}

#[derive(Deserialize)]
struct RawBus {
    #[serde(default = "default_request_timeout_ms")]
    request_timeout_ms: u64,
}

impl Default for RawBus {
    fn default() -> Self {
        Self { request_timeout_ms: default_request_timeout_ms() }
    }
}

#[derive(Deserialize)]
struct RawPersistence {
    #[serde(default = "default_backend")]
    backend: PersistenceBackend,
    #[serde(default = "default_store_path")]
    path: String,
}

impl Default for RawPersistence {
    fn default() -> Self {
        Self { backend: default_backend(), path: default_store_path() }
    }
}

#[derive(Deserialize)]
struct RawAgentEntry {
    /// Defaults to `true`; set to `false` to disable without removing the section.
    #[serde(default = "default_true")]
    enabled: bool,
}

#[derive(Deserialize)]
struct RawGateway {
    #[serde(default = "default_gateway_kind")]
    kind: GatewayKind,
    #[serde(default)]
    base_url: String,
    #[serde(default)]
    api_key_env: Option<String>,
    #[serde(default)]
    auth_header: Option<String>,
    #[serde(default)]
    min_interval_ms: u64,
    #[serde(default = "default_gateway_timeout_seconds")]
    timeout_seconds: u64,
}

fn default_true() -> bool {
    true
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT.as_millis() as u64
}

fn default_backend() -> PersistenceBackend {
    PersistenceBackend::Memory
}

fn default_store_path() -> String {
    "~/.junai/store.json".to_string()
}

fn default_gateway_kind() -> GatewayKind {
    GatewayKind::Http
}

fn default_gateway_timeout_seconds() -> u64 {
    30
}

/// Load config from `JUNAI_CONFIG` or `config/default.toml`, then apply
/// env-var overrides.
pub fn load() -> Result<Config, AppError> {
    let path = env::var("JUNAI_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let log_level_override = env::var("JUNAI_LOG_LEVEL").ok();
    let owner_id_override = env::var("JUNAI_OWNER_ID").ok();
    load_from(
        &expand_home(&path),
        log_level_override.as_deref(),
        owner_id_override.as_deref(),
    )
}

/// Internal loader: explicit path plus optional overrides.
/// Tests pass overrides directly instead of mutating env vars.
pub fn load_from(
    path: &Path,
    log_level_override: Option<&str>,
    owner_id_override: Option<&str>,
) -> Result<Config, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;

    let parsed: RawConfig = toml::from_str(&raw)
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?;

    let s = parsed.supervisor;

    if parsed.bus.request_timeout_ms == 0 {
        return Err(AppError::Config("bus.request_timeout_ms must be greater than 0".into()));
    }

    let mut gateways = BTreeMap::new();
    for (name, g) in parsed.gateways {
        if g.kind == GatewayKind::Http && g.base_url.trim().is_empty() {
            return Err(AppError::Config(format!("gateways.{name}: base_url is required for kind = \"http\"")));
        }
        gateways.insert(
            name,
            GatewayConfig {
                kind: g.kind,
                base_url: g.base_url,
                api_key_env: g.api_key_env,
                auth_header: g.auth_header,
                min_interval: Duration::from_millis(g.min_interval_ms),
                timeout_seconds: g.timeout_seconds,
            },
        );
    }

    let owner_id = owner_id_override
        .map(str::to_string)
        .or(s.owner_id)
        .filter(|id| !id.trim().is_empty());

    Ok(Config {
        system_name: s.system_name,
        log_level: log_level_override.unwrap_or(&s.log_level).to_string(),
        log_file: s.log_file.as_deref().map(expand_home),
        owner_id,
        stdio_adapter: s.stdio_adapter,
        bus: BusConfig {
            request_timeout: Duration::from_millis(parsed.bus.request_timeout_ms),
        },
        persistence: PersistenceConfig {
            backend: parsed.persistence.backend,
            path: expand_home(&parsed.persistence.path),
        },
        agents: AgentsConfig {
            disabled: parsed
                .agents
                .into_iter()
                .filter(|(_, e)| !e.enabled)
                .map(|(id, _)| id)
                .collect(),
        },
        gateways,
    })
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

// ── test helpers ──────────────────────────────────────────────────────────────

/// `Config` for unit tests: in-memory store, dummy gateway only.
#[cfg(test)]
impl Config {
    pub fn test_default() -> Self {
        let mut gateways = BTreeMap::new();
        gateways.insert(
            "echo_api".to_string(),
            GatewayConfig {
                kind: GatewayKind::Dummy,
                base_url: String::new(),
                api_key_env: None,
                auth_header: None,
                min_interval: Duration::ZERO,
                timeout_seconds: 1,
            },
        );
        Self {
            system_name: "test".into(),
            log_level: "info".into(),
            log_file: None,
            owner_id: Some("test-user".into()),
            stdio_adapter: false,
            bus: BusConfig { request_timeout: Duration::from_millis(500) },
            persistence: PersistenceConfig {
                backend: PersistenceBackend::Memory,
                path: PathBuf::from("store.json"),
            },
            agents: AgentsConfig::default(),
            gateways,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL_TOML: &str = r#"
[supervisor]
system_name = "test-system"
log_level = "info"
"#;

    fn write_toml(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn parse_basic_config() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), None, None).unwrap();
        assert_eq!(cfg.system_name, "test-system");
        assert_eq!(cfg.log_level, "info");
        assert!(cfg.stdio_adapter);
        assert_eq!(cfg.owner_id, None);
        assert_eq!(cfg.bus.request_timeout, Duration::from_millis(10_000));
        assert_eq!(cfg.persistence.backend, PersistenceBackend::Memory);
        assert!(cfg.gateways.is_empty());
    }

    #[test]
    fn full_config_resolves_every_section() {
        let f = write_toml(
            r#"
[supervisor]
system_name = "junai"
log_level = "debug"
log_file = "/tmp/junai.log"
owner_id = "alice"
stdio_adapter = false

[bus]
request_timeout_ms = 2500

[persistence]
backend = "file"
path = "/tmp/junai-store.json"

[agents.utility]
enabled = true

[agents.suggestion]
enabled = false

[gateways.weather]
base_url = "https://api.weather.example"
api_key_env = "WEATHER_KEY"
auth_header = "x-api-key"
min_interval_ms = 250

[gateways.echo]
kind = "dummy"
"#,
        );
        let cfg = load_from(f.path(), None, None).unwrap();
        assert_eq!(cfg.log_file, Some(PathBuf::from("/tmp/junai.log")));
        assert_eq!(cfg.owner_id.as_deref(), Some("alice"));
        assert!(!cfg.stdio_adapter);
        assert_eq!(cfg.bus.request_timeout, Duration::from_millis(2500));
        assert_eq!(cfg.persistence.backend, PersistenceBackend::File);
        assert!(cfg.agents.is_enabled("utility"));
        assert!(cfg.agents.is_enabled("knowledge"));
        assert!(!cfg.agents.is_enabled("suggestion"));

        let weather = &cfg.gateways["weather"];
        assert_eq!(weather.kind, GatewayKind::Http);
        assert_eq!(weather.auth_header.as_deref(), Some("x-api-key"));
        assert_eq!(weather.min_interval, Duration::from_millis(250));
        assert_eq!(weather.timeout_seconds, 30);
        assert_eq!(cfg.gateways["echo"].kind, GatewayKind::Dummy);
    }

    #[test]
    fn http_gateway_requires_base_url() {
        let f = write_toml(&format!("{MINIMAL_TOML}\n[gateways.broken]\nkind = \"http\"\n"));
        let msg = load_from(f.path(), None, None).unwrap_err().to_string();
        assert!(msg.contains("gateways.broken"));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let f = write_toml(&format!("{MINIMAL_TOML}\n[bus]\nrequest_timeout_ms = 0\n"));
        assert!(load_from(f.path(), None, None).is_err());
    }

    #[test]
    fn tilde_expands_to_home() {
        let home = dirs::home_dir().expect("home dir must exist in test env");
        let expanded = expand_home("~/.junai");
        assert!(expanded.starts_with(&home));
        assert!(expanded.ends_with(".junai"));
    }

    #[test]
    fn absolute_path_unchanged() {
        assert_eq!(expand_home("/absolute/path"), PathBuf::from("/absolute/path"));
    }

    #[test]
    fn missing_file_errors() {
        let result = load_from(Path::new("/nonexistent/config.toml"), None, None);
        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("config error"));
    }

    #[test]
    fn env_overrides_apply() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), Some("debug"), Some("bob")).unwrap();
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.owner_id.as_deref(), Some("bob"));
    }

    #[test]
    fn blank_owner_means_unauthenticated() {
        let f = write_toml(&MINIMAL_TOML.replace("log_level = \"info\"", "log_level = \"info\"\nowner_id = \"  \""));
        assert_eq!(load_from(f.path(), None, None).unwrap().owner_id, None);
    }
}
