use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::transcript::DEFAULT_TRANSCRIPT_LIMIT;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 18789;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
pub const MIN_POLL_INTERVAL_MS: u64 = 250;
pub const CONFIG_FILE_NAME: &str = "openclaw.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid config json: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    pub host: String,
    pub port: u16,
    pub token: Option<String>,
    pub poll_interval: Duration,
    pub transcript_limit: usize,
    /// Root holding the config file and `agents/<id>/sessions` transcripts.
    pub openclaw_home: PathBuf,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            token: None,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            transcript_limit: DEFAULT_TRANSCRIPT_LIMIT,
            openclaw_home: default_openclaw_home(),
        }
    }
}

impl MonitorConfig {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn set_poll_interval_ms(&mut self, millis: u64) {
        self.poll_interval = Duration::from_millis(millis.max(MIN_POLL_INTERVAL_MS));
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    gateway: GatewaySection,
    #[serde(default)]
    monitor: MonitorSection,
}

#[derive(Debug, Default, Deserialize)]
struct GatewaySection {
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    port: Option<Value>,
    #[serde(default)]
    auth: AuthSection,
}

#[derive(Debug, Default, Deserialize)]
struct AuthSection {
    #[serde(default)]
    token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MonitorSection {
    #[serde(default)]
    poll_interval_ms: Option<Value>,
    #[serde(default)]
    transcript_limit: Option<Value>,
}

fn default_openclaw_home() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".openclaw"))
        .unwrap_or_else(|| PathBuf::from(".openclaw"))
}

/// Load from `~/.openclaw/openclaw.json` and the process environment.
/// Never fails: anything missing or malformed falls back to defaults.
pub fn load_config(path: Option<&Path>) -> MonitorConfig {
    load_config_with(path, |name| std::env::var(name).ok())
}

/// Same as [`load_config`] with an explicit environment lookup.
pub fn load_config_with<F>(path: Option<&Path>, lookup: F) -> MonitorConfig
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = MonitorConfig::default();
    if let Some(home) = first_env(&lookup, &["OPENCLAW_HOME"]) {
        config.openclaw_home = PathBuf::from(home);
    }

    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.openclaw_home.join(CONFIG_FILE_NAME));
    match read_config_file(&path) {
        Ok(Some(file)) => apply_file(&mut config, file, &path),
        Ok(None) => info!("config_not_found: {} (using defaults)", path.display()),
        Err(err) => warn!("config_parse_failed: {}: {err} (using defaults)", path.display()),
    }

    apply_env(&mut config, &lookup);
    config
}

fn read_config_file(path: &Path) -> Result<Option<ConfigFile>, ConfigError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    Ok(Some(serde_json::from_str(&content)?))
}

fn apply_file(config: &mut MonitorConfig, file: ConfigFile, path: &Path) {
    if let Some(host) = file.gateway.host.filter(|host| !host.trim().is_empty()) {
        config.host = host;
    }
    if let Some(raw) = file.gateway.port {
        match value_as_u64(&raw).and_then(|port| u16::try_from(port).ok()) {
            Some(port) => config.port = port,
            None => warn!("config_invalid_port: {raw} in {}", path.display()),
        }
    }
    if let Some(token) = file.gateway.auth.token.filter(|token| !token.is_empty()) {
        config.token = Some(token);
    }
    if let Some(millis) = file.monitor.poll_interval_ms.as_ref().and_then(value_as_u64) {
        config.set_poll_interval_ms(millis);
    }
    if let Some(limit) = file.monitor.transcript_limit.as_ref().and_then(value_as_u64) {
        config.transcript_limit = limit as usize;
    }
}

fn apply_env<F>(config: &mut MonitorConfig, lookup: &F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = first_env(lookup, &["OPENCLAW_GATEWAY_HOST"]) {
        config.host = host;
    }
    if let Some(raw) = first_env(lookup, &["OPENCLAW_GATEWAY_PORT", "CLAWDBOT_GATEWAY_PORT"]) {
        match raw.trim().parse::<u16>() {
            Ok(port) => config.port = port,
            Err(_) => warn!("env_invalid_port: {raw:?} (keeping {})", config.port),
        }
    }
    if let Some(token) = first_env(lookup, &["OPENCLAW_GATEWAY_TOKEN", "OPENCLAW_WEBHOOK_TOKEN"]) {
        config.token = Some(token);
    }
    if let Some(raw) = first_env(lookup, &["OPENCLAW_MONITOR_POLL_MS"]) {
        match raw.trim().parse::<u64>() {
            Ok(millis) => config.set_poll_interval_ms(millis),
            Err(_) => warn!("env_invalid_poll_interval: {raw:?}"),
        }
    }
    if let Some(raw) = first_env(lookup, &["OPENCLAW_MONITOR_TRANSCRIPT_LIMIT"]) {
        match raw.trim().parse::<usize>() {
            Ok(limit) => config.transcript_limit = limit,
            Err(_) => warn!("env_invalid_transcript_limit: {raw:?}"),
        }
    }
}

fn first_env<F>(lookup: &F, names: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    names
        .iter()
        .filter_map(|name| lookup(name))
        .find(|value| !value.trim().is_empty())
}

fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = TempDir::new().expect("tempdir");
        let config = load_config_with(Some(&dir.path().join("absent.json")), env(&[]));
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.token, None);
        assert_eq!(config.poll_interval, Duration::from_millis(DEFAULT_POLL_INTERVAL_MS));
        assert_eq!(config.transcript_limit, DEFAULT_TRANSCRIPT_LIMIT);
        assert_eq!(config.base_url(), "http://127.0.0.1:18789");
    }

    #[test]
    fn file_values_are_read() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(
            &path,
            r#"{"gateway": {"port": "2020", "auth": {"token": "secret"}},
                "monitor": {"pollIntervalMs": 5000, "transcriptLimit": 50}}"#,
        )
        .expect("write");
        let config = load_config_with(Some(&path), env(&[]));
        assert_eq!(config.port, 2020);
        assert_eq!(config.token.as_deref(), Some("secret"));
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.transcript_limit, 50);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "{ not json").expect("write");
        let config = load_config_with(Some(&path), env(&[]));
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.token, None);
    }

    #[test]
    fn env_overrides_file() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, r#"{"gateway": {"port": 2020, "auth": {"token": "file"}}}"#)
            .expect("write");
        let config = load_config_with(
            Some(&path),
            env(&[
                ("OPENCLAW_GATEWAY_HOST", "10.0.0.5"),
                ("OPENCLAW_GATEWAY_PORT", ""),
                ("CLAWDBOT_GATEWAY_PORT", "3030"),
                ("OPENCLAW_WEBHOOK_TOKEN", "env-token"),
                ("OPENCLAW_MONITOR_POLL_MS", "10"),
            ]),
        );
        assert_eq!(config.host, "10.0.0.5");
        assert_eq!(config.port, 3030);
        assert_eq!(config.token.as_deref(), Some("env-token"));
        assert_eq!(config.poll_interval, Duration::from_millis(MIN_POLL_INTERVAL_MS));
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let dir = TempDir::new().expect("tempdir");
        let config = load_config_with(
            Some(&dir.path().join("absent.json")),
            env(&[
                ("OPENCLAW_GATEWAY_PORT", "not-a-port"),
                ("OPENCLAW_MONITOR_TRANSCRIPT_LIMIT", "-3"),
            ]),
        );
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.transcript_limit, DEFAULT_TRANSCRIPT_LIMIT);
    }

    #[test]
    fn openclaw_home_locates_default_config_file() {
        let dir = TempDir::new().expect("tempdir");
        fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            r#"{"gateway": {"host": "gateway.local"}}"#,
        )
        .expect("write");
        let home = dir.path().display().to_string();
        let config = load_config_with(None, env(&[("OPENCLAW_HOME", home.as_str())]));
        assert_eq!(config.host, "gateway.local");
        assert_eq!(config.openclaw_home, dir.path());
    }
}
