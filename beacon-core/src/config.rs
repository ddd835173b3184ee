//! Configuration file management for beacon-gateway.
//!
//! Reads/writes `~/.beacon-gateway/config.yaml` with gateway identity,
//! transport endpoint, and window timing.

use std::path::{Path, PathBuf};

use crate::types::{BeaconError, Result};
use crate::window::{TICK_PERIOD_MS, WINDOW_MS};

/// Full configuration structure.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub transport: TransportConfig,
    pub window: WindowConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    pub id: String,
    pub owner_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportConfig {
    pub endpoint: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WindowConfig {
    pub window_ms: u64,
    pub tick_ms: u64,
    pub mailbox_capacity: usize,
    /// Idle heartbeat interval; `None` disables idle heartbeats.
    pub heartbeat_ms: Option<u64>,
}

impl Default for WindowConfig {
    fn default() -> Self {
        WindowConfig {
            window_ms: WINDOW_MS,
            tick_ms: TICK_PERIOD_MS,
            mailbox_capacity: 1024,
            heartbeat_ms: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            gateway: GatewayConfig {
                id: "default".into(),
                owner_id: None,
            },
            transport: TransportConfig {
                endpoint: None,
                token: None,
            },
            window: WindowConfig::default(),
        }
    }
}

/// Get the config directory path (`~/.beacon-gateway/`).
pub fn config_dir() -> PathBuf {
    dirs_home().join(".beacon-gateway")
}

/// Get the config file path.
pub fn config_file() -> PathBuf {
    config_dir().join("config.yaml")
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load config from `path`, falling back to defaults when it is missing
/// or unreadable.
pub fn load_config_from(path: &Path) -> Config {
    if !path.exists() {
        return Config::default();
    }

    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(_) => return Config::default(),
    };

    parse_config(&text)
}

/// Save config to `path`, creating parent directories.
///
/// A blank gateway ID is rejected; the topic is built from it.
pub fn save_config_to(config: &Config, path: &Path) -> Result<()> {
    if config.gateway.id.trim().is_empty() {
        return Err(BeaconError::Config("gateway id is empty".into()));
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, serialize_config(config))?;
    Ok(())
}

/// Parse simple YAML-like config text. Unknown keys are ignored.
fn parse_config(text: &str) -> Config {
    let mut config = Config::default();
    let mut current_section: Option<String> = None;

    for line in text.lines() {
        let stripped = line.trim();
        if stripped.is_empty() || stripped.starts_with('#') {
            continue;
        }

        let is_indented = line.starts_with("  ") || line.starts_with('\t');

        let Some((key, val)) = stripped.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let val = val.trim();

        if !is_indented {
            current_section = if val.is_empty() {
                Some(key.to_string())
            } else {
                None
            };
            continue;
        }

        let Some(section) = current_section.as_deref() else {
            continue;
        };
        match (section, key) {
            ("gateway", "id") => {
                if let Some(v) = parse_string_value(val) {
                    config.gateway.id = v;
                }
            }
            ("gateway", "owner_id") => config.gateway.owner_id = parse_string_value(val),
            ("transport", "endpoint") => config.transport.endpoint = parse_string_value(val),
            ("transport", "token") => config.transport.token = parse_string_value(val),
            ("window", "window_ms") => {
                if let Some(v) = parse_u64_value(val) {
                    config.window.window_ms = v;
                }
            }
            ("window", "tick_ms") => {
                if let Some(v) = parse_u64_value(val).filter(|v| *v > 0) {
                    config.window.tick_ms = v;
                }
            }
            ("window", "mailbox_capacity") => {
                if let Some(v) = parse_u64_value(val).filter(|v| *v > 0) {
                    config.window.mailbox_capacity = v as usize;
                }
            }
            ("window", "heartbeat_ms") => {
                config.window.heartbeat_ms = parse_u64_value(val).filter(|v| *v > 0)
            }
            _ => {}
        }
    }

    config
}

fn parse_string_value(val: &str) -> Option<String> {
    if val == "null" || val == "~" || val.is_empty() {
        return None;
    }
    // Strip quotes
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        return Some(val[1..val.len() - 1].to_string());
    }
    Some(val.to_string())
}

fn parse_u64_value(val: &str) -> Option<u64> {
    if val == "null" || val == "~" || val.is_empty() {
        return None;
    }
    val.parse().ok()
}

/// Serialize config to YAML-like text.
fn serialize_config(config: &Config) -> String {
    let mut lines = vec!["# beacon-gateway configuration".to_string(), String::new()];

    lines.push("gateway:".into());
    lines.push(format!("  id: \"{}\"", config.gateway.id));
    lines.push(optional_line("owner_id", config.gateway.owner_id.as_deref()));
    lines.push(String::new());

    lines.push("transport:".into());
    lines.push(optional_line("endpoint", config.transport.endpoint.as_deref()));
    lines.push(optional_line("token", config.transport.token.as_deref()));
    lines.push(String::new());

    lines.push("window:".into());
    lines.push(format!("  window_ms: {}", config.window.window_ms));
    lines.push(format!("  tick_ms: {}", config.window.tick_ms));
    lines.push(format!("  mailbox_capacity: {}", config.window.mailbox_capacity));
    match config.window.heartbeat_ms {
        Some(v) => lines.push(format!("  heartbeat_ms: {v}")),
        None => lines.push("  heartbeat_ms: null".into()),
    }

    lines.join("\n") + "\n"
}

fn optional_line(key: &str, val: Option<&str>) -> String {
    match val {
        Some(v) => format!("  {key}: \"{v}\""),
        None => format!("  {key}: null"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.gateway.id, "default");
        assert_eq!(config.window.window_ms, 1000);
        assert_eq!(config.window.tick_ms, 1000);
        assert!(config.window.heartbeat_ms.is_none());
        assert!(config.transport.endpoint.is_none());
    }

    #[test]
    fn test_parse_config() {
        let text = r#"
gateway:
  id: "A1B2C3D4"
  owner_id: "owner-42"

transport:
  endpoint: "https://ingest.example.com"
  token: 'secret'

window:
  window_ms: 1500
  tick_ms: 500
  mailbox_capacity: 64
  heartbeat_ms: 30000
"#;
        let config = parse_config(text);
        assert_eq!(config.gateway.id, "A1B2C3D4");
        assert_eq!(config.gateway.owner_id.as_deref(), Some("owner-42"));
        assert_eq!(
            config.transport.endpoint.as_deref(),
            Some("https://ingest.example.com")
        );
        assert_eq!(config.transport.token.as_deref(), Some("secret"));
        assert_eq!(config.window.window_ms, 1500);
        assert_eq!(config.window.tick_ms, 500);
        assert_eq!(config.window.mailbox_capacity, 64);
        assert_eq!(config.window.heartbeat_ms, Some(30000));
    }

    #[test]
    fn test_parse_config_null_and_zero_values() {
        let text = r#"
gateway:
  owner_id: null

transport:
  endpoint: ~

window:
  tick_ms: 0
  heartbeat_ms: 0
"#;
        let config = parse_config(text);
        assert!(config.gateway.owner_id.is_none());
        assert!(config.transport.endpoint.is_none());
        assert_eq!(config.window.tick_ms, 1000);
        assert!(config.window.heartbeat_ms.is_none());
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");

        let mut config = Config::default();
        config.gateway.id = "GW-9".into();
        config.gateway.owner_id = Some("owner".into());
        config.transport.endpoint = Some("http://localhost:8080".into());
        config.window.heartbeat_ms = Some(10_000);

        save_config_to(&config, &path).unwrap();
        assert_eq!(load_config_from(&path), config);
    }

    #[test]
    fn test_save_rejects_blank_gateway_id() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.gateway.id = "  ".into();

        let err = save_config_to(&config, &dir.path().join("config.yaml")).unwrap_err();
        assert!(matches!(err, BeaconError::Config(_)));
    }

    #[test]
    fn test_save_io_failure() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();

        let err = save_config_to(&Config::default(), &blocker.join("config.yaml")).unwrap_err();
        assert!(matches!(err, BeaconError::Io(_)));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("absent.yaml"));
        assert_eq!(config, Config::default());
    }
}
