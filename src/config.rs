//! Configuration loading and defaults for kanata-focusd.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::FakeKeyAction;

/// Default kanata host (loopback).
pub const DEFAULT_KANATA_HOST: &str = "127.0.0.1";

/// Default kanata TCP port.
pub const DEFAULT_KANATA_PORT: u16 = 10101;

/// Default layer used when no rule matches.
pub const DEFAULT_KANATA_LAYER: &str = "default_layer";

/// Main configuration for kanata-focusd.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Connection to the kanata daemon.
    pub kanata: KanataConfig,

    /// KWin script injection.
    pub kwin: KwinConfig,

    /// Ordered rule list. First match wins.
    #[serde(rename = "app")]
    pub rules: Vec<RuleConfig>,
}

/// Kanata connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KanataConfig {
    /// Host kanata listens on (default: 127.0.0.1).
    pub host: String,

    /// Port passed to kanata with `-p` (default: 10101).
    pub port: u16,

    /// Layer to switch to when no rule matches.
    pub default_layer: String,

    /// Bound on connect and write operations, in milliseconds (default: 500).
    pub timeout_ms: u64,

    /// Action sent when a virtual key becomes active (default: Tap).
    pub virtual_key_action: FakeKeyAction,

    /// Send `Release` for virtual keys that are no longer active.
    pub release_virtual_keys: bool,

    /// Log commands instead of sending them.
    pub dry_run: bool,
}

impl Default for KanataConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_KANATA_HOST.to_string(),
            port: DEFAULT_KANATA_PORT,
            default_layer: DEFAULT_KANATA_LAYER.to_string(),
            timeout_ms: 500,
            virtual_key_action: FakeKeyAction::default(),
            release_virtual_keys: false,
            dry_run: false,
        }
    }
}

impl KanataConfig {
    /// `host:port` string for connecting.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Connect/write timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// KWin script settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KwinConfig {
    /// Listener script to load. If unset, the embedded script is written to
    /// the runtime directory and loaded from there.
    pub script_path: Option<PathBuf>,

    /// Name the script is registered under in KWin.
    pub plugin_name: String,
}

impl Default for KwinConfig {
    fn default() -> Self {
        Self {
            script_path: None,
            plugin_name: env!("CARGO_PKG_NAME").to_string(),
        }
    }
}

/// One `[[app]]` entry. Omitted patterns match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    /// Regex searched in the window's resource name.
    pub name: Option<String>,

    /// Regex searched in the window's resource class.
    pub class: Option<String>,

    /// Regex searched in the window caption.
    pub caption: Option<String>,

    /// Layer to switch to on match.
    pub layer: Option<String>,

    /// Virtual keys to activate on match.
    #[serde(default)]
    pub virtual_keys: Vec<String>,
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Load configuration from the default path, or return defaults if not found.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(p) = path {
            return Self::load(p);
        }

        if let Some(default_path) = default_config_path()
            && default_path.exists()
        {
            return Self::load(&default_path);
        }

        Ok(Self::default())
    }
}

/// `$XDG_CONFIG_HOME/kanata-focusd/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(env!("CARGO_PKG_NAME")).join("config.toml"))
}

/// Parse a `--port` value: either `PORT` or `IPv4:PORT`.
///
/// A bare port keeps `default_host`.
pub fn parse_endpoint(value: &str, default_host: &str) -> Result<(String, u16)> {
    let value = value.trim();

    if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
        let port = parse_port(value)
            .with_context(|| format!("Invalid port '{value}': must be between 1 and 65535"))?;
        return Ok((default_host.to_string(), port));
    }

    let Some((host, port)) = value.rsplit_once(':') else {
        anyhow::bail!(
            "Invalid port '{value}': specify a port number (e.g. 10000) \
             or an IP address with port (e.g. 127.0.0.1:10000)"
        );
    };

    let ip: Ipv4Addr = host
        .parse()
        .with_context(|| format!("Invalid IP address '{host}' in '{value}'"))?;
    let port = parse_port(port)
        .with_context(|| format!("Invalid port '{port}' in '{value}': must be between 1 and 65535"))?;

    Ok((ip.to_string(), port))
}

/// Digits only, no sign or whitespace, and never zero.
fn parse_port(value: &str) -> Option<u16> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok().filter(|p| *p != 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.kanata.host, "127.0.0.1");
        assert_eq!(config.kanata.port, 10101);
        assert_eq!(config.kanata.default_layer, "default_layer");
        assert_eq!(config.kanata.timeout(), Duration::from_millis(500));
        assert_eq!(config.kanata.virtual_key_action, FakeKeyAction::Tap);
        assert!(!config.kanata.release_virtual_keys);
        assert!(config.kwin.script_path.is_none());
        assert_eq!(config.kwin.plugin_name, "kanata-focusd");
        assert!(config.rules.is_empty());
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
            [kanata]
            port = 12345
            default_layer = "base"
            virtual_key_action = "press"
            release_virtual_keys = true

            [[app]]
            name = "foot"
            caption = "^tmux.*nvim$"
            virtual_keys = ["vk_nvim"]

            [[app]]
            class = "firefox"
            layer = "browser"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.kanata.port, 12345);
        assert_eq!(config.kanata.host, "127.0.0.1");
        assert_eq!(config.kanata.default_layer, "base");
        assert_eq!(config.kanata.virtual_key_action, FakeKeyAction::Press);
        assert!(config.kanata.release_virtual_keys);
        assert_eq!(config.rules.len(), 2);
        assert_eq!(config.rules[0].name.as_deref(), Some("foot"));
        assert_eq!(config.rules[0].virtual_keys, vec!["vk_nvim"]);
        assert_eq!(config.rules[1].class.as_deref(), Some("firefox"));
        assert_eq!(config.rules[1].layer.as_deref(), Some("browser"));
        assert!(config.rules[1].virtual_keys.is_empty());
    }

    #[test]
    fn test_rule_rejects_unknown_field() {
        let toml_str = r#"
            [[app]]
            name = "foot"
            virtual_key = ["vk_foot"]
        "#;
        assert!(toml::from_str::<Config>(toml_str).is_err());
    }

    #[test]
    fn test_invalid_virtual_key_action() {
        let toml_str = r#"
            [kanata]
            virtual_key_action = "hold"
        "#;
        assert!(toml::from_str::<Config>(toml_str).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[kanata]\nhost = \"10.0.0.2\"\n\n[[app]]\nlayer = \"base\"").unwrap();

        let config = Config::load_or_default(Some(file.path())).unwrap();
        assert_eq!(config.kanata.address(), "10.0.0.2:10101");
        assert_eq!(config.rules.len(), 1);
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(Config::load_or_default(Some(&missing)).is_err());
    }

    #[test]
    fn test_parse_endpoint() {
        assert_eq!(
            parse_endpoint("10000", "127.0.0.1").unwrap(),
            ("127.0.0.1".to_string(), 10000)
        );
        assert_eq!(
            parse_endpoint("192.168.1.5:4039", "127.0.0.1").unwrap(),
            ("192.168.1.5".to_string(), 4039)
        );
        assert!(parse_endpoint("0", "127.0.0.1").is_err());
        assert!(parse_endpoint("70000", "127.0.0.1").is_err());
        assert!(parse_endpoint("300.1.1.1:80", "127.0.0.1").is_err());
        assert!(parse_endpoint("127.0.0.1:0", "127.0.0.1").is_err());
        assert!(parse_endpoint("localhost", "127.0.0.1").is_err());
    }

    #[test]
    fn test_parse_endpoint_rejects_signed_ports() {
        assert!(parse_endpoint("+10101", "127.0.0.1").is_err());
        assert!(parse_endpoint("127.0.0.1:+10101", "127.0.0.1").is_err());
        assert!(parse_endpoint("-1", "127.0.0.1").is_err());
        assert!(parse_endpoint(" 10101 ", "127.0.0.1").is_ok());
    }
}
