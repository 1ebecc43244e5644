use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::device::DeviceId;
use crate::sync::wire::DEFAULT_LOG_LIMIT;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:3000";
pub const DEFAULT_DEVICE_ID: &str = "despertador01";
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Where the device API lives and how to talk to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub base_url: String,
    pub device_id: DeviceId,
    pub timeout_ms: u64,
    pub log_limit: u32,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            device_id: DeviceId::new(DEFAULT_DEVICE_ID),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            log_limit: DEFAULT_LOG_LIMIT,
        }
    }
}

impl ClientSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Command-line and environment values win over the settings file.
    pub fn apply(mut self, overrides: SettingsOverrides) -> Result<Self> {
        if let Some(base_url) = overrides.base_url {
            self.base_url = base_url;
        }
        if let Some(device_id) = overrides.device_id {
            self.device_id = DeviceId::new(device_id);
        }
        if let Some(timeout_ms) = overrides.timeout_ms {
            self.timeout_ms = timeout_ms;
        }
        if let Some(log_limit) = overrides.log_limit {
            self.log_limit = log_limit;
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            bail!(
                "base_url '{}' must start with http:// or https://",
                self.base_url
            );
        }
        let id = self.device_id.as_str();
        if id.trim().is_empty() {
            bail!("device_id must not be empty");
        }
        if id.contains(['/', '?', '#']) {
            bail!("device_id '{id}' must not contain '/', '?' or '#'");
        }
        if self.timeout_ms == 0 {
            bail!("timeout_ms must be greater than zero");
        }
        if self.log_limit == 0 {
            bail!("log_limit must be greater than zero");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub base_url: Option<String>,
    pub device_id: Option<String>,
    pub timeout_ms: Option<u64>,
    pub log_limit: Option<u32>,
}

pub fn load_settings(path: &Path) -> Result<ClientSettings> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("unable to read settings file {}", path.display()))?;
    parse_settings_text(&content)
}

pub fn parse_settings_text(content: &str) -> Result<ClientSettings> {
    let raw = serde_json::from_str::<SettingsFile>(content).map_err(|err| {
        let line = err.line();
        let column = err.column();
        anyhow::anyhow!("invalid JSON at line {line}, column {column}: {err}")
    })?;

    if raw.version != 1 {
        bail!(
            "unsupported settings version {}; expected version 1",
            raw.version
        );
    }

    let defaults = ClientSettings::default();
    let settings = ClientSettings {
        base_url: raw
            .base_url
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or(defaults.base_url),
        device_id: raw.device_id.map(DeviceId::new).unwrap_or(defaults.device_id),
        timeout_ms: raw.timeout_ms.unwrap_or(defaults.timeout_ms),
        log_limit: raw.log_limit.unwrap_or(defaults.log_limit),
    };
    settings.validate()?;
    Ok(settings)
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SettingsFile {
    version: u32,
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    device_id: Option<String>,
    #[serde(default)]
    timeout_ms: Option<u64>,
    #[serde(default)]
    log_limit: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_settings() {
        let json = r#"
{
  "version": 1,
  "base_url": "http://192.168.15.6:3000/",
  "device_id": "quarto",
  "timeout_ms": 2500,
  "log_limit": 20
}
"#;
        let settings = parse_settings_text(json).expect("valid settings");
        assert_eq!(settings.base_url, "http://192.168.15.6:3000");
        assert_eq!(settings.device_id.as_str(), "quarto");
        assert_eq!(settings.timeout(), Duration::from_millis(2500));
        assert_eq!(settings.log_limit, 20);
    }

    #[test]
    fn missing_fields_use_defaults() {
        let settings = parse_settings_text(r#"{ "version": 1 }"#).expect("valid settings");
        assert_eq!(settings, ClientSettings::default());
    }

    #[test]
    fn rejects_unknown_version() {
        let err = parse_settings_text(r#"{ "version": 2 }"#).expect_err("version 2");
        assert!(err.to_string().contains("unsupported settings version"));
    }

    #[test]
    fn rejects_malformed_json_with_position() {
        let err = parse_settings_text("{ \"version\": ").expect_err("truncated");
        assert!(err.to_string().contains("invalid JSON at line 1"));
    }

    #[test]
    fn rejects_bad_values() {
        let err = parse_settings_text(r#"{ "version": 1, "base_url": "ftp://device" }"#)
            .expect_err("scheme");
        assert!(err.to_string().contains("must start with http"));

        let err = parse_settings_text(r#"{ "version": 1, "timeout_ms": 0 }"#)
            .expect_err("timeout");
        assert!(err.to_string().contains("timeout_ms"));

        let err = parse_settings_text(r#"{ "version": 1, "device_id": "a/b" }"#)
            .expect_err("device id");
        assert!(err.to_string().contains("device_id"));
    }

    #[test]
    fn overrides_win_over_file_values() {
        let settings = ClientSettings::default()
            .apply(SettingsOverrides {
                base_url: Some("https://blinds.example".to_string()),
                device_id: None,
                timeout_ms: Some(500),
                log_limit: None,
            })
            .expect("valid overrides");
        assert_eq!(settings.base_url, "https://blinds.example");
        assert_eq!(settings.device_id.as_str(), DEFAULT_DEVICE_ID);
        assert_eq!(settings.timeout_ms, 500);

        let err = ClientSettings::default()
            .apply(SettingsOverrides {
                timeout_ms: Some(0),
                ..SettingsOverrides::default()
            })
            .expect_err("zero timeout");
        assert!(err.to_string().contains("timeout_ms"));
    }
}
