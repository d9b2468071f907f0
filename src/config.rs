//! Relay Configuration Module
//!
//! A single `RelayConfig` is assembled at startup and shared (read-only) by
//! every handler. Layering, lowest to highest precedence:
//! - built-in vendor defaults
//! - optional YAML/JSON file (`RelayConfig::load_from_file`)
//! - environment variables (`RelayConfig::apply_env`)

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_CHAT_SSE_URL: &str = "https://wss.lke.cloud.tencent.com/v1/qbot/chat/sse";
pub const DEFAULT_REGION: &str = "ap-guangzhou";
pub const DEFAULT_API_ENDPOINT: &str = "https://lke.tencentcloudapi.com";
pub const DEFAULT_API_SERVICE: &str = "lke";
pub const DEFAULT_API_VERSION: &str = "2023-11-30";
pub const TYPE_KEY_REALTIME: &str = "realtime";
pub const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 60;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Settings for both relays. Secrets default to empty strings so a relay can
/// start without them; upstream calls then fail and report why.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    /// Vendor streaming chat endpoint.
    pub chat_sse_url: String,
    /// Sent upstream as `X-App-Key`.
    pub bot_app_key: String,
    /// Long-lived account credentials for the control plane.
    pub secret_id: String,
    pub secret_key: String,
    /// Bot/application identifier passed as `BotBizId`.
    pub bot_biz_id: String,
    pub region: String,
    /// Control-plane origin, e.g. `https://lke.tencentcloudapi.com`.
    pub api_endpoint: String,
    pub api_service: String,
    pub api_version: String,
    /// `TypeKey` of the storage credential request.
    pub storage_type_key: String,
    /// `IsPublic` of the storage credential request.
    pub storage_public: bool,
    /// Connect and per-read timeout for upstream calls.
    pub upstream_timeout_secs: u64,
    /// Replaces `https://<bucket>.cos.<region>.myqcloud.com` for object writes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cos_endpoint: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            chat_sse_url: DEFAULT_CHAT_SSE_URL.to_string(),
            bot_app_key: String::new(),
            secret_id: String::new(),
            secret_key: String::new(),
            bot_biz_id: String::new(),
            region: DEFAULT_REGION.to_string(),
            api_endpoint: DEFAULT_API_ENDPOINT.to_string(),
            api_service: DEFAULT_API_SERVICE.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            storage_type_key: TYPE_KEY_REALTIME.to_string(),
            storage_public: true,
            upstream_timeout_secs: DEFAULT_UPSTREAM_TIMEOUT_SECS,
            cos_endpoint: None,
        }
    }
}

impl std::fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConfig")
            .field("chat_sse_url", &self.chat_sse_url)
            .field("bot_app_key", &redact(&self.bot_app_key))
            .field("secret_id", &redact(&self.secret_id))
            .field("secret_key", &redact(&self.secret_key))
            .field("bot_biz_id", &self.bot_biz_id)
            .field("region", &self.region)
            .field("api_endpoint", &self.api_endpoint)
            .field("api_service", &self.api_service)
            .field("api_version", &self.api_version)
            .field("storage_type_key", &self.storage_type_key)
            .field("storage_public", &self.storage_public)
            .field("upstream_timeout_secs", &self.upstream_timeout_secs)
            .field("cos_endpoint", &self.cos_endpoint)
            .finish()
    }
}

fn redact(value: &str) -> &'static str {
    if value.is_empty() {
        "<unset>"
    } else {
        "<redacted>"
    }
}

impl RelayConfig {
    /// Vendor defaults overlaid with the process environment.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Load a YAML (or JSON) file. Missing keys keep their defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(&content)?)
    }

    /// Overlay non-empty environment variables onto this config.
    pub fn apply_env(&mut self) {
        self.apply_vars(|key| std::env::var(key).ok());
    }

    fn apply_vars<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(v) = get("BOT_APP_KEY") {
            self.bot_app_key = v;
        }
        if let Some(v) = get("SECRET_ID") {
            self.secret_id = v;
        }
        if let Some(v) = get("SECRET_KEY") {
            self.secret_key = v;
        }
        if let Some(v) = get("BOT_BIZ_ID") {
            self.bot_biz_id = v;
        }
        if let Some(v) = get("LKE_CHAT_SSE_URL") {
            self.chat_sse_url = v;
        }
        if let Some(v) = get("LKE_API_ENDPOINT") {
            self.api_endpoint = v;
        }
        if let Some(v) = get("LKE_REGION") {
            self.region = v;
        }
        if let Some(v) = get("LKE_COS_ENDPOINT") {
            self.cos_endpoint = Some(v);
        }
        if let Some(v) = get("LKE_UPSTREAM_TIMEOUT_SECONDS") {
            match v.parse::<u64>() {
                Ok(n) if n > 0 => self.upstream_timeout_secs = n,
                _ => tracing::warn!(
                    "Ignoring invalid LKE_UPSTREAM_TIMEOUT_SECONDS value: {}",
                    v
                ),
            }
        }
    }

    /// Names of secrets that are still unset.
    pub fn missing_secrets(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.bot_app_key.is_empty() {
            missing.push("BOT_APP_KEY");
        }
        if self.secret_id.is_empty() {
            missing.push("SECRET_ID");
        }
        if self.secret_key.is_empty() {
            missing.push("SECRET_KEY");
        }
        missing
    }

    pub fn upstream_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.upstream_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn defaults_match_vendor_constants() {
        let config = RelayConfig::default();
        assert_eq!(config.chat_sse_url, DEFAULT_CHAT_SSE_URL);
        assert_eq!(config.region, "ap-guangzhou");
        assert_eq!(config.storage_type_key, "realtime");
        assert!(config.storage_public);
        assert_eq!(config.upstream_timeout_secs, 60);
        assert!(config.bot_biz_id.is_empty());
    }

    #[test]
    fn env_overlay_ignores_empty_values() {
        let vars: HashMap<&str, &str> = [
            ("BOT_APP_KEY", "app-key"),
            ("SECRET_ID", "  "),
            ("BOT_BIZ_ID", "1234"),
            ("LKE_UPSTREAM_TIMEOUT_SECONDS", "15"),
        ]
        .into_iter()
        .collect();

        let mut config = RelayConfig::default();
        config.apply_vars(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.bot_app_key, "app-key");
        assert!(config.secret_id.is_empty());
        assert_eq!(config.bot_biz_id, "1234");
        assert_eq!(config.upstream_timeout_secs, 15);
        assert_eq!(config.missing_secrets(), vec!["SECRET_ID", "SECRET_KEY"]);
    }

    #[test]
    fn invalid_timeout_keeps_default() {
        let mut config = RelayConfig::default();
        config.apply_vars(|k| (k == "LKE_UPSTREAM_TIMEOUT_SECONDS").then(|| "soon".to_string()));
        assert_eq!(config.upstream_timeout_secs, 60);
    }

    #[test]
    fn file_values_override_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "region: ap-shanghai\nbot_biz_id: \"42\"\ncos_endpoint: http://127.0.0.1:9000"
        )
        .unwrap();

        let config = RelayConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.region, "ap-shanghai");
        assert_eq!(config.bot_biz_id, "42");
        assert_eq!(config.cos_endpoint.as_deref(), Some("http://127.0.0.1:9000"));
        assert_eq!(config.api_version, DEFAULT_API_VERSION);
    }

    #[test]
    fn debug_redacts_secrets() {
        let config = RelayConfig {
            secret_key: "super-secret".into(),
            ..RelayConfig::default()
        };
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
