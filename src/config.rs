use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use content_shield_core::models::MediaKind;

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub collaborators: CollaboratorsConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LimitsConfig {
    #[serde(default = "default_image_max_bytes")]
    pub image_max_bytes: u64,
    #[serde(default = "default_audio_max_bytes")]
    pub audio_max_bytes: u64,
    #[serde(default = "default_image_types")]
    pub image_types: Vec<String>,
    #[serde(default = "default_audio_types")]
    pub audio_types: Vec<String>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            image_max_bytes: default_image_max_bytes(),
            audio_max_bytes: default_audio_max_bytes(),
            image_types: default_image_types(),
            audio_types: default_audio_types(),
        }
    }
}

impl LimitsConfig {
    pub fn max_bytes(&self, kind: MediaKind) -> u64 {
        match kind {
            MediaKind::Image => self.image_max_bytes,
            MediaKind::Audio => self.audio_max_bytes,
        }
    }

    pub fn accepted_types(&self, kind: MediaKind) -> &[String] {
        match kind {
            MediaKind::Image => &self.image_types,
            MediaKind::Audio => &self.audio_types,
        }
    }

    /// Largest upload any kind accepts; sizes the HTTP body limit.
    pub fn largest(&self) -> u64 {
        self.image_max_bytes.max(self.audio_max_bytes)
    }
}

fn default_image_max_bytes() -> u64 {
    20 * MIB
}
fn default_audio_max_bytes() -> u64 {
    50 * MIB
}
fn default_image_types() -> Vec<String> {
    ["image/jpeg", "image/jpg", "image/png", "image/webp", "image/svg+xml"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_audio_types() -> Vec<String> {
    [
        "audio/mpeg",
        "audio/mp3",
        "audio/wav",
        "audio/x-wav",
        "audio/wave",
        "audio/flac",
        "audio/x-flac",
        "audio/ogg",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScanConfig {
    #[serde(default = "default_max_concurrent_scans")]
    pub max_concurrent_scans: usize,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_tick_step")]
    pub tick_step: u8,
    #[serde(default = "default_queue_timeout_ms")]
    pub queue_timeout_ms: u64,
    #[serde(default = "default_fingerprint_timeout_ms")]
    pub fingerprint_timeout_ms: u64,
    #[serde(default = "default_search_timeout_ms")]
    pub search_timeout_ms: u64,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_concurrent_scans: default_max_concurrent_scans(),
            tick_interval_ms: default_tick_interval_ms(),
            tick_step: default_tick_step(),
            queue_timeout_ms: default_queue_timeout_ms(),
            fingerprint_timeout_ms: default_fingerprint_timeout_ms(),
            search_timeout_ms: default_search_timeout_ms(),
            max_retries: 0,
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl ScanConfig {
    /// Never zero; `tokio::time::interval` rejects an empty period.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn queue_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_timeout_ms)
    }

    pub fn fingerprint_timeout(&self) -> Duration {
        Duration::from_millis(self.fingerprint_timeout_ms)
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_millis(self.search_timeout_ms)
    }

    /// Delay before retry `attempt` (1-based): base, 2×base, 4×base, capped at 2^5.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(5);
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(1 << shift))
    }
}

fn default_max_concurrent_scans() -> usize {
    4
}
fn default_tick_interval_ms() -> u64 {
    300
}
fn default_tick_step() -> u8 {
    5
}
fn default_queue_timeout_ms() -> u64 {
    300_000
}
fn default_fingerprint_timeout_ms() -> u64 {
    60_000
}
fn default_search_timeout_ms() -> u64 {
    120_000
}
fn default_retry_backoff_ms() -> u64 {
    1_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct CollaboratorsConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub fingerprint_url: Option<String>,
    #[serde(default)]
    pub search_url: Option<String>,
    /// Name of the environment variable holding a bearer token, if any.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CollaboratorsConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            fingerprint_url: None,
            search_url: None,
            api_key_env: None,
            timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "demo".to_string()
}
fn default_request_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        // Validate limits
        if self.limits.image_max_bytes == 0 || self.limits.audio_max_bytes == 0 {
            anyhow::bail!("limits.image_max_bytes and limits.audio_max_bytes must be > 0");
        }
        if self.limits.image_types.is_empty() || self.limits.audio_types.is_empty() {
            anyhow::bail!("limits.image_types and limits.audio_types must not be empty");
        }

        // Validate scan
        if self.scan.max_concurrent_scans == 0 {
            anyhow::bail!("scan.max_concurrent_scans must be >= 1");
        }
        if self.scan.tick_interval_ms == 0 || self.scan.tick_step == 0 {
            anyhow::bail!("scan.tick_interval_ms and scan.tick_step must be > 0");
        }
        if self.scan.queue_timeout_ms == 0
            || self.scan.fingerprint_timeout_ms == 0
            || self.scan.search_timeout_ms == 0
        {
            anyhow::bail!("scan timeouts must be > 0");
        }

        // Validate collaborators
        match self.collaborators.provider.as_str() {
            "demo" => {}
            "remote" => {
                if self.collaborators.fingerprint_url.is_none()
                    || self.collaborators.search_url.is_none()
                {
                    anyhow::bail!(
                        "collaborators.fingerprint_url and collaborators.search_url are required when provider is 'remote'"
                    );
                }
            }
            other => anyhow::bail!(
                "Unknown collaborator provider: '{}'. Must be demo or remote.",
                other
            ),
        }

        Ok(())
    }
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.limits.image_max_bytes, 20 * MIB);
        assert_eq!(config.limits.audio_max_bytes, 50 * MIB);
        assert_eq!(config.scan.tick_step, 5);
        assert_eq!(config.scan.max_retries, 0);
        assert_eq!(config.collaborators.provider, "demo");
        assert!(config
            .limits
            .accepted_types(MediaKind::Image)
            .contains(&"image/webp".to_string()));
    }

    #[test]
    fn overrides_are_applied() {
        let config = parse_config(
            r#"
[scan]
max_concurrent_scans = 2
tick_interval_ms = 10
search_timeout_ms = 500

[server]
bind = "0.0.0.0:9000"
"#,
        )
        .unwrap();
        assert_eq!(config.scan.max_concurrent_scans, 2);
        assert_eq!(config.scan.tick_interval(), Duration::from_millis(10));
        assert_eq!(config.scan.search_timeout(), Duration::from_millis(500));
        assert_eq!(config.scan.fingerprint_timeout_ms, 60_000);
        assert_eq!(config.server.bind, "0.0.0.0:9000");
    }

    #[test]
    fn remote_provider_requires_urls() {
        let err = parse_config("[collaborators]\nprovider = \"remote\"\n").unwrap_err();
        assert!(err.to_string().contains("fingerprint_url"));

        parse_config(
            r#"
[collaborators]
provider = "remote"
fingerprint_url = "http://127.0.0.1:8000/fingerprint"
search_url = "http://127.0.0.1:8000/search"
"#,
        )
        .unwrap();
    }

    #[test]
    fn rejects_unknown_provider_and_zero_limits() {
        assert!(parse_config("[collaborators]\nprovider = \"sonar\"\n").is_err());
        assert!(parse_config("[scan]\nmax_concurrent_scans = 0\n").is_err());
        assert!(parse_config("[limits]\nimage_max_bytes = 0\n").is_err());
    }

    #[test]
    fn zero_tick_interval_is_clamped() {
        let scan = ScanConfig {
            tick_interval_ms: 0,
            ..ScanConfig::default()
        };
        assert_eq!(scan.tick_interval(), Duration::from_millis(1));
    }

    #[test]
    fn retry_delay_doubles_and_caps() {
        let scan = ScanConfig {
            retry_backoff_ms: 100,
            ..ScanConfig::default()
        };
        assert_eq!(scan.retry_delay(1), Duration::from_millis(100));
        assert_eq!(scan.retry_delay(2), Duration::from_millis(200));
        assert_eq!(scan.retry_delay(3), Duration::from_millis(400));
        assert_eq!(scan.retry_delay(20), Duration::from_millis(3_200));
    }

    #[test]
    fn default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn example_config_parses_to_defaults() {
        let config = parse_config(include_str!("../config/shield.example.toml")).unwrap();
        let defaults = Config::default();
        assert_eq!(config.limits.image_max_bytes, defaults.limits.image_max_bytes);
        assert_eq!(config.limits.audio_types, defaults.limits.audio_types);
        assert_eq!(config.scan.search_timeout_ms, defaults.scan.search_timeout_ms);
        assert_eq!(config.server.bind, defaults.server.bind);
    }
}
