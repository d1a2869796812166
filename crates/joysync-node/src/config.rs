//! Daemon configuration.
//!
//! Loaded from a YAML (or JSON) document, then overlaid with environment
//! variables. Every scalar is overridable: the dotted path of a key maps to
//! `YT_SYNCH__` + the SCREAMING_SNAKE form of each segment joined by `__`.
//! Arrays and polymorphic values are passed as JSON strings; the values
//! `off`, `null` and `undefined` unset a key.

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix for config overrides.
pub const ENV_PREFIX: &str = "YT_SYNCH__";

/// Fallback config path when neither flag nor env is given.
pub const DEFAULT_CONFIG_PATH: &str = "./config.yml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub joystream: JoystreamConfig,
    pub endpoints: EndpointsConfig,
    pub directories: DirectoriesConfig,
    pub limits: LimitsConfig,
    pub intervals: IntervalsConfig,
    pub youtube: YoutubeConfig,
    /// Deployment environment name (for log context only).
    #[serde(default)]
    pub env: Option<String>,
    pub creator_onboarding_requirements: OnboardingRequirements,
    pub http_api: HttpApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoystreamConfig {
    pub channel_collaborator: CollaboratorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollaboratorConfig {
    /// On-chain member id of the collaborator.
    pub member_id: String,
    /// SURI of the collaborator signing key.
    pub account_suri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointsConfig {
    /// Indexer GraphQL endpoint.
    pub query_node: String,
    /// Chain RPC WebSocket endpoint.
    pub joystream_node_ws: String,
    /// Media stream resolver for downloads.
    pub media_resolver: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoriesConfig {
    /// Local asset staging directory.
    pub assets: PathBuf,
    /// State store data directory.
    pub data: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitsConfig {
    pub daily_api_quota: QuotaLimits,
    #[serde(default = "default_max_concurrent_downloads")]
    pub max_concurrent_downloads: usize,
    #[serde(default = "default_max_concurrent_uploads")]
    pub max_concurrent_uploads: usize,
    #[serde(default = "default_pending_upload_batch")]
    pub pending_upload_batch_size: usize,
    /// Disk budget for staged assets, e.g. `50G`.
    pub storage: String,
    #[serde(default = "default_max_download_attempts")]
    pub max_download_attempts: u32,
    /// Channels polled concurrently per metadata cycle.
    #[serde(default = "default_poll_fanout")]
    pub poll_fanout: usize,
    #[serde(default = "default_shutdown_grace_s")]
    pub shutdown_grace_s: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaLimits {
    #[serde(default = "default_sync_quota")]
    pub sync: u32,
    #[serde(default = "default_signup_quota")]
    pub signup: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntervalsConfig {
    /// Minutes between metadata poll cycles.
    pub youtube_polling: u64,
    /// Seconds between storage-node response time probes.
    pub check_storage_node_response_times: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YoutubeConfig {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_request_timeout_s")]
    pub request_timeout_s: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingRequirements {
    pub minimum_subscribers_count: u64,
    pub minimum_videos_count: u64,
    pub minimum_channel_age_hours: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpApiConfig {
    pub port: u16,
    /// Operator key authorizing administrative calls. Read from config,
    /// never from ambient process env; startup fails when empty.
    pub owner_key: String,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

fn default_sync_quota() -> u32 {
    9_500
}
fn default_signup_quota() -> u32 {
    500
}
fn default_max_concurrent_downloads() -> usize {
    10
}
fn default_max_concurrent_uploads() -> usize {
    10
}
fn default_pending_upload_batch() -> usize {
    50
}
fn default_max_download_attempts() -> u32 {
    5
}
fn default_poll_fanout() -> usize {
    1
}
fn default_shutdown_grace_s() -> u64 {
    30
}
fn default_api_base_url() -> String {
    "https://www.googleapis.com/youtube/v3".to_string()
}
fn default_token_url() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}
fn default_request_timeout_s() -> u64 {
    30
}
fn default_metrics_port() -> u16 {
    9099
}

impl Config {
    /// Resolve the config path: flag, then `CONFIG_PATH`, then `./config.yml`.
    pub fn resolve_path(flag: Option<PathBuf>) -> PathBuf {
        if let Some(path) = flag {
            return path;
        }
        if let Ok(path) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(path);
        }
        PathBuf::from(DEFAULT_CONFIG_PATH)
    }

    /// Load the document at `path`, apply process-env overrides, validate.
    pub fn load(path: impl AsRef<Path>) -> SyncResult<Self> {
        Self::load_with_env(path, std::env::vars())
    }

    /// Load with an explicit override source (testable).
    pub fn load_with_env(
        path: impl AsRef<Path>,
        vars: impl Iterator<Item = (String, String)>,
    ) -> SyncResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("cannot read {}: {}", path.display(), e)))?;

        let mut document: serde_yaml::Value = serde_yaml::from_str(&content)
            .map_err(|e| SyncError::Config(format!("cannot parse {}: {}", path.display(), e)))?;

        apply_env_overrides(&mut document, vars)?;

        let config: Config = serde_yaml::from_value(document)
            .map_err(|e| SyncError::Config(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> SyncResult<()> {
        if self.http_api.owner_key.trim().is_empty() {
            return Err(SyncError::Config(
                "httpApi.ownerKey must be set (operator authorization)".to_string(),
            ));
        }
        if !self.endpoints.joystream_node_ws.starts_with("ws://")
            && !self.endpoints.joystream_node_ws.starts_with("wss://")
        {
            return Err(SyncError::Config(
                "endpoints.joystreamNodeWs must start with ws:// or wss://".to_string(),
            ));
        }
        if self.intervals.youtube_polling == 0 {
            return Err(SyncError::Config(
                "intervals.youtubePolling must be > 0".to_string(),
            ));
        }
        if self.limits.poll_fanout == 0 {
            return Err(SyncError::Config("limits.pollFanout must be > 0".to_string()));
        }
        self.storage_budget_bytes()?;
        Ok(())
    }

    /// The disk budget, decoded from `limits.storage`.
    pub fn storage_budget_bytes(&self) -> SyncResult<u64> {
        parse_byte_size(&self.limits.storage)
            .ok_or_else(|| SyncError::Config(format!("invalid limits.storage: {}", self.limits.storage)))
    }

    /// Metadata poll period.
    pub fn polling_period(&self) -> Duration {
        Duration::from_secs(self.intervals.youtube_polling * 60)
    }

    /// Storage probe period.
    pub fn probe_period(&self) -> Duration {
        Duration::from_secs(self.intervals.check_storage_node_response_times)
    }
}

/// Decode sizes like `500M`, `50G`, `2T` or plain byte counts.
fn parse_byte_size(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let (number, multiplier) = match raw.chars().last()? {
        'K' | 'k' => (&raw[..raw.len() - 1], 1u64 << 10),
        'M' | 'm' => (&raw[..raw.len() - 1], 1u64 << 20),
        'G' | 'g' => (&raw[..raw.len() - 1], 1u64 << 30),
        'T' | 't' => (&raw[..raw.len() - 1], 1u64 << 40),
        _ => (raw, 1),
    };
    number.trim().parse::<u64>().ok()?.checked_mul(multiplier)
}

/// Encode a dotted config path as its override variable name.
///
/// `intervals.youtubePolling` -> `YT_SYNCH__INTERVALS__YOUTUBE_POLLING`.
pub fn env_var_name(dotted_path: &str) -> String {
    let encoded: Vec<String> = dotted_path.split('.').map(screaming_snake).collect();
    format!("{}{}", ENV_PREFIX, encoded.join("__"))
}

/// Decode an override variable name back to its dotted config path.
///
/// Inverse of [`env_var_name`] for every recognized path.
pub fn dotted_path(env_name: &str) -> Option<String> {
    let rest = env_name.strip_prefix(ENV_PREFIX)?;
    if rest.is_empty() {
        return None;
    }
    let segments: Vec<String> = rest.split("__").map(camel_case).collect();
    if segments.iter().any(String::is_empty) {
        return None;
    }
    Some(segments.join("."))
}

fn screaming_snake(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len() + 4);
    for ch in segment.chars() {
        if ch.is_ascii_uppercase() && !out.is_empty() {
            out.push('_');
        }
        out.push(ch.to_ascii_uppercase());
    }
    out
}

fn camel_case(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for (i, word) in segment.split('_').enumerate() {
        let word = word.to_ascii_lowercase();
        if i == 0 {
            out.push_str(&word);
        } else {
            let mut chars = word.chars();
            if let Some(first) = chars.next() {
                out.push(first.to_ascii_uppercase());
                out.push_str(chars.as_str());
            }
        }
    }
    out
}

/// Overlay matching environment variables onto the parsed document.
fn apply_env_overrides(
    document: &mut serde_yaml::Value,
    vars: impl Iterator<Item = (String, String)>,
) -> SyncResult<()> {
    for (name, value) in vars {
        let Some(path) = dotted_path(&name) else { continue };
        let segments: Vec<&str> = path.split('.').collect();

        if matches!(value.as_str(), "off" | "null" | "undefined") {
            unset_path(document, &segments);
            continue;
        }

        let parsed = parse_override_value(&value);
        set_path(document, &segments, parsed)?;
    }
    Ok(())
}

/// Arrays and objects arrive as JSON strings; everything else is a YAML scalar.
fn parse_override_value(raw: &str) -> serde_yaml::Value {
    let trimmed = raw.trim_start();
    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        if let Ok(json) = serde_json::from_str::<serde_json::Value>(raw) {
            if let Ok(yaml) = serde_yaml::to_value(json) {
                return yaml;
            }
        }
    }
    serde_yaml::from_str(raw).unwrap_or_else(|_| serde_yaml::Value::String(raw.to_string()))
}

fn set_path(
    document: &mut serde_yaml::Value,
    segments: &[&str],
    value: serde_yaml::Value,
) -> SyncResult<()> {
    let Some((head, rest)) = segments.split_first() else {
        return Ok(());
    };

    if !document.is_mapping() {
        *document = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());
    }
    let mapping = document.as_mapping_mut().expect("forced to mapping above");
    let key = serde_yaml::Value::String((*head).to_string());

    if rest.is_empty() {
        mapping.insert(key, value);
        return Ok(());
    }

    let child = mapping
        .entry(key)
        .or_insert_with(|| serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
    set_path(child, rest, value)
}

fn unset_path(document: &mut serde_yaml::Value, segments: &[&str]) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };
    let Some(mapping) = document.as_mapping_mut() else {
        return;
    };
    let key = serde_yaml::Value::String((*head).to_string());

    if rest.is_empty() {
        mapping.remove(&key);
        return;
    }
    if let Some(child) = mapping.get_mut(&key) {
        unset_path(child, rest);
    }
}
