use chrono::FixedOffset;
use config::{Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use log::warn;

use crate::credentials::QuotaPolicy;
use crate::filter::FilterConfig;
use crate::imap::ImapEndpoint;
use crate::watcher::{WatcherConfig, DEFAULT_CLEARED_KEYWORDS};

/// Config file looked up when no `--config` path is given.
pub const DEFAULT_CONFIG_PATH: &str = "config/alertmail";

/// A configuration value that must never show up in logs.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig { level: "info".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: Secret,
    pub mailbox: String,
    pub subject_filter: String,
    pub cleared_keywords: Vec<String>,
}

impl Default for ImapConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 993,
            user: String::new(),
            pass: Secret::default(),
            mailbox: "INBOX".to_string(),
            subject_filter: String::new(),
            cleared_keywords: DEFAULT_CLEARED_KEYWORDS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherSettings {
    pub poll_interval_secs: u64,
    pub refresh_interval_secs: u64,
    pub reconnect_delay_secs: u64,
    pub operation_timeout_secs: u64,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            refresh_interval_secs: 20 * 60,
            reconnect_delay_secs: 10,
            operation_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    pub api_keys: Vec<Secret>,
    pub daily_quota: u32,
    pub cooldown_secs: u64,
    /// JSON file holding today's usage counters.
    pub state_path: String,
    /// Offset from UTC, in minutes, at which the quota day starts.
    pub utc_offset_minutes: i32,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            api_keys: Vec::new(),
            daily_quota: 1000,
            cooldown_secs: 60,
            state_path: "data/quota_state.json".to_string(),
            utc_offset_minutes: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Base URL of the detection service; unset disables it.
    pub url: Option<String>,
    pub secret: Secret,
    pub timeout_secs: u64,
    pub attempts: u32,
    pub retry_delay_secs: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            url: None,
            secret: Secret::default(),
            timeout_secs: 120,
            attempts: 3,
            retry_delay_secs: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Initial state of the AI switch; the admin API can flip it at runtime.
    pub ai_enabled: bool,
    pub base_url: String,
    /// Chat models tried in order, each with a pooled credential.
    pub models: Vec<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub request_timeout_secs: u64,
    pub detector: DetectorConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            ai_enabled: true,
            base_url: crate::analysis::provider::chat::DEFAULT_CHAT_BASE_URL.to_string(),
            models: vec!["gpt-4o-mini".to_string()],
            max_tokens: 300,
            temperature: 0.2,
            request_timeout_secs: 15,
            detector: DetectorConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub bot_token: Secret,
    pub chat_ids: Vec<String>,
    pub admin_chat_id: Option<String>,
    pub api_base: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: Secret::default(),
            chat_ids: Vec::new(),
            admin_chat_id: None,
            api_base: crate::notify::telegram::DEFAULT_TELEGRAM_API.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub telegram: TelegramConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub log: LogConfig,
    pub imap: ImapConfig,
    pub watcher: WatcherSettings,
    pub credentials: CredentialsConfig,
    pub analysis: AnalysisConfig,
    pub filter: FilterConfig,
    pub notify: NotifyConfig,
    pub admin: AdminConfig,
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to load or parse configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl Settings {
    pub fn new(config_path: Option<&str>) -> Result<Self, SettingsError> {
        let mut config_builder = config::Config::builder()
            .set_default("log.level", "info")?
            .set_default("imap.port", 993)?
            .set_default("imap.mailbox", "INBOX")?;

        // An explicit path must exist; the default one is optional.
        config_builder = match config_path {
            Some(path) => config_builder.add_source(File::with_name(path)),
            None => config_builder.add_source(File::with_name(DEFAULT_CONFIG_PATH).required(false)),
        };

        // e.g. `ALERTMAIL__WATCHER__POLL_INTERVAL_SECS=30`
        config_builder = config_builder.add_source(
            Environment::with_prefix("ALERTMAIL")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .ignore_empty(true),
        );

        // Well-known variables, usually coming from `.env`.
        let env_vars = [
            ("IMAP_HOST", "imap.host"),
            ("IMAP_PORT", "imap.port"),
            ("IMAP_USER", "imap.user"),
            ("IMAP_PASS", "imap.pass"),
            ("AI_API_KEYS", "credentials.api_keys"),
            ("TELEGRAM_BOT_TOKEN", "notify.telegram.bot_token"),
            ("TELEGRAM_CHAT_IDS", "notify.telegram.chat_ids"),
            ("TELEGRAM_ADMIN_CHAT_ID", "notify.telegram.admin_chat_id"),
            ("DETECTOR_URL", "analysis.detector.url"),
            ("DETECTOR_SECRET", "analysis.detector.secret"),
        ];

        for (env_var, config_path) in &env_vars {
            let Ok(value) = env::var(env_var) else {
                continue;
            };
            if value.trim().is_empty() {
                continue;
            }
            if *env_var == "IMAP_PORT" {
                if let Ok(port) = value.trim().parse::<u16>() {
                    config_builder = config_builder.set_override(config_path, port)?;
                } else {
                    warn!("Invalid port value in {}: {}", env_var, value);
                }
            } else if *env_var == "AI_API_KEYS" || *env_var == "TELEGRAM_CHAT_IDS" {
                config_builder = config_builder.set_override(config_path, split_list(&value))?;
            } else {
                config_builder = config_builder.set_override(config_path, value)?;
            }
        }

        let settings: Settings = config_builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        self.filter.validate().map_err(SettingsError::Invalid)?;
        if self.credentials.daily_quota == 0 {
            return Err(SettingsError::Invalid("credentials.daily_quota must be positive".to_string()));
        }
        if self.watcher.poll_interval_secs == 0 || self.watcher.refresh_interval_secs == 0 {
            return Err(SettingsError::Invalid("watcher intervals must be positive".to_string()));
        }
        self.utc_offset()?;
        Ok(())
    }

    fn utc_offset(&self) -> Result<FixedOffset, SettingsError> {
        FixedOffset::east_opt(self.credentials.utc_offset_minutes * 60).ok_or_else(|| {
            SettingsError::Invalid(format!(
                "credentials.utc_offset_minutes out of range: {}",
                self.credentials.utc_offset_minutes
            ))
        })
    }

    pub fn api_keys(&self) -> Vec<String> {
        self.credentials
            .api_keys
            .iter()
            .filter(|key| !key.is_empty())
            .map(|key| key.expose().trim().to_string())
            .collect()
    }

    pub fn quota_policy(&self) -> Result<QuotaPolicy, SettingsError> {
        Ok(QuotaPolicy {
            daily_quota: self.credentials.daily_quota,
            cooldown: Duration::from_secs(self.credentials.cooldown_secs),
            utc_offset: self.utc_offset()?,
        })
    }

    pub fn watcher_config(&self) -> WatcherConfig {
        WatcherConfig {
            subject_filter: self.imap.subject_filter.clone(),
            cleared_keywords: self.imap.cleared_keywords.clone(),
            poll_interval: Duration::from_secs(self.watcher.poll_interval_secs),
            refresh_interval: Duration::from_secs(self.watcher.refresh_interval_secs),
            reconnect_delay: Duration::from_secs(self.watcher.reconnect_delay_secs),
            operation_timeout: Duration::from_secs(self.watcher.operation_timeout_secs),
        }
    }

    pub fn imap_endpoint(&self) -> ImapEndpoint {
        ImapEndpoint {
            host: self.imap.host.clone(),
            port: self.imap.port,
            username: self.imap.user.clone(),
            password: self.imap.pass.expose().to_string(),
            mailbox: self.imap.mailbox.clone(),
        }
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
