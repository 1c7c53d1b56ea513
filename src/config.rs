//! Configuration — JSON file, `MAILMIND_*` env overrides, typed defaults.
//!
//! Precedence: env var > config file > default. Everything is validated
//! once at startup; the rest of the crate takes a `&Config` and never
//! touches the environment.

use std::path::Path;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ── Sections ────────────────────────────────────────────────────────

/// IMAP/SMTP account settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    #[serde(serialize_with = "redact_secret")]
    pub password: SecretString,
    /// Address replies are sent from. Defaults to `username`.
    pub from_address: String,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            imap_host: String::new(),
            imap_port: 993,
            smtp_host: String::new(),
            smtp_port: 587,
            username: String::new(),
            password: SecretString::from(""),
            from_address: String::new(),
        }
    }
}

/// Inference endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub api_url: String,
    #[serde(serialize_with = "redact_secret")]
    pub api_key: SecretString,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    /// Per-request timeout, seconds.
    pub timeout_secs: u64,
    /// Additional attempts after the first failed call.
    pub max_retries: u32,
    /// Initial backoff delay, milliseconds. Doubles per attempt.
    pub retry_initial_delay_ms: u64,
    /// Minimum spacing between inference calls, milliseconds.
    pub min_call_interval_ms: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            api_url: "https://openrouter.ai/api/v1/chat/completions".to_string(),
            api_key: SecretString::from(""),
            model: "anthropic/claude-3-haiku".to_string(),
            max_tokens: 500,
            temperature: 0.7,
            timeout_secs: 30,
            max_retries: 3,
            retry_initial_delay_ms: 1_000,
            min_call_interval_ms: 1_000,
        }
    }
}

/// Admission filter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Allow-rule file path. Missing or unset → empty allow set.
    pub allow_rules_path: Option<String>,
    /// Deny-rule file path. Unset → built-in default deny rules.
    pub deny_rules_path: Option<String>,
    /// Days replies are generated on, 0 = Monday .. 6 = Sunday.
    pub business_days: Vec<u8>,
    /// First hour of the reply window (inclusive).
    pub business_start_hour: u8,
    /// Last hour of the reply window (exclusive).
    pub business_end_hour: u8,
    /// Messages older than this are left alone.
    pub max_age_hours: u32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            allow_rules_path: None,
            deny_rules_path: None,
            business_days: vec![0, 1, 2, 3, 4],
            business_start_hour: 9,
            business_end_hour: 17,
            max_age_hours: 24,
        }
    }
}

/// Pipeline pacing and identity settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Seconds between pipeline passes.
    pub check_interval_secs: u64,
    /// Seconds to wait between a sent reply and the next message.
    pub response_delay_secs: u64,
    /// Signature appended to outbound replies (deduplicated).
    pub signature: String,
    /// Experiment variant tag recorded with each delivery.
    pub variant: String,
    /// Reply-template document path. Unset → no templates offered.
    pub templates_path: Option<String>,
    /// libSQL database file path.
    pub db_path: String,
    /// Log file path.
    pub log_path: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 300,
            response_delay_secs: 300,
            signature: "\n\n--\nSent by MailMind".to_string(),
            variant: "default".to_string(),
            templates_path: None,
            db_path: "mailmind.db".to_string(),
            log_path: "mailmind.log".to_string(),
        }
    }
}

// ── Top level ───────────────────────────────────────────────────────

/// Full application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mail: MailConfig,
    pub inference: InferenceConfig,
    pub filter: FilterConfig,
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Load from a JSON file, then apply `MAILMIND_*` env overrides and
    /// validate. A missing file is an error; callers that want first-run
    /// bootstrap write `sample_json()` first.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let mut config: Config = serde_json::from_str(&raw)
            .map_err(|e| ConfigError::ParseError(format!("{}: {e}", path.display())))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Env overrides for the values that differ per deployment. File
    /// values stay in place for anything not set.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("MAILMIND_IMAP_HOST") {
            self.mail.imap_host = v;
        }
        if let Some(v) = env_parse("MAILMIND_IMAP_PORT") {
            self.mail.imap_port = v;
        }
        if let Ok(v) = std::env::var("MAILMIND_SMTP_HOST") {
            self.mail.smtp_host = v;
        }
        if let Some(v) = env_parse("MAILMIND_SMTP_PORT") {
            self.mail.smtp_port = v;
        }
        if let Ok(v) = std::env::var("MAILMIND_USERNAME") {
            self.mail.username = v;
        }
        if let Ok(v) = std::env::var("MAILMIND_PASSWORD") {
            self.mail.password = SecretString::from(v);
        }
        if let Ok(v) = std::env::var("MAILMIND_FROM_ADDRESS") {
            self.mail.from_address = v;
        }
        if let Ok(v) = std::env::var("MAILMIND_API_KEY") {
            self.inference.api_key = SecretString::from(v);
        }
        if let Ok(v) = std::env::var("MAILMIND_API_URL") {
            self.inference.api_url = v;
        }
        if let Ok(v) = std::env::var("MAILMIND_MODEL") {
            self.inference.model = v;
        }
        if let Some(v) = env_parse("MAILMIND_CHECK_INTERVAL_SECS") {
            self.pipeline.check_interval_secs = v;
        }
        if let Some(v) = env_parse("MAILMIND_RESPONSE_DELAY_SECS") {
            self.pipeline.response_delay_secs = v;
        }
        if let Ok(v) = std::env::var("MAILMIND_DB_PATH") {
            self.pipeline.db_path = v;
        }
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mail.imap_host.is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "mail.imap_host".to_string(),
                hint: "Set it in the config file or MAILMIND_IMAP_HOST".to_string(),
            });
        }
        if self.mail.username.is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "mail.username".to_string(),
                hint: "Set it in the config file or MAILMIND_USERNAME".to_string(),
            });
        }
        if self.inference.api_key.expose_secret().is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "inference.api_key".to_string(),
                hint: "Set it in the config file or MAILMIND_API_KEY".to_string(),
            });
        }
        if self.filter.business_start_hour >= self.filter.business_end_hour {
            return Err(ConfigError::InvalidValue {
                key: "filter.business_start_hour".to_string(),
                message: format!(
                    "start hour {} must be before end hour {}",
                    self.filter.business_start_hour, self.filter.business_end_hour
                ),
            });
        }
        if self.filter.business_end_hour > 24 {
            return Err(ConfigError::InvalidValue {
                key: "filter.business_end_hour".to_string(),
                message: "must be at most 24".to_string(),
            });
        }
        if let Some(day) = self.filter.business_days.iter().find(|d| **d > 6) {
            return Err(ConfigError::InvalidValue {
                key: "filter.business_days".to_string(),
                message: format!("{day} is not a weekday index (0 = Monday .. 6 = Sunday)"),
            });
        }
        if !(0.0..=2.0).contains(&self.inference.temperature) {
            return Err(ConfigError::InvalidValue {
                key: "inference.temperature".to_string(),
                message: "must be between 0.0 and 2.0".to_string(),
            });
        }
        Ok(())
    }

    /// Effective sender address: `from_address` if set, else the account
    /// username.
    pub fn from_address(&self) -> &str {
        if self.mail.from_address.is_empty() {
            &self.mail.username
        } else {
            &self.mail.from_address
        }
    }

    /// Pretty-printed defaults, written when no config file exists so the
    /// operator has something to edit.
    pub fn sample_json() -> String {
        let sample = Config::default();
        // Defaults always serialize.
        serde_json::to_string_pretty(&sample).unwrap_or_default()
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

fn redact_secret<S: serde::Serializer>(
    _secret: &SecretString,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str("")
}
