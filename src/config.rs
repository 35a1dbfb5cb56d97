//! Configuration types.
//!
//! The callback configuration is read from a YAML file; process-level
//! settings (config path, poll interval, IMAP credentials) come from the
//! environment.

pub mod size;

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Deserializer};

use crate::callback::attachments::AttachmentStrategy;
use crate::error::ConfigError;
use crate::mail::ProcessedAction;
use crate::selector::{SelectorConfig, SelectorSet};

pub use size::parse_size;

/// HTTP methods a callback may use.
pub const SUPPORTED_METHODS: [&str; 8] = [
    "GET", "HEAD", "POST", "PUT", "PATCH", "DELETE", "OPTIONS", "TRACE",
];

/// Log levels accepted in `logLevel`.
pub const LOG_LEVELS: [&str; 4] = ["debug", "info", "warn", "error"];

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(24);
const DEFAULT_FIELD_NAME: &str = "attachment";

static NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^[0-9A-Za-z]+$").expect("static name regex"));
static HEADER_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^[0-9A-Za-z-]+$").expect("static header name regex"));

// ── File configuration ──────────────────────────────────────────────

/// Top-level configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub mail_selectors: Vec<SelectorConfig>,
    pub callback: CallbackConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
}

/// A key with a `${placeholder}` value template.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// The outbound HTTP callback template.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackConfig {
    pub url: String,
    pub method: String,
    /// Per-request timeout, e.g. `24s` or `1m 30s`.
    #[serde(default = "default_timeout", deserialize_with = "deserialize_duration")]
    pub timeout: Duration,
    /// Extra attempts after the first failed one.
    #[serde(default)]
    pub retries: u32,
    /// Status codes counted as success. Empty means 200..=399.
    #[serde(default)]
    pub expected_status: Vec<u16>,
    #[serde(default)]
    pub headers: Vec<KeyValue>,
    #[serde(default)]
    pub query_params: Vec<KeyValue>,
    #[serde(default)]
    pub form: Vec<KeyValue>,
    /// Raw body template, used only when no multipart body is built.
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub attachments: AttachmentsConfig,
}

impl CallbackConfig {
    /// Minimal callback with defaults for everything but URL and method.
    pub fn new(url: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: method.into(),
            timeout: DEFAULT_TIMEOUT,
            retries: 0,
            expected_status: Vec::new(),
            headers: Vec::new(),
            query_params: Vec::new(),
            form: Vec::new(),
            body: String::new(),
            attachments: AttachmentsConfig::default(),
        }
    }

    /// Total number of attempts per message.
    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

/// How attachments are forwarded.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentsConfig {
    #[serde(default)]
    pub strategy: AttachmentStrategy,
    /// Multipart field name template.
    #[serde(default = "default_field_name")]
    pub field_name: String,
    /// Size string; empty or `0` means unlimited.
    #[serde(default)]
    pub max_size: String,
    /// Parsed from `max_size` during validation. 0 means unlimited.
    #[serde(skip)]
    pub max_size_bytes: u64,
}

impl Default for AttachmentsConfig {
    fn default() -> Self {
        Self {
            strategy: AttachmentStrategy::default(),
            field_name: DEFAULT_FIELD_NAME.to_string(),
            max_size: String::new(),
            max_size_bytes: 0,
        }
    }
}

/// Post-delivery behaviour.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingConfig {
    #[serde(default, deserialize_with = "deserialize_processed_action")]
    pub processed_action: ProcessedAction,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn default_field_name() -> String {
    DEFAULT_FIELD_NAME.to_string()
}

fn deserialize_duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
}

fn deserialize_processed_action<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<ProcessedAction, D::Error> {
    let raw = String::deserialize(deserializer)?;
    raw.parse().map_err(serde::de::Error::custom)
}

impl Config {
    /// Read and validate a YAML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate YAML configuration.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Normalise defaults and reject invalid values.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        let level = self.log_level.trim().to_ascii_lowercase();
        let level = if level.is_empty() { default_log_level() } else { level };
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(invalid(
                "logLevel",
                format!("'{}' is not supported (supported: {})", self.log_level, LOG_LEVELS.join(", ")),
            ));
        }
        self.log_level = level;

        for selector in &self.mail_selectors {
            if !NAME.is_match(&selector.name) {
                return Err(invalid(
                    "mailSelectors.name",
                    format!("'{}' must match ^[0-9A-Za-z]+$", selector.name),
                ));
            }
        }
        SelectorSet::new(&self.mail_selectors)?;

        self.callback.validate()
    }

    /// Compile the configured selectors.
    pub fn selector_set(&self) -> Result<SelectorSet, ConfigError> {
        SelectorSet::new(&self.mail_selectors)
    }
}

impl CallbackConfig {
    fn validate(&mut self) -> Result<(), ConfigError> {
        if self.url.trim().is_empty() {
            return Err(invalid("callback.url", "must not be empty"));
        }
        reqwest::Url::parse(&self.url).map_err(|e| invalid("callback.url", e.to_string()))?;

        if !SUPPORTED_METHODS.contains(&self.method.as_str()) {
            return Err(ConfigError::UnsupportedMethod(self.method.clone()));
        }

        if self.timeout.is_zero() {
            return Err(invalid("callback.timeout", "must be greater than zero"));
        }

        validate_keys(&self.headers, &HEADER_NAME, "callback.headers")?;
        validate_keys(&self.query_params, &NAME, "callback.queryParams")?;
        validate_keys(&self.form, &NAME, "callback.form")?;

        if let Some(status) = self.expected_status.iter().find(|s| !(100..=599).contains(*s)) {
            return Err(invalid(
                "callback.expectedStatus",
                format!("{status} is not an HTTP status code"),
            ));
        }

        let attachments = &mut self.attachments;
        if attachments.field_name.trim().is_empty() {
            attachments.field_name = default_field_name();
        }
        attachments.max_size_bytes = parse_size(&attachments.max_size)?;

        Ok(())
    }
}

fn validate_keys(list: &[KeyValue], pattern: &Regex, context: &str) -> Result<(), ConfigError> {
    match list.iter().find(|kv| !pattern.is_match(&kv.key)) {
        Some(kv) => Err(invalid(
            context,
            format!("invalid key '{}': must match {}", kv.key, pattern.as_str()),
        )),
        None => Ok(()),
    }
}

fn invalid(key: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}

// ── Process settings ────────────────────────────────────────────────

/// Process-level settings, built from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSettings {
    /// Path of the YAML configuration file.
    pub config_path: PathBuf,
    /// Run repeatedly at this interval; `None` runs once and exits.
    pub poll_interval: Option<Duration>,
}

impl ServiceSettings {
    /// Build settings from `MAIL_WEBHOOK_CONFIG` and
    /// `MAIL_WEBHOOK_POLL_INTERVAL_SECS`.
    pub fn from_env() -> Self {
        let config_path = std::env::var("MAIL_WEBHOOK_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config").join("config.yaml"));

        let poll_interval = std::env::var("MAIL_WEBHOOK_POLL_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        Self {
            config_path,
            poll_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    use crate::selector::SelectorKind;

    const FULL: &str = r##"
logLevel: DEBUG
mailSelectors:
  - name: invoiceId
    type: subjectRegex
    pattern: "#(\\d+)"
    captureGroup: 1
  - name: total
    type: bodyRegex
    pattern: "Total: ([\\d.]+)"
    captureGroup: 1
callback:
  url: https://example.com/hook
  method: POST
  timeout: 5s
  retries: 2
  expectedStatus: [200, 202]
  headers:
    - key: Content-Type
      value: application/json
  queryParams:
    - key: id
      value: "${invoiceId}"
  body: '{"id":"${invoiceId}"}'
  attachments:
    strategy: perAttachment
    fieldName: "file${index}"
    maxSize: 10Mi
processing:
  processedAction: delete
"##;

    fn minimal(extra: &str) -> String {
        format!("callback:\n  url: https://example.com\n  method: POST\n{extra}")
    }

    #[test]
    fn parses_full_config() {
        let cfg = Config::from_yaml(FULL).unwrap();
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.mail_selectors.len(), 2);
        assert_eq!(cfg.mail_selectors[0].kind, SelectorKind::Subject);
        assert_eq!(cfg.mail_selectors[1].capture_group, 1);
        assert_eq!(cfg.callback.timeout, Duration::from_secs(5));
        assert_eq!(cfg.callback.retries, 2);
        assert_eq!(cfg.callback.max_attempts(), 3);
        assert_eq!(cfg.callback.expected_status, vec![200, 202]);
        assert_eq!(cfg.callback.headers[0], KeyValue::new("Content-Type", "application/json"));
        assert_eq!(cfg.callback.attachments.strategy, AttachmentStrategy::PerAttachment);
        assert_eq!(cfg.callback.attachments.field_name, "file${index}");
        assert_eq!(cfg.callback.attachments.max_size_bytes, 10 * 1024 * 1024);
        assert_eq!(cfg.processing.processed_action, ProcessedAction::Delete);
        assert_eq!(cfg.selector_set().unwrap().len(), 2);
    }

    #[test]
    fn applies_defaults() {
        let cfg = Config::from_yaml(&minimal("")).unwrap();
        assert_eq!(cfg.log_level, "info");
        assert!(cfg.mail_selectors.is_empty());
        assert_eq!(cfg.callback.timeout, Duration::from_secs(24));
        assert_eq!(cfg.callback.retries, 0);
        assert_eq!(cfg.callback.attachments.strategy, AttachmentStrategy::Bundle);
        assert_eq!(cfg.callback.attachments.field_name, "attachment");
        assert_eq!(cfg.callback.attachments.max_size_bytes, 0);
        assert_eq!(cfg.processing.processed_action, ProcessedAction::MarkRead);
    }

    #[test]
    fn accepts_legacy_processed_action() {
        let cfg = Config::from_yaml(&minimal("processing:\n  processedAction: mark_read\n")).unwrap();
        assert_eq!(cfg.processing.processed_action, ProcessedAction::MarkRead);
        assert!(Config::from_yaml(&minimal("processing:\n  processedAction: archive\n")).is_err());
    }

    #[test]
    fn rejects_unsupported_method() {
        let yaml = "callback:\n  url: https://example.com\n  method: FETCH\n";
        assert!(matches!(
            Config::from_yaml(yaml),
            Err(ConfigError::UnsupportedMethod(m)) if m == "FETCH"
        ));
    }

    #[test]
    fn rejects_empty_or_invalid_url() {
        let empty = "callback:\n  url: ''\n  method: GET\n";
        assert!(matches!(Config::from_yaml(empty), Err(ConfigError::InvalidValue { .. })));
        let relative = "callback:\n  url: /hook\n  method: GET\n";
        assert!(Config::from_yaml(relative).is_err());
    }

    #[test]
    fn rejects_negative_retries() {
        let yaml = minimal("").replace("method: POST\n", "method: POST\n  retries: -1\n");
        assert!(matches!(Config::from_yaml(&yaml), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn rejects_bad_timeout() {
        let yaml = minimal("").replace("method: POST\n", "method: POST\n  timeout: soon\n");
        assert!(Config::from_yaml(&yaml).is_err());
    }

    #[test]
    fn rejects_zero_timeout() {
        for value in ["0s", "0ms"] {
            let yaml = minimal("").replace("method: POST\n", &format!("method: POST\n  timeout: {value}\n"));
            let err = Config::from_yaml(&yaml).unwrap_err();
            assert!(
                matches!(&err, ConfigError::InvalidValue { key, .. } if key == "callback.timeout"),
                "unexpected error for {value}: {err}"
            );
        }
        let yaml = minimal("").replace("method: POST\n", "method: POST\n  timeout: 1ms\n");
        assert_eq!(Config::from_yaml(&yaml).unwrap().callback.timeout, Duration::from_millis(1));
    }

    #[test]
    fn rejects_unknown_selector_type() {
        let yaml = minimal("mailSelectors:\n  - name: a\n    type: headerRegex\n    pattern: x\n");
        assert!(matches!(Config::from_yaml(&yaml), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn rejects_invalid_selector_name() {
        let yaml = minimal("mailSelectors:\n  - name: my-id\n    type: subjectRegex\n    pattern: x\n");
        assert!(matches!(Config::from_yaml(&yaml), Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn rejects_uncompilable_pattern_and_bad_group() {
        let bad_pattern = minimal("mailSelectors:\n  - name: a\n    type: subjectRegex\n    pattern: '('\n");
        assert!(matches!(
            Config::from_yaml(&bad_pattern),
            Err(ConfigError::InvalidPattern { .. })
        ));
        let bad_group = minimal(
            "mailSelectors:\n  - name: a\n    type: subjectRegex\n    pattern: 'a(b)'\n    captureGroup: 2\n",
        );
        assert!(matches!(
            Config::from_yaml(&bad_group),
            Err(ConfigError::CaptureGroupOutOfRange { .. })
        ));
    }

    #[test]
    fn rejects_bad_keys() {
        let header = minimal("").replace(
            "method: POST\n",
            "method: POST\n  headers:\n    - key: 'X Bad'\n      value: v\n",
        );
        assert!(Config::from_yaml(&header).is_err());
        let hyphen_query = minimal("").replace(
            "method: POST\n",
            "method: POST\n  queryParams:\n    - key: my-param\n      value: v\n",
        );
        assert!(Config::from_yaml(&hyphen_query).is_err());
        let hyphen_header = minimal("").replace(
            "method: POST\n",
            "method: POST\n  headers:\n    - key: X-Api-Key\n      value: v\n",
        );
        assert!(Config::from_yaml(&hyphen_header).is_ok());
    }

    #[test]
    fn rejects_malformed_size() {
        let yaml = minimal("").replace(
            "method: POST\n",
            "method: POST\n  attachments:\n    maxSize: lots\n",
        );
        assert!(matches!(Config::from_yaml(&yaml), Err(ConfigError::InvalidSize { .. })));
    }

    #[test]
    fn rejects_invalid_expected_status() {
        let yaml = minimal("").replace("method: POST\n", "method: POST\n  expectedStatus: [42]\n");
        assert!(Config::from_yaml(&yaml).is_err());
    }

    #[test]
    fn rejects_unknown_log_level() {
        let yaml = format!("logLevel: chatty\n{}", minimal(""));
        assert!(Config::from_yaml(&yaml).is_err());
    }

    #[test]
    fn empty_field_name_falls_back_to_default() {
        let yaml = minimal("").replace(
            "method: POST\n",
            "method: POST\n  attachments:\n    fieldName: ''\n",
        );
        let cfg = Config::from_yaml(&yaml).unwrap();
        assert_eq!(cfg.callback.attachments.field_name, "attachment");
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FULL.as_bytes()).unwrap();
        let cfg = Config::load(file.path()).unwrap();
        assert_eq!(cfg.callback.url, "https://example.com/hook");
    }

    #[test]
    fn missing_file_is_io_error() {
        assert!(matches!(
            Config::load("/nonexistent/mail-webhook.yaml"),
            Err(ConfigError::Io(_))
        ));
    }
}
