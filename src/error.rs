//! Error types for the mail webhook service.

use std::time::Duration;

/// Configuration-related errors. All of them are fatal at load time.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Selector '{selector}' has an invalid pattern: {source}")]
    InvalidPattern {
        selector: String,
        #[source]
        source: regex::Error,
    },

    #[error("Selector '{selector}' captureGroup {group} exceeds the {available} group(s) in its pattern")]
    CaptureGroupOutOfRange {
        selector: String,
        group: usize,
        available: usize,
    },

    #[error("Unsupported HTTP method '{0}'")]
    UnsupportedMethod(String),

    #[error("Invalid size '{value}': {reason}")]
    InvalidSize { value: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Selector evaluation signals.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectorError {
    /// Expected, per-message outcome: the message is out of scope.
    #[error("selector '{selector}' did not apply")]
    NotMatched { selector: String },
}

/// Errors building an outbound request from a template.
#[derive(Debug, thiserror::Error)]
pub enum ComposeError {
    #[error("Invalid callback URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Invalid HTTP method '{0}'")]
    InvalidMethod(String),

    #[error("Invalid header name '{0}'")]
    InvalidHeaderName(String),

    #[error("Invalid value for header '{0}'")]
    InvalidHeaderValue(String),
}

/// Errors delivering an outbound request.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unexpected status {status} from {url}")]
    UnexpectedStatus { status: u16, url: String },

    #[error("Request cancelled")]
    Cancelled,
}

/// Mail provider errors.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Connection to {host} failed: {reason}")]
    Connection { host: String, reason: String },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("IMAP command '{command}' failed: {response}")]
    Protocol { command: String, response: String },

    #[error("Failed to parse message {id}")]
    Parse { id: String },

    #[error("Mail task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
