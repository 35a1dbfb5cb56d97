//! Mail selectors: regex rules that gate and extract values from messages.
//!
//! A `SelectorPrototype` is compiled once per configuration load and is
//! immutable, so one set is shared by every per-message task. Evaluating a
//! prototype is a pure function of the prototype and the message.
//!
//! Scope policy: a message is in scope only when *every* configured
//! selector matches it. The matched values are the placeholders available
//! to the callback templates.

use std::collections::{HashMap, HashSet};
use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, SelectorError};
use crate::mail::MailMessage;

/// Which part of a message a selector looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SelectorKind {
    #[serde(rename = "subjectRegex")]
    Subject,
    #[serde(rename = "bodyRegex")]
    Body,
    #[serde(rename = "senderRegex")]
    Sender,
    #[serde(rename = "recipientRegex")]
    Recipient,
    #[serde(rename = "attachmentNameRegex")]
    AttachmentName,
}

impl SelectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subject => "subjectRegex",
            Self::Body => "bodyRegex",
            Self::Sender => "senderRegex",
            Self::Recipient => "recipientRegex",
            Self::AttachmentName => "attachmentNameRegex",
        }
    }
}

impl fmt::Display for SelectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `mailSelectors` entry as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectorConfig {
    /// Placeholder name; unique within a configuration.
    pub name: String,
    #[serde(rename = "type")]
    pub kind: SelectorKind,
    /// Regex source.
    pub pattern: String,
    /// 0 selects the whole match.
    #[serde(default)]
    pub capture_group: usize,
}

/// Compiled, immutable selector.
#[derive(Debug, Clone)]
pub struct SelectorPrototype {
    name: String,
    kind: SelectorKind,
    regex: Regex,
    capture_group: usize,
}

impl SelectorPrototype {
    /// Compile a selector, rejecting bad patterns and capture groups.
    pub fn new(config: &SelectorConfig) -> Result<Self, ConfigError> {
        let regex = Regex::new(&config.pattern).map_err(|source| ConfigError::InvalidPattern {
            selector: config.name.clone(),
            source,
        })?;

        // captures_len() counts the implicit whole-match group.
        let available = regex.captures_len() - 1;
        if config.capture_group > available {
            return Err(ConfigError::CaptureGroupOutOfRange {
                selector: config.name.clone(),
                group: config.capture_group,
                available,
            });
        }

        Ok(Self {
            name: config.name.clone(),
            kind: config.kind,
            regex,
            capture_group: config.capture_group,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Evaluate against one message. `None` means the selector did not apply.
    ///
    /// Attachment-name selectors return the base64-encoded content of the
    /// first attachment whose name matches, not the name itself.
    pub fn evaluate(&self, message: &MailMessage) -> Option<String> {
        match self.kind {
            SelectorKind::Subject => self.select_from([message.subject.as_str()]),
            SelectorKind::Body => self.select_from([message.body.as_str()]),
            SelectorKind::Sender => self.select_from([message.sender.as_str()]),
            SelectorKind::Recipient => {
                self.select_from(message.recipients.iter().map(String::as_str))
            }
            SelectorKind::AttachmentName => message
                .attachments
                .iter()
                .find(|a| self.regex.is_match(&a.name))
                .map(|a| STANDARD.encode(&a.content)),
        }
    }

    /// First value whose match yields the configured capture group.
    fn select_from<'a>(&self, values: impl IntoIterator<Item = &'a str>) -> Option<String> {
        values
            .into_iter()
            .filter(|v| !v.is_empty())
            .find_map(|v| {
                let caps = self.regex.captures(v)?;
                caps.get(self.capture_group).map(|m| m.as_str().to_string())
            })
    }
}

/// Every configured selector, in configuration order.
#[derive(Debug, Clone, Default)]
pub struct SelectorSet {
    prototypes: Vec<SelectorPrototype>,
}

impl SelectorSet {
    /// Compile all selectors. Names must be unique.
    pub fn new(configs: &[SelectorConfig]) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        let mut prototypes = Vec::with_capacity(configs.len());
        for config in configs {
            if !seen.insert(config.name.as_str()) {
                return Err(ConfigError::InvalidValue {
                    key: "mailSelectors.name".into(),
                    message: format!("duplicate selector name '{}'", config.name),
                });
            }
            prototypes.push(SelectorPrototype::new(config)?);
        }
        Ok(Self { prototypes })
    }

    pub fn len(&self) -> usize {
        self.prototypes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prototypes.is_empty()
    }

    /// Run every selector; fail on the first one that does not apply.
    ///
    /// No partial map is ever returned.
    pub fn evaluate_all(
        &self,
        message: &MailMessage,
    ) -> Result<HashMap<String, String>, SelectorError> {
        let mut values = HashMap::with_capacity(self.prototypes.len());
        for proto in &self.prototypes {
            let Some(value) = proto.evaluate(message) else {
                return Err(SelectorError::NotMatched {
                    selector: proto.name.clone(),
                });
            };
            values.insert(proto.name.clone(), value);
        }
        Ok(values)
    }

    /// Keep the in-scope messages, each paired with its extracted values.
    ///
    /// An empty selector set selects nothing.
    pub fn select(&self, messages: Vec<MailMessage>) -> Vec<(MailMessage, HashMap<String, String>)> {
        if self.is_empty() {
            debug!("No selectors configured, nothing is in scope");
            return Vec::new();
        }

        messages
            .into_iter()
            .filter_map(|message| match self.evaluate_all(&message) {
                Ok(values) => Some((message, values)),
                Err(e) => {
                    debug!(id = %message.id, reason = %e, "Message out of scope");
                    None
                }
            })
            .collect()
    }
}
