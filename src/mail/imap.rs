//! IMAP mail client: raw IMAP over TLS, parsed with mail_parser.
//!
//! Every operation opens its own short-lived session on a blocking thread,
//! so concurrent calls from per-message tasks never share a connection.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mail_parser::{MessageParser, MimeHeaders};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, warn};

use crate::error::{ConfigError, MailError};
use crate::mail::limit::DEFAULT_MAX_SESSIONS;
use crate::mail::{Attachment, MailClient, MailMessage};

const READ_TIMEOUT: Duration = Duration::from_secs(30);

// ── Configuration ───────────────────────────────────────────────────

/// IMAP connection settings, built from environment variables.
#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub mailbox: String,
    /// Upper bound on concurrent sessions.
    pub max_sessions: usize,
}

impl ImapConfig {
    /// Build config from `MAIL_WEBHOOK_IMAP_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let required = |key: &str| {
            std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
        };

        let host = required("MAIL_WEBHOOK_IMAP_HOST")?;
        let username = required("MAIL_WEBHOOK_IMAP_USERNAME")?;
        let password = SecretString::from(required("MAIL_WEBHOOK_IMAP_PASSWORD")?);

        let port: u16 = std::env::var("MAIL_WEBHOOK_IMAP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(993);

        let mailbox =
            std::env::var("MAIL_WEBHOOK_IMAP_MAILBOX").unwrap_or_else(|_| "INBOX".to_string());

        let max_sessions = std::env::var("MAIL_WEBHOOK_IMAP_MAX_SESSIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n: &usize| *n > 0)
            .unwrap_or(DEFAULT_MAX_SESSIONS);

        Ok(Self {
            host,
            port,
            username,
            password,
            mailbox,
            max_sessions,
        })
    }
}

// ── Client ──────────────────────────────────────────────────────────

/// `MailClient` backed by an IMAP server.
pub struct ImapMailClient {
    config: ImapConfig,
    tls: Arc<rustls::ClientConfig>,
}

impl ImapMailClient {
    pub fn new(config: ImapConfig) -> Self {
        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        Self { config, tls }
    }

    /// Run `op` inside a fresh logged-in session on a blocking thread.
    async fn with_session<T, F>(&self, op: F) -> Result<T, MailError>
    where
        T: Send + 'static,
        F: FnOnce(&mut ImapSession) -> Result<T, MailError> + Send + 'static,
    {
        let config = self.config.clone();
        let tls = Arc::clone(&self.tls);
        tokio::task::spawn_blocking(move || {
            let mut session = ImapSession::connect(&config, tls)?;
            let result = op(&mut session);
            session.logout();
            result
        })
        .await
        .map_err(|e| MailError::Task(e.to_string()))?
    }
}

#[async_trait]
impl MailClient for ImapMailClient {
    async fn list_unread(&self) -> Result<Vec<MailMessage>, MailError> {
        self.with_session(|session| {
            let uids = session.search_unseen()?;
            debug!(count = uids.len(), "Found unseen messages");

            let mut messages = Vec::with_capacity(uids.len());
            for uid in uids {
                let raw = session.fetch_raw(&uid)?;
                match parse_message(&uid, &raw) {
                    Some(message) => messages.push(message),
                    None => warn!(uid = %uid, "Skipping message that could not be parsed"),
                }
            }
            Ok(messages)
        })
        .await
    }

    async fn mark_read(&self, message: &MailMessage) -> Result<(), MailError> {
        let uid = message.id.clone();
        self.with_session(move |session| {
            session.command(&format!("UID STORE {uid} +FLAGS (\\Seen)"))?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, message: &MailMessage) -> Result<(), MailError> {
        let uid = message.id.clone();
        self.with_session(move |session| {
            session.command(&format!("UID STORE {uid} +FLAGS (\\Deleted)"))?;
            // Plain EXPUNGE also removes messages other clients flagged.
            if session.uidplus {
                session.command(&format!("UID EXPUNGE {uid}"))?;
            } else {
                session.command("EXPUNGE")?;
            }
            Ok(())
        })
        .await
    }
}

// ── Session ─────────────────────────────────────────────────────────

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// Untagged lines and literals returned by one tagged command.
#[derive(Debug, Default)]
struct ImapResponse {
    lines: Vec<String>,
    literals: Vec<Vec<u8>>,
}

/// A logged-in IMAP session with the configured mailbox selected.
struct ImapSession {
    stream: BufReader<TlsStream>,
    tag_counter: u32,
    /// Server supports `UID EXPUNGE` (RFC 4315).
    uidplus: bool,
}

impl ImapSession {
    fn connect(config: &ImapConfig, tls: Arc<rustls::ClientConfig>) -> Result<Self, MailError> {
        let tcp = TcpStream::connect((config.host.as_str(), config.port)).map_err(|e| {
            MailError::Connection {
                host: config.host.clone(),
                reason: e.to_string(),
            }
        })?;
        tcp.set_read_timeout(Some(READ_TIMEOUT))?;

        let server_name = rustls::pki_types::ServerName::try_from(config.host.clone())
            .map_err(|e| MailError::Tls(e.to_string()))?;
        let conn = rustls::ClientConnection::new(tls, server_name)
            .map_err(|e| MailError::Tls(e.to_string()))?;

        let mut session = Self {
            stream: BufReader::new(rustls::StreamOwned::new(conn, tcp)),
            tag_counter: 0,
            uidplus: false,
        };

        let _greeting = session.read_line()?;
        session.command(&format!(
            "LOGIN {} {}",
            quote(&config.username),
            quote(config.password.expose_secret())
        ))?;
        let capabilities = session.command("CAPABILITY")?;
        session.uidplus = has_capability(&capabilities.lines, "UIDPLUS");
        session.command(&format!("SELECT {}", quote(&config.mailbox)))?;
        Ok(session)
    }

    fn read_line(&mut self) -> Result<String, MailError> {
        let mut buf = Vec::new();
        let n = self.stream.read_until(b'\n', &mut buf)?;
        if n == 0 {
            return Err(MailError::Protocol {
                command: "read".into(),
                response: "connection closed".into(),
            });
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Send a tagged command and collect its response, including literals.
    fn command(&mut self, cmd: &str) -> Result<ImapResponse, MailError> {
        self.tag_counter += 1;
        let tag = format!("A{}", self.tag_counter);
        let stream = self.stream.get_mut();
        stream.write_all(format!("{tag} {cmd}\r\n").as_bytes())?;
        stream.flush()?;

        let mut response = ImapResponse::default();
        loop {
            let line = self.read_line()?;
            if let Some(status) = line.strip_prefix(&format!("{tag} ")) {
                if status.starts_with("OK") {
                    return Ok(response);
                }
                // Never echo credentials back into logs.
                let command = cmd.split_whitespace().next().unwrap_or(cmd).to_string();
                return Err(MailError::Protocol {
                    command,
                    response: status.trim().to_string(),
                });
            }
            if let Some(len) = literal_length(&line) {
                let mut literal = vec![0u8; len];
                self.stream.read_exact(&mut literal)?;
                response.literals.push(literal);
            }
            response.lines.push(line);
        }
    }

    fn search_unseen(&mut self) -> Result<Vec<String>, MailError> {
        let response = self.command("UID SEARCH UNSEEN")?;
        Ok(parse_search(&response.lines))
    }

    fn fetch_raw(&mut self, uid: &str) -> Result<Vec<u8>, MailError> {
        let response = self.command(&format!("UID FETCH {uid} BODY.PEEK[]"))?;
        response
            .literals
            .into_iter()
            .next()
            .ok_or_else(|| MailError::Parse { id: uid.to_string() })
    }

    fn logout(&mut self) {
        if let Err(e) = self.command("LOGOUT") {
            debug!(error = %e, "IMAP logout failed");
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Quote a string as an IMAP quoted string.
fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Length of the literal announced at the end of `line` (`... {123}\r\n`).
fn literal_length(line: &str) -> Option<usize> {
    let trimmed = line.trim_end();
    let open = trimmed.rfind('{')?;
    trimmed
        .strip_suffix('}')?
        .get(open + 1..)?
        .parse()
        .ok()
}

/// Whether a `* CAPABILITY` line advertises `name`.
fn has_capability(lines: &[String], name: &str) -> bool {
    lines
        .iter()
        .filter_map(|line| line.strip_prefix("* CAPABILITY"))
        .flat_map(str::split_whitespace)
        .any(|cap| cap.eq_ignore_ascii_case(name))
}

/// Collect the UIDs from `* SEARCH` lines.
fn parse_search(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .filter_map(|line| line.strip_prefix("* SEARCH"))
        .flat_map(|rest| rest.split_whitespace().map(str::to_string))
        .collect()
}

/// Parse a raw RFC 822 message into a `MailMessage`.
pub fn parse_message(id: &str, raw: &[u8]) -> Option<MailMessage> {
    let parsed = MessageParser::default().parse(raw)?;

    let sender = parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(|s| s.to_string())
        .unwrap_or_default();

    let attachments = parsed
        .attachments()
        .map(|part| Attachment {
            name: MimeHeaders::attachment_name(part)
                .unwrap_or_default()
                .to_string(),
            content: part.contents().to_vec(),
        })
        .collect();

    Some(MailMessage {
        id: id.to_string(),
        sender,
        recipients: extract_recipients(&parsed),
        subject: parsed.subject().unwrap_or_default().to_string(),
        body: extract_text(&parsed),
        attachments,
    })
}

/// Delivered-To, then To, then Cc addresses, de-duplicated in order.
fn extract_recipients(parsed: &mail_parser::Message) -> Vec<String> {
    let delivered_to = parsed
        .headers()
        .iter()
        .filter(|h| h.name().eq_ignore_ascii_case("Delivered-To"))
        .filter_map(|h| h.value().as_text())
        .map(|v| v.trim().trim_start_matches('<').trim_end_matches('>').to_string());

    let mut recipients: Vec<String> = Vec::new();
    for addr in delivered_to
        .chain(extract_addresses(parsed.to()))
        .chain(extract_addresses(parsed.cc()))
    {
        if !addr.is_empty() && !recipients.contains(&addr) {
            recipients.push(addr);
        }
    }
    recipients
}

/// Extract email addresses from an optional mail_parser Address field.
fn extract_addresses(addr: Option<&mail_parser::Address>) -> Vec<String> {
    let Some(addr) = addr else {
        return Vec::new();
    };
    match addr {
        mail_parser::Address::List(addrs) => addrs
            .iter()
            .filter_map(|a| a.address.as_ref().map(|s| s.to_string()))
            .collect(),
        mail_parser::Address::Group(groups) => groups
            .iter()
            .flat_map(|g| {
                g.addresses
                    .iter()
                    .filter_map(|a| a.address.as_ref().map(|s| s.to_string()))
            })
            .collect(),
    }
}

/// Plain-text body, falling back to tag-stripped HTML.
fn extract_text(parsed: &mail_parser::Message) -> String {
    if let Some(text) = parsed.body_text(0) {
        return text.to_string();
    }
    if let Some(html) = parsed.body_html(0) {
        return strip_html(html.as_ref());
    }
    String::new()
}

/// Strip HTML tags from content (basic).
fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: &str = "Delivered-To: inbox@example.com\r\n\
From: Billing <billing@vendor.com>\r\n\
To: team@example.com, inbox@example.com\r\n\
Cc: audit@example.com\r\n\
Subject: Invoice #123\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"XYZ\"\r\n\
\r\n\
--XYZ\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Total: 42.00\r\n\
--XYZ\r\n\
Content-Type: application/pdf\r\n\
Content-Disposition: attachment; filename=\"invoice.pdf\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
JVBERi0=\r\n\
--XYZ--\r\n";

    #[test]
    fn parses_headers_body_and_attachments() {
        let msg = parse_message("17", RAW.as_bytes()).unwrap();
        assert_eq!(msg.id, "17");
        assert_eq!(msg.sender, "billing@vendor.com");
        assert_eq!(msg.subject, "Invoice #123");
        assert!(msg.body.contains("Total: 42.00"));
        assert_eq!(msg.attachments.len(), 1);
        assert_eq!(msg.attachments[0].name, "invoice.pdf");
        assert_eq!(msg.attachments[0].content, b"%PDF-");
    }

    #[test]
    fn recipients_are_collected_and_deduplicated() {
        let msg = parse_message("1", RAW.as_bytes()).unwrap();
        assert_eq!(msg.recipients.len(), 3);
        for addr in ["inbox@example.com", "team@example.com", "audit@example.com"] {
            assert!(msg.recipients.iter().any(|r| r == addr), "missing {addr}");
        }
        assert_eq!(msg.recipients.last().map(String::as_str), Some("audit@example.com"));
    }

    #[test]
    fn literal_length_detection() {
        assert_eq!(literal_length("* 1 FETCH (UID 5 BODY[] {2345}\r\n"), Some(2345));
        assert_eq!(literal_length("* 1 FETCH (FLAGS (\\Seen))\r\n"), None);
        assert_eq!(literal_length("{abc}\r\n"), None);
    }

    #[test]
    fn search_lines_yield_uids() {
        let lines = vec!["* SEARCH 4 7 9\r\n".to_string(), "* OK done\r\n".to_string()];
        assert_eq!(parse_search(&lines), vec!["4", "7", "9"]);
        assert!(parse_search(&["* SEARCH\r\n".to_string()]).is_empty());
    }

    #[test]
    fn capability_detection() {
        let lines = vec![
            "* CAPABILITY IMAP4rev1 UIDPLUS MOVE IDLE\r\n".to_string(),
            "* OK done\r\n".to_string(),
        ];
        assert!(has_capability(&lines, "UIDPLUS"));
        assert!(has_capability(&lines, "idle"));
        assert!(!has_capability(&lines, "CONDSTORE"));
        assert!(!has_capability(&["* OK UIDPLUS\r\n".to_string()], "UIDPLUS"));
        assert!(!has_capability(&["* CAPABILITY IMAP4rev1\r\n".to_string()], "UIDPLUS"));
    }

    #[test]
    fn quoting_escapes_specials() {
        assert_eq!(quote("pa\"ss\\"), "\"pa\\\"ss\\\\\"");
        assert_eq!(quote("INBOX"), "\"INBOX\"");
    }

    #[test]
    fn strip_html_basic() {
        assert_eq!(strip_html("<div><b>Bold</b> and <i>italic</i></div>"), "Bold and italic");
    }
}
