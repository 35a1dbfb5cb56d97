//! Attachment delivery strategies.
//!
//! A strategy takes the composed base request and decides how many requests
//! go out and which files each one carries. Size filtering and field-name
//! rendering happen here too.

use std::collections::HashMap;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::callback::request::{FilePart, OutboundRequest};
use crate::config::AttachmentsConfig;
use crate::mail::{Attachment, MailMessage};
use crate::template;

/// How a message's attachments are forwarded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttachmentStrategy {
    /// Never forward attachments.
    Ignore,
    /// All eligible attachments in one multipart request.
    #[default]
    #[serde(alias = "multipartBundle")]
    Bundle,
    /// One multipart request per eligible attachment.
    #[serde(alias = "multipartPerAttachment")]
    PerAttachment,
}

impl AttachmentStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ignore => "ignore",
            Self::Bundle => "bundle",
            Self::PerAttachment => "perAttachment",
        }
    }

    /// Expand `base` into the ordered requests to send for `message`.
    ///
    /// Always returns at least one request. When `PerAttachment` has nothing
    /// left after size filtering, the base request goes out alone.
    pub fn build_requests(
        &self,
        base: OutboundRequest,
        message: &MailMessage,
        values: &HashMap<String, String>,
        config: &AttachmentsConfig,
    ) -> Vec<OutboundRequest> {
        match self {
            Self::Ignore => vec![base],
            Self::Bundle => {
                let mut request = base;
                let eligible = filter_by_size(&message.attachments, config.max_size_bytes);
                for (index, attachment) in eligible.into_iter().enumerate() {
                    request.attach_file(file_part(&config.field_name, index, attachment, values));
                }
                vec![request]
            }
            Self::PerAttachment => {
                let eligible = filter_by_size(&message.attachments, config.max_size_bytes);
                if eligible.is_empty() {
                    debug!(message_id = %message.id, "No eligible attachments, sending base request");
                    return vec![base];
                }
                eligible
                    .into_iter()
                    .enumerate()
                    .map(|(index, attachment)| {
                        let mut request = base.clone();
                        request.attach_file(file_part(&config.field_name, index, attachment, values));
                        request
                    })
                    .collect()
            }
        }
    }
}

impl std::fmt::Display for AttachmentStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Drop attachments larger than `max_bytes`, preserving order. 0 means no limit.
pub fn filter_by_size<'a>(
    attachments: impl IntoIterator<Item = &'a Attachment>,
    max_bytes: u64,
) -> Vec<&'a Attachment> {
    attachments
        .into_iter()
        .filter(|attachment| {
            if max_bytes == 0 || attachment.size() <= max_bytes {
                return true;
            }
            warn!(
                attachment = %attachment.name,
                size = attachment.size(),
                max_size = max_bytes,
                "Attachment exceeds max size, skipping"
            );
            false
        })
        .collect()
}

/// Render the multipart field name for the attachment at `index`.
///
/// The template sees every selector value plus `index`, `filename`,
/// `basename`, `extension` and `contentType`; those five override selector
/// values of the same name.
pub fn render_field_name(
    template_str: &str,
    index: usize,
    attachment: &Attachment,
    values: &HashMap<String, String>,
) -> String {
    let file_name = base_name(&attachment.name);
    let (stem, extension) = split_extension(file_name);

    let mut data = values.clone();
    data.insert("index".into(), index.to_string());
    data.insert("filename".into(), file_name.to_string());
    data.insert("basename".into(), stem.to_string());
    data.insert("extension".into(), extension.to_string());
    data.insert("contentType".into(), guess_content_type(file_name).to_string());

    template::expand(template_str, &data)
}

fn file_part(
    field_template: &str,
    index: usize,
    attachment: &Attachment,
    values: &HashMap<String, String>,
) -> FilePart {
    let field = render_field_name(field_template, index, attachment, values);
    let name = base_name(&attachment.name);
    let file_name = if name.is_empty() { field.clone() } else { name.to_string() };

    FilePart {
        content_type: guess_content_type(&file_name).to_string(),
        field,
        file_name,
        data: attachment.content.clone(),
    }
}

/// Last path segment of an attachment name, for either separator.
fn base_name(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name).trim()
}

/// Split `report.final.pdf` into (`report.final`, `.pdf`). Dotfiles have no extension.
fn split_extension(file_name: &str) -> (&str, &str) {
    match file_name.rfind('.') {
        Some(pos) if pos > 0 => (&file_name[..pos], &file_name[pos..]),
        _ => (file_name, ""),
    }
}

/// Content type for a file name, by extension.
pub fn guess_content_type(file_name: &str) -> &'static str {
    let (_, extension) = split_extension(file_name);
    match extension.trim_start_matches('.').to_ascii_lowercase().as_str() {
        "pdf" => "application/pdf",
        "json" => "application/json",
        "xml" => "application/xml",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "txt" | "log" => "text/plain",
        "csv" => "text/csv",
        "htm" | "html" => "text/html",
        "ics" => "text/calendar",
        "eml" => "message/rfc822",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use reqwest::{Method, Url};

    use crate::callback::request::{MultipartBody, RequestBody};

    const MIB: u64 = 1024 * 1024;

    fn base() -> OutboundRequest {
        let mut request =
            OutboundRequest::new(Method::POST, Url::parse("https://example.com/hook").unwrap());
        request.body = RequestBody::Multipart(MultipartBody {
            fields: vec![("source".into(), "mail".into())],
            files: vec![],
        });
        request
    }

    fn message_with(attachments: Vec<Attachment>) -> MailMessage {
        MailMessage {
            id: "42".into(),
            subject: "Invoice".into(),
            attachments,
            ..Default::default()
        }
    }

    fn small_and_large() -> Vec<Attachment> {
        vec![
            Attachment::new("small.pdf", vec![0u8; 2 * 1024]),
            Attachment::new("large.bin", vec![0u8; 10 * MIB as usize]),
        ]
    }

    fn config(strategy: AttachmentStrategy, max_size_bytes: u64) -> AttachmentsConfig {
        AttachmentsConfig {
            strategy,
            max_size_bytes,
            ..Default::default()
        }
    }

    #[test]
    fn deserializes_strategy_names() {
        let s: AttachmentStrategy = serde_yaml::from_str("perAttachment").unwrap();
        assert_eq!(s, AttachmentStrategy::PerAttachment);
        let s: AttachmentStrategy = serde_yaml::from_str("ignore").unwrap();
        assert_eq!(s, AttachmentStrategy::Ignore);
        let s: AttachmentStrategy = serde_yaml::from_str("multipartBundle").unwrap();
        assert_eq!(s, AttachmentStrategy::Bundle);
        assert!(serde_yaml::from_str::<AttachmentStrategy>("zip").is_err());
        assert_eq!(AttachmentStrategy::default(), AttachmentStrategy::Bundle);
    }

    #[test]
    fn filter_drops_oversized_and_is_idempotent() {
        let attachments = small_and_large();
        let once = filter_by_size(&attachments, MIB);
        assert_eq!(once.len(), 1);
        assert_eq!(once[0].name, "small.pdf");

        let twice = filter_by_size(once.iter().copied(), MIB);
        assert_eq!(twice, once);
    }

    #[test]
    fn zero_limit_keeps_everything() {
        let attachments = small_and_large();
        assert_eq!(filter_by_size(&attachments, 0).len(), 2);
    }

    #[test]
    fn filter_keeps_attachment_at_exact_limit() {
        let attachments = vec![Attachment::new("a", vec![0u8; 10])];
        assert_eq!(filter_by_size(&attachments, 10).len(), 1);
        assert!(filter_by_size(&attachments, 9).is_empty());
    }

    #[test]
    fn bundle_sends_one_request_with_eligible_files() {
        let message = message_with(small_and_large());
        let requests = AttachmentStrategy::Bundle.build_requests(
            base(),
            &message,
            &HashMap::new(),
            &config(AttachmentStrategy::Bundle, MIB),
        );
        assert_eq!(requests.len(), 1);
        let files = requests[0].files();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].file_name, "small.pdf");
        assert_eq!(files[0].content_type, "application/pdf");
        assert_eq!(requests[0].form_fields().len(), 1);
    }

    #[test]
    fn per_attachment_sends_one_request_per_eligible_file() {
        let message = message_with(small_and_large());
        let requests = AttachmentStrategy::PerAttachment.build_requests(
            base(),
            &message,
            &HashMap::new(),
            &config(AttachmentStrategy::PerAttachment, MIB),
        );
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].files()[0].file_name, "small.pdf");

        let unlimited = AttachmentStrategy::PerAttachment.build_requests(
            base(),
            &message,
            &HashMap::new(),
            &config(AttachmentStrategy::PerAttachment, 0),
        );
        assert_eq!(unlimited.len(), 2);
        assert!(unlimited.iter().all(|r| r.files().len() == 1));
        assert!(unlimited.iter().all(|r| r.form_fields().len() == 1));
        assert_eq!(unlimited[1].files()[0].file_name, "large.bin");
    }

    #[test]
    fn per_attachment_falls_back_to_base_when_nothing_passes() {
        let message = message_with(vec![Attachment::new("huge.bin", vec![0u8; 2048])]);
        let requests = AttachmentStrategy::PerAttachment.build_requests(
            base(),
            &message,
            &HashMap::new(),
            &config(AttachmentStrategy::PerAttachment, 1024),
        );
        assert_eq!(requests.len(), 1);
        assert!(requests[0].files().is_empty());
        assert_eq!(requests[0].form_fields().len(), 1);
    }

    #[test]
    fn ignore_returns_base_untouched() {
        let message = message_with(small_and_large());
        let requests = AttachmentStrategy::Ignore.build_requests(
            base(),
            &message,
            &HashMap::new(),
            &config(AttachmentStrategy::Ignore, 0),
        );
        assert_eq!(requests.len(), 1);
        assert!(requests[0].files().is_empty());
    }

    #[test]
    fn field_name_template_sees_file_and_selector_values() {
        let attachment = Attachment::new("docs/report.final.PDF", b"x".to_vec());
        let mut values = HashMap::new();
        values.insert("id".to_string(), "123".to_string());
        values.insert("index".to_string(), "shadowed".to_string());

        let name = render_field_name(
            "${id}-${index}-${filename}-${basename}${extension}-${contentType}",
            3,
            &attachment,
            &values,
        );
        assert_eq!(name, "123-3-report.final.PDF-report.final.PDF-application/pdf");
    }

    #[test]
    fn index_counts_eligible_attachments_only() {
        let message = message_with(vec![
            Attachment::new("huge.bin", vec![0u8; 4096]),
            Attachment::new("first.pdf", b"a".to_vec()),
            Attachment::new("second.pdf", b"b".to_vec()),
        ]);
        let mut cfg = config(AttachmentStrategy::Bundle, 1024);
        cfg.field_name = "doc_${index}".into();

        let bundled =
            AttachmentStrategy::Bundle.build_requests(base(), &message, &HashMap::new(), &cfg);
        let fields: Vec<(&str, &str)> = bundled[0]
            .files()
            .iter()
            .map(|f| (f.field.as_str(), f.file_name.as_str()))
            .collect();
        assert_eq!(fields, vec![("doc_0", "first.pdf"), ("doc_1", "second.pdf")]);

        cfg.strategy = AttachmentStrategy::PerAttachment;
        let split = AttachmentStrategy::PerAttachment.build_requests(
            base(),
            &message,
            &HashMap::new(),
            &cfg,
        );
        assert_eq!(split.len(), 2);
        assert_eq!(split[0].files()[0].field, "doc_0");
        assert_eq!(split[0].files()[0].file_name, "first.pdf");
        assert_eq!(split[1].files()[0].field, "doc_1");
    }

    #[test]
    fn unnamed_attachment_uses_field_as_file_name() {
        let message = message_with(vec![Attachment::new("", b"data".to_vec())]);
        let mut cfg = config(AttachmentStrategy::Bundle, 0);
        cfg.field_name = "file${index}".into();
        let requests =
            AttachmentStrategy::Bundle.build_requests(base(), &message, &HashMap::new(), &cfg);
        let file = &requests[0].files()[0];
        assert_eq!(file.field, "file0");
        assert_eq!(file.file_name, "file0");
        assert_eq!(file.content_type, "application/octet-stream");
    }

    #[test]
    fn guesses_common_content_types() {
        assert_eq!(guess_content_type("a.png"), "image/png");
        assert_eq!(guess_content_type("A.JPEG"), "image/jpeg");
        assert_eq!(guess_content_type("data.csv"), "text/csv");
        assert_eq!(guess_content_type(".profile"), "application/octet-stream");
        assert_eq!(guess_content_type("noext"), "application/octet-stream");
    }
}
