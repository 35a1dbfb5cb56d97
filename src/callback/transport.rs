//! HTTP delivery of composed callback requests.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};

use crate::callback::request::{MultipartBody, OutboundRequest, RequestBody};
use crate::error::TransportError;

/// Sends one request and reports the response status.
///
/// Whether that status counts as success is the caller's decision (see
/// [`StatusPolicy`]). Implementations must be safe to call from many
/// per-message tasks at once.
#[async_trait]
pub trait CallbackTransport: Send + Sync {
    async fn send(
        &self,
        request: OutboundRequest,
        timeout: Duration,
    ) -> Result<StatusCode, TransportError>;
}

/// `CallbackTransport` backed by a shared `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CallbackTransport for ReqwestTransport {
    async fn send(
        &self,
        request: OutboundRequest,
        timeout: Duration,
    ) -> Result<StatusCode, TransportError> {
        let OutboundRequest {
            method,
            url,
            headers,
            body,
        } = request;

        let mut builder = self.client.request(method, url).timeout(timeout);
        builder = match body {
            RequestBody::Empty => builder,
            RequestBody::Raw(text) => builder.body(text),
            RequestBody::Multipart(multipart) => builder.multipart(build_form(multipart)?),
        };
        // Applied last so configured headers, Content-Type included, win.
        builder = builder.headers(headers);

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(timeout)
            } else {
                TransportError::Request(e.to_string())
            }
        })?;

        Ok(response.status())
    }
}

fn build_form(multipart: MultipartBody) -> Result<Form, TransportError> {
    let mut form = Form::new();
    for (key, value) in multipart.fields {
        form = form.text(key, value);
    }
    for file in multipart.files {
        let part = Part::bytes(file.data)
            .file_name(file.file_name)
            .mime_str(&file.content_type)
            .map_err(|e| TransportError::Request(e.to_string()))?;
        form = form.part(file.field, part);
    }
    Ok(form)
}

/// Decides which response statuses count as a delivered callback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusPolicy {
    expected: Vec<u16>,
}

impl StatusPolicy {
    /// An empty list accepts any 2xx or 3xx status.
    pub fn new(expected: &[u16]) -> Self {
        Self {
            expected: expected.to_vec(),
        }
    }

    pub fn is_success(&self, status: StatusCode) -> bool {
        if self.expected.is_empty() {
            status.is_success() || status.is_redirection()
        } else {
            self.expected.contains(&status.as_u16())
        }
    }
}
