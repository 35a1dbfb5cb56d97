//! Turns the callback template plus one message's selector values into the
//! concrete requests for a single delivery attempt.

use std::collections::HashMap;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Url};

use crate::callback::attachments::AttachmentStrategy;
use crate::callback::request::{MultipartBody, OutboundRequest, RequestBody};
use crate::config::CallbackConfig;
use crate::error::ComposeError;
use crate::mail::MailMessage;
use crate::template::expand;

/// Build the ordered requests for one attempt.
///
/// Query parameters and header values are expanded against `values`; URL
/// and method are taken literally. The body is multipart when form fields
/// are configured or attachments will be forwarded; otherwise the expanded
/// body template is sent raw, or nothing when the template is empty.
pub fn compose(
    message: &MailMessage,
    values: &HashMap<String, String>,
    callback: &CallbackConfig,
) -> Result<Vec<OutboundRequest>, ComposeError> {
    let method = Method::from_bytes(callback.method.as_bytes())
        .map_err(|_| ComposeError::InvalidMethod(callback.method.clone()))?;

    let mut url = Url::parse(&callback.url).map_err(|e| ComposeError::InvalidUrl {
        url: callback.url.clone(),
        reason: e.to_string(),
    })?;
    if !callback.query_params.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for param in &callback.query_params {
            pairs.append_pair(&param.key, &expand(&param.value, values));
        }
    }

    let mut request = OutboundRequest::new(method, url);
    request.headers = expand_headers(callback, values)?;

    let strategy = callback.attachments.strategy;
    let forwards_attachments =
        strategy != AttachmentStrategy::Ignore && !message.attachments.is_empty();

    if !callback.form.is_empty() || forwards_attachments {
        let fields = callback
            .form
            .iter()
            .map(|field| (field.key.clone(), expand(&field.value, values)))
            .collect();
        request.body = RequestBody::Multipart(MultipartBody {
            fields,
            files: Vec::new(),
        });
        return Ok(strategy.build_requests(request, message, values, &callback.attachments));
    }

    if !callback.body.is_empty() {
        request.body = RequestBody::Raw(expand(&callback.body, values));
    }
    Ok(vec![request])
}

/// Later entries with the same name replace earlier ones.
fn expand_headers(
    callback: &CallbackConfig,
    values: &HashMap<String, String>,
) -> Result<HeaderMap, ComposeError> {
    let mut headers = HeaderMap::new();
    for header in &callback.headers {
        let name = HeaderName::from_bytes(header.key.as_bytes())
            .map_err(|_| ComposeError::InvalidHeaderName(header.key.clone()))?;
        let value = HeaderValue::from_str(&expand(&header.value, values))
            .map_err(|_| ComposeError::InvalidHeaderValue(header.key.clone()))?;
        headers.insert(name, value);
    }
    Ok(headers)
}
