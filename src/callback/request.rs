//! Logical shape of one outbound callback request.
//!
//! An `OutboundRequest` is plain data built fresh for every attempt; the
//! transport turns it into a wire request. Nothing here is persisted.

use reqwest::header::HeaderMap;
use reqwest::{Method, Url};

/// A file part of a multipart body.
#[derive(Clone, PartialEq, Eq)]
pub struct FilePart {
    /// Multipart field name.
    pub field: String,
    /// File name sent in the part's Content-Disposition.
    pub file_name: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

impl std::fmt::Debug for FilePart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilePart")
            .field("field", &self.field)
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("size", &self.data.len())
            .finish()
    }
}

/// A `multipart/form-data` body: text fields first, then files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultipartBody {
    pub fields: Vec<(String, String)>,
    pub files: Vec<FilePart>,
}

/// Request body variants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RequestBody {
    #[default]
    Empty,
    /// Expanded body template, sent without an implicit content type.
    Raw(String),
    Multipart(MultipartBody),
}

/// A fully expanded callback request.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: RequestBody,
}

impl OutboundRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
        }
    }

    /// Add a file, switching the body to multipart if it is not already.
    pub fn attach_file(&mut self, file: FilePart) {
        match &mut self.body {
            RequestBody::Multipart(multipart) => multipart.files.push(file),
            body => {
                *body = RequestBody::Multipart(MultipartBody {
                    fields: Vec::new(),
                    files: vec![file],
                })
            }
        }
    }

    /// Files carried by this request.
    pub fn files(&self) -> &[FilePart] {
        match &self.body {
            RequestBody::Multipart(multipart) => &multipart.files,
            _ => &[],
        }
    }

    /// Multipart text fields carried by this request.
    pub fn form_fields(&self) -> &[(String, String)] {
        match &self.body {
            RequestBody::Multipart(multipart) => &multipart.fields,
            _ => &[],
        }
    }

    pub fn is_multipart(&self) -> bool {
        matches!(self.body, RequestBody::Multipart(_))
    }
}
