//! Callback side of the pipeline: request model, attachment strategies,
//! composition and HTTP transport.

pub mod attachments;
pub mod composer;
pub mod request;
pub mod transport;

pub use attachments::AttachmentStrategy;
pub use composer::compose;
pub use request::{FilePart, MultipartBody, OutboundRequest, RequestBody};
pub use transport::{CallbackTransport, ReqwestTransport, StatusPolicy};
