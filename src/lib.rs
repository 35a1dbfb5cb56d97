//! Mail Webhook: forwards selected unread mail to an HTTP callback.

pub mod callback;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod mail;
pub mod selector;
pub mod template;
