//! Caps how many mailbox sessions run at once.
//!
//! Each `ImapMailClient` call opens its own connection, and the dispatcher
//! marks messages from many tasks at once. Servers refuse logins past their
//! per-account connection limit, so every call first takes a permit here.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::trace;

use crate::error::MailError;
use crate::mail::{MailClient, MailMessage};

/// Default number of concurrent mailbox sessions.
pub const DEFAULT_MAX_SESSIONS: usize = 4;

/// `MailClient` wrapper that runs at most `max_sessions` calls concurrently.
pub struct SessionLimited<C> {
    inner: C,
    permits: Arc<Semaphore>,
    max_sessions: usize,
}

impl<C: MailClient> SessionLimited<C> {
    /// A limit of 0 is raised to 1.
    pub fn new(inner: C, max_sessions: usize) -> Self {
        let max_sessions = max_sessions.max(1);
        Self {
            inner,
            permits: Arc::new(Semaphore::new(max_sessions)),
            max_sessions,
        }
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    async fn permit(&self, operation: &str) -> Result<SemaphorePermit<'_>, MailError> {
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| MailError::Task(e.to_string()))?;
        trace!(
            operation,
            available = self.permits.available_permits(),
            "Acquired mailbox session permit"
        );
        Ok(permit)
    }
}

#[async_trait]
impl<C: MailClient> MailClient for SessionLimited<C> {
    async fn list_unread(&self) -> Result<Vec<MailMessage>, MailError> {
        let _permit = self.permit("list_unread").await?;
        self.inner.list_unread().await
    }

    async fn mark_read(&self, message: &MailMessage) -> Result<(), MailError> {
        let _permit = self.permit("mark_read").await?;
        self.inner.mark_read(message).await
    }

    async fn delete(&self, message: &MailMessage) -> Result<(), MailError> {
        let _permit = self.permit("delete").await?;
        self.inner.delete(message).await
    }
}
