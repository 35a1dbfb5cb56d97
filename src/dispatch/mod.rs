//! Poll-and-dispatch orchestration.
//!
//! One run fetches unread mail, keeps the messages every selector applies
//! to, and delivers each selected message from its own task:
//! 1. Compose the requests for the attempt
//! 2. Send them in order, stopping at the first failure
//! 3. Retry the whole attempt up to `retries` more times
//! 4. On success, apply the processed action
//!
//! Messages that are not selected, or whose delivery fails, stay unread and
//! are picked up again by a later run.

pub mod state;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::callback::{CallbackTransport, OutboundRequest, StatusPolicy, compose};
use crate::config::{CallbackConfig, Config};
use crate::error::{ConfigError, MailError, TransportError};
use crate::mail::{MailClient, MailMessage, ProcessedAction};
use crate::selector::SelectorSet;

pub use state::{Delivery, DeliveryState, MessageOutcome, RunSummary};

/// Drives mail from the mailbox to the callback.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    mail: Arc<dyn MailClient>,
    transport: Arc<dyn CallbackTransport>,
    selectors: SelectorSet,
    callback: CallbackConfig,
    status_policy: StatusPolicy,
    processed_action: ProcessedAction,
}

impl Dispatcher {
    /// Build a dispatcher from validated configuration.
    pub fn new(
        config: &Config,
        mail: Arc<dyn MailClient>,
        transport: Arc<dyn CallbackTransport>,
    ) -> Result<Self, ConfigError> {
        Ok(Self::from_parts(
            config.selector_set()?,
            config.callback.clone(),
            config.processing.processed_action,
            mail,
            transport,
        ))
    }

    pub fn from_parts(
        selectors: SelectorSet,
        callback: CallbackConfig,
        processed_action: ProcessedAction,
        mail: Arc<dyn MailClient>,
        transport: Arc<dyn CallbackTransport>,
    ) -> Self {
        let status_policy = StatusPolicy::new(&callback.expected_status);
        Self {
            inner: Arc::new(DispatcherInner {
                mail,
                transport,
                selectors,
                callback,
                status_policy,
                processed_action,
            }),
        }
    }

    /// Run one poll-and-dispatch cycle.
    ///
    /// Only a failure to list unread mail is returned as an error; per-message
    /// problems are logged and counted in the summary.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunSummary, MailError> {
        let run_id = Uuid::new_v4();
        self.run_inner(cancel)
            .instrument(info_span!("run", %run_id))
            .await
    }

    async fn run_inner(&self, cancel: &CancellationToken) -> Result<RunSummary, MailError> {
        let mut summary = RunSummary::default();
        if cancel.is_cancelled() {
            debug!("Cancelled before fetching mail");
            return Ok(summary);
        }

        let messages = self.inner.mail.list_unread().await?;
        summary.fetched = messages.len();

        let selected = self.inner.selectors.select(messages);
        summary.selected = selected.len();
        info!(
            fetched = summary.fetched,
            selected = summary.selected,
            "Unread messages in scope"
        );

        let mut tasks = JoinSet::new();
        for (message, values) in selected {
            let inner = Arc::clone(&self.inner);
            let cancel = cancel.clone();
            let span = info_span!("message", id = %message.id);
            tasks.spawn(async move { inner.deliver(message, values, cancel).await }.instrument(span));
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => summary.record(&outcome),
                Err(e) => {
                    error!("Delivery task panicked: {e}");
                    summary.exhausted += 1;
                }
            }
        }

        info!(
            delivered = summary.delivered,
            exhausted = summary.exhausted,
            cancelled = summary.cancelled,
            rejected = summary.rejected,
            mark_failed = summary.mark_failed,
            "Run complete"
        );
        Ok(summary)
    }

    /// Run a cycle every `interval` until `cancel` fires.
    pub async fn run_every(&self, interval: Duration, cancel: CancellationToken) {
        info!(
            "Mail dispatcher started, polling every {}",
            humantime::format_duration(interval)
        );
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Mail dispatcher shutting down");
                    return;
                }
                _ = tick.tick() => {
                    if let Err(e) = self.run(&cancel).await {
                        error!("Mail poll failed: {e}");
                    }
                }
            }
        }
    }
}

impl DispatcherInner {
    async fn deliver(
        &self,
        message: MailMessage,
        values: HashMap<String, String>,
        cancel: CancellationToken,
    ) -> MessageOutcome {
        let mut delivery = Delivery::new(&message.id);
        let max_attempts = self.callback.max_attempts();

        while delivery.attempts() < max_attempts {
            if cancel.is_cancelled() {
                return self.give_up(&mut delivery, |attempts| MessageOutcome::Cancelled { attempts });
            }
            self.advance(&mut delivery, DeliveryState::Sending);

            let requests = match compose(&message, &values, &self.callback) {
                Ok(requests) => requests,
                Err(e) => {
                    error!(error = %e, "Failed to compose callback request");
                    let reason = e.to_string();
                    return self.give_up(&mut delivery, |_| MessageOutcome::Rejected { reason });
                }
            };

            match self.send_all(requests, &cancel).await {
                Ok(()) => {
                    self.advance(&mut delivery, DeliveryState::Succeeded);
                    info!(
                        subject = %message.subject,
                        body = %message.body_preview(100),
                        attempts = delivery.attempts(),
                        "Callback delivered"
                    );
                    let marked = self.mark_processed(&message).await;
                    return MessageOutcome::Delivered {
                        attempts: delivery.attempts(),
                        marked,
                    };
                }
                Err(TransportError::Cancelled) => {
                    warn!(attempt = delivery.attempts(), "Delivery interrupted by shutdown");
                    return self.give_up(&mut delivery, |attempts| MessageOutcome::Cancelled { attempts });
                }
                Err(e) => {
                    warn!(
                        attempt = delivery.attempts(),
                        max_attempts,
                        error = %e,
                        "Callback attempt failed"
                    );
                }
            }
        }

        error!(
            attempts = delivery.attempts(),
            elapsed = ?delivery.elapsed(),
            "Callback delivery exhausted, message stays unread"
        );
        self.give_up(&mut delivery, |attempts| MessageOutcome::Exhausted { attempts })
    }

    /// Send every request of one attempt in order; the first failure ends it.
    async fn send_all(
        &self,
        requests: Vec<OutboundRequest>,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        let total = requests.len();
        for (index, request) in requests.into_iter().enumerate() {
            let url = request.url.to_string();
            let files = request.files().len();

            let status = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                result = self.transport.send(request, self.callback.timeout) => result?,
            };

            if !self.status_policy.is_success(status) {
                return Err(TransportError::UnexpectedStatus {
                    status: status.as_u16(),
                    url,
                });
            }
            debug!(
                request = index + 1,
                total,
                files,
                status = status.as_u16(),
                "Callback request accepted"
            );
        }
        Ok(())
    }

    async fn mark_processed(&self, message: &MailMessage) -> bool {
        match self.processed_action.apply(self.mail.as_ref(), message).await {
            Ok(()) => true,
            Err(e) => {
                error!(
                    action = %self.processed_action,
                    error = %e,
                    "Failed to apply processed action after delivery"
                );
                false
            }
        }
    }

    fn advance(&self, delivery: &mut Delivery, next: DeliveryState) {
        if let Err(e) = delivery.transition_to(next) {
            warn!("{e}");
        }
    }

    fn give_up(
        &self,
        delivery: &mut Delivery,
        outcome: impl FnOnce(u32) -> MessageOutcome,
    ) -> MessageOutcome {
        if !delivery.state().is_terminal() {
            self.advance(delivery, DeliveryState::Exhausted);
        }
        outcome(delivery.attempts())
    }
}
