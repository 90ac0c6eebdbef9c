//! Registration worker: runs the forward, edit and delete protocol for one
//! (account, source, destination) triple.

use std::{
    future::Future,
    sync::{Arc, RwLock},
    time::{Duration, Instant},
};

use {
    telefeed_channels::{
        AccountConnection, Error as ChannelError, FilterChain, FilterOutcome, InboundMessage,
        MessageId,
    },
    telefeed_common::{
        Backoff,
        hooks::{HookPayload, HookRegistry},
    },
    telefeed_config::RetryConfig,
    telefeed_sessions::SessionPool,
    tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use crate::metrics::{counter, names};
use crate::{
    Error,
    mapping::{MappingKey, MappingStore},
    router::{RegistrationKey, Work},
};

/// Minimum spacing between session activity stamps from one worker.
const TOUCH_INTERVAL: Duration = Duration::from_secs(3600);

/// Filter chain shared with the engine so filter updates apply in place.
pub(crate) type SharedChain = Arc<RwLock<Arc<dyn FilterChain>>>;

/// Retry policy for transient platform failures.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff: Backoff::from_millis(config.initial_backoff_ms, config.max_backoff_ms),
        }
    }
}

pub(crate) struct Worker {
    pub key: RegistrationKey,
    pub rule: String,
    pub connection: Arc<dyn AccountConnection>,
    pub chain: SharedChain,
    pub mappings: Arc<dyn MappingStore>,
    pub hooks: Arc<HookRegistry>,
    pub sessions: Arc<SessionPool>,
    pub placeholder: String,
    pub retry: RetryPolicy,
    pub cancel: CancellationToken,
    pub last_touch: Option<Instant>,
}

impl Worker {
    pub(crate) async fn run(mut self, mut queue: mpsc::Receiver<Work>) {
        debug!(registration = %self.key, rule = %self.rule, "registration worker started");
        loop {
            let work = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                work = queue.recv() => match work {
                    Some(work) => work,
                    None => break,
                },
            };

            let result = match work {
                Work::Message(message) => self.on_message(message).await,
                Work::Edit(message) => self.on_edit(message).await,
                Work::Delete(ids) => self.on_delete(&ids).await,
            };
            if let Err(e) = result {
                self.report_failure(&e).await;
            }
        }
        debug!(registration = %self.key, rule = %self.rule, "registration worker stopped");
    }

    async fn on_message(&mut self, message: InboundMessage) -> crate::Result<()> {
        let source_message_id = message.message_id;
        let message = match self.filter(message) {
            FilterOutcome::Forward(message) => message,
            FilterOutcome::Drop(reason) => {
                debug!(rule = %self.rule, source_message_id, %reason, "message filtered out");
                #[cfg(feature = "metrics")]
                counter!(names::MESSAGES_FILTERED_TOTAL).increment(1);
                return Ok(());
            },
        };

        let source = &self.key.source;
        let destination = &self.key.destination;
        let conn = Arc::clone(&self.connection);

        let sent = if let Some(text) = message.body() {
            self.call(|| conn.send_text(destination, text)).await
        } else if message.media.is_some() {
            self.call(|| conn.copy_message(destination, source, source_message_id))
                .await
        } else {
            let placeholder = self.placeholder.as_str();
            self.call(|| conn.send_text(destination, placeholder)).await
        };
        let destination_message_id = sent.map_err(|e| Error::forward(&self.rule, e))?;

        let mapping = MappingKey::new(source.clone(), source_message_id, destination.clone());
        self.mappings.insert(&mapping, destination_message_id).await?;

        debug!(
            rule = %self.rule,
            source = %source,
            destination = %destination,
            source_message_id,
            destination_message_id,
            "message forwarded"
        );
        #[cfg(feature = "metrics")]
        counter!(names::MESSAGES_FORWARDED_TOTAL).increment(1);

        self.hooks
            .dispatch(&HookPayload::MessageForwarded {
                owner_id: self.key.account.owner.clone(),
                rule: self.rule.clone(),
                source_id: source.to_string(),
                source_message_id,
                destination_id: destination.to_string(),
                destination_message_id,
                text: message.text.clone(),
            })
            .await;
        self.touch_session().await;
        Ok(())
    }

    async fn on_edit(&mut self, message: InboundMessage) -> crate::Result<()> {
        let mapping = MappingKey::new(
            self.key.source.clone(),
            message.message_id,
            self.key.destination.clone(),
        );
        let Some(destination_message_id) = self.mappings.get(&mapping).await? else {
            debug!(rule = %self.rule, key = %mapping, "edit for unmapped message ignored");
            return Ok(());
        };

        if message.is_empty() {
            return self.delete_copy(&mapping, destination_message_id).await;
        }

        let message = match self.filter(message) {
            FilterOutcome::Forward(message) => message,
            FilterOutcome::Drop(reason) => {
                debug!(rule = %self.rule, key = %mapping, %reason, "edit filtered out");
                return Ok(());
            },
        };
        let Some(text) = message.body() else {
            debug!(rule = %self.rule, key = %mapping, "media-only edit not propagated");
            return Ok(());
        };

        let conn = Arc::clone(&self.connection);
        let destination = &self.key.destination;
        match self
            .call(|| conn.edit_text(destination, destination_message_id, text))
            .await
        {
            Ok(()) => {},
            Err(ChannelError::NotModified) => {
                debug!(rule = %self.rule, key = %mapping, "edit left content unchanged");
            },
            Err(e) => return Err(Error::forward(&self.rule, e)),
        }

        debug!(rule = %self.rule, key = %mapping, destination_message_id, "edit propagated");
        #[cfg(feature = "metrics")]
        counter!(names::EDITS_PROPAGATED_TOTAL).increment(1);
        self.hooks
            .dispatch(&HookPayload::MessageEdited {
                owner_id: self.key.account.owner.clone(),
                rule: self.rule.clone(),
                destination_id: destination.to_string(),
                destination_message_id,
                text: text.to_string(),
            })
            .await;
        Ok(())
    }

    async fn on_delete(&mut self, ids: &[MessageId]) -> crate::Result<()> {
        for &id in ids {
            let mapping =
                MappingKey::new(self.key.source.clone(), id, self.key.destination.clone());
            let Some(destination_message_id) = self.mappings.get(&mapping).await? else {
                continue;
            };
            if let Err(e) = self.delete_copy(&mapping, destination_message_id).await {
                self.report_failure(&e).await;
            }
        }
        Ok(())
    }

    /// Delete the destination copy, then drop its mapping entry.
    async fn delete_copy(
        &mut self,
        mapping: &MappingKey,
        destination_message_id: MessageId,
    ) -> crate::Result<()> {
        let conn = Arc::clone(&self.connection);
        let destination = &self.key.destination;
        self.call(|| conn.delete_message(destination, destination_message_id))
            .await
            .map_err(|e| Error::forward(&self.rule, e))?;
        self.mappings.remove(mapping).await?;

        info!(rule = %self.rule, key = %mapping, destination_message_id, "deletion propagated");
        #[cfg(feature = "metrics")]
        counter!(names::DELETIONS_PROPAGATED_TOTAL).increment(1);
        self.hooks
            .dispatch(&HookPayload::MessageDeleted {
                owner_id: self.key.account.owner.clone(),
                rule: self.rule.clone(),
                destination_id: destination.to_string(),
                destination_message_id,
            })
            .await;
        Ok(())
    }

    fn filter(&self, message: InboundMessage) -> FilterOutcome {
        let chain = self
            .chain
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        chain.apply(message)
    }

    /// Run a platform call, retrying transient failures with backoff.
    /// Cancellation abandons the call and any pending retry.
    async fn call<T, F, Fut>(&self, mut op: F) -> telefeed_channels::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = telefeed_channels::Result<T>>,
    {
        let mut attempt = 0;
        loop {
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Err(ChannelError::unavailable("registration detached"));
                },
                result = op() => result,
            };

            match result {
                Err(e) if e.is_transient() && attempt < self.retry.max_retries => {
                    let delay = self.retry.backoff.delay_with_hint(attempt, e.retry_after());
                    warn!(
                        rule = %self.rule,
                        attempt = attempt + 1,
                        max_retries = self.retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient platform failure, retrying"
                    );
                    #[cfg(feature = "metrics")]
                    counter!(names::FORWARD_RETRIES_TOTAL).increment(1);
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return Err(e),
                        _ = tokio::time::sleep(delay) => {},
                    }
                    attempt += 1;
                },
                other => return other,
            }
        }
    }

    async fn report_failure(&self, error: &Error) {
        if self.cancel.is_cancelled() {
            debug!(rule = %self.rule, error = %error, "work abandoned on detach");
            return;
        }
        warn!(
            rule = %self.rule,
            source = %self.key.source,
            destination = %self.key.destination,
            error = %error,
            "redirection failed"
        );
        #[cfg(feature = "metrics")]
        counter!(names::FORWARD_FAILURES_TOTAL).increment(1);
        self.hooks
            .dispatch(&HookPayload::ForwardFailed {
                owner_id: self.key.account.owner.clone(),
                rule: self.rule.clone(),
                destination_id: self.key.destination.to_string(),
                error: error.to_string(),
            })
            .await;
    }

    async fn touch_session(&mut self) {
        if self.last_touch.is_some_and(|at| at.elapsed() < TOUCH_INTERVAL) {
            return;
        }
        self.last_touch = Some(Instant::now());
        if let Err(e) = self.sessions.touch(&self.key.account).await {
            debug!(account = %self.key.account, error = %e, "failed to record session use");
        }
    }
}
