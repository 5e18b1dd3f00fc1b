//! Deferred deletion of chat messages that reveal secrets.
//!
//! Enrollment hands the user a QR code, the raw secret, and a backup-code
//! list; each of those messages gets a deletion scheduled here so the secret
//! does not sit in chat history forever. Scheduling returns immediately and
//! the timer runs as its own task.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Fixed exposure window for disclosure artifacts.
pub const DISCLOSURE_TTL: Duration = Duration::from_secs(120);

/// Destination side of a deletion: whatever can remove a sent message.
#[async_trait]
pub trait DisclosureSink: Send + Sync {
    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<()>;
}

/// Sink used when no frontend adapter is configured. Deletion degrades to a
/// log line so local development does not need the adapter running.
pub struct LoggingSink;

#[async_trait]
impl DisclosureSink for LoggingSink {
    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<()> {
        info!("No frontend configured; would delete message {message_id} in chat {chat_id}");
        Ok(())
    }
}

/// A message previously sent to a chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisclosureTarget {
    pub chat_id: i64,
    pub message_id: i64,
}

/// Handle for cancelling a scheduled deletion early. Cancelling an already
/// fired or unknown token is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DisclosureToken(u64);

impl DisclosureToken {
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

pub struct EphemeralDisclosure {
    sink: Arc<dyn DisclosureSink>,
    tasks: Arc<Mutex<HashMap<u64, JoinHandle<()>>>>,
    next_token: AtomicU64,
}

impl EphemeralDisclosure {
    #[must_use]
    pub fn new(sink: Arc<dyn DisclosureSink>) -> Self {
        Self {
            sink,
            tasks: Arc::new(Mutex::new(HashMap::new())),
            next_token: AtomicU64::new(0),
        }
    }

    /// Schedule deletion after the fixed TTL.
    pub async fn schedule(&self, target: DisclosureTarget) -> DisclosureToken {
        self.schedule_after(target, DISCLOSURE_TTL).await
    }

    /// Schedule deletion after an explicit delay. The timer fires whether or
    /// not the artifact was consumed; failures are swallowed since the
    /// message being gone already is the common case.
    pub async fn schedule_after(
        &self,
        target: DisclosureTarget,
        delay: Duration,
    ) -> DisclosureToken {
        let token = DisclosureToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        let sink = Arc::clone(&self.sink);
        let tasks = Arc::clone(&self.tasks);

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            if let Err(e) = sink.delete_message(target.chat_id, target.message_id).await {
                debug!(
                    "Deleting disclosure message {} in chat {} failed: {e}",
                    target.message_id, target.chat_id
                );
            }

            tasks.lock().await.remove(&token.0);
        });

        self.tasks.lock().await.insert(token.0, handle);
        metrics::counter!("chime_disclosures_scheduled_total").increment(1);
        debug!(
            "Scheduled deletion of message {} in chat {} in {delay:?}",
            target.message_id, target.chat_id
        );

        token
    }

    /// Abort a pending deletion, e.g. because the chat was already cleared.
    /// Returns whether a pending timer was actually stopped.
    pub async fn cancel(&self, token: DisclosureToken) -> bool {
        if let Some(handle) = self.tasks.lock().await.remove(&token.0) {
            handle.abort();
            debug!("Cancelled scheduled disclosure deletion {token:?}");
            return true;
        }

        false
    }

    /// Number of deletions still waiting to fire.
    pub async fn pending(&self) -> usize {
        let mut tasks = self.tasks.lock().await;
        tasks.retain(|_, handle| !handle.is_finished());
        tasks.len()
    }

    /// Abort every pending deletion. Called on daemon shutdown.
    pub async fn shutdown(&self) {
        let mut tasks = self.tasks.lock().await;
        let aborted = tasks.len();

        for (_, handle) in tasks.drain() {
            handle.abort();
        }

        if aborted > 0 {
            info!("Aborted {aborted} pending disclosure deletions");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        deleted: Mutex<Vec<(i64, i64)>>,
    }

    #[async_trait]
    impl DisclosureSink for RecordingSink {
        async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<()> {
            self.deleted.lock().await.push((chat_id, message_id));
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl DisclosureSink for FailingSink {
        async fn delete_message(&self, _chat_id: i64, _message_id: i64) -> Result<()> {
            anyhow::bail!("message to delete not found")
        }
    }

    fn target() -> DisclosureTarget {
        DisclosureTarget {
            chat_id: 100,
            message_id: 555,
        }
    }

    #[tokio::test]
    async fn test_deletion_fires_after_delay() {
        let sink = Arc::new(RecordingSink::default());
        let disclosure = EphemeralDisclosure::new(sink.clone());

        disclosure
            .schedule_after(target(), Duration::from_millis(20))
            .await;
        assert_eq!(disclosure.pending().await, 1);

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(*sink.deleted.lock().await, vec![(100, 555)]);
        assert_eq!(disclosure.pending().await, 0);
    }

    #[tokio::test]
    async fn test_cancel_prevents_deletion() {
        let sink = Arc::new(RecordingSink::default());
        let disclosure = EphemeralDisclosure::new(sink.clone());

        let token = disclosure
            .schedule_after(target(), Duration::from_millis(50))
            .await;
        assert!(disclosure.cancel(token).await);

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(sink.deleted.lock().await.is_empty());
        assert_eq!(disclosure.pending().await, 0);

        // Cancelling again is a no-op.
        assert!(!disclosure.cancel(token).await);
    }

    #[tokio::test]
    async fn test_sink_failure_is_swallowed() {
        let disclosure = EphemeralDisclosure::new(Arc::new(FailingSink));

        disclosure
            .schedule_after(target(), Duration::from_millis(10))
            .await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(disclosure.pending().await, 0);
    }

    #[tokio::test]
    async fn test_shutdown_aborts_pending() {
        let sink = Arc::new(RecordingSink::default());
        let disclosure = EphemeralDisclosure::new(sink.clone());

        for i in 0..3 {
            disclosure
                .schedule_after(
                    DisclosureTarget {
                        chat_id: 1,
                        message_id: i,
                    },
                    Duration::from_secs(60),
                )
                .await;
        }
        assert_eq!(disclosure.pending().await, 3);

        disclosure.shutdown().await;

        assert_eq!(disclosure.pending().await, 0);
        assert!(sink.deleted.lock().await.is_empty());
    }
}
