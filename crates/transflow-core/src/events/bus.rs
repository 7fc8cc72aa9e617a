//! Publish-side bus abstraction.
//!
//! A trait plus a no-op and a recording test double, the same three-way
//! split used elsewhere in this crate for external collaborators: recognizer
//! sessions depend on [`EventBus`] rather than a concrete Redis client, and
//! [`Publisher`] layers a bounded-backoff-then-drop policy on top of any
//! `EventBus` implementation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::TranscriptEvent;
use crate::error::TransflowResult;

/// Abstraction over the pub/sub transport a [`TranscriptEvent`] is
/// published to.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publishes the JSON-encoded event to the configured channel.
    async fn publish(&self, channel: &str, event: &TranscriptEvent) -> TransflowResult<()>;
}

/// Redis-backed bus, the default concrete transport.
pub struct RedisEventBus {
    client: redis::Client,
}

impl RedisEventBus {
    /// Builds a bus from a Redis connection URL (`TransflowConfig::bus_url`).
    pub fn new(url: &str) -> TransflowResult<Self> {
        let client = redis::Client::open(url).map_err(crate::error::TransflowError::from)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl EventBus for RedisEventBus {
    async fn publish(&self, channel: &str, event: &TranscriptEvent) -> TransflowResult<()> {
        let payload = serde_json::to_string(event)
            .map_err(|err| crate::error::TransflowError::Publish(err.to_string()))?;
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(crate::error::TransflowError::from)?;
        redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(crate::error::TransflowError::from)
    }
}

/// No-op bus: events are silently discarded. Used for embedding or when a
/// deployment runs without a live bus during development.
pub struct NoopEventBus;

#[async_trait]
impl EventBus for NoopEventBus {
    async fn publish(&self, _channel: &str, _event: &TranscriptEvent) -> TransflowResult<()> {
        Ok(())
    }
}

/// Test double recording every published event in memory.
#[derive(Default)]
pub struct RecordingEventBus {
    published: parking_lot::Mutex<Vec<TranscriptEvent>>,
}

impl RecordingEventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<TranscriptEvent> {
        self.published.lock().clone()
    }
}

#[async_trait]
impl EventBus for RecordingEventBus {
    async fn publish(&self, _channel: &str, event: &TranscriptEvent) -> TransflowResult<()> {
        self.published.lock().push(event.clone());
        Ok(())
    }
}

/// Initial retry delay for a failed publish.
const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Retry ceiling: after this much elapsed retrying, the event is dropped
/// rather than retried further.
const MAX_RETRY_WINDOW: Duration = Duration::from_secs(5);

/// Wraps an [`EventBus`] with the bounded-retry-then-drop publish policy
/// and a diagnostics counter for dropped events.
pub struct Publisher {
    bus: Arc<dyn EventBus>,
    channel: String,
    dropped: AtomicU64,
}

impl Publisher {
    #[must_use]
    pub fn new(bus: Arc<dyn EventBus>, channel: String) -> Self {
        Self {
            bus,
            channel,
            dropped: AtomicU64::new(0),
        }
    }

    /// Number of events dropped after exhausting the retry window.
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Publishes `event`, retrying with bounded exponential back-off.
    ///
    /// Best-effort and non-blocking from the caller's perspective once the
    /// retry window elapses: on exhaustion the event is dropped and the
    /// diagnostics counter is incremented rather than propagating an error,
    /// since publish failures are never fatal to the process.
    pub async fn publish(&self, event: &TranscriptEvent) {
        let mut delay = INITIAL_RETRY_DELAY;
        let mut elapsed = Duration::ZERO;

        loop {
            match self.bus.publish(&self.channel, event).await {
                Ok(()) => return,
                Err(err) => {
                    if elapsed >= MAX_RETRY_WINDOW {
                        tracing::warn!(
                            call_id = %event.call_id,
                            error = %err,
                            "dropping event after exhausting retry window"
                        );
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        return;
                    }
                    tokio::time::sleep(delay).await;
                    elapsed += delay;
                    delay = (delay * 2).min(MAX_RETRY_WINDOW);
                }
            }
        }
    }
}
