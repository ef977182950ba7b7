//! Realtime notification channel. The dispatcher is an explicit dependency
//! injected into the event processor and services, so tests can substitute a
//! recording fake without process-wide setup.

use async_trait::async_trait;
use redis::AsyncCommands;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

const CHANNEL_PREFIX: &str = "varanda:events";

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Publish timed out")]
    Timeout,
}

/// Publish-only interface to the realtime feed.
#[async_trait]
pub trait RealtimeNotifier: Send + Sync {
    async fn publish(
        &self,
        channel: &str,
        payload: serde_json::Value,
    ) -> Result<(), NotificationError>;
}

/// Redis pub/sub backed notifier used in deployment.
#[derive(Clone)]
pub struct RedisNotifier {
    redis: Arc<redis::Client>,
    publish_timeout: std::time::Duration,
}

impl RedisNotifier {
    pub fn new(redis: Arc<redis::Client>, publish_timeout: std::time::Duration) -> Self {
        Self {
            redis,
            publish_timeout,
        }
    }

    fn channel_key(channel: &str) -> String {
        format!("{CHANNEL_PREFIX}:{channel}")
    }
}

#[async_trait]
impl RealtimeNotifier for RedisNotifier {
    async fn publish(
        &self,
        channel: &str,
        payload: serde_json::Value,
    ) -> Result<(), NotificationError> {
        let message = serde_json::to_string(&payload)?;
        let key = Self::channel_key(channel);

        let publish = async {
            let mut conn = self.redis.get_async_connection().await?;
            conn.publish::<_, _, ()>(&key, message).await?;
            Ok::<(), NotificationError>(())
        };

        tokio::time::timeout(self.publish_timeout, publish)
            .await
            .map_err(|_| NotificationError::Timeout)??;

        debug!(channel = %key, "realtime event published");
        Ok(())
    }
}

/// Recording notifier for tests.
#[derive(Default)]
pub struct InMemoryNotifier {
    published: Mutex<Vec<(String, serde_json::Value)>>,
}

impl InMemoryNotifier {
    pub async fn published(&self) -> Vec<(String, serde_json::Value)> {
        self.published.lock().await.clone()
    }
}

#[async_trait]
impl RealtimeNotifier for InMemoryNotifier {
    async fn publish(
        &self,
        channel: &str,
        payload: serde_json::Value,
    ) -> Result<(), NotificationError> {
        self.published
            .lock()
            .await
            .push((channel.to_string(), payload));
        Ok(())
    }
}
