//! Progress events republished via Redis Pub/Sub for out-of-process
//! listeners (for example a web tier pushing updates to browsers).

use redis::AsyncCommands;
use tracing::debug;

use lingo_models::{ProgressEvent, TaskId};

use crate::error::QueueResult;

/// Publishes and subscribes to `progress:{task_id}` channels.
#[derive(Clone)]
pub struct RedisProgressRelay {
    client: redis::Client,
}

impl RedisProgressRelay {
    pub fn new(redis_url: &str) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    /// Create from `REDIS_URL`, if set.
    pub fn from_env() -> QueueResult<Option<Self>> {
        match std::env::var("REDIS_URL") {
            Ok(url) if !url.is_empty() => Ok(Some(Self::new(&url)?)),
            _ => Ok(None),
        }
    }

    /// Get the channel name for a task.
    pub fn channel_name(task_id: &TaskId) -> String {
        format!("progress:{}", task_id)
    }

    /// Publish one event as JSON.
    pub async fn publish(&self, event: &ProgressEvent) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let channel = Self::channel_name(&event.task_id);
        let payload = serde_json::to_string(event)?;

        debug!("Publishing progress event to {}", channel);
        conn.publish::<_, _, ()>(channel, payload).await?;

        Ok(())
    }

    /// Subscribe to progress events for a task.
    /// Returns a pinned stream that can be polled with `.next()`.
    pub async fn subscribe(
        &self,
        task_id: &TaskId,
    ) -> QueueResult<std::pin::Pin<Box<dyn futures_util::Stream<Item = ProgressEvent> + Send>>>
    {
        use futures_util::StreamExt;

        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(Self::channel_name(task_id)).await?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = msg.get_payload().ok()?;
            serde_json::from_str(&payload).ok()
        });

        Ok(Box::pin(stream))
    }
}
