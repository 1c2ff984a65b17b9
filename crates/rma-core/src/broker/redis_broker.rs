use async_trait::async_trait;
use futures::StreamExt as _;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::{info, warn};

use super::{MessageBus, MessageStream, TaskQueue};
use crate::config::RedisSettings;
use crate::Result;

/// Redis-backed broker: a list for tasks and a pub/sub channel for responses.
pub struct RedisBroker {
    client: redis::Client,
    conn: MultiplexedConnection,
    task_queue: String,
    channel: String,
}

impl RedisBroker {
    pub async fn connect(settings: &RedisSettings, task_queue: &str, channel: &str) -> Result<Self> {
        let client = redis::Client::open(settings.url())?;
        let conn = client.get_multiplexed_async_connection().await?;
        info!(
            host = %settings.host,
            port = settings.port,
            ssl = settings.ssl,
            task_queue,
            channel,
            "connected to redis"
        );
        Ok(Self {
            client,
            conn,
            task_queue: task_queue.to_string(),
            channel: channel.to_string(),
        })
    }
}

#[async_trait]
impl TaskQueue for RedisBroker {
    async fn push(&self, task: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.rpush::<_, _, ()>(&self.task_queue, task).await?;
        Ok(())
    }

    async fn pop(&self) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let task: Option<String> = conn.lpop(&self.task_queue, None).await?;
        Ok(task)
    }
}

#[async_trait]
impl MessageBus for RedisBroker {
    async fn publish(&self, message: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.publish::<_, _, ()>(&self.channel, message).await?;
        Ok(())
    }

    async fn subscribe(&self) -> Result<MessageStream> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(&self.channel).await?;
        info!(channel = %self.channel, "subscribed to message channel");

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            match msg.get_payload::<String>() {
                Ok(payload) => Some(payload),
                Err(e) => {
                    warn!(error = %e, "dropping non-text pub/sub payload");
                    None
                }
            }
        });
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    fn settings() -> RedisSettings {
        RedisSettings {
            host: std::env::var("REDIS_HOST").unwrap_or_else(|_| "127.0.0.1".into()),
            port: std::env::var("REDIS_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(6379),
            password: std::env::var("REDIS_PASSWORD").ok(),
            ssl: false,
        }
    }

    fn unique(prefix: &str) -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        format!("{prefix}:{}:{nanos}", std::process::id())
    }

    #[tokio::test]
    #[ignore = "needs a Redis server (REDIS_HOST, REDIS_PORT)"]
    async fn queue_and_channel_round_trip() {
        let tasks = unique("rma:test:tasks");
        let channel = unique("rma:test:messages");
        let broker = RedisBroker::connect(&settings(), &tasks, &channel)
            .await
            .unwrap();

        broker.push("first").await.unwrap();
        broker.push("second").await.unwrap();
        assert_eq!(broker.pop().await.unwrap().as_deref(), Some("first"));
        assert_eq!(broker.pop().await.unwrap().as_deref(), Some("second"));
        assert_eq!(broker.pop().await.unwrap(), None);

        let mut messages = broker.subscribe().await.unwrap();
        broker.publish("hello").await.unwrap();
        let got = tokio::time::timeout(Duration::from_secs(5), messages.next())
            .await
            .unwrap();
        assert_eq!(got.as_deref(), Some("hello"));
    }
}
