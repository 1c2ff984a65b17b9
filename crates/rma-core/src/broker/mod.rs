//! Task queue and message channel between the session manager and the
//! orchestrator.
//!
//! Requests travel over a FIFO [`TaskQueue`]; responses are broadcast on a
//! [`MessageBus`] that every session manager instance subscribes to. Both
//! have an in-process implementation ([`MemoryBroker`]) and a Redis one
//! ([`RedisBroker`]: `RPUSH`/`LPOP` on a list, `PUBLISH`/`SUBSCRIBE` on a
//! channel).

pub mod memory;
pub mod redis_broker;

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;

use crate::config::BrokerSettings;
use crate::Result;

pub use self::memory::MemoryBroker;
pub use self::redis_broker::RedisBroker;

/// Raw messages received from a [`MessageBus`] subscription.
pub type MessageStream = Pin<Box<dyn Stream<Item = String> + Send>>;

#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Append a task to the tail of the queue.
    async fn push(&self, task: &str) -> Result<()>;

    /// Take the task at the head of the queue, if any. Never blocks.
    async fn pop(&self) -> Result<Option<String>>;
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, message: &str) -> Result<()>;

    /// Start receiving messages published after this call returns.
    async fn subscribe(&self) -> Result<MessageStream>;
}

/// Both halves of the broker, shareable across tasks.
#[derive(Clone)]
pub struct Broker {
    pub tasks: Arc<dyn TaskQueue>,
    pub messages: Arc<dyn MessageBus>,
}

impl Broker {
    /// An in-process broker. Only useful when the session manager and the
    /// orchestrator share one process.
    pub fn memory() -> Self {
        let broker = Arc::new(MemoryBroker::new());
        Self {
            tasks: broker.clone(),
            messages: broker,
        }
    }

    pub async fn connect(settings: &BrokerSettings) -> Result<Self> {
        match &settings.redis {
            None => Ok(Self::memory()),
            Some(redis) => {
                let broker = Arc::new(
                    RedisBroker::connect(redis, &settings.task_queue, &settings.message_channel)
                        .await?,
                );
                Ok(Self {
                    tasks: broker.clone(),
                    messages: broker,
                })
            }
        }
    }
}
