use async_trait::async_trait;
use futures::StreamExt;
use std::collections::VecDeque;
use tokio::sync::{broadcast, Mutex};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;

use super::{MessageBus, MessageStream, TaskQueue};
use crate::Result;

pub struct MemoryBroker {
    queue: Mutex<VecDeque<String>>,
    tx: broadcast::Sender<String>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self {
            queue: Mutex::new(VecDeque::new()),
            tx,
        }
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskQueue for MemoryBroker {
    async fn push(&self, task: &str) -> Result<()> {
        self.queue.lock().await.push_back(task.to_string());
        Ok(())
    }

    async fn pop(&self) -> Result<Option<String>> {
        Ok(self.queue.lock().await.pop_front())
    }
}

#[async_trait]
impl MessageBus for MemoryBroker {
    async fn publish(&self, message: &str) -> Result<()> {
        // No subscribers is not an error: pub/sub drops the message.
        let _ = self.tx.send(message.to_string());
        Ok(())
    }

    async fn subscribe(&self) -> Result<MessageStream> {
        let stream = BroadcastStream::new(self.tx.subscribe()).filter_map(|msg| async move {
            match msg {
                Ok(m) => Some(m),
                Err(BroadcastStreamRecvError::Lagged(n)) => {
                    warn!(skipped = n, "message subscriber lagged");
                    None
                }
            }
        });
        Ok(Box::pin(stream))
    }
}
