use std::time::Duration;

// ---------------------------------------------------------------------------
// RedisSettings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct RedisSettings {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub ssl: bool,
}

impl RedisSettings {
    /// Connection URL in the form `redis[s]://[:password@]host:port`.
    pub fn url(&self) -> String {
        let scheme = if self.ssl { "rediss" } else { "redis" };
        match self.password.as_deref().filter(|p| !p.is_empty()) {
            Some(password) => format!(
                "{scheme}://:{}@{}:{}",
                urlencoding::encode(password),
                self.host,
                self.port
            ),
            None => format!("{scheme}://{}:{}", self.host, self.port),
        }
    }
}

// ---------------------------------------------------------------------------
// BrokerSettings
// ---------------------------------------------------------------------------

pub const DEFAULT_TASK_QUEUE: &str = "rma:tasks";
pub const DEFAULT_MESSAGE_CHANNEL: &str = "rma:messages";

/// Where tasks and responses travel. `redis: None` selects the in-process broker.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerSettings {
    pub redis: Option<RedisSettings>,
    pub task_queue: String,
    pub message_channel: String,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            redis: None,
            task_queue: DEFAULT_TASK_QUEUE.to_string(),
            message_channel: DEFAULT_MESSAGE_CHANNEL.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionSettings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    /// How long a dialog may go without any response before the client is
    /// told it timed out.
    pub max_response_timeout: Duration,
    /// Capacity of the per-connection outbound queue.
    pub outbound_buffer: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_response_timeout: Duration::from_secs(120),
            outbound_buffer: 64,
        }
    }
}

// ---------------------------------------------------------------------------
// WorkerSettings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSettings {
    pub concurrency: usize,
    /// Sleep between polls when the task queue is empty.
    pub poll_interval: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            concurrency: 5,
            poll_interval: Duration::from_secs(1),
        }
    }
}
