use std::fmt;

use serde::Deserialize;

/// Top-level configuration settings for the application.
///
/// Each section maps to an environment prefix: `RABBITMQ_HOST` is
/// `rabbitmq.host`, `INPUT_QUEUE` is `input.queue`, and so on.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub rabbitmq: RabbitMqSettings,
    pub input: QueueSettings,
    pub output: QueueSettings,
    pub processor: ProcessorSettings,
    pub log: LogSettings,
    pub reconnect: ReconnectSettings,
    pub shutdown: ShutdownSettings,
    pub poll: PollSettings,
}

/// Broker connection parameters.
#[derive(Deserialize, Clone, PartialEq)]
pub struct RabbitMqSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub vhost: String,
    /// Heartbeat interval in seconds.
    pub heartbeat: u16,
}

impl fmt::Debug for RabbitMqSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RabbitMqSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("pass", &"***")
            .field("vhost", &self.vhost)
            .field("heartbeat", &self.heartbeat)
            .finish()
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct QueueSettings {
    pub queue: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ProcessorSettings {
    pub id: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LogSettings {
    pub level: String,
}

/// Reconnect backoff, in seconds.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ReconnectSettings {
    pub base: u64,
    pub cap: u64,
}

/// Seconds `close()` waits for the consume task.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ShutdownSettings {
    pub timeout: u64,
}

/// Consume loop pacing, in milliseconds.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PollSettings {
    pub slice: u64,
    pub pause: u64,
}

/// Partial configuration settings loaded from files or environment.
///
/// Missing values are filled from `Settings::default()`.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub rabbitmq: Option<PartialRabbitMqSettings>,
    pub input: Option<PartialQueueSettings>,
    pub output: Option<PartialQueueSettings>,
    pub processor: Option<PartialProcessorSettings>,
    pub log: Option<PartialLogSettings>,
    pub reconnect: Option<PartialReconnectSettings>,
    pub shutdown: Option<PartialShutdownSettings>,
    pub poll: Option<PartialPollSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialRabbitMqSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub pass: Option<String>,
    pub vhost: Option<String>,
    pub heartbeat: Option<u16>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialQueueSettings {
    pub queue: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialProcessorSettings {
    pub id: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialReconnectSettings {
    pub base: Option<u64>,
    pub cap: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialShutdownSettings {
    pub timeout: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialPollSettings {
    pub slice: Option<u64>,
    pub pause: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            rabbitmq: RabbitMqSettings {
                host: "localhost".to_string(),
                port: 5672,
                user: "guest".to_string(),
                pass: "guest".to_string(),
                vhost: "/".to_string(),
                heartbeat: 60,
            },
            input: QueueSettings {
                queue: "nx_01_ai_queue".to_string(),
            },
            output: QueueSettings {
                queue: "nx_02_queue".to_string(),
            },
            processor: ProcessorSettings {
                id: "X".to_string(),
            },
            log: LogSettings {
                level: "info".to_string(),
            },
            reconnect: ReconnectSettings { base: 5, cap: 300 },
            shutdown: ShutdownSettings { timeout: 5 },
            poll: PollSettings {
                slice: 200,
                pause: 50,
            },
        }
    }
}
