mod settings;

use std::time::Duration;

use config::{Config, ConfigError, Environment, File};

use crate::broker::AmqpParams;
use crate::processor::ProcessorOptions;
use settings::PartialSettings;

pub use settings::{
    LogSettings, PollSettings, ProcessorSettings, QueueSettings, RabbitMqSettings,
    ReconnectSettings, Settings, ShutdownSettings,
};

/// Loads the configuration from the default file and environment variables.
///
/// `config/default.toml` is optional; environment variables such as
/// `RABBITMQ_HOST` or `INPUT_QUEUE` override it, and anything still missing
/// falls back to `Settings::default()`.
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(Environment::default().separator("_"));

    let config = builder.build()?;
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(merge(partial, Settings::default()))
}

fn merge(partial: PartialSettings, default: Settings) -> Settings {
    let rabbitmq = partial.rabbitmq.unwrap_or_default();
    let input = partial.input.unwrap_or_default();
    let output = partial.output.unwrap_or_default();
    let processor = partial.processor.unwrap_or_default();
    let log = partial.log.unwrap_or_default();
    let reconnect = partial.reconnect.unwrap_or_default();
    let shutdown = partial.shutdown.unwrap_or_default();
    let poll = partial.poll.unwrap_or_default();

    Settings {
        rabbitmq: RabbitMqSettings {
            host: rabbitmq.host.unwrap_or(default.rabbitmq.host),
            port: rabbitmq.port.unwrap_or(default.rabbitmq.port),
            user: rabbitmq.user.unwrap_or(default.rabbitmq.user),
            pass: rabbitmq.pass.unwrap_or(default.rabbitmq.pass),
            vhost: rabbitmq.vhost.unwrap_or(default.rabbitmq.vhost),
            heartbeat: rabbitmq.heartbeat.unwrap_or(default.rabbitmq.heartbeat),
        },
        input: QueueSettings {
            queue: input.queue.unwrap_or(default.input.queue),
        },
        output: QueueSettings {
            queue: output.queue.unwrap_or(default.output.queue),
        },
        processor: ProcessorSettings {
            id: processor.id.unwrap_or(default.processor.id),
        },
        log: LogSettings {
            level: log.level.unwrap_or(default.log.level),
        },
        reconnect: ReconnectSettings {
            base: reconnect.base.unwrap_or(default.reconnect.base),
            cap: reconnect.cap.unwrap_or(default.reconnect.cap),
        },
        shutdown: ShutdownSettings {
            timeout: shutdown.timeout.unwrap_or(default.shutdown.timeout),
        },
        poll: PollSettings {
            slice: poll.slice.unwrap_or(default.poll.slice),
            pause: poll.pause.unwrap_or(default.poll.pause),
        },
    }
}

impl Settings {
    pub fn amqp_params(&self) -> AmqpParams {
        AmqpParams {
            host: self.rabbitmq.host.clone(),
            port: self.rabbitmq.port,
            user: self.rabbitmq.user.clone(),
            password: self.rabbitmq.pass.clone(),
            vhost: self.rabbitmq.vhost.clone(),
            heartbeat: self.rabbitmq.heartbeat,
        }
    }

    pub fn processor_options(&self) -> ProcessorOptions {
        ProcessorOptions {
            processor_id: self.processor.id.clone(),
            reconnect_base: Duration::from_secs(self.reconnect.base),
            reconnect_cap: Duration::from_secs(self.reconnect.cap),
            poll_slice: Duration::from_millis(self.poll.slice),
            idle_pause: Duration::from_millis(self.poll.pause),
            shutdown_timeout: Duration::from_secs(self.shutdown.timeout),
        }
    }
}

#[cfg(test)]
mod tests;
