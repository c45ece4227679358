//! RabbitMQ adapter built on `lapin`
//!
//! Messages go through the default exchange with the queue name as routing
//! key. Every consumer registered on the channel feeds one merged delivery
//! stream, which `next_delivery` polls in bounded time slices. Channels run in
//! confirm mode, so `publish` only succeeds once the broker acked the message.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{BoxStream, SelectAll};
use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions,
    BasicPublishOptions, BasicQosOptions, ConfirmSelectOptions, QueueDeclareOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::{AMQPValue, FieldTable, ShortString};
use lapin::uri::{AMQPAuthority, AMQPQueryString, AMQPUri, AMQPUserInfo};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tracing::debug;

use crate::broker::channel::{BrokerChannel, Connector, Delivery, PublishOptions};
use crate::utils::error::BrokerError;

/// AMQP delivery mode for messages that survive a broker restart.
const PERSISTENT: u8 = 2;

type DeliveryStream = BoxStream<'static, (String, Result<lapin::message::Delivery, lapin::Error>)>;

#[derive(Debug, Clone)]
pub struct AmqpParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub vhost: String,
    pub heartbeat: u16,
}

#[derive(Debug, Clone)]
pub struct AmqpConnector {
    params: AmqpParams,
}

impl AmqpConnector {
    pub fn new(params: AmqpParams) -> Self {
        Self { params }
    }

    fn uri(&self) -> AMQPUri {
        AMQPUri {
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: self.params.user.clone(),
                    password: self.params.password.clone(),
                },
                host: self.params.host.clone(),
                port: self.params.port,
            },
            vhost: self.params.vhost.clone(),
            query: AMQPQueryString {
                heartbeat: Some(self.params.heartbeat),
                ..AMQPQueryString::default()
            },
            ..AMQPUri::default()
        }
    }
}

#[async_trait]
impl Connector for AmqpConnector {
    async fn open(&self) -> Result<Box<dyn BrokerChannel>, BrokerError> {
        let connection = Connection::connect_uri(self.uri(), ConnectionProperties::default())
            .await
            .map_err(|e| BrokerError::Connect(format!("{}: {e}", self.describe())))?;
        let channel = connection.create_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;
        debug!(channel_id = channel.id(), "amqp channel established");

        Ok(Box::new(AmqpChannel {
            connection,
            channel,
            deliveries: SelectAll::new(),
        }))
    }

    fn describe(&self) -> String {
        format!(
            "amqp://{}@{}:{}{}",
            self.params.user, self.params.host, self.params.port, self.params.vhost
        )
    }
}

pub struct AmqpChannel {
    connection: Connection,
    channel: Channel,
    deliveries: SelectAll<DeliveryStream>,
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn declare_queue(&mut self, queue: &str, durable: bool) -> Result<(), BrokerError> {
        self.channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn set_prefetch(&mut self, count: u16) -> Result<(), BrokerError> {
        self.channel
            .basic_qos(count, BasicQosOptions::default())
            .await?;
        Ok(())
    }

    async fn consume(&mut self, queue: &str, consumer_tag: &str) -> Result<(), BrokerError> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;
        let queue = queue.to_string();
        self.deliveries
            .push(consumer.map(move |delivery| (queue.clone(), delivery)).boxed());
        Ok(())
    }

    async fn cancel(&mut self, consumer_tag: &str) -> Result<(), BrokerError> {
        self.channel
            .basic_cancel(consumer_tag, BasicCancelOptions::default())
            .await?;
        Ok(())
    }

    async fn next_delivery(&mut self, wait: Duration) -> Result<Option<Delivery>, BrokerError> {
        if !self.is_open() {
            return Err(BrokerError::ChannelClosed(format!(
                "channel {} is not open",
                self.channel.id()
            )));
        }
        if self.deliveries.is_empty() {
            tokio::time::sleep(wait).await;
            return Ok(None);
        }

        match tokio::time::timeout(wait, self.deliveries.next()).await {
            Err(_elapsed) => Ok(None),
            Ok(None) => Err(BrokerError::ChannelClosed(
                "all consumers were closed by the broker".to_string(),
            )),
            Ok(Some((_, Err(e)))) => Err(e.into()),
            Ok(Some((queue, Ok(delivery)))) => Ok(Some(Delivery {
                delivery_tag: delivery.delivery_tag,
                queue,
                message_id: delivery
                    .properties
                    .message_id()
                    .as_ref()
                    .map(|id| id.as_str().to_string()),
                redelivered: delivery.redelivered,
                payload: delivery.data,
            })),
        }
    }

    async fn publish(
        &mut self,
        queue: &str,
        payload: &[u8],
        options: &PublishOptions,
    ) -> Result<(), BrokerError> {
        let mut properties = BasicProperties::default()
            .with_delivery_mode(PERSISTENT)
            .with_content_type(ShortString::from(options.content_type.clone()));
        if let Some(id) = &options.message_id {
            properties = properties.with_message_id(ShortString::from(id.clone()));
        }
        if !options.headers.is_empty() {
            let mut headers = FieldTable::default();
            for (key, value) in &options.headers {
                headers.insert(
                    ShortString::from(key.clone()),
                    AMQPValue::LongString(value.clone().into()),
                );
            }
            properties = properties.with_headers(headers);
        }

        let confirmation = self
            .channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await?
            .await?;
        confirmed(queue, confirmation)
    }

    async fn ack(&mut self, delivery_tag: u64) -> Result<(), BrokerError> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await?;
        Ok(())
    }

    async fn nack(&mut self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError> {
        self.channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    requeue,
                    ..BasicNackOptions::default()
                },
            )
            .await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        if self.channel.status().connected() {
            self.channel.close(200, "closing").await?;
        }
        if self.connection.status().connected() {
            self.connection.close(200, "closing").await?;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }
}

/// Only a broker ack counts as a successful publish.
pub(crate) fn confirmed(queue: &str, confirmation: Confirmation) -> Result<(), BrokerError> {
    match confirmation {
        Confirmation::Ack(_) => Ok(()),
        Confirmation::Nack(_) => Err(BrokerError::Unconfirmed(format!(
            "broker nacked message for '{queue}'"
        ))),
        Confirmation::NotRequested => Err(BrokerError::Unconfirmed(format!(
            "channel is not in confirm mode, publish to '{queue}' unverified"
        ))),
    }
}
