//! Queue processor engine
//!
//! Responsibilities:
//! - owning the broker channel and replacing it on reconnect
//! - recording subscriptions and replaying them on every new channel
//! - running the single background consume task
//! - settling each delivery: ack, publish-then-ack, or nack with requeue
//!
//! Concurrency notes:
//! - every channel operation happens under one `tokio::sync::Mutex`
//! - the consume task releases that lock while a pipeline runs on the
//!   blocking pool, so `publish` and `subscribe` never wait on a slow stage
//! - `close` stops new deliveries first and gives the one in flight up to
//!   `shutdown_timeout` to be settled before the channel goes away
//! - a delivery is only settled on the channel generation that produced it

use std::any::Any;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use tokio::task::{self, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::broker::{BrokerChannel, Connector, Delivery, PublishOptions};
use crate::pipeline::{Message, Outcome, Pipeline};
use crate::processor::options::{
    HandlerFailurePolicy, ProcessorOptions, SubscriptionOptions, backoff_delay,
};
use crate::processor::state::{ConnectionState, Subscription};
use crate::utils::error::{BrokerError, ProcessorError};

/// Prefetch applied to every consumer: one in-flight message per subscription.
const PREFETCH: u16 = 1;

struct Shared {
    connector: Arc<dyn Connector>,
    options: ProcessorOptions,
    state: Mutex<ConnectionState>,
    shutdown: CancellationToken,
    worker: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Consumes from input queues, runs pipelines and publishes their output.
///
/// Cloning is cheap and every clone drives the same connection.
#[derive(Clone)]
pub struct QueueProcessor {
    shared: Arc<Shared>,
}

enum Step {
    Delivered {
        delivery: Delivery,
        subscription: Subscription,
        generation: u64,
    },
    Idle,
    Disconnected,
    Shutdown,
}

enum Settle {
    Ack,
    Requeue,
    Publish(Message),
}

impl QueueProcessor {
    pub fn new(connector: Arc<dyn Connector>, options: ProcessorOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                connector,
                options,
                state: Mutex::new(ConnectionState::default()),
                shutdown: CancellationToken::new(),
                worker: std::sync::Mutex::new(None),
            }),
        }
    }

    pub fn processor_id(&self) -> &str {
        &self.shared.options.processor_id
    }

    pub fn options(&self) -> &ProcessorOptions {
        &self.shared.options
    }

    pub async fn is_connected(&self) -> bool {
        self.lock().await.live_channel().is_some()
    }

    pub async fn reconnect_attempt(&self) -> u32 {
        self.lock().await.reconnect_attempt
    }

    /// `(input_queue, output_queue)` for every stored subscription.
    pub async fn subscriptions(&self) -> Vec<(String, String)> {
        self.lock()
            .await
            .subscriptions
            .iter()
            .map(|s| (s.input_queue.clone(), s.output_queue.clone()))
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    async fn lock(&self) -> MutexGuard<'_, ConnectionState> {
        self.shared.state.lock().await
    }

    /// Open a fresh channel and restore every subscription on it.
    ///
    /// Returns `false` when the broker is unreachable or the processor was closed.
    pub async fn connect(&self) -> bool {
        let mut state = self.lock().await;
        self.connect_locked(&mut state).await
    }

    async fn connect_locked(&self, state: &mut ConnectionState) -> bool {
        let processor = self.processor_id();
        if state.closed || self.is_closed() {
            warn!(processor, "connect refused, processor is closed");
            return false;
        }

        let endpoint = self.shared.connector.describe();
        let mut channel = match self.shared.connector.open().await {
            Ok(channel) => channel,
            Err(e) => {
                error!(processor, %endpoint, error = %e, "failed to connect to broker");
                state.mark_disconnected();
                return false;
            }
        };

        if let Some(mut stale) = state.channel.take() {
            if let Err(e) = stale.close().await {
                debug!(processor, error = %e, "stale channel did not close cleanly");
            }
        }
        state.connected = false;
        state.generation += 1;
        state.attached.clear();

        for subscription in state.subscriptions.clone() {
            match attach(channel.as_mut(), processor, &subscription).await {
                Ok(tag) => {
                    state.attached.insert(subscription.input_queue.clone(), tag);
                }
                Err(e) => {
                    error!(
                        processor,
                        queue = %subscription.input_queue,
                        error = %e,
                        "failed to restore subscription"
                    );
                    let _ = channel.close().await;
                    return false;
                }
            }
        }

        state.channel = Some(channel);
        state.connected = true;
        state.reconnect_attempt = 0;
        info!(
            processor,
            %endpoint,
            generation = state.generation,
            subscriptions = state.subscriptions.len(),
            "connected to broker"
        );
        true
    }

    /// Bind `input_queue` to `pipeline`, publishing results to `output_queue`.
    ///
    /// Subscribing an input queue again replaces the previous binding. The
    /// subscription is kept until `close()` and replayed after every reconnect.
    pub async fn subscribe(
        &self,
        input_queue: &str,
        pipeline: Arc<Pipeline>,
        output_queue: &str,
        options: SubscriptionOptions,
    ) -> Result<(), ProcessorError> {
        let processor = self.processor_id();
        let mut state = self.lock().await;
        if state.closed || self.is_closed() {
            return Err(ProcessorError::ShuttingDown);
        }
        if state.live_channel().is_none() && !self.connect_locked(&mut state).await {
            error!(processor, queue = input_queue, "cannot subscribe while disconnected");
            return Err(ProcessorError::NotConnected);
        }

        let subscription = Subscription {
            input_queue: input_queue.to_string(),
            output_queue: output_queue.to_string(),
            pipeline,
            options,
        };
        state.record(subscription.clone());

        let previous = state.attached.remove(input_queue);
        match replace_consumer(&mut state, processor, previous, &subscription).await {
            Ok(tag) => {
                state.attached.insert(input_queue.to_string(), tag);
                info!(
                    processor,
                    input = input_queue,
                    output = output_queue,
                    pipeline = %subscription.pipeline,
                    "subscribed"
                );
            }
            Err(e) => {
                // kept as recorded, the consume task replays it after reconnecting
                error!(processor, queue = input_queue, error = %e, "subscription setup failed");
                state.mark_disconnected();
            }
        }
        drop(state);

        self.ensure_worker();
        Ok(())
    }

    /// `subscribe` with default options.
    pub async fn process_with_chain(
        &self,
        input_queue: &str,
        pipeline: Arc<Pipeline>,
        output_queue: &str,
    ) -> Result<(), ProcessorError> {
        self.subscribe(input_queue, pipeline, output_queue, SubscriptionOptions::default())
            .await
    }

    /// Publish one message as a persistent delivery on `queue`.
    pub async fn publish(&self, queue: &str, message: &Message, options: &PublishOptions) -> bool {
        let processor = self.processor_id();
        let mut state = self.lock().await;
        if state.closed || self.is_closed() {
            warn!(processor, queue, "publish refused, processor is closed");
            return false;
        }
        if state.live_channel().is_none() && !self.connect_locked(&mut state).await {
            return false;
        }

        match publish_locked(&mut state, queue, message, options).await {
            Ok(()) => {
                debug!(processor, queue, "published message");
                true
            }
            Err(BrokerError::Encode(e)) => {
                error!(processor, queue, error = %e, "failed to encode message");
                false
            }
            Err(e @ BrokerError::Unconfirmed(_)) => {
                error!(processor, queue, error = %e, "publish rejected");
                false
            }
            Err(e) => {
                error!(processor, queue, error = %e, "publish failed");
                state.mark_disconnected();
                false
            }
        }
    }

    /// Stop consuming, let the delivery in flight finish, then close the channel.
    ///
    /// A delivery still running after `shutdown_timeout` is abandoned and the
    /// broker redelivers it once the channel is closed. Safe to call more than once.
    pub async fn close(&self) {
        let processor = self.processor_id();
        self.shared.shutdown.cancel();

        let handle = self
            .shared
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(mut handle) = handle {
            let timeout = self.shared.options.shutdown_timeout;
            match tokio::time::timeout(timeout, &mut handle).await {
                Ok(Ok(())) => debug!(processor, "consume task stopped"),
                Ok(Err(e)) => warn!(processor, error = %e, "consume task ended abnormally"),
                Err(_) => {
                    warn!(
                        processor,
                        timeout_ms = timeout.as_millis() as u64,
                        "consume task did not stop in time, abandoning delivery in flight"
                    );
                    handle.abort();
                }
            }
        }

        let mut state = self.lock().await;
        if !state.closed {
            state.closed = true;
            state.connected = false;
            state.generation += 1;
            if let Some(mut channel) = state.channel.take() {
                if let Err(e) = channel.close().await {
                    warn!(processor, error = %e, "channel did not close cleanly");
                }
            }
            state.subscriptions.clear();
            state.attached.clear();
            info!(processor, "processor closed");
        }
    }

    fn ensure_worker(&self) {
        let mut worker = self
            .shared
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if worker.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        *worker = Some(tokio::spawn(self.clone().consume_loop()));
    }

    async fn consume_loop(self) {
        let processor = self.processor_id().to_string();
        info!(processor, "consume task started");

        loop {
            match self.poll_once().await {
                Step::Delivered {
                    delivery,
                    subscription,
                    generation,
                } => self.handle(delivery, &subscription, generation).await,
                Step::Idle => {}
                Step::Disconnected => {
                    self.reconnect().await;
                    continue;
                }
                Step::Shutdown => break,
            }

            tokio::select! {
                _ = self.shared.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.shared.options.idle_pause) => {}
            }
        }

        info!(processor, "consume task stopped");
    }

    async fn poll_once(&self) -> Step {
        if self.shared.shutdown.is_cancelled() {
            return Step::Shutdown;
        }

        let mut state = self.lock().await;
        if state.closed {
            return Step::Shutdown;
        }
        let generation = state.generation;
        let Some(channel) = state.live_channel() else {
            return Step::Disconnected;
        };

        let polled = tokio::select! {
            _ = self.shared.shutdown.cancelled() => return Step::Shutdown,
            polled = channel.next_delivery(self.shared.options.poll_slice) => polled,
        };

        match polled {
            Ok(None) => Step::Idle,
            Ok(Some(delivery)) => match state.subscription(&delivery.queue).cloned() {
                Some(subscription) => Step::Delivered {
                    delivery,
                    subscription,
                    generation,
                },
                None => {
                    warn!(
                        processor = self.processor_id(),
                        queue = %delivery.queue,
                        "delivery for a queue without subscription, requeueing"
                    );
                    settle(&mut state, delivery.delivery_tag, true).await;
                    Step::Idle
                }
            },
            Err(e) => {
                warn!(processor = self.processor_id(), error = %e, "lost broker channel");
                state.mark_disconnected();
                Step::Disconnected
            }
        }
    }

    async fn handle(&self, delivery: Delivery, subscription: &Subscription, generation: u64) {
        let processor = self.processor_id();
        let tag = delivery.delivery_tag;
        let message = Message::decode(&delivery.payload);
        debug!(
            processor,
            queue = %delivery.queue,
            delivery_tag = tag,
            redelivered = delivery.redelivered,
            message_id = delivery.message_id.as_deref().unwrap_or(""),
            raw = message.is_raw(),
            keys = ?message.keys(),
            "received message"
        );

        let pipeline = subscription.pipeline.clone();
        let running = pipeline.clone();
        let result = task::spawn_blocking(move || running.process_detailed(message)).await;

        let decision = match result {
            Err(e) => {
                let reason = if e.is_panic() {
                    panic_message(e.into_panic().as_ref())
                } else {
                    e.to_string()
                };
                error!(
                    processor,
                    queue = %delivery.queue,
                    reason = %reason,
                    "pipeline did not complete, requeueing"
                );
                Settle::Requeue
            }
            Ok(report) => {
                if let Some(stage) = &report.failed_stage {
                    let error = report
                        .error
                        .as_ref()
                        .map(|e| format!("{e:#}"))
                        .unwrap_or_default();
                    if report.handler_failed {
                        error!(processor, stage = %stage, error = %error, "error handler failed");
                    } else {
                        warn!(
                            processor,
                            stage = %stage,
                            error = %error,
                            recovered = report.recovered,
                            "stage failed"
                        );
                    }
                }
                debug!(
                    processor,
                    pipeline = pipeline.name(),
                    elapsed_ms = report.total_time().as_millis() as u64,
                    timings = ?report.timings,
                    "pipeline finished"
                );

                match report.outcome {
                    Outcome::Forward(message) => Settle::Publish(message),
                    Outcome::Drop
                        if report.handler_failed
                            && subscription.options.on_handler_failure
                                == HandlerFailurePolicy::Requeue =>
                    {
                        Settle::Requeue
                    }
                    Outcome::Drop => Settle::Ack,
                }
            }
        };

        let mut state = self.lock().await;
        if state.generation != generation {
            warn!(
                processor,
                delivery_tag = tag,
                "channel replaced while processing, leaving message for redelivery"
            );
            return;
        }

        match decision {
            Settle::Ack => {
                debug!(processor, delivery_tag = tag, "message dropped");
                settle(&mut state, tag, false).await;
            }
            Settle::Requeue => {
                settle(&mut state, tag, true).await;
            }
            Settle::Publish(message) => {
                let output = &subscription.output_queue;
                match publish_locked(&mut state, output, &message, &subscription.options.publish)
                    .await
                {
                    Ok(()) => {
                        info!(
                            processor,
                            input = %delivery.queue,
                            output = %output,
                            "processed message"
                        );
                        settle(&mut state, tag, false).await;
                    }
                    Err(e) => {
                        error!(
                            processor,
                            output = %output,
                            error = %e,
                            "publish failed, requeueing"
                        );
                        // the channel itself is still healthy after these
                        if !matches!(e, BrokerError::Encode(_) | BrokerError::Unconfirmed(_)) {
                            state.mark_disconnected();
                        }
                        settle(&mut state, tag, true).await;
                    }
                }
            }
        }
    }

    async fn reconnect(&self) {
        let attempt = {
            let mut state = self.lock().await;
            if state.closed {
                return;
            }
            state.reconnect_attempt += 1;
            state.reconnect_attempt
        };

        let options = &self.shared.options;
        let delay = backoff_delay(options.reconnect_base, options.reconnect_cap, attempt);
        warn!(
            processor = self.processor_id(),
            attempt,
            delay_ms = delay.as_millis() as u64,
            "reconnecting to broker"
        );

        tokio::select! {
            _ = self.shared.shutdown.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
        self.connect().await;
    }
}

/// Declare both queues durable, set prefetch and register a consumer.
async fn attach(
    channel: &mut dyn BrokerChannel,
    processor: &str,
    subscription: &Subscription,
) -> Result<String, BrokerError> {
    channel.declare_queue(&subscription.input_queue, true).await?;
    channel.declare_queue(&subscription.output_queue, true).await?;
    channel.set_prefetch(PREFETCH).await?;

    let tag = format!("{processor}-{}", Uuid::new_v4());
    channel.consume(&subscription.input_queue, &tag).await?;
    Ok(tag)
}

async fn replace_consumer(
    state: &mut ConnectionState,
    processor: &str,
    previous: Option<String>,
    subscription: &Subscription,
) -> Result<String, BrokerError> {
    let channel = state.live_channel().ok_or(BrokerError::NotConnected)?;
    if let Some(tag) = previous {
        channel.cancel(&tag).await?;
    }
    attach(channel.as_mut(), processor, subscription).await
}

async fn publish_locked(
    state: &mut ConnectionState,
    queue: &str,
    message: &Message,
    options: &PublishOptions,
) -> Result<(), BrokerError> {
    let payload = message.encode()?;
    let channel = state.live_channel().ok_or(BrokerError::NotConnected)?;
    channel.declare_queue(queue, true).await?;
    channel.publish(queue, &payload, options).await
}

/// Ack (`requeue == false`) or nack with requeue on the current channel.
///
/// Uses the channel even after a failed publish marked the processor
/// disconnected, so the message goes back to the queue right away.
async fn settle(state: &mut ConnectionState, delivery_tag: u64, requeue: bool) {
    let Some(channel) = state.channel.as_mut().filter(|c| c.is_open()) else {
        debug!(delivery_tag, "no open channel, broker will redeliver");
        return;
    };
    let result = if requeue {
        channel.nack(delivery_tag, true).await
    } else {
        channel.ack(delivery_tag).await
    };
    if let Err(e) = result {
        warn!(delivery_tag, requeue, error = %e, "failed to settle delivery");
        state.mark_disconnected();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}
