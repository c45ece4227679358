//! In-process broker
//!
//! `MemoryBroker` keeps named queues in memory and implements the same
//! channel contract as the AMQP adapter: durable queue declarations, per
//! consumer prefetch, channel-scoped delivery tags, ack / nack with requeue,
//! and redelivery of every unacknowledged message when a channel closes.
//!
//! It backs the `local` CLI mode and the processor tests. Fault injection
//! (`refuse_connections`, `fail_publishes`, `sever_connections`) lets callers
//! exercise the reconnect and requeue paths without a RabbitMQ server.
//!
//! Concurrency note: state lives behind a `std::sync::Mutex` that is never
//! held across an `.await`.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::broker::channel::{BrokerChannel, Connector, Delivery, PublishOptions};
use crate::utils::error::BrokerError;

/// How often a waiting consumer re-checks its queues.
const POLL_TICK: Duration = Duration::from_millis(5);

/// A message stored in a queue.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub payload: Vec<u8>,
    pub options: PublishOptions,
    pub redelivered: bool,
}

impl Envelope {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

#[derive(Debug, Default)]
pub struct Queue {
    pub name: String,
    pub durable: bool,
    ready: VecDeque<Envelope>,
}

impl Queue {
    pub fn new(name: &str, durable: bool) -> Self {
        Self {
            name: name.to_string(),
            durable,
            ready: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ready.is_empty()
    }
}

/// Counters exposed for assertions and the `local` run summary.
#[derive(Debug, Default, Clone)]
pub struct BrokerStats {
    pub connections: usize,
    pub refused_connections: usize,
    pub published: usize,
    pub unroutable: usize,
    pub acked: usize,
    pub nacked: usize,
    pub requeued: usize,
    /// Queue name of every consumer registration, in order.
    pub consumers_registered: Vec<String>,
}

#[derive(Debug)]
struct Unacked {
    consumer_tag: String,
    queue: String,
    envelope: Envelope,
}

#[derive(Debug, Default)]
struct ChannelState {
    consumers: Vec<(String, String)>,
    prefetch: Option<u16>,
    unacked: BTreeMap<u64, Unacked>,
    last_tag: u64,
    cursor: usize,
}

#[derive(Debug, Default)]
struct BrokerState {
    queues: HashMap<String, Queue>,
    channels: HashMap<u64, ChannelState>,
    next_channel: u64,
    refuse_connections: usize,
    failing_publishes: usize,
    stats: BrokerStats,
}

impl BrokerState {
    fn close_channel(&mut self, id: u64) {
        let Some(channel) = self.channels.remove(&id) else {
            return;
        };
        // newest first, so push_front restores delivery order
        for (_, unacked) in channel.unacked.into_iter().rev() {
            self.requeue(&unacked.queue, unacked.envelope);
        }
    }

    fn requeue(&mut self, queue: &str, mut envelope: Envelope) {
        envelope.redelivered = true;
        self.stats.requeued += 1;
        self.queues
            .entry(queue.to_string())
            .or_insert_with(|| Queue::new(queue, true))
            .ready
            .push_front(envelope);
    }

    fn enqueue(&mut self, queue: &str, envelope: Envelope) {
        match self.queues.get_mut(queue) {
            Some(q) => {
                q.ready.push_back(envelope);
                self.stats.published += 1;
            }
            // default exchange drops messages for undeclared queues
            None => self.stats.unroutable += 1,
        }
    }

    fn next_for(&mut self, id: u64) -> Option<Delivery> {
        let channel = self.channels.get_mut(&id)?;
        let count = channel.consumers.len();

        for offset in 0..count {
            let index = (channel.cursor + offset) % count;
            let (tag, queue_name) = &channel.consumers[index];

            if let Some(limit) = channel.prefetch.filter(|l| *l > 0) {
                let in_flight = channel
                    .unacked
                    .values()
                    .filter(|u| &u.consumer_tag == tag)
                    .count();
                if in_flight >= usize::from(limit) {
                    continue;
                }
            }

            let Some(envelope) = self
                .queues
                .get_mut(queue_name)
                .and_then(|q| q.ready.pop_front())
            else {
                continue;
            };

            channel.last_tag += 1;
            channel.cursor = (index + 1) % count;
            let delivery = Delivery {
                delivery_tag: channel.last_tag,
                queue: queue_name.clone(),
                payload: envelope.payload.clone(),
                message_id: envelope.options.message_id.clone(),
                redelivered: envelope.redelivered,
            };
            channel.unacked.insert(
                channel.last_tag,
                Unacked {
                    consumer_tag: tag.clone(),
                    queue: queue_name.clone(),
                    envelope,
                },
            );
            return Some(delivery);
        }
        None
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        // a panicking test thread must not wedge every other user
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Refuse the next `count` connection attempts.
    pub fn refuse_connections(&self, count: usize) {
        self.lock().refuse_connections = count;
    }

    /// Fail the next `count` publishes without closing the channel.
    pub fn fail_publishes(&self, count: usize) {
        self.lock().failing_publishes = count;
    }

    /// Drop every open channel, as if the broker connection went away.
    pub fn sever_connections(&self) {
        let mut state = self.lock();
        let ids: Vec<u64> = state.channels.keys().copied().collect();
        for id in ids {
            state.close_channel(id);
        }
    }

    pub fn declare(&self, queue: &str) {
        self.lock()
            .queues
            .entry(queue.to_string())
            .or_insert_with(|| Queue::new(queue, true));
    }

    /// Publish from outside any channel. The queue is declared if needed.
    pub fn inject(&self, queue: &str, payload: impl Into<Vec<u8>>) {
        self.declare(queue);
        self.lock().enqueue(
            queue,
            Envelope {
                payload: payload.into(),
                options: PublishOptions::default(),
                redelivered: false,
            },
        );
    }

    /// Remove and return every ready message of `queue`.
    pub fn drain(&self, queue: &str) -> Vec<Envelope> {
        self.lock()
            .queues
            .get_mut(queue)
            .map(|q| q.ready.drain(..).collect())
            .unwrap_or_default()
    }

    pub fn queue_len(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map(Queue::len).unwrap_or(0)
    }

    pub fn is_durable(&self, queue: &str) -> Option<bool> {
        self.lock().queues.get(queue).map(|q| q.durable)
    }

    pub fn unacked_count(&self) -> usize {
        self.lock()
            .channels
            .values()
            .map(|c| c.unacked.len())
            .sum()
    }

    pub fn open_channels(&self) -> usize {
        self.lock().channels.len()
    }

    /// Prefetch limit of every open channel that set one.
    pub fn prefetch_limits(&self) -> Vec<u16> {
        self.lock()
            .channels
            .values()
            .filter_map(|c| c.prefetch)
            .collect()
    }

    /// Queue names with an active consumer, across open channels.
    pub fn active_consumers(&self) -> Vec<String> {
        let mut queues: Vec<String> = self
            .lock()
            .channels
            .values()
            .flat_map(|c| c.consumers.iter().map(|(_, q)| q.clone()))
            .collect();
        queues.sort();
        queues
    }

    pub fn stats(&self) -> BrokerStats {
        self.lock().stats.clone()
    }
}

#[async_trait]
impl Connector for MemoryBroker {
    async fn open(&self) -> Result<Box<dyn BrokerChannel>, BrokerError> {
        let mut state = self.lock();
        if state.refuse_connections > 0 {
            state.refuse_connections -= 1;
            state.stats.refused_connections += 1;
            return Err(BrokerError::Connect(
                "memory broker refused the connection".to_string(),
            ));
        }

        state.next_channel += 1;
        let id = state.next_channel;
        state.channels.insert(id, ChannelState::default());
        state.stats.connections += 1;

        Ok(Box::new(MemoryChannel {
            broker: self.clone(),
            id,
        }))
    }

    fn describe(&self) -> String {
        "memory://local".to_string()
    }
}

pub struct MemoryChannel {
    broker: MemoryBroker,
    id: u64,
}

impl MemoryChannel {
    fn closed(&self) -> BrokerError {
        BrokerError::ChannelClosed(format!("memory channel {} is closed", self.id))
    }

    fn with_channel<T>(
        &self,
        f: impl FnOnce(&mut BrokerState) -> Result<T, BrokerError>,
    ) -> Result<T, BrokerError> {
        let mut state = self.broker.lock();
        if !state.channels.contains_key(&self.id) {
            return Err(self.closed());
        }
        f(&mut state)
    }
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    async fn declare_queue(&mut self, queue: &str, durable: bool) -> Result<(), BrokerError> {
        self.with_channel(|state| {
            state
                .queues
                .entry(queue.to_string())
                .or_insert_with(|| Queue::new(queue, durable));
            Ok(())
        })
    }

    async fn set_prefetch(&mut self, count: u16) -> Result<(), BrokerError> {
        let id = self.id;
        self.with_channel(|state| {
            if let Some(channel) = state.channels.get_mut(&id) {
                channel.prefetch = Some(count);
            }
            Ok(())
        })
    }

    async fn consume(&mut self, queue: &str, consumer_tag: &str) -> Result<(), BrokerError> {
        let id = self.id;
        self.with_channel(|state| {
            if !state.queues.contains_key(queue) {
                return Err(BrokerError::ChannelClosed(format!(
                    "no queue '{queue}' to consume from"
                )));
            }
            if let Some(channel) = state.channels.get_mut(&id) {
                channel
                    .consumers
                    .push((consumer_tag.to_string(), queue.to_string()));
            }
            state.stats.consumers_registered.push(queue.to_string());
            Ok(())
        })
    }

    async fn cancel(&mut self, consumer_tag: &str) -> Result<(), BrokerError> {
        let id = self.id;
        self.with_channel(|state| {
            if let Some(channel) = state.channels.get_mut(&id) {
                channel.consumers.retain(|(tag, _)| tag != consumer_tag);
                channel.cursor = 0;
            }
            Ok(())
        })
    }

    async fn next_delivery(&mut self, wait: Duration) -> Result<Option<Delivery>, BrokerError> {
        let deadline = Instant::now() + wait;
        loop {
            let id = self.id;
            if let Some(delivery) = self.with_channel(|state| Ok(state.next_for(id)))? {
                return Ok(Some(delivery));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_TICK.min(deadline - now)).await;
        }
    }

    async fn publish(
        &mut self,
        queue: &str,
        payload: &[u8],
        options: &PublishOptions,
    ) -> Result<(), BrokerError> {
        self.with_channel(|state| {
            if state.failing_publishes > 0 {
                state.failing_publishes -= 1;
                return Err(BrokerError::ChannelClosed(format!(
                    "publish to '{queue}' rejected"
                )));
            }
            state.enqueue(
                queue,
                Envelope {
                    payload: payload.to_vec(),
                    options: options.clone(),
                    redelivered: false,
                },
            );
            Ok(())
        })
    }

    async fn ack(&mut self, delivery_tag: u64) -> Result<(), BrokerError> {
        let id = self.id;
        self.with_channel(|state| {
            let removed = state
                .channels
                .get_mut(&id)
                .and_then(|c| c.unacked.remove(&delivery_tag));
            match removed {
                Some(_) => {
                    state.stats.acked += 1;
                    Ok(())
                }
                None => Err(BrokerError::UnknownDelivery(delivery_tag)),
            }
        })
    }

    async fn nack(&mut self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError> {
        let id = self.id;
        self.with_channel(|state| {
            let removed = state
                .channels
                .get_mut(&id)
                .and_then(|c| c.unacked.remove(&delivery_tag));
            let Some(unacked) = removed else {
                return Err(BrokerError::UnknownDelivery(delivery_tag));
            };
            state.stats.nacked += 1;
            if requeue {
                state.requeue(&unacked.queue, unacked.envelope);
            }
            Ok(())
        })
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        self.broker.lock().close_channel(self.id);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.broker.lock().channels.contains_key(&self.id)
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        self.broker.lock().close_channel(self.id);
    }
}
