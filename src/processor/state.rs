use std::collections::HashMap;
use std::sync::Arc;

use crate::broker::BrokerChannel;
use crate::pipeline::Pipeline;
use crate::processor::options::SubscriptionOptions;

/// A binding of input queue to pipeline to output queue.
#[derive(Clone)]
pub struct Subscription {
    pub input_queue: String,
    pub output_queue: String,
    pub pipeline: Arc<Pipeline>,
    pub options: SubscriptionOptions,
}

/// Everything guarded by the processor lock.
#[derive(Default)]
pub(crate) struct ConnectionState {
    pub channel: Option<Box<dyn BrokerChannel>>,
    pub connected: bool,
    pub closed: bool,
    pub reconnect_attempt: u32,
    /// Bumped on every successful connect and on close.
    pub generation: u64,
    /// Keyed by input queue, in subscription order.
    pub subscriptions: Vec<Subscription>,
    /// Input queue to consumer tag, for the current channel only.
    pub attached: HashMap<String, String>,
}

impl ConnectionState {
    pub fn subscription(&self, input_queue: &str) -> Option<&Subscription> {
        self.subscriptions
            .iter()
            .find(|s| s.input_queue == input_queue)
    }

    /// Insert or replace by input queue.
    pub fn record(&mut self, subscription: Subscription) {
        match self
            .subscriptions
            .iter_mut()
            .find(|s| s.input_queue == subscription.input_queue)
        {
            Some(existing) => *existing = subscription,
            None => self.subscriptions.push(subscription),
        }
    }

    /// A channel that is still usable, if any.
    pub fn live_channel(&mut self) -> Option<&mut Box<dyn BrokerChannel>> {
        if !self.connected {
            return None;
        }
        self.channel.as_mut().filter(|c| c.is_open())
    }

    pub fn mark_disconnected(&mut self) {
        self.connected = false;
    }
}
