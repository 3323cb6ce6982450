use std::collections::BTreeMap;
use std::fmt;

use hitrelay_core::{DestinationKey, Message, SenderId, Sentinel, Step};
use serde_json::Value;

use crate::queue::MessageQueue;

/// Callback receiving response payloads sent back by a channel endpoint.
pub type ResponseHandler = Box<dyn FnMut(&Value) + Send>;

/// Readiness of a channel's underlying endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Creating,
    Ready,
}

/// Shared, reference-counted channel to one destination.
///
/// Owned by the registry. `Creating` moves to `Ready` once and never back.
pub struct Channel {
    key: DestinationKey,
    sentinel: Sentinel,
    state: ChannelState,
    queue: MessageQueue,
    refcount: usize,
    created_step: Step,
    ready_step: Option<Step>,
    handlers: BTreeMap<SenderId, ResponseHandler>,
}

impl Channel {
    pub(crate) fn new(key: DestinationKey, sentinel: Sentinel, now_step: Step) -> Self {
        Self {
            key,
            sentinel,
            state: ChannelState::Creating,
            queue: MessageQueue::new(),
            refcount: 1,
            created_step: now_step,
            ready_step: None,
            handlers: BTreeMap::new(),
        }
    }

    pub fn key(&self) -> &DestinationKey {
        &self.key
    }

    pub fn sentinel(&self) -> &Sentinel {
        &self.sentinel
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ChannelState::Ready
    }

    pub fn refcount(&self) -> usize {
        self.refcount
    }

    pub fn created_step(&self) -> Step {
        self.created_step
    }

    pub fn ready_step(&self) -> Option<Step> {
        self.ready_step
    }

    pub fn queue(&self) -> &MessageQueue {
        &self.queue
    }

    pub fn pending_flush(&self) -> Option<Step> {
        self.queue.pending_flush()
    }

    pub(crate) fn increment(&mut self) -> usize {
        self.refcount += 1;
        self.refcount
    }

    pub(crate) fn decrement(&mut self) -> usize {
        self.refcount = self.refcount.saturating_sub(1);
        self.refcount
    }

    /// Moves to `Ready`. Returns false if the channel already was.
    pub(crate) fn mark_ready(&mut self, now_step: Step) -> bool {
        if self.is_ready() {
            return false;
        }
        self.state = ChannelState::Ready;
        self.ready_step = Some(now_step);
        true
    }

    pub(crate) fn enqueue(
        &mut self,
        message: Message,
        now_step: Step,
        throttle_steps: Step,
    ) -> Option<Step> {
        let ready = self.is_ready();
        self.queue.enqueue(message, ready, now_step, throttle_steps)
    }

    /// Takes the pending batch. Never yields anything before `Ready`.
    pub(crate) fn take_batch(&mut self) -> Option<Vec<Message>> {
        if !self.is_ready() {
            return None;
        }
        self.queue.take_batch()
    }

    pub(crate) fn is_flush_due(&self, now_step: Step) -> bool {
        self.is_ready() && self.queue.is_flush_due(now_step)
    }

    /// Drops unsent messages and the pending flush. Returns
    /// `(discarded, had_pending_flush)`.
    pub(crate) fn discard_queue(&mut self) -> (usize, bool) {
        let had_timer = self.queue.pending_flush().is_some();
        (self.queue.discard(), had_timer)
    }

    /// Registers `sender`'s handler, replacing any earlier one.
    pub(crate) fn set_handler(&mut self, sender: SenderId, handler: ResponseHandler) -> bool {
        self.handlers.insert(sender, handler).is_some()
    }

    pub(crate) fn remove_handler(&mut self, sender: &SenderId) -> bool {
        self.handlers.remove(sender).is_some()
    }

    /// Hands a response to every registered handler. Returns how many ran.
    pub(crate) fn dispatch_response(&mut self, response: &Value) -> usize {
        for handler in self.handlers.values_mut() {
            handler(response);
        }
        self.handlers.len()
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("key", &self.key)
            .field("sentinel", &self.sentinel)
            .field("state", &self.state)
            .field("queue", &self.queue)
            .field("refcount", &self.refcount)
            .field("created_step", &self.created_step)
            .field("ready_step", &self.ready_step)
            .field("handlers", &self.handlers.len())
            .finish()
    }
}
