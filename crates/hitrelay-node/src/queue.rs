use std::collections::VecDeque;

use hitrelay_core::{Message, Step};

/// Per-channel FIFO of pending hits plus its single throttle timer.
#[derive(Debug, Default)]
pub struct MessageQueue {
    items: VecDeque<Message>,
    pending_flush: Option<Step>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a message.
    ///
    /// When `ready` and no flush is pending, schedules one at
    /// `now + throttle_steps` and returns its due step. Otherwise the message
    /// joins whatever batch is already pending.
    pub fn enqueue(
        &mut self,
        message: Message,
        ready: bool,
        now_step: Step,
        throttle_steps: Step,
    ) -> Option<Step> {
        self.items.push_back(message);
        if !ready || self.pending_flush.is_some() {
            return None;
        }
        let due = now_step.saturating_add(throttle_steps);
        self.pending_flush = Some(due);
        Some(due)
    }

    /// Due step of the pending flush, if one is scheduled.
    pub fn pending_flush(&self) -> Option<Step> {
        self.pending_flush
    }

    pub fn is_flush_due(&self, now_step: Step) -> bool {
        self.pending_flush.is_some_and(|due| due <= now_step)
    }

    /// Takes the whole ordered batch and clears the pending flush.
    ///
    /// Returns `None` for an empty queue so no empty batch is ever sent.
    pub fn take_batch(&mut self) -> Option<Vec<Message>> {
        self.pending_flush = None;
        if self.items.is_empty() {
            return None;
        }
        Some(self.items.drain(..).collect())
    }

    /// Drops every queued message and the pending flush.
    ///
    /// Returns the number of discarded messages.
    pub fn discard(&mut self) -> usize {
        self.pending_flush = None;
        let dropped = self.items.len();
        self.items.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.items.iter()
    }
}
