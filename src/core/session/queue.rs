//! Outbound control queue.

use std::collections::VecDeque;

use crate::core::transport::ControlMessage;

/// FIFO of control messages issued before the control channel became writable.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    messages: VecDeque<ControlMessage>,
}

impl OutboundQueue {
    pub fn push(&mut self, message: ControlMessage) {
        self.messages.push_back(message);
    }

    /// Remove and return every queued message in send order.
    pub fn drain(&mut self) -> impl Iterator<Item = ControlMessage> + '_ {
        self.messages.drain(..)
    }

    pub fn clear(&mut self) -> usize {
        let dropped = self.messages.len();
        self.messages.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
