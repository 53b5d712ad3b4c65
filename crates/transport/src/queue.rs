use std::collections::VecDeque;

use crate::engine::ConnectionId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientDataMessage {
    pub payload: Vec<u8>,
    pub channel: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDataMessage {
    pub connection: ConnectionId,
    pub payload: Vec<u8>,
    pub channel: usize,
}

/// FIFO of data that arrived while delivery was disabled.
///
/// Drained from the front one message at a time; never cleared in bulk.
#[derive(Debug)]
pub struct DisabledQueue<T> {
    messages: VecDeque<T>,
}

impl<T> Default for DisabledQueue<T> {
    fn default() -> Self {
        Self {
            messages: VecDeque::new(),
        }
    }
}

impl<T> DisabledQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: T) {
        self.messages.push_back(message);
    }

    pub fn pop(&mut self) -> Option<T> {
        self.messages.pop_front()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
