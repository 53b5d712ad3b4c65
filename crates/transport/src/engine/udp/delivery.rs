use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use super::protocol::{PacketBody, sequence_greater_than};
use crate::channel::DeliveryMode;

/// Out-of-order reliable messages held per lane before the gap is dropped.
const MAX_HELD: usize = 1024;
const RECENT_WINDOW: usize = 1024;

/// Remembers recently seen sequences so reliable-unordered resends are
/// delivered once.
#[derive(Debug)]
pub struct ReceiveTracker {
    recent_sequences: VecDeque<u32>,
    max_recent: usize,
}

impl Default for ReceiveTracker {
    fn default() -> Self {
        Self::new(RECENT_WINDOW)
    }
}

impl ReceiveTracker {
    pub fn new(max_recent: usize) -> Self {
        Self {
            recent_sequences: VecDeque::with_capacity(max_recent),
            max_recent,
        }
    }

    pub fn record_received(&mut self, sequence: u32) -> bool {
        if self.recent_sequences.contains(&sequence) {
            return false;
        }

        if self.recent_sequences.len() >= self.max_recent {
            self.recent_sequences.pop_front();
        }
        self.recent_sequences.push_back(sequence);
        true
    }
}

#[derive(Debug)]
struct PendingMessage {
    sequence: u32,
    payload: Vec<u8>,
    last_sent: Instant,
}

#[derive(Debug, Default)]
struct Lane {
    next_send: u32,
    unacked: VecDeque<PendingMessage>,
    next_expected: u32,
    held: BTreeMap<u32, Vec<u8>>,
    newest: Option<u32>,
    received: ReceiveTracker,
}

/// Result of feeding one inbound data message through its lane.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Inbound {
    pub ack: Option<PacketBody>,
    pub deliver: Vec<Vec<u8>>,
}

/// Per-peer sequencing, acknowledgement and resend state, one lane per
/// delivery mode.
#[derive(Debug)]
pub struct DeliveryState {
    lanes: [Lane; 5],
    resend_after: Duration,
}

fn lane_index(mode: DeliveryMode) -> usize {
    match mode {
        DeliveryMode::ReliableUnordered => 0,
        DeliveryMode::Sequenced => 1,
        DeliveryMode::ReliableOrdered => 2,
        DeliveryMode::ReliableSequenced => 3,
        DeliveryMode::Unreliable => 4,
    }
}

impl DeliveryState {
    pub fn new(resend_after: Duration) -> Self {
        Self {
            lanes: Default::default(),
            resend_after,
        }
    }

    /// Stamps an outgoing message and, for reliable modes, keeps a copy until
    /// the peer acknowledges it.
    pub fn prepare(&mut self, mode: DeliveryMode, payload: &[u8]) -> PacketBody {
        let lane = &mut self.lanes[lane_index(mode)];
        let sequence = lane.next_send;
        lane.next_send = lane.next_send.wrapping_add(1);

        if mode == DeliveryMode::ReliableSequenced {
            lane.unacked.clear();
        }
        if mode.is_reliable() {
            lane.unacked.push_back(PendingMessage {
                sequence,
                payload: payload.to_vec(),
                last_sent: Instant::now(),
            });
        }

        PacketBody::Data {
            mode,
            sequence,
            payload: payload.to_vec(),
        }
    }

    pub fn on_ack(&mut self, mode: DeliveryMode, sequence: u32) {
        self.lanes[lane_index(mode)]
            .unacked
            .retain(|m| m.sequence != sequence);
    }

    pub fn on_data(&mut self, mode: DeliveryMode, sequence: u32, payload: Vec<u8>) -> Inbound {
        let lane = &mut self.lanes[lane_index(mode)];
        let ack = mode
            .is_reliable()
            .then_some(PacketBody::Ack { mode, sequence });

        let deliver = match mode {
            DeliveryMode::Unreliable => vec![payload],
            DeliveryMode::ReliableUnordered => {
                if lane.received.record_received(sequence) {
                    vec![payload]
                } else {
                    Vec::new()
                }
            }
            DeliveryMode::Sequenced | DeliveryMode::ReliableSequenced => {
                let newer = lane
                    .newest
                    .is_none_or(|newest| sequence_greater_than(sequence, newest));
                if newer {
                    lane.newest = Some(sequence);
                    vec![payload]
                } else {
                    Vec::new()
                }
            }
            DeliveryMode::ReliableOrdered => {
                let mut ready = Vec::new();
                if sequence == lane.next_expected {
                    ready.push(payload);
                    lane.next_expected = lane.next_expected.wrapping_add(1);
                    while let Some(next) = lane.held.remove(&lane.next_expected) {
                        ready.push(next);
                        lane.next_expected = lane.next_expected.wrapping_add(1);
                    }
                } else if sequence_greater_than(sequence, lane.next_expected) {
                    if lane.held.len() < MAX_HELD {
                        lane.held.entry(sequence).or_insert(payload);
                    } else {
                        log::warn!(
                            "Reliable-ordered backlog full, waiting for resend of {}",
                            sequence
                        );
                        return Inbound::default();
                    }
                }
                ready
            }
        };

        Inbound { ack, deliver }
    }

    /// Reliable messages whose acknowledgement is overdue.
    pub fn due_resends(&mut self, now: Instant) -> Vec<PacketBody> {
        let mut resends = Vec::new();
        for (mode, lane) in DeliveryMode::ALL.iter().zip(self.lanes.iter_mut()) {
            for pending in lane.unacked.iter_mut() {
                if now.duration_since(pending.last_sent) >= self.resend_after {
                    pending.last_sent = now;
                    resends.push(PacketBody::Data {
                        mode: *mode,
                        sequence: pending.sequence,
                        payload: pending.payload.clone(),
                    });
                }
            }
        }
        resends
    }

    #[cfg(test)]
    pub fn unacked_count(&self) -> usize {
        self.lanes.iter().map(|l| l.unacked.len()).sum()
    }
}
