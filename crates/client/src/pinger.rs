use std::collections::HashMap;
use std::time::{Duration, Instant};

use tickline::{DisconnectReason, EventBuffer, TransportEvent, UdpTransport};

const PING_PREFIX: &str = "ping ";

pub fn encode_ping(sequence: u32) -> Vec<u8> {
    format!("{}{}", PING_PREFIX, sequence).into_bytes()
}

pub fn decode_ping(payload: &[u8]) -> Option<u32> {
    std::str::from_utf8(payload)
        .ok()?
        .strip_prefix(PING_PREFIX)?
        .parse()
        .ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Running,
    Finished,
    Disconnected(DisconnectReason),
}

#[derive(Debug, Default, Clone)]
pub struct PingSummary {
    pub sent: u32,
    pub received: u32,
    pub rtts: Vec<Duration>,
}

impl PingSummary {
    pub fn average_rtt(&self) -> Option<Duration> {
        if self.rtts.is_empty() {
            return None;
        }
        Some(self.rtts.iter().sum::<Duration>() / self.rtts.len() as u32)
    }
}

/// Sends numbered pings to an echo server and times the replies.
pub struct Pinger {
    channel: usize,
    count: u32,
    interval: Duration,
    last_send: Option<Instant>,
    in_flight: HashMap<u32, Instant>,
    summary: PingSummary,
}

impl Pinger {
    pub fn new(channel: usize, count: u32, interval: Duration) -> Self {
        Self {
            channel,
            count,
            interval,
            last_send: None,
            in_flight: HashMap::new(),
            summary: PingSummary::default(),
        }
    }

    pub fn summary(&self) -> &PingSummary {
        &self.summary
    }

    /// Handles the events of one tick and sends the next ping when due.
    pub fn step(&mut self, transport: &mut UdpTransport<EventBuffer>, now: Instant) -> Outcome {
        let events: Vec<TransportEvent> = transport.handler_mut().drain_events().collect();
        for event in events {
            match event {
                TransportEvent::ClientConnected => log::info!("{}", transport),
                TransportEvent::ClientDisconnected(reason) => {
                    return Outcome::Disconnected(reason);
                }
                TransportEvent::ClientData { payload, channel } => {
                    self.on_reply(&payload, channel, now)
                }
                TransportEvent::ClientError(error) => log::warn!("Transport error: {}", error),
                _ => {}
            }
        }

        if self.summary.received >= self.count {
            return Outcome::Finished;
        }

        let due = self
            .last_send
            .is_none_or(|last| now.duration_since(last) >= self.interval);
        if transport.is_client_connected() && self.summary.sent < self.count && due {
            let sequence = self.summary.sent;
            if transport.send_to_server(self.channel, &encode_ping(sequence)) {
                self.in_flight.insert(sequence, now);
                self.summary.sent += 1;
                self.last_send = Some(now);
            }
        }

        Outcome::Running
    }

    /// Unreliable channels may never answer; stop waiting after the last
    /// ping has had `grace` to come back.
    pub fn timed_out(&self, now: Instant, grace: Duration) -> bool {
        self.summary.sent >= self.count
            && self
                .last_send
                .is_some_and(|last| now.duration_since(last) >= grace)
    }

    fn on_reply(&mut self, payload: &[u8], channel: usize, now: Instant) {
        let Some(sequence) = decode_ping(payload) else {
            log::warn!("Unexpected {} byte reply on channel {}", payload.len(), channel);
            return;
        };
        let Some(sent_at) = self.in_flight.remove(&sequence) else {
            log::debug!("Duplicate or late reply {}", sequence);
            return;
        };

        let rtt = now.duration_since(sent_at);
        self.summary.received += 1;
        self.summary.rtts.push(rtt);
        log::info!(
            "Reply {} on channel {}: {:.1}ms",
            sequence,
            channel,
            rtt.as_secs_f64() * 1000.0
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_payload() {
        assert_eq!(encode_ping(42), b"ping 42".to_vec());
        assert_eq!(decode_ping(b"ping 42"), Some(42));
        assert_eq!(decode_ping(b"pong 42"), None);
        assert_eq!(decode_ping(&[0xff, 0xfe]), None);
    }

    #[test]
    fn test_average_rtt() {
        let summary = PingSummary {
            sent: 2,
            received: 2,
            rtts: vec![Duration::from_millis(10), Duration::from_millis(30)],
        };
        assert_eq!(summary.average_rtt(), Some(Duration::from_millis(20)));
        assert_eq!(PingSummary::default().average_rtt(), None);
    }

    #[test]
    fn test_timed_out_only_after_last_ping() {
        let pinger = Pinger::new(0, 1, Duration::from_millis(10));
        let now = Instant::now();
        assert!(!pinger.timed_out(now, Duration::ZERO));
    }
}
