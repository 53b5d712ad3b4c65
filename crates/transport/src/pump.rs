//! Routes session events to the host handler and drains the disabled queues
//! once per tick.

use std::cell::Cell;
use std::rc::Rc;

use crate::channel::{ChannelTable, DeliveryMode};
use crate::engine::{ClientEngineEvent, ServerEngineEvent};
use crate::events::{TransportError, TransportHandler};
use crate::queue::{ClientDataMessage, DisabledQueue, ServerDataMessage};

pub struct Router<H> {
    handler: H,
    channels: ChannelTable,
    enabled: Rc<Cell<bool>>,
    client_queue: DisabledQueue<ClientDataMessage>,
    server_queue: DisabledQueue<ServerDataMessage>,
    check_queues: bool,
    client_max_per_tick: usize,
    server_max_per_tick: usize,
}

impl<H: TransportHandler> Router<H> {
    pub fn new(
        handler: H,
        channels: ChannelTable,
        enabled: Rc<Cell<bool>>,
        client_max_per_tick: usize,
        server_max_per_tick: usize,
    ) -> Self {
        Self {
            handler,
            channels,
            enabled,
            client_queue: DisabledQueue::new(),
            server_queue: DisabledQueue::new(),
            check_queues: false,
            client_max_per_tick,
            server_max_per_tick,
        }
    }

    fn channel_for(&self, mode: DeliveryMode) -> Result<usize, TransportError> {
        self.channels.index_of(mode).map_err(|_| {
            log::error!("Dropping message received on unmapped delivery mode {}", mode);
            TransportError::UnmappedMode(mode)
        })
    }

    pub fn route_client(&mut self, event: &ClientEngineEvent) {
        match event {
            ClientEngineEvent::Connected => self.handler.on_client_connected(),
            ClientEngineEvent::Disconnected(reason) => self.handler.on_client_disconnected(*reason),
            ClientEngineEvent::Error(message) => self
                .handler
                .on_client_error(&TransportError::Engine(message.clone())),
            ClientEngineEvent::Data { payload, mode } => {
                let channel = match self.channel_for(*mode) {
                    Ok(channel) => channel,
                    Err(e) => {
                        self.handler.on_client_error(&e);
                        return;
                    }
                };

                // Anything still queued must reach the host first.
                if self.enabled.get() && self.client_queue.is_empty() {
                    self.handler.on_client_data(payload, channel);
                } else {
                    self.client_queue.push(ClientDataMessage {
                        payload: payload.clone(),
                        channel,
                    });
                    self.check_queues = true;
                }
            }
        }
    }

    pub fn route_server(&mut self, event: &ServerEngineEvent) {
        match event {
            ServerEngineEvent::Connected(connection) => {
                self.handler.on_server_connected(*connection)
            }
            ServerEngineEvent::Disconnected { connection, reason } => {
                self.handler.on_server_disconnected(*connection, *reason)
            }
            ServerEngineEvent::Error {
                connection,
                message,
            } => self
                .handler
                .on_server_error(*connection, &TransportError::Engine(message.clone())),
            ServerEngineEvent::Data {
                connection,
                payload,
                mode,
            } => {
                let channel = match self.channel_for(*mode) {
                    Ok(channel) => channel,
                    Err(e) => {
                        self.handler.on_server_error(Some(*connection), &e);
                        return;
                    }
                };

                if self.enabled.get() && self.server_queue.is_empty() {
                    self.handler.on_server_data(*connection, payload, channel);
                } else {
                    self.server_queue.push(ServerDataMessage {
                        connection: *connection,
                        payload: payload.clone(),
                        channel,
                    });
                    self.check_queues = true;
                }
            }
        }
    }

    /// Delivers queued data, at most the per-role cap each. Stops as soon as
    /// delivery is disabled, possibly by the handler itself.
    pub fn flush(&mut self) {
        if !self.enabled.get() || !self.check_queues {
            return;
        }

        self.flush_client_queue();
        self.flush_server_queue();

        if self.client_queue.is_empty() && self.server_queue.is_empty() {
            self.check_queues = false;
        }
    }

    fn flush_client_queue(&mut self) {
        let mut processed = 0;
        while self.enabled.get() && processed < self.client_max_per_tick {
            let Some(message) = self.client_queue.pop() else {
                break;
            };
            processed += 1;
            self.handler.on_client_data(&message.payload, message.channel);
        }
    }

    fn flush_server_queue(&mut self) {
        let mut processed = 0;
        while self.enabled.get() && processed < self.server_max_per_tick {
            let Some(message) = self.server_queue.pop() else {
                break;
            };
            processed += 1;
            self.handler
                .on_server_data(message.connection, &message.payload, message.channel);
        }
    }

    pub fn has_pending_work(&self) -> bool {
        self.check_queues
    }

    /// Queue depths as (client, server).
    pub fn pending(&self) -> (usize, usize) {
        (self.client_queue.len(), self.server_queue.len())
    }

    pub fn channels(&self) -> &ChannelTable {
        &self.channels
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ConnectionId, DisconnectReason};
    use crate::events::{EventBuffer, TransportEvent};
    use proptest::prelude::*;

    fn router(enabled: bool, client_cap: usize, server_cap: usize) -> Router<EventBuffer> {
        Router::new(
            EventBuffer::new(),
            ChannelTable::default(),
            Rc::new(Cell::new(enabled)),
            client_cap,
            server_cap,
        )
    }

    fn client_data(byte: u8) -> ClientEngineEvent {
        ClientEngineEvent::Data {
            payload: vec![byte],
            mode: DeliveryMode::ReliableOrdered,
        }
    }

    fn drained_payloads(router: &mut Router<EventBuffer>) -> Vec<u8> {
        router
            .handler_mut()
            .drain_events()
            .filter_map(|e| match e {
                TransportEvent::ClientData { payload, .. } => Some(payload[0]),
                TransportEvent::ServerData { payload, .. } => Some(payload[0]),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_enabled_delivers_immediately() {
        let mut router = router(true, 10, 10);
        router.route_client(&ClientEngineEvent::Data {
            payload: b"ping".to_vec(),
            mode: DeliveryMode::Unreliable,
        });

        let events: Vec<_> = router.handler_mut().drain_events().collect();
        assert_eq!(
            events,
            vec![TransportEvent::ClientData {
                payload: b"ping".to_vec(),
                channel: 1,
            }]
        );
        assert!(!router.has_pending_work());
    }

    #[test]
    fn test_disabled_drains_under_cap() {
        let mut router = router(false, 2, 2);
        for byte in [b'A', b'B', b'C'] {
            router.route_client(&client_data(byte));
        }
        assert_eq!(router.pending(), (3, 0));
        assert!(router.handler().is_empty());

        // Still disabled: nothing moves.
        router.flush();
        assert_eq!(router.pending(), (3, 0));

        router.enabled.set(true);
        router.flush();
        assert_eq!(drained_payloads(&mut router), vec![b'A', b'B']);
        assert!(router.has_pending_work());

        router.flush();
        assert_eq!(drained_payloads(&mut router), vec![b'C']);
        assert!(!router.has_pending_work());
    }

    #[test]
    fn test_fresh_data_waits_behind_queue() {
        let mut router = router(false, 1, 1);
        router.route_client(&client_data(1));
        router.route_client(&client_data(2));

        router.enabled.set(true);
        router.flush();
        router.route_client(&client_data(3));
        router.flush();
        router.flush();

        assert_eq!(drained_payloads(&mut router), vec![1, 2, 3]);
        assert!(!router.has_pending_work());
    }

    #[test]
    fn test_connection_events_bypass_queue() {
        let mut router = router(false, 10, 10);
        router.route_server(&ServerEngineEvent::Connected(ConnectionId(1)));
        router.route_server(&ServerEngineEvent::Data {
            connection: ConnectionId(1),
            payload: vec![9],
            mode: DeliveryMode::Unreliable,
        });
        router.route_server(&ServerEngineEvent::Disconnected {
            connection: ConnectionId(1),
            reason: DisconnectReason::Timeout,
        });

        let events: Vec<_> = router.handler_mut().drain_events().collect();
        assert_eq!(
            events,
            vec![
                TransportEvent::ServerConnected(ConnectionId(1)),
                TransportEvent::ServerDisconnected {
                    connection: ConnectionId(1),
                    reason: DisconnectReason::Timeout,
                },
            ]
        );
        assert_eq!(router.pending(), (0, 1));
    }

    #[test]
    fn test_unmapped_mode_reports_error() {
        let mut router = router(true, 10, 10);
        router.route_server(&ServerEngineEvent::Data {
            connection: ConnectionId(4),
            payload: vec![1],
            mode: DeliveryMode::Sequenced,
        });

        let events: Vec<_> = router.handler_mut().drain_events().collect();
        assert_eq!(
            events,
            vec![TransportEvent::ServerError {
                connection: Some(ConnectionId(4)),
                error: TransportError::UnmappedMode(DeliveryMode::Sequenced),
            }]
        );
        assert_eq!(router.pending(), (0, 0));
    }

    /// Disables delivery after a fixed number of data callbacks.
    struct Pausing {
        switch: Rc<Cell<bool>>,
        pause_after: usize,
        seen: Vec<u8>,
    }

    impl TransportHandler for Pausing {
        fn on_server_data(&mut self, _connection: ConnectionId, payload: &[u8], _channel: usize) {
            self.seen.push(payload[0]);
            if self.seen.len() == self.pause_after {
                self.switch.set(false);
            }
        }
    }

    #[test]
    fn test_handler_can_pause_mid_drain() {
        let switch = Rc::new(Cell::new(false));
        let handler = Pausing {
            switch: Rc::clone(&switch),
            pause_after: 2,
            seen: Vec::new(),
        };
        let mut router =
            Router::new(handler, ChannelTable::default(), Rc::clone(&switch), 100, 100);

        for byte in 0..5 {
            router.route_server(&ServerEngineEvent::Data {
                connection: ConnectionId(1),
                payload: vec![byte],
                mode: DeliveryMode::ReliableOrdered,
            });
        }

        switch.set(true);
        router.flush();
        assert_eq!(router.handler().seen, vec![0, 1]);
        assert_eq!(router.pending(), (0, 3));
        assert!(router.has_pending_work());

        router.handler_mut().pause_after = usize::MAX;
        switch.set(true);
        router.flush();
        assert_eq!(router.handler().seen, vec![0, 1, 2, 3, 4]);
        assert!(!router.has_pending_work());
    }

    #[derive(Debug, Clone, Copy)]
    enum Step {
        Arrive,
        Enable,
        Disable,
        Flush,
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            3 => Just(Step::Arrive),
            1 => Just(Step::Enable),
            1 => Just(Step::Disable),
            2 => Just(Step::Flush),
        ]
    }

    proptest! {
        #[test]
        fn delivery_keeps_arrival_order_under_cap(
            steps in prop::collection::vec(step(), 0..200),
            cap in 1usize..=3,
        ) {
            let mut router = router(false, cap, cap);
            let mut arrived = 0usize;
            let mut delivered = Vec::new();

            for step in steps {
                match step {
                    Step::Arrive => {
                        router.route_client(&client_data(arrived as u8));
                        arrived += 1;
                        delivered.extend(drained_payloads(&mut router));
                    }
                    Step::Enable => router.enabled.set(true),
                    Step::Disable => router.enabled.set(false),
                    Step::Flush => {
                        router.flush();
                        let batch = drained_payloads(&mut router);
                        prop_assert!(batch.len() <= cap);
                        delivered.extend(batch);
                    }
                }
            }

            router.enabled.set(true);
            while router.pending() != (0, 0) {
                router.flush();
                let batch = drained_payloads(&mut router);
                prop_assert!(!batch.is_empty() && batch.len() <= cap);
                delivered.extend(batch);
            }
            router.flush();

            let expected: Vec<u8> = (0..arrived).map(|i| i as u8).collect();
            prop_assert_eq!(delivered, expected);
            prop_assert!(!router.has_pending_work());
        }
    }
}
