use std::net::SocketAddr;

use super::SessionState;
use super::listeners::{ListenerToken, Listeners};
use crate::channel::DeliveryMode;
use crate::engine::{ClientEngine, ClientEngineEvent, ConnectRequest};

/// The local endpoint acting as a client of one remote server.
pub struct ClientSession<E: ClientEngine> {
    engine: E,
    state: SessionState,
    listeners: Listeners<ClientEngineEvent>,
}

impl<E: ClientEngine> ClientSession<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            state: SessionState::Disconnected,
            listeners: Listeners::default(),
        }
    }

    pub fn subscribe(
        &mut self,
        listener: impl FnMut(&ClientEngineEvent) + 'static,
    ) -> ListenerToken {
        self.listeners.subscribe(listener)
    }

    pub fn unsubscribe(&mut self, token: ListenerToken) -> bool {
        self.listeners.unsubscribe(token)
    }

    /// Begins connecting. Returns immediately; the outcome is reported to
    /// listeners from a later `advance`.
    pub fn connect(
        &mut self,
        address: &str,
        max_attempts: u32,
        use_ipv6: bool,
        connect_key: &str,
    ) -> bool {
        if self.state.is_active() {
            log::warn!("Can't connect client as a session is already active");
            return false;
        }

        log::info!("Client connecting to {}", address);
        self.state = SessionState::Connecting;
        self.engine.connect(ConnectRequest {
            address: address.to_string(),
            max_attempts,
            use_ipv6,
            connect_key: connect_key.to_string(),
        });
        true
    }

    pub fn send(&mut self, mode: DeliveryMode, payload: &[u8]) -> bool {
        if self.state != SessionState::Connected {
            log::warn!("Can't send when client is not connected");
            return false;
        }

        match self.engine.send(mode, payload) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Client send on {} failed: {}", mode, e);
                false
            }
        }
    }

    /// Tears the session down. Listeners are dropped first so nothing fires
    /// while or after the engine disconnects. Safe to call repeatedly.
    pub fn disconnect(&mut self) {
        if self.listeners.len() > 0 {
            log::debug!("Dropping {} client listeners", self.listeners.len());
        }
        self.listeners.clear();
        if self.state == SessionState::Disconnected {
            return;
        }

        self.engine.disconnect();
        self.state = SessionState::Disconnected;
        log::info!("Client disconnected");
    }

    /// Pumps the engine once. Must be called exactly once per host tick.
    pub fn advance(&mut self) {
        if self.state == SessionState::Disconnected {
            return;
        }

        let Self {
            engine,
            state,
            listeners,
        } = self;

        engine.poll(&mut |event| {
            match &event {
                ClientEngineEvent::Connected => *state = SessionState::Connected,
                ClientEngineEvent::Disconnected(reason) => {
                    log::info!("Client session ended: {}", reason.as_str());
                    *state = SessionState::Disconnected;
                }
                ClientEngineEvent::Data { .. } | ClientEngineEvent::Error(_) => {}
            }
            listeners.emit(&event);
        });
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.engine.remote_addr()
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }
}

impl<E: ClientEngine> Drop for ClientSession<E> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{DisconnectReason, EngineError};
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    /// Records every call so tests can check what reached the engine.
    #[derive(Default)]
    struct ScriptedEngine {
        calls: Rc<RefCell<Vec<String>>>,
        script: VecDeque<ClientEngineEvent>,
    }

    impl ClientEngine for ScriptedEngine {
        fn connect(&mut self, request: ConnectRequest) {
            self.calls
                .borrow_mut()
                .push(format!("connect {}", request.address));
        }

        fn send(&mut self, mode: DeliveryMode, payload: &[u8]) -> Result<(), EngineError> {
            self.calls
                .borrow_mut()
                .push(format!("send {} {}", mode, payload.len()));
            Ok(())
        }

        fn disconnect(&mut self) {
            self.calls.borrow_mut().push("disconnect".to_string());
        }

        fn poll(&mut self, events: &mut dyn FnMut(ClientEngineEvent)) {
            if let Some(event) = self.script.pop_front() {
                events(event);
            }
        }

        fn remote_addr(&self) -> Option<SocketAddr> {
            None
        }
    }

    fn session() -> (ClientSession<ScriptedEngine>, Rc<RefCell<Vec<String>>>) {
        let engine = ScriptedEngine::default();
        let calls = Rc::clone(&engine.calls);
        (ClientSession::new(engine), calls)
    }

    #[test]
    fn test_send_while_disconnected_skips_engine() {
        let (mut session, calls) = session();
        assert!(!session.send(DeliveryMode::ReliableOrdered, b"nope"));
        assert!(calls.borrow().is_empty());
    }

    #[test]
    fn test_second_connect_rejected() {
        let (mut session, calls) = session();
        assert!(session.connect("a", 3, false, "key"));
        assert!(!session.connect("b", 3, false, "key"));
        assert_eq!(*calls.borrow(), vec!["connect a".to_string()]);
        assert_eq!(session.state(), SessionState::Connecting);
    }

    #[test]
    fn test_advance_tracks_state_and_notifies() {
        let (mut session, calls) = session();
        session.engine.script.push_back(ClientEngineEvent::Connected);
        session.engine.script.push_back(ClientEngineEvent::Disconnected(
            DisconnectReason::Timeout,
        ));

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let _token = session.subscribe(move |e| sink.borrow_mut().push(e.clone()));

        session.connect("a", 1, false, "key");
        session.advance();
        assert!(session.is_connected());
        assert!(session.send(DeliveryMode::Unreliable, b"x"));

        session.advance();
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(
            *seen.borrow(),
            vec![
                ClientEngineEvent::Connected,
                ClientEngineEvent::Disconnected(DisconnectReason::Timeout)
            ]
        );
        assert_eq!(calls.borrow().len(), 2);
    }

    #[test]
    fn test_disconnect_silences_listeners_first() {
        let (mut session, calls) = session();
        session.engine.script.push_back(ClientEngineEvent::Connected);

        let fired = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&fired);
        let _token = session.subscribe(move |_| *counter.borrow_mut() += 1);

        session.connect("a", 1, false, "key");
        session.disconnect();
        session.engine.script.push_back(ClientEngineEvent::Connected);
        session.advance();

        assert_eq!(*fired.borrow(), 0);
        assert_eq!(calls.borrow().last().map(String::as_str), Some("disconnect"));

        session.disconnect();
        assert_eq!(
            calls.borrow().iter().filter(|c| *c == "disconnect").count(),
            1
        );
    }
}
