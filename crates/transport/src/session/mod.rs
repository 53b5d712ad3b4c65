mod client;
mod listeners;
mod server;

pub use client::ClientSession;
pub use listeners::ListenerToken;
pub use server::ServerSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

impl SessionState {
    pub fn is_active(&self) -> bool {
        !matches!(self, SessionState::Disconnected)
    }
}
