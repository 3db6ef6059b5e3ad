//! Atomic session and server state machines.
//!
//! Session: `Created -> Connecting -> Connected -> Disconnecting ->
//! Disconnected` (terminal). Server: `Created -> Starting -> Started ->
//! Stopping -> Stopped`, restartable. Transitions go through compare-and-
//! swap so concurrent user calls stay idempotent.

use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Created = 0,
    Connecting = 1,
    Connected = 2,
    Disconnecting = 3,
    Disconnected = 4,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Created,
            1 => SessionState::Connecting,
            2 => SessionState::Connected,
            3 => SessionState::Disconnecting,
            _ => SessionState::Disconnected,
        }
    }
}

#[derive(Debug)]
pub(crate) struct AtomicSessionState(AtomicU8);

impl AtomicSessionState {
    pub(crate) fn new(state: SessionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn load(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, state: SessionState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// CAS transition; `true` when this call performed it.
    pub(crate) fn transition(&self, from: SessionState, to: SessionState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerState {
    Created = 0,
    Starting = 1,
    Started = 2,
    Stopping = 3,
    Stopped = 4,
}

impl ServerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ServerState::Created,
            1 => ServerState::Starting,
            2 => ServerState::Started,
            3 => ServerState::Stopping,
            _ => ServerState::Stopped,
        }
    }
}

#[derive(Debug)]
pub(crate) struct AtomicServerState(AtomicU8);

impl AtomicServerState {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(ServerState::Created as u8))
    }

    pub(crate) fn load(&self) -> ServerState {
        ServerState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, state: ServerState) {
        self.0.store(state as u8, Ordering::Release);
    }

    pub(crate) fn transition(&self, from: ServerState, to: ServerState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_transition_is_one_shot() {
        let state = AtomicSessionState::new(SessionState::Connected);
        assert!(state.transition(SessionState::Connected, SessionState::Disconnecting));
        assert!(!state.transition(SessionState::Connected, SessionState::Disconnecting));
        assert_eq!(state.load(), SessionState::Disconnecting);
    }

    #[test]
    fn server_restart_cycle() {
        let state = AtomicServerState::new();
        assert!(state.transition(ServerState::Created, ServerState::Starting));
        state.store(ServerState::Started);
        assert!(state.transition(ServerState::Started, ServerState::Stopping));
        state.store(ServerState::Stopped);
        assert!(state.transition(ServerState::Stopped, ServerState::Starting));
    }
}
