use crate::{
    error::ChatError,
    types::{ConnectionState, RoomEvent},
};

/// Explicit connection lifecycle for one room's transport.
///
/// Callers only ever observe connected / not connected; the machine
/// exists so reconnect handling is owned here rather than delegated to
/// a transport library's internal state.
#[derive(Debug, Clone)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
        }
    }
}

impl ConnectionStateMachine {
    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether publishes are currently allowed.
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// A connect attempt started (initial or reconnect).
    pub fn on_connect_started(&mut self) -> Result<RoomEvent, ChatError> {
        if self.state != ConnectionState::Disconnected {
            return Err(ChatError::invalid_transition(self.state, "connect_started"));
        }
        self.transition(ConnectionState::Connecting)
    }

    /// Handshake completed and both channels are subscribed.
    pub fn on_connected(&mut self) -> Result<RoomEvent, ChatError> {
        if self.state != ConnectionState::Connecting {
            return Err(ChatError::invalid_transition(self.state, "connected"));
        }
        self.transition(ConnectionState::Connected)
    }

    /// The socket closed or was lost, from any live state.
    ///
    /// Valid during both `Connecting` (handshake failure) and
    /// `Connected` (network loss); idempotent when already disconnected.
    pub fn on_disconnected(&mut self) -> Option<RoomEvent> {
        if self.state == ConnectionState::Disconnected {
            return None;
        }
        self.transition(ConnectionState::Disconnected).ok()
    }

    fn transition(&mut self, next: ConnectionState) -> Result<RoomEvent, ChatError> {
        self.state = next;
        Ok(RoomEvent::ConnectionChanged { state: next })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_happy_path_transitions() {
        let mut sm = ConnectionStateMachine::default();
        assert_eq!(sm.state(), ConnectionState::Disconnected);
        assert!(!sm.is_connected());

        sm.on_connect_started().expect("connect start must work");
        assert_eq!(sm.state(), ConnectionState::Connecting);

        sm.on_connected().expect("connected must work");
        assert!(sm.is_connected());

        let event = sm.on_disconnected().expect("disconnect should transition");
        assert_eq!(
            event,
            RoomEvent::ConnectionChanged {
                state: ConnectionState::Disconnected
            }
        );
    }

    #[test]
    fn handshake_failure_returns_to_disconnected() {
        let mut sm = ConnectionStateMachine::default();
        sm.on_connect_started().expect("connect start must work");

        sm.on_disconnected().expect("handshake failure transitions");
        assert_eq!(sm.state(), ConnectionState::Disconnected);

        // Reconnect attempt proceeds from the same state.
        sm.on_connect_started().expect("reconnect start must work");
        assert_eq!(sm.state(), ConnectionState::Connecting);
    }

    #[test]
    fn rejects_connected_without_connecting() {
        let mut sm = ConnectionStateMachine::default();
        let err = sm
            .on_connected()
            .expect_err("connected must fail from disconnected");
        assert_eq!(err.code, "invalid_connection_transition");
    }

    #[test]
    fn disconnect_is_idempotent() {
        let mut sm = ConnectionStateMachine::default();
        assert_eq!(sm.on_disconnected(), None);
    }
}
