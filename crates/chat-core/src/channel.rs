use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::types::{RoomCommand, RoomEvent};

/// Broadcast event stream type used by runtime subscribers.
pub type EventStream = broadcast::Receiver<RoomEvent>;

/// Errors returned by room channel operations.
#[derive(Debug, Error)]
pub enum RoomChannelError {
    /// The command receiver side is closed.
    #[error("command channel is closed")]
    CommandChannelClosed,
}

/// Command/event channel pair connecting hosts to the room runtime.
#[derive(Clone, Debug)]
pub struct RoomChannels {
    command_tx: mpsc::Sender<RoomCommand>,
    event_tx: broadcast::Sender<RoomEvent>,
}

impl RoomChannels {
    /// Create a new channel set and return it with the command receiver.
    pub fn new(command_buffer: usize, event_buffer: usize) -> (Self, mpsc::Receiver<RoomCommand>) {
        let (command_tx, command_rx) = mpsc::channel(command_buffer.max(1));
        let (event_tx, _) = broadcast::channel(event_buffer.max(1));

        (
            Self {
                command_tx,
                event_tx,
            },
            command_rx,
        )
    }

    /// Clone the event sender.
    pub fn event_sender(&self) -> broadcast::Sender<RoomEvent> {
        self.event_tx.clone()
    }

    /// Subscribe to emitted room events.
    pub fn subscribe(&self) -> EventStream {
        self.event_tx.subscribe()
    }

    /// Send one command to the runtime.
    pub async fn send_command(&self, command: RoomCommand) -> Result<(), RoomChannelError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| RoomChannelError::CommandChannelClosed)
    }

    /// Emit an event to all subscribers.
    ///
    /// Emission is best-effort; lagged subscribers are handled by `broadcast`.
    pub fn emit(&self, event: RoomEvent) {
        let _ = self.event_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ConnectionState;

    #[tokio::test]
    async fn sends_commands_to_receiver() {
        let (channels, mut rx) = RoomChannels::new(8, 8);
        channels
            .send_command(RoomCommand::OpenRoom { room_id: 7 })
            .await
            .expect("command send should work");

        let cmd = rx.recv().await.expect("receiver should have a command");
        assert_eq!(cmd, RoomCommand::OpenRoom { room_id: 7 });
    }

    #[tokio::test]
    async fn fans_out_events_to_subscribers() {
        let (channels, _rx) = RoomChannels::new(4, 16);
        let mut a = channels.subscribe();
        let mut b = channels.subscribe();

        channels.emit(RoomEvent::ConnectionChanged {
            state: ConnectionState::Connecting,
        });

        let event_a = a.recv().await.expect("subscriber a should receive event");
        let event_b = b.recv().await.expect("subscriber b should receive event");
        assert_eq!(event_a, event_b);
    }
}
