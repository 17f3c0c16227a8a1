use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::types::{ChatCommand, ChatEvent};

/// Broadcast event stream type used by view subscribers.
pub type EventStream = broadcast::Receiver<ChatEvent>;

#[derive(Debug, Error)]
pub enum ChatChannelError {
    /// The runtime stopped receiving commands.
    #[error("command channel is closed")]
    CommandChannelClosed,
}

/// Command/event channel pair shared by the runtime and its views.
#[derive(Clone, Debug)]
pub struct ChatChannels {
    command_tx: mpsc::Sender<ChatCommand>,
    event_tx: broadcast::Sender<ChatEvent>,
}

impl ChatChannels {
    /// Create a new channel set and return it with the command receiver.
    pub fn new(command_buffer: usize, event_buffer: usize) -> (Self, mpsc::Receiver<ChatCommand>) {
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

    pub fn subscribe(&self) -> EventStream {
        self.event_tx.subscribe()
    }

    pub async fn send_command(&self, command: ChatCommand) -> Result<(), ChatChannelError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| ChatChannelError::CommandChannelClosed)
    }

    /// Emit an event to all subscribers.
    ///
    /// Best-effort; lagged subscribers are handled by `broadcast`.
    pub fn emit(&self, event: ChatEvent) {
        let _ = self.event_tx.send(event);
    }
}
