//! Ordered delivery of stream events to one caller.
//!
//! Backed by a bounded `mpsc` channel: a full channel suspends the run, a
//! closed one means the caller went away. Once a terminal event has been
//! sent the emitter refuses everything else.

use tokio::sync::mpsc;

use crate::stream_event::StreamEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EmitError {
    #[error("client disconnected")]
    Disconnected,

    #[error("stream already terminated")]
    Terminated,
}

pub struct StreamEmitter {
    tx: mpsc::Sender<StreamEvent>,
    disconnected: bool,
    terminated: bool,
    sent: usize,
}

impl StreamEmitter {
    /// Create an emitter and the receiving end handed to the caller.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                disconnected: false,
                terminated: false,
                sent: 0,
            },
            rx,
        )
    }

    /// Deliver one event, waiting for room in the channel.
    pub async fn emit(&mut self, event: StreamEvent) -> Result<(), EmitError> {
        if self.terminated {
            return Err(EmitError::Terminated);
        }
        if self.disconnected {
            return Err(EmitError::Disconnected);
        }

        let terminal = event.is_terminal();
        if self.tx.send(event).await.is_err() {
            self.disconnected = true;
            return Err(EmitError::Disconnected);
        }

        self.sent += 1;
        if terminal {
            self.terminated = true;
        }
        Ok(())
    }

    /// Whether the caller is gone.
    pub fn is_disconnected(&mut self) -> bool {
        if !self.disconnected && self.tx.is_closed() {
            self.disconnected = true;
        }
        self.disconnected
    }

    /// Events delivered so far.
    pub fn sent(&self) -> usize {
        self.sent
    }
}
