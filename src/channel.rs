//! Single-slot rendezvous channel carrying [`Command`]s to one node.
//!
//! A send resolves only once the node's listener has taken the command off the
//! channel. Each command travels with a one-shot hand-off; the listener fires it
//! when it picks the command up. A command whose sender already gave up (timed
//! out) is discarded instead of applied, so a failed send never mutates state.

use crate::{Command, SimError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

type Envelope = (Command, oneshot::Sender<()>);

/// Sending half, held by the fleet.
#[derive(Debug, Clone)]
pub struct CommandSender {
    node: usize,
    tx: mpsc::Sender<Envelope>,
}

/// Receiving half, held by the node's listener.
#[derive(Debug)]
pub struct CommandReceiver {
    rx: mpsc::Receiver<Envelope>,
}

/// Creates a rendezvous channel for the node with 1-based id `node`.
pub fn rendezvous(node: usize) -> (CommandSender, CommandReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (CommandSender { node, tx }, CommandReceiver { rx })
}

impl CommandSender {
    /// Node this sender delivers to.
    pub fn node(&self) -> usize {
        self.node
    }

    /// Blocks until the listener has taken `command`.
    ///
    /// # Errors
    /// Returns [`SimError::NodeUnavailable`] if the listener is gone.
    pub async fn send(&self, command: Command) -> Result<(), SimError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send((command, ack_tx))
            .await
            .map_err(|_| self.unavailable())?;
        ack_rx.await.map_err(|_| self.unavailable())
    }

    /// Like [`send`](Self::send), bounded by `timeout`.
    pub async fn send_timeout(&self, command: Command, timeout: Duration) -> Result<(), SimError> {
        match tokio::time::timeout(timeout, self.send(command)).await {
            Ok(result) => result,
            Err(_) => Err(self.unavailable()),
        }
    }

    fn unavailable(&self) -> SimError {
        SimError::NodeUnavailable { node: self.node }
    }
}

impl CommandReceiver {
    /// Waits for the next command. Returns `None` once every sender is dropped.
    pub async fn recv(&mut self) -> Option<Command> {
        loop {
            let (command, ack) = self.rx.recv().await?;
            // Sender timed out and dropped its hand-off; the command was never delivered.
            if ack.send(()).is_ok() {
                return Some(command);
            }
        }
    }
}
