//! Per-socket membership bookkeeping.
//!
//! A session owns one socket's room memberships. Joining an existing
//! room replays the actor's current state into this socket's outbox
//! only, then a spawned forwarder copies live broadcast events into the
//! same outbox. Joining a room that does not exist yet subscribes to
//! the name so a later claim becomes visible. Leaving or dropping the
//! session aborts the forwarders, which releases the broadcast
//! receivers.

use std::{collections::HashMap, sync::Arc};
use tokio::{
    sync::{broadcast, mpsc},
    task::AbortHandle,
};

use crate::{
    error::AppResult,
    events::RoomEvent,
    room::registry::{validate_name, Registry},
};

pub struct Session {
    registry: Arc<Registry>,
    outbox: mpsc::UnboundedSender<String>,
    joined: HashMap<String, AbortHandle>,
}

impl Session {
    pub fn new(registry: Arc<Registry>, outbox: mpsc::UnboundedSender<String>) -> Self {
        Self {
            registry,
            outbox,
            joined: HashMap::new(),
        }
    }

    /// Idempotent: a second join of the same room is a no-op, so the
    /// backlog is never replayed twice to one socket.
    pub async fn join(&mut self, room: &str) -> AppResult<()> {
        if self.joined.contains_key(room) {
            tracing::debug!(%room, "already joined, ignoring");
            return Ok(());
        }
        validate_name(room)?;

        let rx = match self.registry.get_or_load(room).await? {
            Some(actor) => {
                let (backlog, rx) = actor.subscribe().await;
                tracing::debug!(%room, events = backlog.len(), "replaying state to new member");
                for event in &backlog {
                    self.send(event);
                }
                rx
            }
            // Unclaimed: hold a subscription on the name so this socket
            // observes the room if someone claims it later.
            None => self.registry.channels().subscribe(room).await,
        };

        let handle = tokio::spawn(forward(room.to_string(), rx, self.outbox.clone()));
        self.joined.insert(room.to_string(), handle.abort_handle());
        Ok(())
    }

    pub fn leave(&mut self, room: &str) {
        if let Some(handle) = self.joined.remove(room) {
            handle.abort();
            tracing::debug!(%room, "left room");
        }
    }

    pub fn disconnect(&mut self) {
        for (room, handle) in self.joined.drain() {
            handle.abort();
            tracing::debug!(%room, "membership released");
        }
    }

    fn send(&self, event: &RoomEvent) {
        if let Ok(frame) = serde_json::to_string(event) {
            // A closed outbox means the socket is gone; nothing to do.
            let _ = self.outbox.send(frame);
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.disconnect();
    }
}

async fn forward(
    room: String,
    mut rx: broadcast::Receiver<RoomEvent>,
    outbox: mpsc::UnboundedSender<String>,
) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                let Ok(frame) = serde_json::to_string(&event) else { continue };
                if outbox.send(frame).is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(%room, skipped = n, "socket lagging behind room events");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
