use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};

use crate::events::RoomEvent;

/// Events buffered per subscriber before a slow reader starts lagging.
pub const CHANNEL_CAPACITY: usize = 256;

pub type Tx = broadcast::Sender<RoomEvent>;

/// One broadcast channel per room *name*, created on first use and kept
/// for the life of the process. Keying by name rather than by claim
/// means a socket that joined before the room existed, or that sat
/// through an expiry and re-claim, keeps receiving events.
#[derive(Default)]
pub struct Channels {
    map: RwLock<HashMap<String, Tx>>,
}

impl Channels {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sender(&self, room: &str) -> Tx {
        if let Some(tx) = self.map.read().await.get(room) {
            return tx.clone();
        }
        let mut map = self.map.write().await;
        map.entry(room.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    pub async fn subscribe(&self, room: &str) -> broadcast::Receiver<RoomEvent> {
        self.sender(room).await.subscribe()
    }
}
