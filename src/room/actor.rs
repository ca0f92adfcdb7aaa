//! The in-memory authority for one room.
//!
//! All mutation goes through methods that hold the room's `Mutex`
//! across persist + publish. That single lock is what gives every
//! subscriber the same event order the store saw, and lets `subscribe`
//! hand out a backlog plus a live receiver with no gap between them.
//! Rooms never touch each other's state, so slow traffic in one room
//! cannot stall another.

use std::{collections::VecDeque, sync::Arc};
use tokio::sync::{broadcast, Mutex};

use crate::{
    channels::Tx,
    error::{AppErr, AppResult},
    events::{ContentPayload, RoomEvent},
    store::{NewPost, Post, RoomInfo, Store},
};

/// Posts kept in memory for instant replay to joining sockets.
pub const RECENT_POSTS: usize = 50;

const ANONYMOUS: &str = "Anonymous";

pub(crate) fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

struct RoomState {
    content_url: String,
    content_duration: Option<f64>,
    recent: VecDeque<Post>,
}

pub struct Room {
    name: String,
    password: String,
    store: Arc<dyn Store>,
    tx: Tx,
    media_prefix: String,
    state: Mutex<RoomState>,
}

impl Room {
    pub fn new(
        info: RoomInfo,
        recent: Vec<Post>,
        store: Arc<dyn Store>,
        tx: Tx,
        media_prefix: String,
    ) -> Self {
        Self {
            name: info.name,
            password: info.password,
            store,
            tx,
            media_prefix,
            state: Mutex::new(RoomState {
                content_url: info.content_url,
                content_duration: info.content_duration,
                recent: recent.into(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn password_matches(&self, candidate: &str) -> bool {
        !self.password.is_empty() && self.password == candidate
    }

    pub async fn content_url(&self) -> String {
        self.state.lock().await.content_url.clone()
    }

    pub async fn recent_posts(&self) -> Vec<Post> {
        self.state.lock().await.recent.iter().cloned().collect()
    }

    /// Persists the new content reference, then broadcasts it. The lock
    /// is held across both, so subscribers observe content changes in
    /// store order.
    pub async fn set_content(&self, url: &str, duration: Option<f64>) -> AppResult<()> {
        let mut state = self.state.lock().await;
        let touched = self.store.set_content(&self.name, url, duration, now()).await?;
        if touched == 0 {
            return Err(AppErr::NotFound(format!("room '{}'", self.name)));
        }
        state.content_url = url.to_string();
        state.content_duration = duration;
        let _ = self.tx.send(RoomEvent::Content(ContentPayload {
            url: url.to_string(),
            duration,
        }));
        Ok(())
    }

    /// Normalizes, persists and broadcasts one post. Image work is done
    /// by the caller beforehand; nothing slow runs under the room lock
    /// except the store write itself.
    pub async fn append_post(&self, mut new: NewPost) -> AppResult<Post> {
        new.name = new.name.trim().to_string();
        if new.name.is_empty() {
            new.name = ANONYMOUS.into();
        }
        if new.comment.trim().is_empty() && new.image.is_none() {
            return Err(AppErr::Bad("a post needs a comment or an image".into()));
        }

        let mut state = self.state.lock().await;
        let post = self
            .store
            .add_post(&self.name, &new, now())
            .await?
            .ok_or_else(|| AppErr::NotFound(format!("room '{}'", self.name)))?;

        state.recent.push_back(post.clone());
        while state.recent.len() > RECENT_POSTS {
            state.recent.pop_front();
        }
        let _ = self.tx.send(RoomEvent::post(&post, &self.media_prefix));
        Ok(post)
    }

    /// Current state as replayable events plus a live receiver. Taken
    /// under the mutator lock: everything up to now is in the backlog,
    /// everything after lands in the receiver, nothing is in both.
    pub async fn subscribe(&self) -> (Vec<RoomEvent>, broadcast::Receiver<RoomEvent>) {
        let state = self.state.lock().await;
        let mut backlog = Vec::with_capacity(state.recent.len() + 1);
        backlog.push(RoomEvent::Content(ContentPayload {
            url: state.content_url.clone(),
            duration: state.content_duration,
        }));
        backlog.extend(state.recent.iter().map(|p| RoomEvent::post(p, &self.media_prefix)));
        let rx = self.tx.subscribe();
        (backlog, rx)
    }
}
