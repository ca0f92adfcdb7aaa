//! Maps room names to live actors.
//!
//! The store's lease row stays authoritative: every lookup re-checks
//! it, so an expired room vanishes here no matter what the cache still
//! holds, and claiming delegates the claim race entirely to the store's
//! conditional insert. The map enforces identity, at most one live
//! actor per name; each claim's generated password doubles as its
//! generation tag when a lookup and a claim race for the same slot.

use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;

use crate::{
    channels::Channels,
    error::{AppErr, AppResult},
    room::actor::{now, Room, RECENT_POSTS},
    store::{RoomInfo, Store},
};

const MAX_NAME_CHARS: usize = 64;

/// The winning side of a claim: the live actor plus the credentials the
/// claimer needs to hand out.
pub struct Claimed {
    pub room: Arc<Room>,
    pub info: RoomInfo,
}

pub struct Registry {
    rooms: RwLock<HashMap<String, Arc<Room>>>,
    store: Arc<dyn Store>,
    channels: Arc<Channels>,
    media_prefix: String,
}

impl Registry {
    pub fn new(store: Arc<dyn Store>, channels: Arc<Channels>, media_prefix: String) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            store,
            channels,
            media_prefix,
        }
    }

    pub fn channels(&self) -> &Channels {
        &self.channels
    }

    /// Live actor for a claimed room. The lease row is consulted on
    /// every call: an expired or missing row comes back `None` and
    /// evicts whatever actor the dead claim left cached. Never
    /// auto-creates.
    pub async fn get_or_load(&self, name: &str) -> AppResult<Option<Arc<Room>>> {
        let cached = self.rooms.read().await.get(name).cloned();
        let Some(info) = self.store.get_room(name, now()).await? else {
            if let Some(stale) = cached {
                self.evict(name, &stale).await;
            }
            return Ok(None);
        };
        if let Some(room) = cached {
            if room.password_matches(&info.password) {
                return Ok(Some(room));
            }
            // Cached actor from a claim that has expired and been
            // replaced; the row's password marks the current one.
            self.evict(name, &room).await;
        }
        Ok(Some(self.materialize(info).await?))
    }

    /// Takes ownership of a name. The store's conditional insert decides
    /// the race; losers get `AlreadyClaimed`. The winner's actor replaces
    /// whatever stale actor an expired previous claim left behind.
    pub async fn claim(&self, name: &str) -> AppResult<Claimed> {
        validate_name(name)?;
        let password = nanoid::nanoid!(16);
        let Some(info) = self.store.create_room(name, &password, now()).await? else {
            return Err(AppErr::AlreadyClaimed(name.to_string()));
        };

        let recent = self.store.get_posts(name, RECENT_POSTS as u32).await?;
        let tx = self.channels.sender(name).await;
        let room = {
            let mut rooms = self.rooms.write().await;
            // A lookup racing this claim may have materialized the row we
            // just committed; that actor carries this claim's password and
            // stays the one live instance. Anything else in the slot is a
            // leftover from an expired previous claim.
            let adopted = rooms
                .get(name)
                .filter(|existing| existing.password_matches(&password))
                .cloned();
            match adopted {
                Some(existing) => existing,
                None => {
                    let room = Arc::new(Room::new(
                        info.clone(),
                        recent,
                        self.store.clone(),
                        tx,
                        self.media_prefix.clone(),
                    ));
                    rooms.insert(name.to_string(), room.clone());
                    room
                }
            }
        };
        tracing::info!(room = %name, "room claimed");
        Ok(Claimed { room, info })
    }

    async fn materialize(&self, info: RoomInfo) -> AppResult<Arc<Room>> {
        let recent = self.store.get_posts(&info.name, RECENT_POSTS as u32).await?;
        let tx = self.channels.sender(&info.name).await;

        let mut rooms = self.rooms.write().await;
        // A racing loader may have installed the actor while we were at
        // the store; exactly one instance per name may win.
        if let Some(existing) = rooms.get(&info.name) {
            return Ok(existing.clone());
        }
        tracing::info!(room = %info.name, posts = recent.len(), "materializing room actor");
        let name = info.name.clone();
        let room = Arc::new(Room::new(
            info,
            recent,
            self.store.clone(),
            tx,
            self.media_prefix.clone(),
        ));
        rooms.insert(name, room.clone());
        Ok(room)
    }

    /// Drops `stale` from the map only while it is still the installed
    /// actor; a replacement installed by a racing claim stays put.
    async fn evict(&self, name: &str, stale: &Arc<Room>) {
        let mut rooms = self.rooms.write().await;
        if let Some(current) = rooms.get(name) {
            if Arc::ptr_eq(current, stale) {
                rooms.remove(name);
            }
        }
    }
}

pub(crate) fn validate_name(name: &str) -> AppResult<()> {
    let chars = name.chars().count();
    if chars == 0 || chars > MAX_NAME_CHARS {
        return Err(AppErr::Bad(format!(
            "room names must be 1..={MAX_NAME_CHARS} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        events::RoomEvent,
        store::{NewPost, Post, SqliteStore, ROOM_TTL_SECS},
    };
    use async_trait::async_trait;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use std::{
        str::FromStr,
        sync::atomic::{AtomicBool, Ordering},
        time::Duration,
    };

    async fn registry() -> (Arc<Registry>, SqliteStore, Arc<Channels>) {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:").unwrap();
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .unwrap();
        let store = SqliteStore::new(pool);
        store.migrate().await.unwrap();
        let channels = Arc::new(Channels::new());
        let registry = Arc::new(Registry::new(
            Arc::new(store.clone()),
            channels.clone(),
            "/media".into(),
        ));
        (registry, store, channels)
    }

    #[tokio::test]
    async fn unclaimed_rooms_do_not_exist() {
        let (registry, _, _) = registry().await;
        assert!(registry.get_or_load("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn lookups_share_one_actor() {
        let (registry, _, _) = registry().await;
        let claimed = registry.claim("lobby").await.unwrap();
        let a = registry.get_or_load("lobby").await.unwrap().unwrap();
        let b = registry.get_or_load("lobby").await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&a, &claimed.room));
    }

    #[tokio::test]
    async fn concurrent_claims_have_one_winner() {
        let (registry, store, _) = registry().await;
        let (a, b) = tokio::join!(registry.claim("lobby"), registry.claim("lobby"));

        let (winner, loser) = match (a, b) {
            (Ok(w), Err(l)) => (w, l),
            (Err(l), Ok(w)) => (w, l),
            other => panic!("expected exactly one winner, got {:?}", other.0.is_ok()),
        };
        assert!(matches!(loser, AppErr::AlreadyClaimed(_)));

        let row = store.get_room("lobby", now()).await.unwrap().unwrap();
        assert_eq!(row.password, winner.info.password);
    }

    #[tokio::test]
    async fn expired_claims_are_invisible_and_reclaimable() {
        let (registry, store, _) = registry().await;
        // A claim whose lease ran out long ago.
        store.create_room("lobby", "old", 0).await.unwrap().unwrap();

        assert!(registry.get_or_load("lobby").await.unwrap().is_none());

        let claimed = registry.claim("lobby").await.unwrap();
        assert_ne!(claimed.info.password, "old");
        assert!(registry.get_or_load("lobby").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn expired_leases_evict_the_cached_actor() {
        let (registry, store, _) = registry().await;
        let claimed = registry.claim("lobby").await.unwrap();
        let old_password = claimed.info.password.clone();
        assert!(registry.get_or_load("lobby").await.unwrap().is_some());

        // Renewing from a time far in the past parks expires_at at
        // zero, which is dead for any real clock.
        store.set_content("lobby", "", None, -ROOM_TTL_SECS).await.unwrap();

        // Store and registry must agree the room is gone.
        assert!(store.get_room("lobby", now()).await.unwrap().is_none());
        assert!(registry.get_or_load("lobby").await.unwrap().is_none());

        // The slot is reclaimable and the old secret died with it.
        let reclaimed = registry.claim("lobby").await.unwrap();
        assert!(!Arc::ptr_eq(&reclaimed.room, &claimed.room));
        assert!(!reclaimed.room.password_matches(&old_password));
    }

    #[tokio::test]
    async fn claim_seeds_actor_with_surviving_history() {
        let (registry, store, _) = registry().await;
        store.create_room("lobby", "old", 0).await.unwrap().unwrap();
        store
            .add_post(
                "lobby",
                &crate::store::NewPost {
                    name: "t".into(),
                    comment: "from before".into(),
                    ip: "127.0.0.1".into(),
                    image: None,
                },
                1,
            )
            .await
            .unwrap()
            .unwrap();

        let claimed = registry.claim("lobby").await.unwrap();
        let recent = claimed.room.recent_posts().await;
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].comment, "from before");
    }

    #[tokio::test]
    async fn subscribers_from_before_the_claim_get_events() {
        let (registry, _, channels) = registry().await;
        let mut rx = channels.subscribe("lobby").await;

        let claimed = registry.claim("lobby").await.unwrap();
        claimed.room.set_content("https://example.com/v", None).await.unwrap();

        match rx.recv().await.unwrap() {
            RoomEvent::Content(c) => assert_eq!(c.url, "https://example.com/v"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn names_are_bounded() {
        let (registry, _, _) = registry().await;
        assert!(matches!(registry.claim("").await, Err(AppErr::Bad(_))));
        let long = "x".repeat(65);
        assert!(matches!(registry.claim(&long).await, Err(AppErr::Bad(_))));
        assert!(registry.claim(&"x".repeat(64)).await.is_ok());
    }

    /// Stalls the first history read, holding a claim between its row
    /// commit and its map insert while a lookup slips in.
    struct HistoryStall {
        inner: SqliteStore,
        hit: AtomicBool,
    }

    #[async_trait]
    impl Store for HistoryStall {
        async fn migrate(&self) -> AppResult<()> {
            self.inner.migrate().await
        }

        async fn get_room(&self, name: &str, now: i64) -> AppResult<Option<RoomInfo>> {
            self.inner.get_room(name, now).await
        }

        async fn create_room(
            &self,
            name: &str,
            password: &str,
            now: i64,
        ) -> AppResult<Option<RoomInfo>> {
            self.inner.create_room(name, password, now).await
        }

        async fn set_content(
            &self,
            name: &str,
            url: &str,
            duration: Option<f64>,
            now: i64,
        ) -> AppResult<u64> {
            self.inner.set_content(name, url, duration, now).await
        }

        async fn get_posts(&self, room: &str, limit: u32) -> AppResult<Vec<Post>> {
            if !self.hit.swap(true, Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            self.inner.get_posts(room, limit).await
        }

        async fn add_post(&self, room: &str, post: &NewPost, now: i64) -> AppResult<Option<Post>> {
            self.inner.add_post(room, post, now).await
        }
    }

    #[tokio::test]
    async fn claim_adopts_the_actor_a_racing_lookup_installed() {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:").unwrap();
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .unwrap();
        let inner = SqliteStore::new(pool);
        inner.migrate().await.unwrap();
        let store = Arc::new(HistoryStall { inner, hit: AtomicBool::new(false) });
        let registry = Arc::new(Registry::new(
            store,
            Arc::new(Channels::new()),
            "/media".into(),
        ));

        // The claim commits its row, then parks in the stalled read.
        let claiming = tokio::spawn({
            let registry = registry.clone();
            async move { registry.claim("lobby").await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let looked_up = registry
            .get_or_load("lobby")
            .await
            .unwrap()
            .expect("row is committed");
        let claimed = claiming.await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&claimed.room, &looked_up));

        // One shared cache: a post through either handle is replayed.
        looked_up
            .append_post(NewPost {
                name: "t".into(),
                comment: "seen".into(),
                ip: "127.0.0.1".into(),
                image: None,
            })
            .await
            .unwrap();
        let recent = claimed.room.recent_posts().await;
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].comment, "seen");
    }
}
