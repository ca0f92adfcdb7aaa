//! Persistence for rooms and their post history.
//!
//! Rooms are leases: a claim owns a name until `expires_at`, and any
//! write to the room renews the lease. An expired row is invisible to
//! reads and may be replaced by the next claim; post history is keyed
//! by room name and deliberately survives re-claims.

use async_trait::async_trait;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Row, SqlitePool,
};
use std::str::FromStr;

use crate::error::AppResult;

/// Lease length, renewed on every claim, post or content change.
pub const ROOM_TTL_SECS: i64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq)]
pub struct RoomInfo {
    pub name: String,
    pub password: String,
    pub content_url: String,
    pub content_duration: Option<f64>,
    pub claimed_at: i64,
    pub expires_at: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostImage {
    pub hash: String,
    pub ext: String,
    pub thumb_ext: String,
    pub original_filename: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub id: i64,
    pub room: String,
    pub posted: i64,
    pub name: String,
    pub comment: String,
    pub ip: String,
    pub image: Option<PostImage>,
}

/// A post as submitted, before the store assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub name: String,
    pub comment: String,
    pub ip: String,
    pub image: Option<PostImage>,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn migrate(&self) -> AppResult<()>;

    /// Fetches a room, treating expired leases as absent.
    async fn get_room(&self, name: &str, now: i64) -> AppResult<Option<RoomInfo>>;

    /// Claims a name. Returns `None` when a live lease already holds it;
    /// an expired lease is replaced in the same statement.
    async fn create_room(&self, name: &str, password: &str, now: i64)
        -> AppResult<Option<RoomInfo>>;

    /// Updates the shared content and renews the lease. Returns the
    /// number of rooms touched (0 when the room is gone).
    async fn set_content(&self, name: &str, url: &str, duration: Option<f64>, now: i64)
        -> AppResult<u64>;

    /// Last `limit` posts, oldest first.
    async fn get_posts(&self, room: &str, limit: u32) -> AppResult<Vec<Post>>;

    /// Appends a post and renews the lease. Returns `None` when the room
    /// is missing or expired.
    async fn add_post(&self, room: &str, post: &NewPost, now: i64) -> AppResult<Option<Post>>;
}

/* ---------------- sqlite ---------------- */

const MIGRATIONS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS rooms (
        name             TEXT PRIMARY KEY,
        password         TEXT NOT NULL,
        content_url      TEXT NOT NULL DEFAULT '',
        content_duration REAL,
        claimed_at       INTEGER NOT NULL,
        expires_at       INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS posts (
        id                INTEGER PRIMARY KEY AUTOINCREMENT,
        room              TEXT NOT NULL,
        posted            INTEGER NOT NULL,
        name              TEXT NOT NULL,
        comment           TEXT NOT NULL,
        ip                TEXT NOT NULL,
        image_hash        TEXT,
        image_ext         TEXT,
        thumb_ext         TEXT,
        original_filename TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_posts_room ON posts (room, id)",
];

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str) -> AppResult<Self> {
        let opts = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(opts).await?;
        Ok(Self { pool })
    }
}

fn row_to_room(row: &SqliteRow) -> RoomInfo {
    RoomInfo {
        name: row.get("name"),
        password: row.get("password"),
        content_url: row.get("content_url"),
        content_duration: row.get("content_duration"),
        claimed_at: row.get("claimed_at"),
        expires_at: row.get("expires_at"),
    }
}

fn row_to_post(row: &SqliteRow) -> Post {
    let image = row
        .get::<Option<String>, _>("image_hash")
        .map(|hash| PostImage {
            hash,
            ext: row.get("image_ext"),
            thumb_ext: row.get("thumb_ext"),
            original_filename: row.get("original_filename"),
        });
    Post {
        id: row.get("id"),
        room: row.get("room"),
        posted: row.get("posted"),
        name: row.get("name"),
        comment: row.get("comment"),
        ip: row.get("ip"),
        image,
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn migrate(&self) -> AppResult<()> {
        for step in MIGRATIONS {
            sqlx::query(step).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn get_room(&self, name: &str, now: i64) -> AppResult<Option<RoomInfo>> {
        let row = sqlx::query(
            "SELECT name, password, content_url, content_duration, claimed_at, expires_at
             FROM rooms WHERE name = ? AND expires_at > ?",
        )
        .bind(name)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_room))
    }

    async fn create_room(
        &self,
        name: &str,
        password: &str,
        now: i64,
    ) -> AppResult<Option<RoomInfo>> {
        // Single statement so two racing claims cannot both win: the
        // guarded SELECT yields no row while a live lease exists.
        let expires_at = now + ROOM_TTL_SECS;
        let done = sqlx::query(
            "INSERT OR REPLACE INTO rooms
                 (name, password, content_url, content_duration, claimed_at, expires_at)
             SELECT ?, ?, '', NULL, ?, ?
             WHERE NOT EXISTS (SELECT 1 FROM rooms WHERE name = ? AND expires_at > ?)",
        )
        .bind(name)
        .bind(password)
        .bind(now)
        .bind(expires_at)
        .bind(name)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if done.rows_affected() == 0 {
            return Ok(None);
        }
        Ok(Some(RoomInfo {
            name: name.to_string(),
            password: password.to_string(),
            content_url: String::new(),
            content_duration: None,
            claimed_at: now,
            expires_at,
        }))
    }

    async fn set_content(
        &self,
        name: &str,
        url: &str,
        duration: Option<f64>,
        now: i64,
    ) -> AppResult<u64> {
        let done = sqlx::query(
            "UPDATE rooms SET content_url = ?, content_duration = ?, expires_at = ?
             WHERE name = ? AND expires_at > ?",
        )
        .bind(url)
        .bind(duration)
        .bind(now + ROOM_TTL_SECS)
        .bind(name)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected())
    }

    async fn get_posts(&self, room: &str, limit: u32) -> AppResult<Vec<Post>> {
        let rows = sqlx::query(
            "SELECT id, room, posted, name, comment, ip,
                    image_hash, image_ext, thumb_ext, original_filename
             FROM (SELECT * FROM posts WHERE room = ? ORDER BY id DESC LIMIT ?)
             ORDER BY id ASC",
        )
        .bind(room)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_post).collect())
    }

    async fn add_post(&self, room: &str, post: &NewPost, now: i64) -> AppResult<Option<Post>> {
        // Renew-first doubles as the liveness check: touching zero rows
        // means the lease is gone and the post must be refused.
        let renewed = sqlx::query(
            "UPDATE rooms SET expires_at = ? WHERE name = ? AND expires_at > ?",
        )
        .bind(now + ROOM_TTL_SECS)
        .bind(room)
        .bind(now)
        .execute(&self.pool)
        .await?;
        if renewed.rows_affected() == 0 {
            return Ok(None);
        }

        let image = post.image.as_ref();
        let done = sqlx::query(
            "INSERT INTO posts
                 (room, posted, name, comment, ip,
                  image_hash, image_ext, thumb_ext, original_filename)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(room)
        .bind(now)
        .bind(&post.name)
        .bind(&post.comment)
        .bind(&post.ip)
        .bind(image.map(|i| i.hash.as_str()))
        .bind(image.map(|i| i.ext.as_str()))
        .bind(image.map(|i| i.thumb_ext.as_str()))
        .bind(image.map(|i| i.original_filename.as_str()))
        .execute(&self.pool)
        .await?;

        Ok(Some(Post {
            id: done.last_insert_rowid(),
            room: room.to_string(),
            posted: now,
            name: post.name.clone(),
            comment: post.comment.clone(),
            ip: post.ip.clone(),
            image: post.image.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> SqliteStore {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:").unwrap();
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .unwrap();
        let store = SqliteStore::new(pool);
        store.migrate().await.unwrap();
        store
    }

    fn text_post(comment: &str) -> NewPost {
        NewPost {
            name: "tester".into(),
            comment: comment.into(),
            ip: "127.0.0.1".into(),
            image: None,
        }
    }

    #[tokio::test]
    async fn claim_is_exclusive_while_live() {
        let store = memory_store().await;
        let first = store.create_room("lobby", "pw1", 100).await.unwrap();
        assert!(first.is_some());
        let second = store.create_room("lobby", "pw2", 200).await.unwrap();
        assert!(second.is_none());

        let info = store.get_room("lobby", 200).await.unwrap().unwrap();
        assert_eq!(info.password, "pw1");
    }

    #[tokio::test]
    async fn expired_lease_is_invisible_and_reclaimable() {
        let store = memory_store().await;
        store.create_room("lobby", "old", 0).await.unwrap().unwrap();
        store.add_post("lobby", &text_post("kept"), 10).await.unwrap().unwrap();

        // add_post renewed the lease at t=10, so it runs out at 10 + TTL.
        let after = 10 + ROOM_TTL_SECS + 1;
        assert!(store.get_room("lobby", after).await.unwrap().is_none());

        let reclaimed = store.create_room("lobby", "new", after).await.unwrap().unwrap();
        assert_eq!(reclaimed.password, "new");
        assert_eq!(reclaimed.content_url, "");

        // History outlives the lease that produced it.
        let posts = store.get_posts("lobby", 50).await.unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].comment, "kept");
    }

    #[tokio::test]
    async fn get_posts_returns_tail_in_order() {
        let store = memory_store().await;
        store.create_room("lobby", "pw", 0).await.unwrap().unwrap();
        for i in 0..60 {
            store
                .add_post("lobby", &text_post(&i.to_string()), i)
                .await
                .unwrap()
                .unwrap();
        }
        let posts = store.get_posts("lobby", 50).await.unwrap();
        assert_eq!(posts.len(), 50);
        assert_eq!(posts[0].comment, "10");
        assert_eq!(posts[49].comment, "59");
        assert!(posts.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[tokio::test]
    async fn add_post_refuses_missing_or_expired_room() {
        let store = memory_store().await;
        assert!(store.add_post("ghost", &text_post("x"), 0).await.unwrap().is_none());

        store.create_room("lobby", "pw", 0).await.unwrap().unwrap();
        let after = ROOM_TTL_SECS + 1;
        assert!(store.add_post("lobby", &text_post("x"), after).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn activity_renews_the_lease() {
        let store = memory_store().await;
        store.create_room("lobby", "pw", 0).await.unwrap().unwrap();

        let near_expiry = ROOM_TTL_SECS - 10;
        store.add_post("lobby", &text_post("ping"), near_expiry).await.unwrap().unwrap();

        // Would have expired at TTL without the renewal.
        let past_original = ROOM_TTL_SECS + 100;
        let info = store.get_room("lobby", past_original).await.unwrap().unwrap();
        assert_eq!(info.expires_at, near_expiry + ROOM_TTL_SECS);
    }

    #[tokio::test]
    async fn set_content_updates_live_rooms_only() {
        let store = memory_store().await;
        assert_eq!(store.set_content("ghost", "u", None, 0).await.unwrap(), 0);

        store.create_room("lobby", "pw", 0).await.unwrap().unwrap();
        let touched = store
            .set_content("lobby", "https://example.com/v.mp4", Some(42.0), 5)
            .await
            .unwrap();
        assert_eq!(touched, 1);

        let info = store.get_room("lobby", 6).await.unwrap().unwrap();
        assert_eq!(info.content_url, "https://example.com/v.mp4");
        assert_eq!(info.content_duration, Some(42.0));
        assert_eq!(info.expires_at, 5 + ROOM_TTL_SECS);
    }

    #[tokio::test]
    async fn image_columns_roundtrip() {
        let store = memory_store().await;
        store.create_room("lobby", "pw", 0).await.unwrap().unwrap();
        let post = NewPost {
            name: "tester".into(),
            comment: String::new(),
            ip: "127.0.0.1".into(),
            image: Some(PostImage {
                hash: "deadbeef".into(),
                ext: "jpg".into(),
                thumb_ext: "jpg".into(),
                original_filename: "cat.png".into(),
            }),
        };
        store.add_post("lobby", &post, 1).await.unwrap().unwrap();

        let got = store.get_posts("lobby", 10).await.unwrap();
        assert_eq!(got[0].image, post.image);
        assert_eq!(got[0].ip, "127.0.0.1");
    }
}
