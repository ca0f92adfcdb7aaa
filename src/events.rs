//! JSON frames exchanged over the websocket.
//!
//! Server → client frames carry a `type` tag (`post` or `content`);
//! client → server frames carry `join` / `leave`. Every subscriber of a
//! room sees the same ordered stream of [`RoomEvent`]s.

use serde::{Deserialize, Serialize};

use crate::{
    media::store::MediaKind,
    store::{Post, RoomInfo},
};

/* ---------------- server → client ---------------- */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RoomEvent {
    Post(PostPayload),
    Content(ContentPayload),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostPayload {
    pub posted: i64,
    pub name: String,
    pub comment: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRef {
    pub url: String,
    pub thumb_url: String,
    pub original_filename: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentPayload {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

impl RoomEvent {
    pub fn post(post: &Post, media_prefix: &str) -> Self {
        Self::Post(PostPayload::from_post(post, media_prefix))
    }

    pub fn content(info: &RoomInfo) -> Self {
        Self::Content(ContentPayload {
            url: info.content_url.clone(),
            duration: info.content_duration,
        })
    }
}

impl PostPayload {
    /// Maps a stored post to its wire shape. The client never sees the
    /// submitter's address, only name, comment and derived media URLs.
    pub fn from_post(post: &Post, media_prefix: &str) -> Self {
        Self {
            posted: post.posted,
            name: post.name.clone(),
            comment: post.comment.clone(),
            image: post.image.as_ref().map(|img| ImageRef {
                url: format!("{media_prefix}/{}", MediaKind::Post.rel_image(&img.hash, &img.ext)),
                thumb_url: format!(
                    "{media_prefix}/{}",
                    MediaKind::Post.rel_thumb(&img.hash, &img.thumb_ext)
                ),
                original_filename: img.original_filename.clone(),
            }),
        }
    }
}

/* ---------------- client → server ---------------- */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientCmd {
    Join { room: String },
    Leave { room: String },
}
