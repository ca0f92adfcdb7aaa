use axum::{
    extract::{multipart::Field, ConnectInfo, Extension, Multipart, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use futures_util::stream::StreamExt;
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tokio::{fs::File, io::AsyncWriteExt};

use crate::{
    error::{bad, AppErr, AppResult},
    events::PostPayload,
    media::{
        hash,
        store::{MediaKind, MediaStore},
    },
    room::registry::Registry,
    store::{NewPost, PostImage},
};

pub fn router() -> Router {
    Router::new().route("/rooms/:room/posts", post(submit_post))
}

/// Streamed from the wire into a staging file; the ingest pipeline
/// decides its fate from the hash of these exact bytes.
struct StagedUpload {
    path: PathBuf,
    mime: String,
    filename: String,
}

async fn submit_post(
    Path(room): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Extension(registry): Extension<Arc<Registry>>,
    Extension(media): Extension<Arc<MediaStore>>,
    mut mp: Multipart,
) -> AppResult<impl IntoResponse> {
    let actor = registry
        .get_or_load(&room)
        .await?
        .ok_or_else(|| AppErr::NotFound(format!("room '{room}'")))?;

    let mut name = String::new();
    let mut comment = String::new();
    let mut image: Option<PostImage> = None;

    while let Some(field) = mp.next_field().await.map_err(bad)? {
        let part = field.name().unwrap_or_default().to_string();
        match part.as_str() {
            "name" => name = field.text().await.map_err(bad)?,
            "comment" => comment = field.text().await.map_err(bad)?,
            // Browsers send an empty image part when no file was picked.
            "image" if field.file_name().unwrap_or_default().is_empty() => {}
            "image" => image = Some(ingest_upload(&media, field).await?),
            _ => {}
        }
    }

    if comment.trim().is_empty() && image.is_none() {
        return Err(bad("a post needs a comment or an image"));
    }

    let post = actor
        .append_post(NewPost {
            name,
            comment,
            ip: addr.ip().to_string(),
            image,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(PostPayload::from_post(&post, media.url_prefix())),
    ))
}

/// Stages the field, ingests it, and removes the staging file whether
/// or not ingestion succeeded.
async fn ingest_upload(media: &MediaStore, field: Field<'_>) -> AppResult<PostImage> {
    let staged = stage_upload(media, field).await?;
    let stored = media.ingest(&staged.path, &staged.mime, MediaKind::Post).await;
    let _ = tokio::fs::remove_file(&staged.path).await;
    let stored = stored?;
    Ok(PostImage {
        hash: stored.hash,
        ext: stored.image_ext,
        thumb_ext: stored.thumb_ext,
        original_filename: staged.filename,
    })
}

async fn stage_upload(media: &MediaStore, mut field: Field<'_>) -> AppResult<StagedUpload> {
    let filename = field.file_name().unwrap_or("upload").to_string();
    let mime = hash::declared_mime(field.content_type(), &filename);
    // Refuse unsupported types before a single byte hits the disk.
    hash::policy(&mime)?;

    let path = media.stage_dir().join(uuid::Uuid::new_v4().to_string());
    let copy = async {
        let mut file = File::create(&path).await?;
        while let Some(chunk) = field.next().await {
            let chunk: Bytes = chunk.map_err(bad)?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok::<_, AppErr>(())
    };
    // An aborted body must not leave its half-written staging file.
    if let Err(err) = copy.await {
        let _ = tokio::fs::remove_file(&path).await;
        return Err(err);
    }

    Ok(StagedUpload { path, mime, filename })
}
