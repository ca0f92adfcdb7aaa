//! Content-addressed media storage.
//!
//! Artifacts live under `<root>/<kind>/<hash>.<ext>` with thumbnails in
//! `<root>/<kind>/thumbs/<hash>.<ext>`. The hash keys everything: two
//! uploads with the same bytes share one artifact, and an ingest whose
//! artifacts already exist returns without decoding anything. Files are
//! written to a temp name and renamed into place, so a crash mid-write
//! never leaves a readable half-file. Nothing is ever deleted.

use image::{
    codecs::jpeg::JpegEncoder, imageops, DynamicImage, ImageEncoder, RgbImage, Rgba, RgbaImage,
};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use uuid::Uuid;

use crate::{
    error::{self, AppErr, AppResult},
    media::hash,
};

const STAGE_DIR: &str = "tmp";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Post,
    Emote,
}

impl MediaKind {
    pub fn dir(self) -> &'static str {
        match self {
            MediaKind::Post => "posts",
            MediaKind::Emote => "emotes",
        }
    }

    pub fn rel_image(self, hash: &str, ext: &str) -> String {
        format!("{}/{hash}.{ext}", self.dir())
    }

    pub fn rel_thumb(self, hash: &str, ext: &str) -> String {
        format!("{}/thumbs/{hash}.{ext}", self.dir())
    }
}

#[derive(Debug, Clone)]
pub struct MediaConfig {
    pub root: PathBuf,
    pub url_prefix: String,
    pub image_quality: u8,
    pub thumb_quality: u8,
    pub thumb_max: u32,
    pub thumb_bg: [u8; 3],
    pub ingest_timeout: Duration,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            root: "media".into(),
            url_prefix: "/media".into(),
            image_quality: 82,
            thumb_quality: 75,
            thumb_max: 320,
            thumb_bg: [0x22, 0x22, 0x22],
            ingest_timeout: Duration::from_secs(30),
        }
    }
}

/// An ingested artifact pair, ready to attach to a post.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredImage {
    pub hash: String,
    pub image_ext: String,
    pub thumb_ext: String,
}

pub struct MediaStore {
    cfg: MediaConfig,
}

impl MediaStore {
    pub fn new(cfg: MediaConfig) -> AppResult<Self> {
        for kind in [MediaKind::Post, MediaKind::Emote] {
            std::fs::create_dir_all(cfg.root.join(kind.dir()).join("thumbs"))?;
        }
        // Staging files mean nothing outside the request that wrote
        // them; a previous run's leftovers are junk.
        let stage = cfg.root.join(STAGE_DIR);
        match std::fs::remove_dir_all(&stage) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        std::fs::create_dir_all(stage)?;
        Ok(Self { cfg })
    }

    pub fn url_prefix(&self) -> &str {
        &self.cfg.url_prefix
    }

    /// Where uploads are staged before ingestion; same filesystem as the
    /// artifact directories so renames stay atomic.
    pub fn stage_dir(&self) -> PathBuf {
        self.cfg.root.join(STAGE_DIR)
    }

    /// Stores one upload: hashes the staged file, then either reuses the
    /// existing artifacts for that hash or produces them. Bounded by the
    /// configured timeout so a stalled encode fails the post instead of
    /// hanging it.
    pub async fn ingest(
        &self,
        staged: &Path,
        declared_mime: &str,
        kind: MediaKind,
    ) -> AppResult<StoredImage> {
        let secs = self.cfg.ingest_timeout.as_secs();
        match tokio::time::timeout(self.cfg.ingest_timeout, self.ingest_inner(staged, declared_mime, kind))
            .await
        {
            Ok(res) => res,
            Err(_) => Err(AppErr::Ingestion(format!("ingest timed out after {secs}s"))),
        }
    }

    async fn ingest_inner(
        &self,
        staged: &Path,
        declared_mime: &str,
        kind: MediaKind,
    ) -> AppResult<StoredImage> {
        let scanned = hash::scan(staged, declared_mime).await?;
        let image_path = self.cfg.root.join(kind.rel_image(&scanned.hash, scanned.ext));
        let thumb_path = self.cfg.root.join(kind.rel_thumb(&scanned.hash, scanned.ext));

        let stored = StoredImage {
            hash: scanned.hash,
            image_ext: scanned.ext.to_string(),
            thumb_ext: scanned.ext.to_string(),
        };

        let have_image = tokio::fs::try_exists(&image_path).await?;
        let have_thumb = tokio::fs::try_exists(&thumb_path).await?;
        if have_image && have_thumb {
            tracing::debug!(hash = %stored.hash, "artifacts already stored, skipping encode");
            return Ok(stored);
        }

        if scanned.preserve_original {
            // Animated formats: store the source bytes untouched and let
            // the thumbnail be a second name for the same inode.
            if !have_image {
                let bytes = tokio::fs::read(staged).await?;
                write_atomic(&image_path, &bytes).await?;
            }
            link_thumb(&image_path, &thumb_path).await?;
            return Ok(stored);
        }

        let bytes = tokio::fs::read(staged).await?;
        let cfg = self.cfg.clone();
        let (main, thumb) =
            tokio::task::spawn_blocking(move || -> AppResult<(Vec<u8>, Vec<u8>)> {
                let img = image::load_from_memory(&bytes).map_err(error::ingest)?;
                let thumb_rgb = flatten(&img.thumbnail(cfg.thumb_max, cfg.thumb_max), cfg.thumb_bg);
                let main_rgb = flatten(&img, cfg.thumb_bg);
                Ok((
                    encode_jpeg(&main_rgb, cfg.image_quality)?,
                    encode_jpeg(&thumb_rgb, cfg.thumb_quality)?,
                ))
            })
            .await
            .map_err(error::ingest)??;

        // Thumbnail first: the full image is the last artifact to land,
        // so an image on disk never sits beside a missing thumbnail.
        if !have_thumb {
            write_atomic(&thumb_path, &thumb).await?;
        }
        if !have_image {
            write_atomic(&image_path, &main).await?;
        }
        Ok(stored)
    }
}

async fn write_atomic(dest: &Path, bytes: &[u8]) -> AppResult<()> {
    let dir = dest
        .parent()
        .ok_or_else(|| AppErr::Ingestion(format!("no parent dir for {}", dest.display())))?;
    let tmp = dir.join(format!(".{}.tmp", Uuid::new_v4()));
    tokio::fs::write(&tmp, bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp, dest).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

async fn link_thumb(image_path: &Path, thumb_path: &Path) -> AppResult<()> {
    match tokio::fs::hard_link(image_path, thumb_path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        // Some filesystems refuse hard links; a copy keeps the contract.
        Err(_) => {
            tokio::fs::copy(image_path, thumb_path).await?;
            Ok(())
        }
    }
}

/// Composites alpha onto the configured background so JPEG output does
/// not turn transparency black.
fn flatten(img: &DynamicImage, bg: [u8; 3]) -> RgbImage {
    if img.color().has_alpha() {
        let mut canvas =
            RgbaImage::from_pixel(img.width(), img.height(), Rgba([bg[0], bg[1], bg[2], 255]));
        imageops::overlay(&mut canvas, &img.to_rgba8(), 0, 0);
        DynamicImage::ImageRgba8(canvas).to_rgb8()
    } else {
        img.to_rgb8()
    }
}

fn encode_jpeg(rgb: &RgbImage, quality: u8) -> AppResult<Vec<u8>> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality)
        .write_image(rgb.as_raw(), rgb.width(), rgb.height(), image::ExtendedColorType::Rgb8)
        .map_err(error::ingest)?;
    Ok(out)
}
