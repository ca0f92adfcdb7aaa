//! Content identity and canonicalization policy for uploads.
//!
//! Every upload is identified by the BLAKE3 hash of its *original*
//! bytes, decided before any re-encoding. The policy fixes, per mime
//! type, which extension the stored artifact gets and whether the
//! source bytes are preserved as-is (animated formats) or re-encoded
//! to the canonical still format.

use tokio::io::AsyncReadExt;

use crate::error::{AppErr, AppResult};

/// Stills are re-encoded to JPEG regardless of the source format.
pub const CANONICAL_EXT: &str = "jpg";

const SCAN_BUF: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MediaPolicy {
    pub ext: &'static str,
    pub preserve_original: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanOutcome {
    pub hash: String,
    pub ext: &'static str,
    pub preserve_original: bool,
}

/// Decides how a mime type is stored, or refuses it outright.
/// Parameters after `;` are ignored.
pub fn policy(mime: &str) -> AppResult<MediaPolicy> {
    let essence = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    match essence.as_str() {
        "image/gif" => Ok(MediaPolicy { ext: "gif", preserve_original: true }),
        "image/png" | "image/jpeg" | "image/webp" | "image/bmp" => {
            Ok(MediaPolicy { ext: CANONICAL_EXT, preserve_original: false })
        }
        _ => Err(AppErr::UnsupportedMediaType(mime.to_string())),
    }
}

/// The mime type to trust for an upload: the declared content type when
/// the client sent a real one, otherwise a guess from the filename.
pub fn declared_mime(content_type: Option<&str>, filename: &str) -> String {
    match content_type {
        Some(ct) if !ct.is_empty() && ct != "application/octet-stream" => ct.to_string(),
        _ => mime_guess::from_path(filename)
            .first_or_octet_stream()
            .essence_str()
            .to_string(),
    }
}

/// Streams a staged file through BLAKE3 and pairs the digest with the
/// storage policy for its mime type. Rejects unsupported types before
/// touching the file.
pub async fn scan(path: &std::path::Path, mime: &str) -> AppResult<ScanOutcome> {
    let policy = policy(mime)?;

    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; SCAN_BUF];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(ScanOutcome {
        hash: hasher.finalize().to_hex().to_string(),
        ext: policy.ext,
        preserve_original: policy.preserve_original,
    })
}
