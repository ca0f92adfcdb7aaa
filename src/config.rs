use anyhow::Context;
use std::{env, net::SocketAddr, time::Duration};

use crate::media::store::MediaConfig;

/// Runtime settings, loaded once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    pub token_secret: String,
    pub media: MediaConfig,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let token_secret = match env::var("TOKEN_SECRET") {
            Ok(s) if !s.is_empty() => s,
            _ => {
                tracing::warn!("TOKEN_SECRET unset, using a random secret; tokens will not survive restarts");
                nanoid::nanoid!(32)
            }
        };

        Ok(Self {
            database_url: var_or("DATABASE_URL", "sqlite://roomcast.db"),
            bind_addr: parse("BIND_ADDR", "0.0.0.0:3000")?,
            token_secret,
            media: MediaConfig {
                root: var_or("MEDIA_ROOT", "media").into(),
                url_prefix: var_or("MEDIA_URL_PREFIX", "/media"),
                image_quality: parse("IMAGE_QUALITY", "82")?,
                thumb_quality: parse("THUMB_QUALITY", "75")?,
                thumb_max: parse("THUMB_MAX", "320")?,
                thumb_bg: parse_rgb(&var_or("THUMB_BG", "222222"))
                    .context("invalid THUMB_BG")?,
                ingest_timeout: Duration::from_secs(parse("INGEST_TIMEOUT_SECS", "30")?),
            },
        })
    }
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse<T>(key: &str, default: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var_or(key, default)
        .parse()
        .with_context(|| format!("invalid {key}"))
}

/// Accepts `rrggbb` or `#rrggbb`.
fn parse_rgb(s: &str) -> anyhow::Result<[u8; 3]> {
    let hex = s.strip_prefix('#').unwrap_or(s);
    anyhow::ensure!(hex.len() == 6, "expected 6 hex digits, got '{s}'");
    let mut rgb = [0u8; 3];
    for (i, byte) in rgb.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
            .with_context(|| format!("bad hex in '{s}'"))?;
    }
    Ok(rgb)
}
