use axum::{
    extract::{Extension, Json, Path},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{
    error::{AppErr, AppResult},
    room::registry::Registry,
    utils::jwt::TokenService,
};

#[derive(Deserialize)]
struct LoginInput {
    password: String,
}

#[derive(Deserialize)]
struct ContentInput {
    url: String,
    duration: Option<f64>,
}

#[derive(Serialize)]
struct TokenJson {
    token: String,
}

#[derive(Serialize)]
struct ClaimJson {
    token: String,
    name: String,
    password: String,
}

pub fn router() -> Router {
    Router::new()
        .route("/rooms/:room/claim", post(claim))
        .route("/rooms/:room/login", post(login))
        .route("/rooms/:room/content", put(set_content))
}

/* ---------------- Claim ---------------- */
async fn claim(
    Path(room): Path<String>,
    Extension(registry): Extension<Arc<Registry>>,
    Extension(tokens): Extension<TokenService>,
) -> AppResult<impl IntoResponse> {
    let claimed = registry.claim(&room).await?;
    let token = tokens.issue(&room)?;
    // The generated password is shown exactly once, here.
    Ok((
        StatusCode::CREATED,
        Json(ClaimJson {
            token,
            name: claimed.info.name,
            password: claimed.info.password,
        }),
    ))
}

/* ---------------- Login ---------------- */
async fn login(
    Path(room): Path<String>,
    Extension(registry): Extension<Arc<Registry>>,
    Extension(tokens): Extension<TokenService>,
    Json(p): Json<LoginInput>,
) -> AppResult<Json<TokenJson>> {
    let actor = registry
        .get_or_load(&room)
        .await?
        .ok_or_else(|| AppErr::NotFound(format!("room '{room}'")))?;
    if !actor.password_matches(&p.password) {
        return Err(AppErr::Unauthorized("wrong password".into()));
    }
    Ok(Json(TokenJson { token: tokens.issue(&room)? }))
}

/* ---------------- Content control ---------------- */
async fn set_content(
    Path(room): Path<String>,
    headers: HeaderMap,
    Extension(registry): Extension<Arc<Registry>>,
    Extension(tokens): Extension<TokenService>,
    Json(p): Json<ContentInput>,
) -> AppResult<StatusCode> {
    tokens.authorize(bearer(&headers)?, &room)?;
    let actor = registry
        .get_or_load(&room)
        .await?
        .ok_or_else(|| AppErr::NotFound(format!("room '{room}'")))?;
    actor.set_content(&p.url, p.duration).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn bearer(headers: &HeaderMap) -> AppResult<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| AppErr::Unauthorized("missing bearer token".into()))
}
