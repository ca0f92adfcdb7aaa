use axum::Router;

pub mod posts;
pub mod rooms;
pub mod ws;

pub fn router() -> Router {
    Router::new()
        .nest("/api", rooms::router().merge(posts::router()))
        .merge(ws::router())
}
