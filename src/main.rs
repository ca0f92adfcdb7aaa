use axum::{extract::DefaultBodyLimit, Extension, Router};
use std::{net::SocketAddr, sync::Arc};
use tower_http::{limit::RequestBodyLimitLayer, services::ServeDir};

use roomcast::{
    channels::Channels,
    config::Config,
    media::store::MediaStore,
    room::registry::Registry,
    routes,
    store::{SqliteStore, Store},
    utils::jwt::TokenService,
};

const BODY_LIMIT: usize = 100 * 1024 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().init();

    let cfg = Config::from_env()?;

    let store = SqliteStore::connect(&cfg.database_url).await?;
    store.migrate().await?;
    tracing::info!(db = %cfg.database_url, "store ready");

    let channels = Arc::new(Channels::new());
    let store: Arc<dyn Store> = Arc::new(store);
    let registry = Arc::new(Registry::new(
        store,
        channels,
        cfg.media.url_prefix.clone(),
    ));
    let media = Arc::new(MediaStore::new(cfg.media.clone())?);
    let tokens = TokenService::new(&cfg.token_secret);

    let app = Router::new()
        .nest_service(&cfg.media.url_prefix, ServeDir::new(&cfg.media.root))
        .merge(routes::router())
        .layer(Extension(registry))
        .layer(Extension(media))
        .layer(Extension(tokens))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT));

    let listener = tokio::net::TcpListener::bind(cfg.bind_addr).await?;
    tracing::info!(addr = %cfg.bind_addr, "listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
