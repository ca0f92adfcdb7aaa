use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Extension,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{sink::SinkExt, stream::StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::{events::ClientCmd, room::registry::Registry, session::Session};

pub fn router() -> Router {
    Router::new().route("/ws", get(ws_handler))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Extension(registry): Extension<Arc<Registry>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| client_socket(socket, registry))
}

/* ---------------- per socket ---------------- */
async fn client_socket(socket: WebSocket, registry: Arc<Registry>) {
    let (mut sink, mut stream) = socket.split();
    let (outbox, mut inbox) = mpsc::unbounded_channel::<String>();
    let mut session = Session::new(registry, outbox);

    // Everything addressed to this socket, replay and fan-out alike,
    // funnels through the outbox; only this task writes to the sink.
    let mut writer = tokio::spawn(async move {
        while let Some(frame) = inbox.recv().await {
            if sink.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(raw))) => handle_frame(&mut session, &raw).await,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(_)) => break,
            },
            _ = &mut writer => break,
        }
    }

    session.disconnect();
    writer.abort();
}

async fn handle_frame(session: &mut Session, raw: &str) {
    match serde_json::from_str::<ClientCmd>(raw) {
        Ok(ClientCmd::Join { room }) => {
            if let Err(err) = session.join(&room).await {
                tracing::debug!(%room, %err, "join refused");
            }
        }
        Ok(ClientCmd::Leave { room }) => session.leave(&room),
        Err(err) => tracing::debug!(%err, "ignoring unparseable frame"),
    }
}
