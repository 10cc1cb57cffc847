use axum::{
    debug_handler,
    extract::{ws::{Message, WebSocket}, State, WebSocketUpgrade},
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, error, info_span, warn, Instrument};

use crate::{
    hub::Hub,
    protocol::{ClientEvent, ServerEvent},
    store::{SqliteStore, Store},
};

#[debug_handler(state = crate::AppState)]
pub(crate) async fn room_ws(
    State(hub): State<Hub<SqliteStore>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |stream| serve_connection(hub, stream))
}

/// Runs one connection until the client goes away, then leaves its rooms.
pub async fn serve_connection<S: Store>(hub: Hub<S>, stream: WebSocket) {
    let (mut session, mut rx) = hub.connect();
    let span = info_span!("connection", id = %session.connection_id());

    async move {
        let (mut sender, mut receiver) = stream.split();

        let mut outbox_task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(err) => {
                        error!(%err, "failed to encode event");
                        continue;
                    }
                };
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
        });

        let outbox = session.outbox().clone();
        loop {
            tokio::select! {
                frame = receiver.next() => {
                    let Some(Ok(frame)) = frame else {
                        break;
                    };
                    let parsed = match frame {
                        Message::Text(text) => {
                            serde_json::from_str::<ClientEvent>(text.as_str())
                        }
                        Message::Binary(bytes) => serde_json::from_slice::<ClientEvent>(&bytes),
                        Message::Close(_) => break,
                        Message::Ping(_) | Message::Pong(_) => continue,
                    };

                    match parsed {
                        Ok(event) => hub.dispatch(&mut session, event).await,
                        Err(err) => {
                            debug!(%err, "malformed event");
                            session.send(ServerEvent::Error {
                                reason: format!("malformed event: {err}"),
                            });
                        }
                    }
                }
                _ = outbox.stalled() => {
                    warn!("client not reading, closing connection");
                    break;
                }
                _ = &mut outbox_task => break,
            }
        }

        hub.disconnect(&mut session).await;
        outbox_task.abort();
    }
    .instrument(span)
    .await
}
