//! Viewer push channel over WebSocket.
//!
//! Each socket owns one [`Viewer`]. Events are forwarded as JSON text
//! frames until the viewer ends, the client closes, or a send fails.

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use super::AppState;
use crate::broadcast::Viewer;

/// Handle WebSocket upgrade request
pub async fn websocket_handler(
    State(state): State<AppState>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if !state.accepting_viewers() {
        return (StatusCode::SERVICE_UNAVAILABLE, "relay is shutting down").into_response();
    }

    match ws {
        Ok(ws) => {
            let viewer = state.broadcaster.subscribe();
            ws.on_upgrade(move |socket| handle_socket(socket, viewer))
        }
        Err(rejection) => rejection.into_response(),
    }
}

/// Pump broadcast events to one viewer until either side goes away.
async fn handle_socket(socket: WebSocket, mut viewer: Viewer) {
    let id = viewer.id();
    let (mut sender, mut receiver) = socket.split();
    info!(viewer = id, "Viewer connected");

    loop {
        tokio::select! {
            event = viewer.recv() => {
                let Some(event) = event else {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                };
                let text = match event.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(viewer = id, error = %e, "Failed to encode viewer event");
                        continue;
                    }
                };
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(viewer = id, error = %e, "WebSocket error");
                    break;
                }
                // Viewers have nothing to say.
                Some(Ok(_)) => {}
            },
        }
    }

    info!(viewer = id, "Viewer disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::Broadcaster;
    use crate::relay::RelayState;
    use crate::stats::RelayStats;
    use crate::store::HealthFlag;
    use crate::subscribe::ConnectionStatus;
    use crate::testing::MemoryStore;
    use axum::body::Body;
    use axum::http::Request;
    use tokio::sync::watch;
    use tower::ServiceExt;

    fn app(relay: RelayState) -> axum::Router {
        let stats = RelayStats::shared();
        let (_, relay_state) = watch::channel(relay);
        let (_, bus_status) = watch::channel(ConnectionStatus::Connecting);
        super::super::router(AppState {
            broadcaster: Broadcaster::new(4, stats.clone()),
            store: MemoryStore::shared(),
            stats,
            relay_state,
            bus_status,
            store_health: HealthFlag::default(),
            legacy_default_limit: 10,
        })
    }

    #[tokio::test]
    async fn test_upgrade_refused_while_draining() {
        let response = app(RelayState::Draining)
            .oneshot(Request::get("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_plain_request_is_rejected() {
        let response = app(RelayState::Running)
            .oneshot(Request::get("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }
}
