//! HTTP surface: the viewer push channel, the legacy table, and health.
//!
//! | Route           | Purpose                                          |
//! |-----------------|--------------------------------------------------|
//! | `GET /ws`       | WebSocket stream of [`ViewerEvent`]s             |
//! | `GET /readings` | Most recent stored readings as an HTML table     |
//! | `GET /health`   | Lifecycle state, connectivity, and counters      |
//!
//! [`ViewerEvent`]: crate::broadcast::ViewerEvent

mod legacy;
mod ws;

use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::broadcast::Broadcaster;
use crate::relay::RelayState;
use crate::stats::{RelayStats, StatsSnapshot};
use crate::store::{HealthFlag, RecordStore, StoreHealth};
use crate::subscribe::ConnectionStatus;

pub use legacy::{render_table, MAX_LEGACY_LIMIT};

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    /// Live fan-out to viewers.
    pub broadcaster: Broadcaster,
    /// Store for the legacy read path.
    pub store: Arc<dyn RecordStore>,
    /// Relay counters.
    pub stats: Arc<RelayStats>,
    /// Relay lifecycle.
    pub relay_state: watch::Receiver<RelayState>,
    /// Bus connection status.
    pub bus_status: watch::Receiver<ConnectionStatus>,
    /// Store health as seen by the persistence sink.
    pub store_health: HealthFlag,
    /// Rows returned by `/readings` without `?limit=`.
    pub legacy_default_limit: u32,
}

impl AppState {
    /// Whether new viewer connections are accepted.
    pub fn accepting_viewers(&self) -> bool {
        matches!(
            *self.relay_state.borrow(),
            RelayState::Starting | RelayState::Running
        )
    }
}

/// Build the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::websocket_handler))
        .route("/readings", get(legacy::readings_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until `shutdown` resolves, then stop accepting connections.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!("Viewer server listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

#[derive(Debug, Serialize)]
struct HealthReport {
    state: RelayState,
    bus: ConnectionStatus,
    store: StoreHealth,
    viewers: usize,
    stats: StatsSnapshot,
}

async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let report = HealthReport {
        state: *state.relay_state.borrow(),
        bus: *state.bus_status.borrow(),
        store: state.store_health.get(),
        viewers: state.broadcaster.viewer_count(),
        stats: state.stats.snapshot(),
    };
    let status = match report.state {
        RelayState::Running => StatusCode::OK,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryStore;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn state(relay: RelayState) -> (AppState, watch::Sender<RelayState>) {
        let stats = RelayStats::shared();
        let (relay_tx, relay_state) = watch::channel(relay);
        let (_, bus_status) = watch::channel(ConnectionStatus::Connected);
        let state = AppState {
            broadcaster: Broadcaster::new(4, stats.clone()),
            store: MemoryStore::shared(),
            stats,
            relay_state,
            bus_status,
            store_health: HealthFlag::default(),
            legacy_default_limit: 10,
        };
        (state, relay_tx)
    }

    #[tokio::test]
    async fn test_health_reports_running() {
        let (state, _relay) = state(RelayState::Running);
        let _viewer = state.broadcaster.subscribe();

        let response = router(state)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["state"], "running");
        assert_eq!(json["bus"], "connected");
        assert_eq!(json["store"], "healthy");
        assert_eq!(json["viewers"], 1);
        assert_eq!(json["stats"]["received"], 0);
    }

    #[tokio::test]
    async fn test_health_unavailable_while_draining() {
        let (state, _relay) = state(RelayState::Draining);
        let response = router(state)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_viewers_refused_after_running() {
        let (state, relay) = state(RelayState::Running);
        assert!(state.accepting_viewers());
        relay.send_replace(RelayState::Draining);
        assert!(!state.accepting_viewers());
    }
}
