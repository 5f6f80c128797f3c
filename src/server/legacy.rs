//! Legacy pull endpoint: recent readings as an HTML table.
//!
//! Independent of the ingestion path. It only reads the store.

use std::fmt::Write;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use serde::Deserialize;
use tracing::warn;

use super::AppState;
use crate::store::StoredReading;

/// Upper bound on `?limit=`.
pub const MAX_LEGACY_LIMIT: u32 = 500;

#[derive(Debug, Deserialize)]
pub struct LegacyQuery {
    limit: Option<u32>,
}

pub async fn readings_handler(
    State(state): State<AppState>,
    Query(query): Query<LegacyQuery>,
) -> Response {
    let limit = query
        .limit
        .unwrap_or(state.legacy_default_limit)
        .clamp(1, MAX_LEGACY_LIMIT);

    match state.store.recent_readings(limit).await {
        Ok(rows) => Html(render_table(&rows)).into_response(),
        Err(e) => {
            warn!(error = %e, "Legacy readings query failed");
            (StatusCode::SERVICE_UNAVAILABLE, "store unavailable").into_response()
        }
    }
}

/// Render rows as the table legacy clients expect, or `No data`.
pub fn render_table(rows: &[StoredReading]) -> String {
    if rows.is_empty() {
        return "No data".to_string();
    }

    let mut html = String::from(
        "<table border='1'><tr><th>ID</th><th>Breath Volume</th><th>Timestamp</th><th>Created At</th></tr>",
    );
    for row in rows {
        let _ = write!(
            html,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape(&row.id),
            escape(&row.breath_volume),
            escape(&row.timestamp),
            escape(row.created_at.as_deref().unwrap_or("")),
        );
    }
    html.push_str("</table>");
    html
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::Broadcaster;
    use crate::relay::RelayState;
    use crate::stats::RelayStats;
    use crate::store::HealthFlag;
    use crate::subscribe::ConnectionStatus;
    use crate::testing::{MemoryStore, StoreMode};
    use axum::body::Body;
    use axum::http::Request;
    use breathwatch_types::ReadingRow;
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tokio::sync::watch;
    use tower::ServiceExt;

    fn app(store: Arc<MemoryStore>) -> axum::Router {
        let stats = RelayStats::shared();
        let (_, relay_state) = watch::channel(RelayState::Running);
        let (_, bus_status) = watch::channel(ConnectionStatus::Connected);
        super::super::router(AppState {
            broadcaster: Broadcaster::new(4, stats.clone()),
            store,
            stats,
            relay_state,
            bus_status,
            store_health: HealthFlag::default(),
            legacy_default_limit: 10,
        })
    }

    async fn get(app: axum::Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[test]
    fn test_render_rows() {
        let html = render_table(&[StoredReading {
            id: "7".into(),
            breath_volume: "450".into(),
            timestamp: "1000".into(),
            created_at: Some("2025-01-01 10:00:00".into()),
        }]);
        assert!(html.starts_with("<table border='1'><tr><th>ID</th>"));
        assert!(html.contains("<tr><td>7</td><td>450</td><td>1000</td><td>2025-01-01 10:00:00</td></tr>"));
        assert!(html.ends_with("</table>"));
    }

    #[test]
    fn test_render_escapes_values() {
        let html = render_table(&[StoredReading {
            id: "1".into(),
            breath_volume: "<script>".into(),
            timestamp: "a&b".into(),
            created_at: None,
        }]);
        assert!(html.contains("&lt;script&gt;"));
        assert!(html.contains("a&amp;b"));
        assert!(!html.contains("<script>"));
    }

    #[tokio::test]
    async fn test_empty_store_says_no_data() {
        let (status, body) = get(app(MemoryStore::shared()), "/readings").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "No data");
    }

    #[tokio::test]
    async fn test_limit_and_order() {
        let store = MemoryStore::shared();
        for ts in 1..=20 {
            store.insert_reading(ReadingRow {
                breath_volume: 1.0,
                timestamp: ts,
            });
        }

        let (_, body) = get(app(store.clone()), "/readings").await;
        assert_eq!(body.matches("<tr><td>").count(), 10);

        let (_, body) = get(app(store), "/readings?limit=3").await;
        assert_eq!(body.matches("<tr><td>").count(), 3);
        let newest = body.find("<td>20</td>").unwrap();
        let older = body.find("<td>18</td>").unwrap();
        assert!(newest < older);
    }

    #[tokio::test]
    async fn test_store_failure_is_unavailable() {
        let store = MemoryStore::shared();
        store.set_mode(StoreMode::Outage);
        let (status, _) = get(app(store), "/readings").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
