//! Read-only HTTP view of the status board
//!
//! - `GET /api/v1/status`: latest value of every sensor with its metadata
//! - `GET /api/v1/raw`: the last parsed response frame

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use log::info;
use serde::Serialize;
use serde_json::{Map, Value};

use super::status::StatusBoard;
use crate::config::Sensor;

#[derive(Clone)]
pub struct AppState {
    pub board: Arc<StatusBoard>,
    pub sensors: Arc<BTreeMap<u16, Sensor>>,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    results: Map<String, Value>,
    time: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct RawResponse<'a> {
    time: DateTime<Utc>,
    unit: u8,
    function_code: u8,
    count: u8,
    registers: &'a [u16],
    checksum: u16,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/status", get(status))
        .route("/api/v1/raw", get(raw))
        .with_state(state)
}

/// Serve the status API until the listener fails.
///
/// # Errors
/// Returns an error if the address cannot be bound or serving fails.
pub async fn serve(addr: SocketAddr, state: AppState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Status API listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state)).await
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let snapshot = state.board.snapshot();

    let mut results = Map::new();
    for (key, entry) in &snapshot.results {
        let mut object = match state.sensors.get(&entry.register).map(serde_json::to_value) {
            Some(Ok(Value::Object(map))) => map,
            _ => Map::new(),
        };
        object.insert("value".to_string(), Value::from(entry.value));
        results.insert(key.clone(), Value::Object(object));
    }

    Json(StatusResponse { results, time: snapshot.updated })
}

async fn raw(State(state): State<AppState>) -> Response {
    let snapshot = state.board.snapshot();
    let Some(raw) = &snapshot.raw else {
        return (StatusCode::NOT_FOUND, "no data yet\n").into_response();
    };

    Json(RawResponse {
        time: raw.received,
        unit: raw.frame.unit,
        function_code: raw.frame.function_code,
        count: raw.frame.byte_count,
        registers: &raw.frame.registers,
        checksum: raw.frame.checksum,
    })
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LinkId, Pid};
    use crate::sinks::ReadingEvent;
    use mbsniff_common::{Quantity, QuantitySize, Reading, ResponseFrame};
    use std::time::SystemTime;

    fn state() -> AppState {
        let sensor: Sensor = serde_yml::from_str(
            "{object_id: soc, name: Battery, device_class: battery, register: 0x10, size: 1, scale: 1}",
        )
        .unwrap();
        AppState {
            board: Arc::new(StatusBoard::new()),
            sensors: Arc::new(BTreeMap::from([(0x10, sensor)])),
        }
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_status_merges_sensor_metadata() {
        let state = state();
        state.board.record(&[ReadingEvent {
            link: LinkId(0),
            pid: Pid(1),
            fd: 3,
            timestamp: SystemTime::now(),
            reading: Reading { quantity: Quantity::new(0x10, QuantitySize::One, 1.0, 0.0), value: 87.0, raw: vec![87] },
        }]);

        let Json(body) = status(State(state)).await;
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["results"]["0x10"]["value"], 87.0);
        assert_eq!(json["results"]["0x10"]["object_id"], "soc");
        assert_eq!(json["results"]["0x10"]["device_class"], "battery");
        assert!(json["time"].is_string());
    }

    #[tokio::test]
    async fn test_raw_without_data() {
        let response = raw(State(state())).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"no data yet\n");
    }

    #[tokio::test]
    async fn test_raw_reports_frame() {
        let state = state();
        let frame = ResponseFrame { unit: 1, function_code: 3, byte_count: 4, registers: vec![1, 2], checksum: 0x1234 };
        state.board.set_raw(frame, Utc::now());

        let response = raw(State(state)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["unit"], 1);
        assert_eq!(json["count"], 4);
        assert_eq!(json["registers"], serde_json::json!([1, 2]));
        assert_eq!(json["checksum"], 0x1234);
    }

    #[tokio::test]
    async fn test_status_empty() {
        let Json(body) = status(State(state())).await;
        assert!(body.results.is_empty());
        assert!(body.time.is_none());
    }
}
