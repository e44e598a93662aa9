#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::{Value, json};
use tokio::sync::RwLock;

/// Best-effort tracing setup, honoring `RUST_LOG`. Safe to call from every
/// test; only the first call wins.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// How the fake robot answers; switchable mid-test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RobotMode {
    Healthy,
    /// Stalls, then answers 500. Used to keep a refresh in flight while a
    /// newer one completes.
    SlowFailure,
    /// 200 with an HTML body, the captive-portal shape a probe must reject.
    HtmlHealth,
    ServerError,
}

pub struct RobotState {
    mode: RwLock<RobotMode>,
    health_hits: AtomicUsize,
    pin: String,
}

/// Fake robot HTTP API bound to an ephemeral localhost port.
pub struct MockRobot {
    pub addr: SocketAddr,
    state: Arc<RobotState>,
}

impl MockRobot {
    pub async fn start() -> Self {
        Self::start_with_pin("4242").await
    }

    pub async fn start_with_pin(pin: &str) -> Self {
        init_tracing();

        let state = Arc::new(RobotState {
            mode: RwLock::new(RobotMode::Healthy),
            health_hits: AtomicUsize::new(0),
            pin: pin.to_string(),
        });

        let router = Router::new()
            .route("/health", get(health))
            .route("/status", get(telemetry))
            .route("/network-info", get(network_info))
            .route("/claim/request", post(claim_request))
            .route("/claim/confirm", post(claim_confirm))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn set_mode(&self, mode: RobotMode) {
        *self.state.mode.write().await = mode;
    }

    /// Number of `/health` requests served so far.
    pub fn health_hits(&self) -> usize {
        self.state.health_hits.load(Ordering::SeqCst)
    }
}

async fn fail(mode: RobotMode) -> Response {
    if mode == RobotMode::SlowFailure {
        tokio::time::sleep(Duration::from_millis(300)).await;
    }
    StatusCode::INTERNAL_SERVER_ERROR.into_response()
}

async fn health(State(state): State<Arc<RobotState>>) -> Response {
    state.health_hits.fetch_add(1, Ordering::SeqCst);
    let mode = *state.mode.read().await;
    match mode {
        RobotMode::Healthy => Json(json!({
            "status": "ok",
            "version": "1.4.2",
            "network": {"ip": "10.0.0.23", "ssid": "LabNet", "mode": "station"},
        }))
        .into_response(),
        RobotMode::HtmlHealth => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/html")],
            "<html><body>sign in to continue</body></html>",
        )
            .into_response(),
        other => fail(other).await,
    }
}

async fn telemetry(State(state): State<Arc<RobotState>>) -> Response {
    let mode = *state.mode.read().await;
    match mode {
        RobotMode::Healthy => Json(json!({
            "battery_percent": 87.5,
            "charging": false,
            "network": {"ip": "10.0.0.23", "signal_dbm": -58},
            "lidar_rpm": 600,
        }))
        .into_response(),
        other => fail(other).await,
    }
}

async fn network_info(State(state): State<Arc<RobotState>>) -> Response {
    let mode = *state.mode.read().await;
    match mode {
        RobotMode::Healthy => Json(json!({
            "ip": "10.0.0.23",
            "ssid": "LabNet",
            "signal_dbm": -58,
            "mode": "station",
        }))
        .into_response(),
        other => fail(other).await,
    }
}

async fn claim_request(State(_state): State<Arc<RobotState>>) -> Response {
    Json(json!({"robot_id": "rov-7", "pin_required": true})).into_response()
}

async fn claim_confirm(
    State(state): State<Arc<RobotState>>,
    Json(body): Json<Value>,
) -> Response {
    if body.get("pin").and_then(Value::as_str) == Some(state.pin.as_str()) {
        Json(json!({
            "robot_id": "rov-7",
            "control_token": "tok-abc",
            "session_id": "sess-1",
        }))
        .into_response()
    } else {
        (StatusCode::FORBIDDEN, "pin rejected").into_response()
    }
}
