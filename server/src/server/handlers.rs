//! HTTP request handlers
//!
//! The devicecmd handlers speak the terminal push protocol: plaintext
//! bodies, a GMT `Date` header, and an unconditional `OK` for reply
//! submissions. Terminals have no retry-on-error logic, so soft failures
//! never surface as non-200 responses.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::server::state::ServerState;
use crate::utils::{http_date, version_info};

/// Query parameters for the devicecmd exchanges
#[derive(Debug, Deserialize)]
pub struct DeviceCmdQuery {
    #[serde(rename = "SN")]
    pub sn: Option<String>,
}

/// Poll handler: deliver pending commands to a terminal
pub async fn devicecmd_poll_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<DeviceCmdQuery>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    let Some(sn) = query.sn.filter(|sn| !sn.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "missing SN\n").into_response();
    };

    let body = state.engine.poll(&sn, Some(addr)).await;
    protocol_response(&state, body)
}

/// Reply submission handler
///
/// Decodes the reply lines and acknowledges matching commands; the
/// response is `OK` no matter how many lines were malformed or
/// unmatched. A POST with an empty body is a poll (terminals use either
/// verb to fetch commands).
pub async fn devicecmd_submit_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<DeviceCmdQuery>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    body: String,
) -> Response {
    let Some(sn) = query.sn.filter(|sn| !sn.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "missing SN\n").into_response();
    };

    if body.trim().is_empty() {
        let body = state.engine.poll(&sn, Some(addr)).await;
        return protocol_response(&state, body);
    }

    state.engine.submit_replies(&sn, &body).await;
    protocol_response(&state, "OK".to_string())
}

/// Plaintext response with the GMT `Date` header terminals expect
fn protocol_response(state: &ServerState, body: String) -> Response {
    let date = http_date(state.engine.clock().now());
    (StatusCode::OK, [(header::DATE, date)], body).into_response()
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "iclockd".to_string(),
        version: version.version,
    })
}

/// Version response
#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

/// Device list response
#[derive(Debug, Serialize)]
pub struct DevicesResponse {
    pub devices: Vec<DeviceInfo>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct DeviceInfo {
    pub sn: String,
    pub last_seen: String,
    pub address: Option<String>,
    pub online: bool,
    pub pending_commands: usize,
    pub inflight_commands: usize,
}

/// Device list handler
pub async fn devices_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let devices: Vec<DeviceInfo> = state
        .engine
        .device_summaries()
        .await
        .into_iter()
        .map(|summary| DeviceInfo {
            sn: summary.sn,
            last_seen: summary.last_seen.to_rfc3339(),
            address: summary.last_addr.map(|addr| addr.to_string()),
            online: summary.online,
            pending_commands: summary.pending_commands,
            inflight_commands: summary.inflight_commands,
        })
        .collect();

    let total = devices.len();

    Json(DevicesResponse { devices, total })
}
