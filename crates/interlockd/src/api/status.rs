//! Daemon status endpoints and the device-time setter.

use axum::body::Bytes;
use axum::extract::State;
use axum::response::Json;
use chrono::Timelike;
use serde_json::json;

use interlock_core::response::ApiResponse;
use interlock_core::status::Severity;
use interlock_core::{exec, Error, Result};

use crate::api::into_json;
use crate::request;
use crate::state::SharedState;

pub async fn version(State(state): State<SharedState>) -> Json<ApiResponse> {
    let mut build = env!("CARGO_PKG_VERSION").to_string();

    if state.config.hsm != "off" {
        build = format!("{build} {}", state.config.hsm);
    }

    Json(ApiResponse::ok(json!({
        "revision": env!("CARGO_PKG_VERSION"),
        "build": build,
        "key_path": state.config.key_path,
    })))
}

pub async fn running(State(state): State<SharedState>) -> Json<ApiResponse> {
    let mut info: libc::sysinfo = unsafe { std::mem::zeroed() };
    unsafe { libc::sysinfo(&mut info) };

    Json(ApiResponse::ok(json!({
        "uptime": info.uptime,
        "load_1": info.loads[0],
        "load_5": info.loads[1],
        "load_15": info.loads[2],
        "freeram": info.freeram,
        "log": state.status.entries(),
        "notification": state.status.notifications(),
    })))
}

pub async fn set_time(State(state): State<SharedState>, body: Bytes) -> Json<ApiResponse> {
    into_json(&state, set_time_inner(&state, &body))
}

fn set_time_inner(state: &SharedState, body: &[u8]) -> Result<ApiResponse> {
    let req = request::parse_validated(body, &["epoch:n"])?;
    let epoch = request::i64_field(&req, "epoch")?;

    if state.config.set_time {
        exec::run("/bin/date", &["-s", &format!("@{epoch}")], true, None)
            .map_err(|e| Error::ExternalTool(e.to_string()))?;

        let now = chrono::Local::now();
        state.status.log(
            Severity::Notice,
            format!(
                "adjusted device time to {:02}:{:02}:{:02}",
                now.hour(),
                now.minute(),
                now.second()
            ),
        );
    }

    Ok(ApiResponse::ok_empty())
}
