//! Authentication lifecycle and LUKS passphrase maintenance.

use std::os::unix::fs::DirBuilderExt;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::SET_COOKIE;
use axum::response::{AppendHeaders, IntoResponse, Json, Response};
use serde_json::json;

use interlock_core::response::{ApiResponse, STATUS_INVALID_SESSION};
use interlock_core::status::Severity;
use interlock_core::{exec, Error, Result};
use interlock_volume::KeyOp;

use crate::api::{error_response, into_json};
use crate::request;
use crate::session::{self, clear_session, COOKIE_AGE_SECS};
use crate::state::SharedState;

/// Unlock, mount and activate: the transition from LOCKED to a live
/// session. Any failure after a partial unlock forces the volume back to
/// LOCKED before the error is returned.
fn authenticate(state: &SharedState, volume: &str, password: &str, dispose: bool) -> Result<()> {
    if state.config.test_mode {
        state.registry.activate_all(true);
        return Ok(());
    }

    if volume.is_empty() {
        return Err(Error::BadRequest("empty volume name".into()));
    }

    if password.is_empty() {
        return Err(Error::BadRequest("empty password".into()));
    }

    state.volume.unlock(volume, password)?;
    state.volume.mount()?;

    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(state.sandbox.key_store())?;

    if dispose {
        // single-use credential: drop the used passphrase from the volume
        state
            .volume
            .key_op(volume, password, None, KeyOp::Remove)?;
    }

    state.registry.activate_all(true);

    Ok(())
}

pub async fn login(State(state): State<SharedState>, body: Bytes) -> Response {
    let req = match request::parse_validated(&body, &["volume:s", "password:s", "dispose:b"]) {
        Ok(req) => req,
        Err(e) => return error_response(&state, e, None).into_response(),
    };

    let volume = request::str_field(&req, "volume").to_string();
    let password = request::str_field(&req, "password").to_string();
    let dispose = request::bool_field(&req, "dispose");

    let mut session = state.session.lock().await;

    if session.active() {
        return error_response(
            &state,
            Error::Other("existing session".into()),
            Some(STATUS_INVALID_SESSION),
        )
        .into_response();
    }

    let auth_state = state.clone();
    let auth_volume = volume.clone();
    let auth = tokio::task::spawn_blocking(move || {
        let res = authenticate(&auth_state, &auth_volume, &password, dispose);

        if res.is_err() && !auth_state.config.test_mode {
            // a partial unlock must not leave the volume exposed
            let _ = auth_state.volume.unmount();
            let _ = auth_state.volume.lock();
        }

        res
    })
    .await
    .unwrap_or_else(|e| Err(Error::Other(e.to_string())));

    if let Err(e) = auth {
        return error_response(&state, e, Some(STATUS_INVALID_SESSION)).into_response();
    }

    let session_id = session::random_token();
    let xsrf_token = session::random_token();

    if !state.config.debug {
        // switch logging to the encrypted partition
        if let Err(e) = state.logs.enable_file(state.sandbox.mount_point()) {
            state.status.error(&e);
        }
    }

    session.set(&volume, session_id.clone(), xsrf_token.clone());
    session.arm_expiry(session::spawn_expiry(state.clone()));
    drop(session);

    let cookie = session::session_cookie(
        &session_id,
        COOKIE_AGE_SECS as i64,
        state.config.tls != "off",
    );

    let envelope = ApiResponse::ok(json!({
        "volume": volume,
        "XSRFToken": xsrf_token,
    }));

    (AppendHeaders([(SET_COOKIE, cookie)]), Json(envelope)).into_response()
}

/// Re-send the XSRF token to an authenticated client landing on the login
/// page again (e.g. a second tab); the session guard has already checked
/// the cookie.
pub async fn refresh(State(state): State<SharedState>) -> Json<ApiResponse> {
    let session = state.session.lock().await;

    Json(ApiResponse::ok(json!({
        "volume": session.volume,
        "XSRFToken": session.xsrf_token(),
    })))
}

pub async fn logout(State(state): State<SharedState>) -> Response {
    let result = clear_session(&state).await;

    // expire the cookie regardless of how teardown went
    let cookie = session::session_cookie("delete", -1, true);
    let headers = AppendHeaders([(SET_COOKIE, cookie)]);

    match result {
        Ok(()) => (headers, Json(ApiResponse::ok_empty())).into_response(),
        Err(e) => (headers, error_response(&state, e, None)).into_response(),
    }
}

pub async fn poweroff(State(state): State<SharedState>) -> Response {
    let res = logout(State(state.clone())).await;

    state
        .status
        .log(Severity::Notice, "powering off the device");

    tokio::task::spawn_blocking(|| {
        let _ = exec::run("/sbin/poweroff", &[], true, None);
    });

    res
}

async fn key_op(state: SharedState, body: Bytes, op: KeyOp) -> Json<ApiResponse> {
    let attrs: &[&str] = match op {
        KeyOp::Remove => &["volume:s", "password:s"],
        _ => &["volume:s", "password:s", "newpassword:s"],
    };

    let req = match request::parse_validated(&body, attrs) {
        Ok(req) => req,
        Err(e) => return error_response(&state, e, None),
    };

    let volume = request::str_field(&req, "volume").to_string();
    let password = request::str_field(&req, "password").to_string();
    let new_password = match op {
        KeyOp::Remove => None,
        _ => Some(request::str_field(&req, "newpassword").to_string()),
    };

    let manager = state.volume.clone();
    let result = tokio::task::spawn_blocking(move || {
        manager.key_op(&volume, &password, new_password.as_deref(), op)
    })
    .await
    .unwrap_or_else(|e| Err(Error::Other(e.to_string())));

    into_json(&state, result.map(|_| ApiResponse::ok_empty()))
}

pub async fn luks_change(State(state): State<SharedState>, body: Bytes) -> Json<ApiResponse> {
    key_op(state, body, KeyOp::Change).await
}

pub async fn luks_add(State(state): State<SharedState>, body: Bytes) -> Json<ApiResponse> {
    key_op(state, body, KeyOp::Add).await
}

pub async fn luks_remove(State(state): State<SharedState>, body: Bytes) -> Json<ApiResponse> {
    key_op(state, body, KeyOp::Remove).await
}
