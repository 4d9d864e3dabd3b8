//! Cipher enumeration, key management and cipher-private endpoints.

use std::fs;

use axum::body::Bytes;
use axum::extract::{Path as AxumPath, State};
use axum::response::Json;
use serde_json::{json, Value};

use interlock_core::response::ApiResponse;
use interlock_core::status::{Notification, Severity};
use interlock_core::{Error, Result};
use interlock_crypto::{keystore, Key};

use crate::api::into_json;
use crate::request;
use crate::state::{AppState, SharedState};

/// Enabled cipher descriptors.
pub async fn ciphers(State(state): State<SharedState>) -> Json<ApiResponse> {
    Json(ApiResponse::ok(json!(state.registry.enabled_infos())))
}

pub async fn keys(State(state): State<SharedState>, body: Bytes) -> Json<ApiResponse> {
    into_json(&state, keys_inner(&state, &body))
}

fn keys_inner(state: &AppState, body: &[u8]) -> Result<ApiResponse> {
    let req = request::parse_validated(body, &["public:b", "private:b"])?;

    let filter = request::str_field(&req, "filter");
    let cipher_filter = request::str_field(&req, "cipher");

    let mut keys: Vec<Key> = Vec::new();

    for info in state.registry.enabled_infos() {
        if !cipher_filter.is_empty() && !info.name.contains(cipher_filter) {
            continue;
        }

        // password-based ciphers have no key store
        if info.key_format == "password" {
            continue;
        }

        if request::bool_field(&req, "public") {
            keys.extend(keystore::list_keys(
                &state.registry,
                &info,
                false,
                filter,
                &state.sandbox,
            ));
        }

        if request::bool_field(&req, "private") {
            keys.extend(keystore::list_keys(
                &state.registry,
                &info,
                true,
                filter,
                &state.sandbox,
            ));
        }
    }

    Ok(ApiResponse::ok(json!(keys)))
}

pub async fn gen_key(State(state): State<SharedState>, body: Bytes) -> Json<ApiResponse> {
    into_json(&state, gen_key_inner(&state, &body))
}

fn gen_key_inner(state: &SharedState, body: &[u8]) -> Result<ApiResponse> {
    let req = request::parse_validated(
        body,
        &["identifier:s", "key_format:s", "cipher:s", "email:s"],
    )?;

    let identifier = request::str_field(&req, "identifier").to_string();
    let email = request::str_field(&req, "email").to_string();
    let cipher_name = request::str_field(&req, "cipher");

    let cipher = state
        .registry
        .instance(cipher_name)
        .map_err(|_| Error::BadRequest("could not identify compatible key cipher".into()))?;

    if cipher.info().key_format == "password" {
        return Err(Error::BadRequest(
            "could not identify compatible key cipher".into(),
        ));
    }

    let state_clone = state.clone();
    tokio::task::spawn_blocking(move || {
        let info = cipher.info().clone();

        let _n = Notification::new(
            state_clone.status.clone(),
            Severity::Info,
            format!("generating {} keypair {identifier}", info.name),
        );

        let (public, secret) = match cipher.gen_key(&identifier, &email) {
            Ok(pair) => pair,
            Err(e) => {
                state_clone.status.error(&e);
                return;
            }
        };

        for (private, data) in [(false, &public), (true, &secret)] {
            let mut key = Key {
                identifier: identifier.clone(),
                key_format: info.key_format.to_string(),
                cipher: info.name.to_string(),
                private,
                path: String::new(),
            };

            if let Err(e) = key.store(&info, data, &state_clone.sandbox, &state_clone.status) {
                state_clone.status.error(&e);
                return;
            }
        }

        state_clone.status.log(
            Severity::Notice,
            format!("generated {} keypair {identifier}", info.name),
        );
    });

    Ok(ApiResponse::ok_empty())
}

pub async fn upload_key(State(state): State<SharedState>, body: Bytes) -> Json<ApiResponse> {
    into_json(&state, upload_key_inner(&state, &body))
}

fn upload_key_inner(state: &AppState, body: &[u8]) -> Result<ApiResponse> {
    let req = request::parse_validated(body, &["key:i", "data:s"])?;

    let mut key: Key = serde_json::from_value(req.get("key").cloned().unwrap_or(Value::Null))
        .map_err(|e| Error::BadRequest(format!("invalid key object: {e}")))?;

    let mut cipher = state
        .registry
        .instance(&key.cipher)
        .map_err(|_| Error::BadRequest("could not identify compatible key cipher".into()))?;

    if cipher.info().key_format == "password" {
        return Err(Error::BadRequest(
            "could not identify compatible key cipher".into(),
        ));
    }

    let info = cipher.info().clone();
    key.store(&info, request::str_field(&req, "data"), &state.sandbox, &state.status)?;

    // round-trip the stored material through the cipher; an unusable key
    // must not stay on disk
    let path = key.absolute(&state.sandbox)?;

    if let Err(e) = cipher.set_key(&key, &path) {
        let _ = fs::remove_file(&path);
        return Err(Error::KeyUnusable(e.to_string()));
    }

    Ok(ApiResponse::ok_empty())
}

pub async fn key_info(State(state): State<SharedState>, body: Bytes) -> Json<ApiResponse> {
    into_json(&state, key_info_inner(&state, &body))
}

fn key_info_inner(state: &AppState, body: &[u8]) -> Result<ApiResponse> {
    let req = request::parse_validated(body, &["path:s"])?;

    let path = state.sandbox.absolute(request::str_field(&req, "path"))?;
    let (key, mut cipher) = Key::parse(&path, &state.sandbox, &state.registry)?;

    let info = cipher.key_info(&key, &path)?;

    Ok(ApiResponse::ok(json!(info)))
}

/// Dispatch `/api/<cipher>/<verb>` to the cipher's private request
/// handler.
pub async fn cipher_request(
    State(state): State<SharedState>,
    AxumPath((cipher_name, verb)): AxumPath<(String, String)>,
    body: Bytes,
) -> Json<ApiResponse> {
    let mut cipher = match state.registry.available_instance(&cipher_name) {
        Ok(cipher) => cipher,
        Err(_) => return Json(ApiResponse::not_found()),
    };

    let value = serde_json::from_slice(&body).unwrap_or(Value::Null);

    Json(cipher.handle_request(&verb, &value))
}
