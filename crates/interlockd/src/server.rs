//! Router, security-header middleware and session enforcement.

use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::{header, HeaderValue, Method};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use tower_http::services::ServeDir;

use interlock_core::response::ApiResponse;

use crate::session::{cookie_value, XSRF_HEADER};
use crate::state::SharedState;
use crate::{api, Error};

const CSP: &str = "default-src https:; script-src https: 'self' 'unsafe-eval' 'unsafe-inline'; \
                   style-src https: 'self' 'unsafe-inline'; img-src https: 'self'; \
                   connect-src https: 'self';";

pub fn router(state: SharedState) -> Router {
    let api = Router::new()
        .route("/api/auth/login", post(api::auth::login))
        .route("/api/auth/refresh", post(api::auth::refresh))
        .route("/api/auth/logout", post(api::auth::logout))
        .route("/api/auth/poweroff", post(api::auth::poweroff))
        .route("/api/luks/change", post(api::auth::luks_change))
        .route("/api/luks/add", post(api::auth::luks_add))
        .route("/api/luks/remove", post(api::auth::luks_remove))
        .route("/api/config/time", post(api::status::set_time))
        .route("/api/file/list", post(api::files::list))
        .route("/api/file/upload", post(api::files::upload))
        .route(
            "/api/file/download",
            get(api::files::download_by_id).post(api::files::download),
        )
        .route("/api/file/delete", post(api::files::delete))
        .route("/api/file/move", post(api::files::mv))
        .route("/api/file/copy", post(api::files::copy))
        .route("/api/file/new", post(api::files::new_file))
        .route("/api/file/mkdir", post(api::files::mkdir))
        .route("/api/file/extract", post(api::files::extract))
        .route("/api/file/compress", post(api::files::compress))
        .route("/api/file/encrypt", post(api::files::encrypt))
        .route("/api/file/decrypt", post(api::files::decrypt))
        .route("/api/file/sign", post(api::files::sign))
        .route("/api/file/verify", post(api::files::verify))
        .route("/api/crypto/ciphers", post(api::crypto::ciphers))
        .route("/api/crypto/keys", post(api::crypto::keys))
        .route("/api/crypto/gen_key", post(api::crypto::gen_key))
        .route("/api/crypto/upload_key", post(api::crypto::upload_key))
        .route("/api/crypto/key_info", post(api::crypto::key_info))
        .route("/api/status/version", post(api::status::version))
        .route("/api/status/running", post(api::status::running))
        .route("/api/:cipher/:verb", post(api::crypto::cipher_request))
        .layer(middleware::from_fn_with_state(state.clone(), session_guard))
        .layer(DefaultBodyLimit::disable())
        .with_state(state.clone());

    Router::new()
        .merge(api)
        .fallback_service(ServeDir::new(&state.config.static_path))
        .layer(middleware::from_fn(security_headers))
}

/// CSP and anti-caching headers applied to every response.
async fn security_headers(req: Request, next: Next) -> Response {
    let mut res = next.run(req).await;

    let headers = res.headers_mut();
    headers.insert(header::CONTENT_SECURITY_POLICY, HeaderValue::from_static(CSP));
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, max-age=0, must-revalidate"),
    );
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(
        header::EXPIRES,
        HeaderValue::from_static("Fri, 07 Jan 1981 00:00:00 GMT"),
    );

    res
}

/// Session enforcement for the API surface.
///
/// Login is open; refresh needs only a valid cookie; the binary download
/// leg accepts a valid cookie without the XSRF header because its ticket
/// handshake already resists forgery. Everything else requires both the
/// cookie and the XSRF header, failing as `INVALID_SESSION` (upload, whose
/// client treats it as a raw transfer, gets a plain 401).
async fn session_guard(State(state): State<SharedState>, req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();

    if path == "/api/auth/login" {
        return next.run(req).await;
    }

    let cookie = cookie_value(req.headers());
    let xsrf = req
        .headers()
        .get(XSRF_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let (valid_id, valid_xsrf) = state
        .session
        .lock()
        .await
        .validate(cookie.as_deref(), xsrf.as_deref());

    if path == "/api/auth/refresh" {
        return if valid_id {
            next.run(req).await
        } else {
            Json(ApiResponse::invalid_session()).into_response()
        };
    }

    if valid_id && valid_xsrf {
        return next.run(req).await;
    }

    match path.as_str() {
        "/api/file/upload" => (
            axum::http::StatusCode::UNAUTHORIZED,
            Error::InvalidSession.to_string(),
        )
            .into_response(),
        "/api/file/download" if valid_id && req.method() == Method::GET => next.run(req).await,
        _ => Json(ApiResponse::invalid_session()).into_response(),
    }
}
