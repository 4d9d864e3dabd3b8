//! Single process-wide authenticated session.
//!
//! A non-empty session id means the encrypted volume is unlocked and
//! mounted. The id is rotated on every successful login; both the cookie
//! value and the XSRF header are compared in constant time on every
//! request. An absolute 8 hour timer force-clears the session regardless of
//! activity.

use axum::http::HeaderMap;
use base64::prelude::*;
use rand::RngCore;
use subtle::ConstantTimeEq;
use tokio::task::JoinHandle;

use interlock_core::status::Severity;

use crate::state::SharedState;

pub const SESSION_COOKIE: &str = "INTERLOCK-Token";
pub const XSRF_HEADER: &str = "X-XSRFToken";

/// Absolute session lifetime.
pub const COOKIE_AGE_SECS: u64 = 8 * 60 * 60;

const TOKEN_SIZE: usize = 64;

#[derive(Default)]
pub struct Session {
    pub volume: String,
    session_id: String,
    xsrf_token: String,
    expiry: Option<JoinHandle<()>>,
}

pub fn random_token() -> String {
    let mut raw = [0u8; TOKEN_SIZE];
    rand::thread_rng().fill_bytes(&mut raw);
    BASE64_URL_SAFE.encode(raw)
}

impl Session {
    pub fn active(&self) -> bool {
        !self.session_id.is_empty()
    }

    pub fn xsrf_token(&self) -> &str {
        &self.xsrf_token
    }

    /// Constant-time validation of the cookie value and the XSRF header
    /// against the stored session.
    pub fn validate(&self, cookie: Option<&str>, xsrf: Option<&str>) -> (bool, bool) {
        if !self.active() {
            return (false, false);
        }

        let valid_id = cookie
            .map(|value| self.session_id.as_bytes().ct_eq(value.as_bytes()).into())
            .unwrap_or(false);

        let valid_xsrf = xsrf
            .map(|value| self.xsrf_token.as_bytes().ct_eq(value.as_bytes()).into())
            .unwrap_or(false);

        (valid_id, valid_xsrf)
    }

    pub fn set(&mut self, volume: &str, session_id: String, xsrf_token: String) {
        if self.active() {
            tracing::info!("invalidating previous session");
        }

        tracing::info!(volume, "new session");

        self.volume = volume.to_string();
        self.session_id = session_id;
        self.xsrf_token = xsrf_token;
    }

    pub fn arm_expiry(&mut self, handle: JoinHandle<()>) {
        if let Some(previous) = self.expiry.take() {
            previous.abort();
        }

        self.expiry = Some(handle);
    }

    /// Detach the expiry timer without cancelling it; the timer task calls
    /// this on itself before tearing the session down, so that `clear`
    /// cannot abort the teardown in progress.
    pub fn disarm_expiry(&mut self) {
        self.expiry.take();
    }

    pub fn clear(&mut self) {
        self.volume.clear();
        self.session_id.clear();
        self.xsrf_token.clear();

        if let Some(expiry) = self.expiry.take() {
            expiry.abort();
        }
    }
}

/// Extract the session cookie value from request headers.
pub fn cookie_value(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(axum::http::header::COOKIE)?.to_str().ok()?;

    for pair in raw.split(';') {
        let Some((name, value)) = pair.trim().split_once('=') else {
            continue;
        };

        if name == SESSION_COOKIE {
            return Some(value.to_string());
        }
    }

    None
}

/// `Set-Cookie` value binding the session to `/api`.
pub fn session_cookie(value: &str, max_age: i64, secure: bool) -> String {
    let mut cookie = format!("{SESSION_COOKIE}={value}; Path=/api; Max-Age={max_age}; HttpOnly");

    if secure {
        cookie.push_str("; Secure");
    }

    cookie
}

/// Tear the session down: clear fields, restore the syslog sink,
/// deactivate ciphers and return the volume to the locked state.
///
/// Unmount errors do not cancel the lock attempt; the first failure is
/// reported after both ran.
pub async fn clear_session(state: &SharedState) -> interlock_core::Result<()> {
    state.session.lock().await.clear();

    if !state.config.debug {
        // restore logging to syslog before unmounting the encrypted volume
        if let Err(e) = state.logs.enable_syslog() {
            state.status.error(&e);
        }
    }

    state.registry.activate_all(false);

    if state.config.test_mode {
        return Ok(());
    }

    let volume = state.volume.clone();
    tokio::task::spawn_blocking(move || {
        let unmounted = volume.unmount();
        let locked = volume.lock();
        unmounted.and(locked)
    })
    .await
    .map_err(|e| interlock_core::Error::Other(e.to_string()))?
}

/// Expiry task armed at login: force-clears at absolute session age.
pub fn spawn_expiry(state: SharedState) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_secs(COOKIE_AGE_SECS)).await;

        state.session.lock().await.disarm_expiry();

        state
            .status
            .log(Severity::Notice, "session expired, locking volume");

        if let Err(e) = clear_session(&state).await {
            state.status.error(&e);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn armed() -> Session {
        let mut s = Session::default();
        s.set("storage", "session-id-value".into(), "xsrf-token-value".into());
        s
    }

    #[test]
    fn test_empty_session_validates_nothing() {
        let s = Session::default();
        assert_eq!(s.validate(Some(""), Some("")), (false, false));
        assert_eq!(s.validate(None, None), (false, false));
    }

    #[test]
    fn test_validation_requires_both_values() {
        let s = armed();

        assert_eq!(
            s.validate(Some("session-id-value"), Some("xsrf-token-value")),
            (true, true)
        );
        assert_eq!(
            s.validate(Some("session-id-value"), None),
            (true, false)
        );
        assert_eq!(
            s.validate(Some("wrong"), Some("xsrf-token-value")),
            (false, true)
        );
        assert_eq!(s.validate(None, Some("wrong")), (false, false));
    }

    #[test]
    fn test_clear_resets_state() {
        let mut s = armed();
        assert!(s.active());

        s.clear();
        assert!(!s.active());
        assert!(s.volume.is_empty());
        assert_eq!(s.validate(Some("session-id-value"), None), (false, false));
    }

    #[test]
    fn test_random_tokens_differ() {
        assert_ne!(random_token(), random_token());
        // 64 bytes of URL-safe base64
        assert_eq!(random_token().len(), 88);
    }

    #[test]
    fn test_cookie_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            "other=1; INTERLOCK-Token=abc123; trailing=x".parse().unwrap(),
        );

        assert_eq!(cookie_value(&headers), Some("abc123".to_string()));

        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::COOKIE, "other=1".parse().unwrap());
        assert_eq!(cookie_value(&headers), None);
    }

    #[test]
    fn test_session_cookie_attributes() {
        let cookie = session_cookie("tok", 28800, true);
        assert!(cookie.starts_with("INTERLOCK-Token=tok"));
        assert!(cookie.contains("Path=/api"));
        assert!(cookie.contains("Max-Age=28800"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Secure"));

        assert!(!session_cookie("tok", 28800, false).contains("Secure"));
    }
}
