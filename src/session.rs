//! SSO login helpers and the cached-session file
//!
//! The broker's vendor SSO flow: the user logs in through the broker's
//! web login, gets redirected back with `authCode` and `userId` query
//! params, and the vendor exchanges
//! `SHA-256(userId + authCode + apiSecret)` for a session token. The
//! token is valid for the trading day, so it is mirrored to a single
//! JSON file and reused within a validity window instead of forcing a
//! fresh browser round-trip on every process start.

use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use url::Url;

use crate::error::{JainamError, JainamResult};
use crate::types::CachedSession;

/// Default session cache filename, placed in the user's home directory
const SESSION_FILE_NAME: &str = ".jainam_session.json";

/// Hours a cached session is trusted before a fresh login is required.
/// Sessions expire at end of trading day; 8 hours covers a session.
pub const DEFAULT_SESSION_MAX_AGE_HOURS: i64 = 8;

/// Checksum for the SSO vendor exchange:
/// `SHA-256(userId + authCode + apiSecret)`, lowercase hex.
pub fn sso_checksum(user_id: &str, auth_code: &str, api_secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update(auth_code.as_bytes());
    hasher.update(api_secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Extract `authCode` and `userId` from the SSO redirect URL.
///
/// Some broker redirects duplicate the params comma-separated; the
/// first value wins.
pub fn parse_redirect_url(redirect: &str) -> JainamResult<(String, String)> {
    let url = Url::parse(redirect)
        .map_err(|e| JainamError::parse(format!("Invalid redirect URL: {e}")))?;

    let mut auth_code = None;
    let mut user_id = None;
    for (key, value) in url.query_pairs() {
        let first = value.split(',').next().unwrap_or("").to_owned();
        match key.as_ref() {
            "authCode" if auth_code.is_none() => auth_code = Some(first),
            "userId" if user_id.is_none() => user_id = Some(first),
            _ => {}
        }
    }

    match (auth_code, user_id) {
        (Some(a), Some(u)) if !a.is_empty() && !u.is_empty() => Ok((a, u)),
        _ => Err(JainamError::parse(
            "Redirect URL is missing 'authCode' or 'userId' query parameters",
        )),
    }
}

/// File-backed session cache.
///
/// Holds exactly one session; `save` overwrites, `clear` deletes the
/// file. All methods are best-effort on the filesystem side: a missing
/// or unreadable file reads as "no session" rather than an error, so
/// callers can fall through to a fresh login.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `$HOME/.jainam_session.json`
    pub fn default_location() -> JainamResult<Self> {
        let home = std::env::var_os("HOME")
            .ok_or_else(|| JainamError::config("HOME is not set; pass a session path explicitly"))?;
        Ok(Self::new(Path::new(&home).join(SESSION_FILE_NAME)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, session: &CachedSession) -> JainamResult<()> {
        let json = serde_json::to_string_pretty(session)
            .map_err(|e| JainamError::parse(format!("Failed to serialize session: {e}")))?;
        std::fs::write(&self.path, json)
            .map_err(|e| JainamError::config(format!("Could not write session file: {e}")))?;
        debug!(path = %self.path.display(), "Cached session saved");
        Ok(())
    }

    /// Load the cached session, if one exists and parses.
    pub fn load(&self) -> Option<CachedSession> {
        let contents = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&contents) {
            Ok(session) => Some(session),
            Err(e) => {
                warn!(path = %self.path.display(), "Could not parse session file: {e}");
                None
            }
        }
    }

    /// Load the cached session only if it is younger than `max_age_hours`.
    pub fn load_valid(&self, max_age_hours: i64) -> Option<CachedSession> {
        let session = self.load()?;
        let age = Utc::now() - session.login_time;
        if age < Duration::hours(max_age_hours) {
            Some(session)
        } else {
            debug!("Cached session expired ({age})");
            None
        }
    }

    /// Delete the session file. Safe to call when no file exists.
    pub fn clear(&self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), "Could not remove session file: {e}");
            }
        }
    }
}
