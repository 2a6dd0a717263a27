//! Sessions and the stores that load and persist them.
//!
//! A [`Session`] is a named bag of JSON values. A [`SessionStore`] finds the
//! session for a request (or starts a fresh one) and writes it back onto the
//! response. [`CookieStore`] keeps the whole session client-side in a cookie
//! signed with HMAC-SHA256, so tampered cookies are refused rather than
//! trusted.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use http::header::{HeaderValue, SET_COOKIE};
use serde_json::Value;
use sha2::Sha256;

use crate::request::Request;
use crate::response::Response;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("malformed session cookie")]
    Malformed,

    #[error("session cookie signature mismatch")]
    BadSignature,

    #[error("undecodable session payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("session cookie cannot be encoded as a header")]
    Header,
}

// ── Session ───────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Session {
    name: String,
    values: BTreeMap<String, Value>,
    is_new: bool,
    modified: bool,
}

impl Session {
    /// A fresh, empty session.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), is_new: true, ..Self::default() }
    }

    pub(crate) fn restore(name: &str, values: BTreeMap<String, Value>) -> Self {
        Self { name: name.to_owned(), values, is_new: false, modified: false }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True when the request carried no session.
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// True once a value was inserted or removed.
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
        self.modified = true;
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let old = self.values.remove(key);
        if old.is_some() {
            self.modified = true;
        }
        old
    }

    pub fn clear(&mut self) {
        if !self.values.is_empty() {
            self.values.clear();
            self.modified = true;
        }
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }
}

// ── SessionStore ──────────────────────────────────────────────────────────────

pub trait SessionStore: Send + Sync + 'static {
    /// Loads the session called `name` from the request, or starts a new one.
    fn load(&self, req: &Request, name: &str) -> Result<Session, SessionError>;

    /// Writes the session onto the response.
    fn save(&self, session: &Session, res: &mut Response) -> Result<(), SessionError>;
}

// ── CookieStore ───────────────────────────────────────────────────────────────

/// Keeps sessions in signed cookies: `base64(payload).base64(hmac)`.
pub struct CookieStore {
    key: Vec<u8>,
    path: String,
    max_age: Option<u64>,
}

impl CookieStore {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into(), path: "/".to_owned(), max_age: None }
    }

    pub fn path(mut self, path: &str) -> Self {
        self.path = path.to_owned();
        self
    }

    /// Cookie lifetime in seconds. Without it cookies end with the browser session.
    pub fn max_age(mut self, seconds: u64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    fn mac(&self, name: &str, payload: &str) -> HmacSha256 {
        // HMAC accepts keys of any length.
        let mut mac = HmacSha256::new_from_slice(&self.key).expect("hmac takes any key size");
        mac.update(name.as_bytes());
        mac.update(b"|");
        mac.update(payload.as_bytes());
        mac
    }

    fn encode(&self, session: &Session) -> Result<String, SessionError> {
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&session.values)?);
        let tag = self.mac(&session.name, &payload).finalize().into_bytes();
        Ok(format!("{payload}.{}", URL_SAFE_NO_PAD.encode(tag)))
    }

    fn decode(&self, name: &str, cookie: &str) -> Result<BTreeMap<String, Value>, SessionError> {
        let (payload, tag) = cookie.split_once('.').ok_or(SessionError::Malformed)?;
        let tag = URL_SAFE_NO_PAD.decode(tag).map_err(|_| SessionError::Malformed)?;
        self.mac(name, payload)
            .verify_slice(&tag)
            .map_err(|_| SessionError::BadSignature)?;
        let json = URL_SAFE_NO_PAD.decode(payload).map_err(|_| SessionError::Malformed)?;
        Ok(serde_json::from_slice(&json)?)
    }
}

impl SessionStore for CookieStore {
    fn load(&self, req: &Request, name: &str) -> Result<Session, SessionError> {
        match req.cookie(name) {
            Some(cookie) => Ok(Session::restore(name, self.decode(name, cookie)?)),
            None => Ok(Session::new(name)),
        }
    }

    fn save(&self, session: &Session, res: &mut Response) -> Result<(), SessionError> {
        let mut cookie = format!(
            "{}={}; Path={}; HttpOnly; SameSite=Lax",
            session.name,
            self.encode(session)?,
            self.path
        );
        if let Some(max_age) = self.max_age {
            cookie.push_str(&format!("; Max-Age={max_age}"));
        }
        let value = HeaderValue::from_str(&cookie).map_err(|_| SessionError::Header)?;
        res.headers_mut().append(SET_COOKIE, value);
        Ok(())
    }
}
