//! Unified error types.
//!
//! Rejections a client is meant to see (401, 403, 404) are expressed as
//! [`Response`](crate::Response) values, not as errors. [`Error`] covers
//! infrastructure and per-request failures; [`HandlerError`] is what a handler
//! returns when it cannot produce a response.

use std::fmt;

use crate::auth::AuthError;
use crate::router::RouteError;
use crate::session::SessionError;
use crate::store::StoreError;

/// The error type returned by goat's fallible operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// The document store could not be reached at startup.
    #[error("cannot connect to `{target}`: {reason}")]
    Connect { target: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    /// A middleware failed for a reason of its own.
    #[error("{0}")]
    Middleware(String),
}

/// Failure returned by a request handler.
///
/// Any `std::error::Error` converts into it, so `?` works on every error a
/// handler is likely to meet. The dispatcher turns it into a
/// `500 Internal Server Error` carrying [`HandlerError::message`].
///
/// ```rust
/// use goat::{Context, HandlerError, HandlerResult, Request, Response};
///
/// async fn broken(_req: Request, _ctx: Context) -> HandlerResult {
///     Err(HandlerError::msg("the flux capacitor is offline"))
/// }
/// ```
pub struct HandlerError {
    inner: Box<dyn std::error::Error + Send + Sync + 'static>,
}

impl HandlerError {
    /// An error carrying only a message.
    pub fn msg(message: impl fmt::Display) -> Self {
        Self { inner: message.to_string().into() }
    }

    pub fn message(&self) -> String {
        self.inner.to_string()
    }

    /// The wrapped error, for downcasting.
    pub fn get_ref(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.inner.as_ref()
    }
}

impl<E> From<E> for HandlerError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(e: E) -> Self {
        Self { inner: Box::new(e) }
    }
}

impl fmt::Debug for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.inner, f)
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_crate_errors_with_their_message() {
        let err: HandlerError = Error::Middleware("session store offline".into()).into();
        assert_eq!(err.message(), "session store offline");
        assert!(err.get_ref().downcast_ref::<Error>().is_some());
    }

    #[test]
    fn msg_keeps_text_verbatim() {
        assert_eq!(HandlerError::msg("boom").to_string(), "boom");
    }
}
