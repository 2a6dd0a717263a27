use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use http::header::AUTHORIZATION;
use tracing::{debug, warn};

use super::Interceptor;
use crate::auth::{AuthError, authenticate};
use crate::context::Context;
use crate::handler::{self, BoxedHandler, Handler};
use crate::request::Request;

/// Gate on HTTP basic credentials.
///
/// | Request | Selected handler |
/// |---|---|
/// | no `Authorization` header, or one that does not decode to `user:pass` | forbidden |
/// | credentials that do not match an account | unauthorized |
/// | valid credentials | the wrapped handler, with the user attached to the context |
pub struct BasicAuth {
    normal: BoxedHandler,
    unauthorized: BoxedHandler,
    forbidden: BoxedHandler,
}

impl BasicAuth {
    pub fn new(normal: impl Handler) -> Self {
        Self {
            normal: normal.into_boxed_handler(),
            unauthorized: handler::boxed(handler::unauthorized),
            forbidden: handler::boxed(handler::forbidden),
        }
    }

    pub fn unauthorized(mut self, handler: impl Handler) -> Self {
        self.unauthorized = handler.into_boxed_handler();
        self
    }

    pub fn forbidden(mut self, handler: impl Handler) -> Self {
        self.forbidden = handler.into_boxed_handler();
        self
    }
}

/// Decodes `Basic base64(user:pass)`. The password may itself contain `:`.
pub(crate) fn credentials(header: &str) -> Option<(String, String)> {
    let (scheme, encoded) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_owned(), pass.to_owned()))
}

#[async_trait]
impl Interceptor for BasicAuth {
    async fn intercept(&self, req: &Request, ctx: &Context) -> BoxedHandler {
        let Some((username, password)) = req.header(AUTHORIZATION.as_str()).and_then(credentials)
        else {
            debug!("no usable basic credentials");
            return self.forbidden.clone();
        };

        let db = match ctx.database() {
            Ok(db) => db,
            Err(e) => {
                warn!("basic auth without a database: {e}");
                return self.unauthorized.clone();
            }
        };

        match authenticate(&db, &username, &password).await {
            Ok(user) => {
                debug!(user = %user.username, "basic credentials accepted");
                ctx.set_user(user);
                self.normal.clone()
            }
            Err(AuthError::UnknownUser(_) | AuthError::InvalidPassword) => {
                debug!(user = %username, "basic credentials rejected");
                self.unauthorized.clone()
            }
            Err(e) => {
                warn!(user = %username, "basic credential check failed: {e}");
                self.unauthorized.clone()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(raw: &str) -> String {
        format!("Basic {}", STANDARD.encode(raw))
    }

    #[test]
    fn decodes_user_and_password() {
        assert_eq!(
            credentials(&header("billy:hunter2")),
            Some(("billy".to_owned(), "hunter2".to_owned()))
        );
        assert_eq!(
            credentials(&header("billy:a:b")),
            Some(("billy".to_owned(), "a:b".to_owned()))
        );
    }

    #[test]
    fn rejects_undecodable_headers() {
        assert_eq!(credentials("Bearer abc"), None);
        assert_eq!(credentials("Basic !!!not-base64!!!"), None);
        assert_eq!(credentials(&header("no-colon")), None);
        assert_eq!(credentials("Basic"), None);
    }
}
