use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::Middleware;
use crate::context::Context;
use crate::error::Error;
use crate::request::Request;
use crate::session::{Session, SessionStore};

/// Loads the named session from the store and attaches it to the context.
///
/// When the request's session cannot be decoded a fresh session is attached
/// anyway and the decode error is returned.
pub struct SessionMiddleware {
    store: Arc<dyn SessionStore>,
    name: String,
}

impl SessionMiddleware {
    pub fn new(store: impl SessionStore, name: &str) -> Self {
        Self::shared(Arc::new(store), name)
    }

    pub fn shared(store: Arc<dyn SessionStore>, name: &str) -> Self {
        Self { store, name: name.to_owned() }
    }
}

#[async_trait]
impl Middleware for SessionMiddleware {
    fn name(&self) -> &str {
        "session"
    }

    async fn handle(&self, req: &Request, ctx: &Context) -> Result<(), Error> {
        match self.store.load(req, &self.name) {
            Ok(session) => {
                debug!(session = %self.name, new = session.is_new(), "session attached");
                ctx.attach_session(session, Arc::clone(&self.store));
                Ok(())
            }
            Err(e) => {
                ctx.attach_session(Session::new(&self.name), Arc::clone(&self.store));
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::CookieStore;

    #[tokio::test]
    async fn attaches_a_session() {
        let mw = SessionMiddleware::new(CookieStore::new("k"), "goat");
        let ctx = Context::new();
        mw.handle(&Request::get("/"), &ctx).await.unwrap();
        assert!(ctx.session().is_some_and(|s| s.is_new()));
    }

    #[tokio::test]
    async fn bad_cookie_fails_but_still_attaches_a_fresh_session() {
        let mw = SessionMiddleware::new(CookieStore::new("k"), "goat");
        let ctx = Context::new();
        let req = Request::get("/").with_header("cookie", "goat=forged.value");
        assert!(matches!(mw.handle(&req, &ctx).await, Err(Error::Session(_))));
        assert!(ctx.has_session());
    }
}
