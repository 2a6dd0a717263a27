//! Per-request state.
//!
//! A [`Context`] is created by the dispatcher right before the middleware
//! chain runs and closed right after the handler returns, on every exit path.
//! Middleware fills it in (session, database handle), interceptors and
//! handlers read it and may attach the authenticated [`User`].
//!
//! `Context` is a cheap handle: clones point at the same state, so the
//! interceptor, the handler it selects, and the dispatcher all see one
//! request's context. It is never shared between requests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::auth::User;
use crate::response::Response;
use crate::session::{Session, SessionStore};
use crate::store::{Database, StoreError};

#[derive(Clone, Default)]
pub struct Context {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    session: Mutex<Option<SessionSlot>>,
    database: Mutex<Option<Database>>,
    user: Mutex<Option<User>>,
    failures: Mutex<Vec<String>>,
    closed: AtomicBool,
}

struct SessionSlot {
    session: Session,
    store: Arc<dyn SessionStore>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Session ──────────────────────────────────────────────────────────────

    /// Attaches a session and the store that will persist it.
    pub fn attach_session(&self, session: Session, store: Arc<dyn SessionStore>) {
        *self.inner.session.lock() = Some(SessionSlot { session, store });
    }

    pub fn has_session(&self) -> bool {
        self.inner.session.lock().is_some()
    }

    /// Locks the session for reading or writing.
    ///
    /// The guard is not `Send`: drop it before the next `.await`.
    pub fn session(&self) -> Option<MappedMutexGuard<'_, Session>> {
        MutexGuard::try_map(self.inner.session.lock(), |slot| {
            slot.as_mut().map(|s| &mut s.session)
        })
        .ok()
    }

    /// Reads one session value.
    pub fn session_value(&self, key: &str) -> Option<serde_json::Value> {
        self.session().and_then(|s| s.get(key).cloned())
    }

    /// Writes one session value. Returns `false` when no session is attached.
    pub fn set_session_value(&self, key: &str, value: impl Into<serde_json::Value>) -> bool {
        match self.session() {
            Some(mut session) => {
                session.insert(key, value);
                true
            }
            None => false,
        }
    }

    /// Writes a modified session onto the response. Failures are logged:
    /// the response is already built and must go out anyway.
    pub(crate) fn persist_session(&self, res: &mut Response) {
        let slot = self.inner.session.lock();
        let Some(SessionSlot { session, store }) = slot.as_ref() else {
            return;
        };
        if !session.is_modified() {
            return;
        }
        if let Err(e) = store.save(session, res) {
            warn!(session = session.name(), "session not persisted: {e}");
        }
    }

    // ── Database ─────────────────────────────────────────────────────────────

    /// Attaches a per-request database handle. A handle attached earlier is
    /// released first.
    pub fn attach_database(&self, db: Database) {
        if self.is_closed() {
            db.release();
            return;
        }
        if let Some(old) = self.inner.database.lock().replace(db) {
            old.release();
        }
    }

    /// The request's database handle.
    pub fn database(&self) -> Result<Database, StoreError> {
        match self.inner.database.lock().as_ref() {
            Some(db) => Ok(db.clone()),
            None if self.is_closed() => Err(StoreError::Released),
            None => Err(StoreError::Backend("no database attached to this request".into())),
        }
    }

    pub fn has_database(&self) -> bool {
        self.inner.database.lock().is_some()
    }

    // ── User ─────────────────────────────────────────────────────────────────

    pub fn user(&self) -> Option<User> {
        self.inner.user.lock().clone()
    }

    pub fn set_user(&self, user: User) {
        *self.inner.user.lock() = Some(user);
    }

    pub fn clear_user(&self) -> Option<User> {
        self.inner.user.lock().take()
    }

    // ── Middleware failures ──────────────────────────────────────────────────

    pub(crate) fn record_failure(&self, failure: String) {
        self.inner.failures.lock().push(failure);
    }

    /// Failures recorded by middleware that ran under
    /// [`ChainPolicy::Continue`](crate::ChainPolicy::Continue).
    pub fn middleware_failures(&self) -> Vec<String> {
        self.inner.failures.lock().clone()
    }

    // ── Teardown ─────────────────────────────────────────────────────────────

    /// Releases the resources the context owns. Idempotent: the database
    /// handle is released on the first call only.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(db) = self.inner.database.lock().take() {
            if !db.release() {
                warn!(db = db.name(), "database handle was released before teardown");
            }
        }
        debug!("context closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// A guard that closes this context when dropped.
    pub(crate) fn scope(&self) -> Scope {
        Scope(self.clone())
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("session", &self.has_session())
            .field("database", &self.has_database())
            .field("user", &self.inner.user.lock().as_ref().map(|u| u.username.clone()))
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Closes the context on drop, whichever way the dispatch ends.
pub(crate) struct Scope(Context);

impl Drop for Scope {
    fn drop(&mut self) {
        self.0.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::CookieStore;
    use crate::store::Connection;

    #[test]
    fn close_releases_database_exactly_once() {
        let conn = Connection::open("memory://localhost/app").unwrap();
        let ctx = Context::new();
        ctx.attach_database(conn.database("app"));
        let handle = ctx.database().unwrap();

        ctx.close();
        ctx.close();
        assert_eq!(conn.acquired(), 1);
        assert_eq!(conn.released(), 1);
        assert!(handle.is_released());
        assert!(matches!(ctx.database(), Err(StoreError::Released)));
    }

    #[test]
    fn scope_guard_closes_on_drop() {
        let conn = Connection::open("memory://localhost/app").unwrap();
        let ctx = Context::new();
        {
            let _scope = ctx.scope();
            ctx.attach_database(conn.database("app"));
        }
        assert!(ctx.is_closed());
        assert_eq!(conn.open_handles(), 0);
    }

    #[test]
    fn reattaching_releases_previous_handle() {
        let conn = Connection::open("memory://localhost/app").unwrap();
        let ctx = Context::new();
        ctx.attach_database(conn.database("app"));
        ctx.attach_database(conn.database("app"));
        assert_eq!(conn.released(), 1);
        ctx.close();
        assert_eq!(conn.released(), 2);
    }

    #[test]
    fn attaching_after_close_releases_immediately() {
        let conn = Connection::open("memory://localhost/app").unwrap();
        let ctx = Context::new();
        ctx.close();
        ctx.attach_database(conn.database("app"));
        assert_eq!(conn.open_handles(), 0);
        assert!(!ctx.has_database());
    }

    #[test]
    fn session_values_need_a_session() {
        let ctx = Context::new();
        assert!(!ctx.set_session_value("uid", "x"));
        assert_eq!(ctx.session_value("uid"), None);

        ctx.attach_session(Session::new("goat"), Arc::new(CookieStore::new("k")));
        assert!(ctx.set_session_value("uid", "x"));
        assert_eq!(ctx.session_value("uid"), Some("x".into()));
    }

    #[test]
    fn only_modified_sessions_are_persisted() {
        let ctx = Context::new();
        ctx.attach_session(Session::new("goat"), Arc::new(CookieStore::new("k")));

        let mut res = Response::text("ok");
        ctx.persist_session(&mut res);
        assert!(res.headers().get(http::header::SET_COOKIE).is_none());

        ctx.set_session_value("counter", 1);
        ctx.persist_session(&mut res);
        assert!(res.headers().get(http::header::SET_COOKIE).is_some());
    }
}
