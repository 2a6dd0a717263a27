use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

use super::Interceptor;
use crate::auth::{SESSION_USER_KEY, find_user_by_id};
use crate::context::Context;
use crate::handler::{BoxedHandler, Handler};
use crate::request::Request;

/// Gate on the user id stored in the session by
/// [`User::login`](crate::auth::User::login).
///
/// The wrapped handler runs only when the id resolves to a stored user; a
/// missing id, an unknown id, and a failed lookup all select the unauthorized
/// handler.
pub struct SessionAuth {
    normal: BoxedHandler,
    unauthorized: BoxedHandler,
}

impl SessionAuth {
    pub fn new(normal: impl Handler, unauthorized: impl Handler) -> Self {
        Self {
            normal: normal.into_boxed_handler(),
            unauthorized: unauthorized.into_boxed_handler(),
        }
    }
}

#[async_trait]
impl Interceptor for SessionAuth {
    async fn intercept(&self, _req: &Request, ctx: &Context) -> BoxedHandler {
        let Some(uid) = ctx.session_value(SESSION_USER_KEY) else {
            debug!("no user in session");
            return self.unauthorized.clone();
        };
        let Some(id) = uid.as_str().and_then(|s| Uuid::parse_str(s).ok()) else {
            warn!(%uid, "session user id is not a uuid");
            return self.unauthorized.clone();
        };
        let db = match ctx.database() {
            Ok(db) => db,
            Err(e) => {
                warn!("session auth without a database: {e}");
                return self.unauthorized.clone();
            }
        };

        match find_user_by_id(&db, id).await {
            Ok(Some(user)) => {
                debug!(user = %user.username, "session user resolved");
                ctx.set_user(user);
                self.normal.clone()
            }
            Ok(None) => {
                debug!(%id, "session user no longer exists");
                self.unauthorized.clone()
            }
            Err(e) => {
                warn!(%id, "session user lookup failed: {e}");
                self.unauthorized.clone()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::auth::User;
    use crate::handler::{HandlerResult, unauthorized};
    use crate::session::{CookieStore, Session};
    use crate::store::Connection;

    async fn welcome(_req: Request, _ctx: Context) -> HandlerResult<&'static str> {
        Ok("welcome")
    }

    async fn run(gate: &SessionAuth, ctx: &Context) -> http::StatusCode {
        let handler = gate.intercept(&Request::get("/"), ctx).await;
        handler.call(Request::get("/"), ctx.clone()).await.unwrap().status_code()
    }

    fn context(conn: &Connection, uid: Option<&str>) -> Context {
        let ctx = Context::new();
        let mut session = Session::new("goat");
        if let Some(uid) = uid {
            session.insert(SESSION_USER_KEY, uid);
        }
        ctx.attach_session(session, Arc::new(CookieStore::new("k")));
        ctx.attach_database(conn.database("app"));
        ctx
    }

    #[tokio::test]
    async fn selects_by_session_identity() {
        let conn = Connection::open("memory://localhost/app").unwrap();
        let db = conn.database("app");
        let user = User::new(&db, "billy", "pw").await.unwrap();
        user.save(&db).await.unwrap();
        let gate = SessionAuth::new(welcome, unauthorized);

        assert_eq!(run(&gate, &context(&conn, None)).await, http::StatusCode::UNAUTHORIZED);
        assert_eq!(
            run(&gate, &context(&conn, Some("not-a-uuid"))).await,
            http::StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            run(&gate, &context(&conn, Some(&Uuid::new_v4().to_string()))).await,
            http::StatusCode::UNAUTHORIZED
        );

        let ctx = context(&conn, Some(&user.id.to_string()));
        assert_eq!(run(&gate, &ctx).await, http::StatusCode::OK);
        assert_eq!(ctx.user().map(|u| u.username).as_deref(), Some("billy"));
    }
}
