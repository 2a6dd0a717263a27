use async_trait::async_trait;
use tracing::{info, trace};

use super::Middleware;
use crate::context::Context;
use crate::error::Error;
use crate::request::Request;
use crate::store::Connection;

/// Gives every request its own database handle.
///
/// The connection is opened once, when the middleware is built; each request
/// clones a handle bound to a fixed database name. The context releases the
/// handle when the request ends.
pub struct DatabaseMiddleware {
    conn: Connection,
    name: String,
}

impl DatabaseMiddleware {
    /// Connects to `target`. The database name is `name`, or else the path of
    /// the target URL (`memory://localhost/app` → `app`).
    ///
    /// Failing to connect is a startup error: nothing should be served
    /// without the store.
    pub fn connect(target: &str, name: Option<&str>) -> Result<Self, Error> {
        let conn = Connection::open(target)?;
        let name = match name {
            Some(name) if !name.is_empty() => name.to_owned(),
            _ => database_name(target)?,
        };
        Ok(Self::new(conn, &name))
    }

    pub fn new(conn: Connection, name: &str) -> Self {
        info!(store = conn.target(), db = name, "database middleware ready");
        Self { conn, name: name.to_owned() }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn database_name(&self) -> &str {
        &self.name
    }
}

fn database_name(target: &str) -> Result<String, Error> {
    let parsed = url::Url::parse(target).map_err(|e| Error::Connect {
        target: target.to_owned(),
        reason: e.to_string(),
    })?;
    let name = parsed.path().trim_matches('/');
    if name.is_empty() {
        return Err(Error::Connect {
            target: target.to_owned(),
            reason: "no database name given and none in the target path".to_owned(),
        });
    }
    Ok(name.to_owned())
}

#[async_trait]
impl Middleware for DatabaseMiddleware {
    fn name(&self) -> &str {
        "database"
    }

    async fn handle(&self, _req: &Request, ctx: &Context) -> Result<(), Error> {
        trace!(db = %self.name, "cloning database handle");
        ctx.attach_database(self.conn.database(&self.name));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_comes_from_target_path() {
        let mw = DatabaseMiddleware::connect("memory://localhost/farm", None).unwrap();
        assert_eq!(mw.database_name(), "farm");
    }

    #[test]
    fn explicit_name_wins() {
        let mw = DatabaseMiddleware::connect("memory://localhost/farm", Some("barn")).unwrap();
        assert_eq!(mw.database_name(), "barn");
    }

    #[test]
    fn connect_failures_are_startup_errors() {
        assert!(matches!(
            DatabaseMiddleware::connect("memory://localhost", None),
            Err(Error::Connect { .. })
        ));
        assert!(matches!(
            DatabaseMiddleware::connect("postgres://localhost/farm", None),
            Err(Error::Connect { .. })
        ));
    }

    #[tokio::test]
    async fn each_request_gets_its_own_handle() {
        let mw = DatabaseMiddleware::connect("memory://localhost/farm", None).unwrap();
        let (a, b) = (Context::new(), Context::new());
        mw.handle(&Request::get("/"), &a).await.unwrap();
        mw.handle(&Request::get("/"), &b).await.unwrap();
        assert_eq!(mw.connection().open_handles(), 2);

        a.close();
        assert!(b.database().is_ok());
        b.close();
        assert_eq!(mw.connection().open_handles(), 0);
    }
}
