//! Middleware layer.
//!
//! Middleware prepares the per-request [`Context`] before the handler runs:
//! attaching the session, cloning a database handle, and so on. Each one
//! receives the request and the live context and may fail the request.
//!
//! Middleware runs in registration order, for every request that matched a
//! route, before the route's interceptor or handler. Order matters: register
//! [`SessionMiddleware`] before anything that reads the session. What happens
//! after a failure is decided by the dispatcher's
//! [`ChainPolicy`](crate::ChainPolicy).
//!
//! Async closures taking `(Request, Context)` are middleware too:
//!
//! ```rust
//! use goat::{Context, Dispatcher, Error, Request, Router};
//!
//! let dispatcher = Dispatcher::new(Router::new())
//!     .middleware(|req: Request, ctx: Context| async move {
//!         if req.header("x-maintenance").is_some() {
//!             return Err(Error::Middleware("down for maintenance".into()));
//!         }
//!         let _ = ctx;
//!         Ok(())
//!     });
//! # let _ = dispatcher;
//! ```

mod database;
mod session;

pub use database::DatabaseMiddleware;
pub use session::SessionMiddleware;

use std::future::Future;

use async_trait::async_trait;

use crate::context::Context;
use crate::error::Error;
use crate::request::Request;

#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn handle(&self, req: &Request, ctx: &Context) -> Result<(), Error>;
}

#[async_trait]
impl<F, Fut> Middleware for F
where
    F: Fn(Request, Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    async fn handle(&self, req: &Request, ctx: &Context) -> Result<(), Error> {
        (self)(req.clone(), ctx.clone()).await
    }
}
