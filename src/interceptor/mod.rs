//! Interceptors: authorization gates that pick the handler a route runs.
//!
//! A route bound to an interceptor does not have a handler of its own. On each
//! request the interceptor inspects the request and context and *returns* the
//! handler to run: usually the protected handler, or a rejection such as
//! [`unauthorized`](crate::handler::unauthorized). The interceptor never
//! writes a response itself; the dispatcher invokes whatever it selected with
//! the same request and context.
//!
//! Two policies ship with the crate:
//!
//! - [`BasicAuth`]: HTTP basic credentials checked against the `users`
//!   collection.
//! - [`SessionAuth`]: a user id kept in the session by
//!   [`User::login`](crate::auth::User::login).
//!
//! Any async closure `Fn(Request, Context) -> impl Future<Output = BoxedHandler>`
//! is an interceptor too:
//!
//! ```rust
//! use goat::{Context, HandlerResult, Request, Response, handler};
//!
//! async fn admin(_req: Request, _ctx: Context) -> HandlerResult {
//!     Ok(Response::text("welcome"))
//! }
//!
//! let only_local = |req: Request, _ctx: Context| async move {
//!     match req.header("x-forwarded-for") {
//!         None => handler::boxed(admin),
//!         Some(_) => handler::boxed(handler::forbidden),
//!     }
//! };
//! # let _ = goat::Router::new().intercept("/admin", "admin", goat::Methods::GET, only_local);
//! ```

mod basic;
mod session;

pub use basic::BasicAuth;
pub use session::SessionAuth;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::Context;
use crate::handler::BoxedHandler;
use crate::request::Request;

#[async_trait]
pub trait Interceptor: Send + Sync + 'static {
    /// Selects the handler to run for this request.
    async fn intercept(&self, req: &Request, ctx: &Context) -> BoxedHandler;
}

#[async_trait]
impl<F, Fut> Interceptor for F
where
    F: Fn(Request, Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = BoxedHandler> + Send + 'static,
{
    async fn intercept(&self, req: &Request, ctx: &Context) -> BoxedHandler {
        (self)(req.clone(), ctx.clone()).await
    }
}

/// A type-erased interceptor shared across concurrent requests.
pub type BoxedInterceptor = Arc<dyn Interceptor>;
