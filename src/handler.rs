//! Handler traits and type erasure.
//!
//! # How async handlers are stored
//!
//! The router holds handlers of *different* types in one table, so every
//! handler is hidden behind a trait object (`dyn ErasedHandler`):
//!
//! ```text
//! async fn index(req: Request, ctx: Context) -> HandlerResult { … }   ← user writes this
//!        ↓ router.handle("/", "index", Methods::GET, index)
//! index.into_boxed_handler()                                           ← Handler blanket impl
//!        ↓
//! Arc::new(FnHandler(index))                                           ← heap-allocated wrapper
//!        ↓  stored as BoxedHandler = Arc<dyn ErasedHandler>
//! handler.call(req, ctx)  at request time                              ← one vtable dispatch
//! ```
//!
//! Interceptors return a [`BoxedHandler`], so the handler they select is
//! invoked the same way as a directly bound one.
//!
//! A [`Delegate`] is the older, context-free shape `async fn(Request) -> impl
//! IntoResponse`: an opaque service that runs without middleware.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use http::StatusCode;

use crate::context::Context;
use crate::error::HandlerError;
use crate::request::Request;
use crate::response::{IntoResponse, Response};

/// What a handler returns.
pub type HandlerResult<T = Response> = Result<T, HandlerError>;

// ── Internal types ────────────────────────────────────────────────────────────

/// A heap-allocated, type-erased future.
///
/// `Pin<Box<…>>` lets the runtime poll it in place; `Send + 'static` lets
/// tokio move it across threads.
pub(crate) type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Internal dispatch interface.
///
/// `#[doc(hidden)] pub` because it appears in [`BoxedHandler`].
#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, req: Request, ctx: Context) -> BoxFuture<HandlerResult>;
}

/// A type-erased handler shared across concurrent requests.
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

#[doc(hidden)]
pub trait ErasedDelegate {
    fn call(&self, req: Request) -> BoxFuture<Response>;
}

/// A type-erased pass-through service.
pub type BoxedDelegate = Arc<dyn ErasedDelegate + Send + Sync + 'static>;

// ── Public traits ─────────────────────────────────────────────────────────────

/// Implemented for every valid route handler:
///
/// ```text
/// async fn name(req: Request, ctx: Context) -> Result<impl IntoResponse, HandlerError>
/// ```
///
/// The trait is **sealed**: only the blanket impl below satisfies it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

/// Implemented for every `async fn(Request) -> impl IntoResponse`.
pub trait Delegate: private::SealedDelegate + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_delegate(self) -> BoxedDelegate;
}

mod private {
    pub trait Sealed {}
    pub trait SealedDelegate {}
}

/// Boxes a handler, e.g. to return it from an interceptor closure.
pub fn boxed(handler: impl Handler) -> BoxedHandler {
    handler.into_boxed_handler()
}

// ── Blanket implementations ───────────────────────────────────────────────────

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Request, Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult<R>> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Request, Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult<R>> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

impl<F, Fut, R> private::SealedDelegate for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
}

impl<F, Fut, R> Delegate for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn into_boxed_delegate(self) -> BoxedDelegate {
        Arc::new(FnDelegate(self))
    }
}

// ── Concrete wrappers ─────────────────────────────────────────────────────────

struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(Request, Context) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult<R>> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn call(&self, req: Request, ctx: Context) -> BoxFuture<HandlerResult> {
        let fut = (self.0)(req, ctx);
        Box::pin(async move { fut.await.map(IntoResponse::into_response) })
    }
}

struct FnDelegate<F>(F);

impl<F, Fut, R> ErasedDelegate for FnDelegate<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture<Response> {
        let fut = (self.0)(req);
        Box::pin(async move { fut.await.into_response() })
    }
}

// ── Rejection handlers ────────────────────────────────────────────────────────

/// `401 Unauthorized`.
pub async fn unauthorized(_req: Request, _ctx: Context) -> HandlerResult {
    Ok(Response::plain(StatusCode::UNAUTHORIZED, "Unauthorized"))
}

/// `403 Forbidden`.
pub async fn forbidden(_req: Request, _ctx: Context) -> HandlerResult {
    Ok(Response::plain(StatusCode::FORBIDDEN, "Forbidden"))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn hello(req: Request, _ctx: Context) -> HandlerResult<String> {
        Ok(format!("hello {}", req.path()))
    }

    async fn fails(_req: Request, _ctx: Context) -> HandlerResult<&'static str> {
        Err(HandlerError::msg("nope"))
    }

    async fn raw(_req: Request) -> StatusCode {
        StatusCode::ACCEPTED
    }

    #[tokio::test]
    async fn boxed_handler_maps_output_into_response() {
        let h = boxed(hello);
        let res = h.call(Request::get("/x"), Context::new()).await.unwrap();
        assert_eq!(res.body_text(), "hello /x");
    }

    #[tokio::test]
    async fn boxed_handler_keeps_errors() {
        let h = boxed(fails);
        let err = h.call(Request::get("/"), Context::new()).await.unwrap_err();
        assert_eq!(err.message(), "nope");
    }

    #[tokio::test]
    async fn delegates_ignore_context() {
        let d = raw.into_boxed_delegate();
        assert_eq!(d.call(Request::get("/")).await.status_code(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn rejection_handlers() {
        let res = unauthorized(Request::get("/"), Context::new()).await.unwrap();
        assert_eq!(res.status_code(), StatusCode::UNAUTHORIZED);
        let res = forbidden(Request::get("/"), Context::new()).await.unwrap();
        assert_eq!(res.status_code(), StatusCode::FORBIDDEN);
    }
}
