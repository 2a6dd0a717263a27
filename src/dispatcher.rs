//! Request dispatch.
//!
//! For every request the [`Dispatcher`]:
//!
//! 1. resolves the route (404 / 405 when nothing matches);
//! 2. creates a fresh [`Context`] and a scope guard that will close it;
//! 3. runs every middleware in registration order;
//! 4. picks the handler: the route's own, or the one its interceptor selects;
//! 5. runs the handler and turns an error into a `500`; a panic in any of
//!    steps 3 to 5 becomes a `500` too;
//! 6. writes a modified session onto the response;
//! 7. closes the context, releasing its database handle, whichever way the
//!    steps above ended.
//!
//! Delegate routes skip steps 2–7 and get the bare request.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use http::StatusCode;
use http::header::{ALLOW, HeaderValue};
use tracing::{Instrument, debug, error, info_span, warn};

use crate::config::Config;
use crate::context::Context;
use crate::handler::BoxedHandler;
use crate::interceptor::BoxedInterceptor;
use crate::middleware::Middleware;
use crate::request::Request;
use crate::response::Response;
use crate::router::{Resolution, Route, Router, Target};

/// What the dispatcher does when a middleware fails.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ChainPolicy {
    /// Stop the chain, skip the handler, answer `500`.
    #[default]
    FailFast,
    /// Record the failure on the context and keep going. Later middleware
    /// and the handler can inspect [`Context::middleware_failures`].
    Continue,
}

impl std::str::FromStr for ChainPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fail-fast" | "failfast" => Ok(Self::FailFast),
            "continue" => Ok(Self::Continue),
            other => Err(format!("unknown middleware policy `{other}`")),
        }
    }
}

/// Runs requests through middleware and routes. Immutable once built; share
/// it between connections with an `Arc`.
pub struct Dispatcher {
    router: Router,
    middleware: Vec<Arc<dyn Middleware>>,
    policy: ChainPolicy,
    expose_errors: bool,
}

impl Dispatcher {
    pub fn new(router: Router) -> Self {
        Self {
            router,
            middleware: Vec::new(),
            policy: ChainPolicy::default(),
            expose_errors: true,
        }
    }

    /// A dispatcher using the policy and error exposure from `config`.
    pub fn with_config(router: Router, config: &Config) -> Self {
        Self::new(router)
            .policy(config.chain_policy)
            .expose_errors(config.expose_errors)
    }

    /// Appends a middleware to the chain.
    pub fn middleware(mut self, middleware: impl Middleware) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    pub fn policy(mut self, policy: ChainPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Whether a failing handler's message is sent to the client (the
    /// default) or only logged behind a bare `500`.
    pub fn expose_errors(mut self, expose: bool) -> Self {
        self.expose_errors = expose;
        self
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Dispatches one request.
    pub async fn dispatch(&self, req: Request) -> Response {
        let (route, params) = match self.router.resolve(req.method(), req.path()) {
            Resolution::Found { route, params } => (route, params),
            Resolution::MethodNotAllowed(allowed) => {
                debug!(method = %req.method(), path = req.path(), "method not allowed");
                let mut res = Response::plain(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
                if let Ok(value) = HeaderValue::from_str(&allowed.allow_header()) {
                    res.headers_mut().insert(ALLOW, value);
                }
                return res;
            }
            Resolution::NotFound => {
                debug!(method = %req.method(), path = req.path(), "no route");
                return Response::plain(StatusCode::NOT_FOUND, "Not Found");
            }
        };
        self.run(route, req.with_params(params)).await
    }

    /// Dispatches `req` to the route called `name`, skipping path matching.
    /// Handy in tests; path parameters can be supplied with `params`.
    pub async fn dispatch_named(&self, name: &str, req: Request, params: &[(&str, &str)]) -> Response {
        let Some(route) = self.router.route(name) else {
            return Response::plain(StatusCode::NOT_FOUND, "Not Found");
        };
        let params = params
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        self.run(route, req.with_params(params)).await
    }

    async fn run(&self, route: &Route, req: Request) -> Response {
        let span = info_span!(
            "request",
            method = %req.method(),
            path = req.path(),
            route = route.name(),
        );
        async move {
            let gate = match route.target() {
                Target::Delegate(delegate) => return delegate.call(req).await,
                Target::Handler(handler) => Gate::Handler(handler),
                Target::Interceptor(interceptor) => Gate::Interceptor(interceptor),
            };

            let ctx = Context::new();
            let _scope = ctx.scope();

            let handler = match AssertUnwindSafe(self.select(gate, &req, &ctx)).catch_unwind().await {
                Ok(Ok(handler)) => handler,
                Ok(Err(res)) => return res,
                Err(panic) => return self.panicked(panic.as_ref()),
            };

            let mut res = self.invoke(handler, req, ctx.clone()).await;
            ctx.persist_session(&mut res);
            debug!(status = res.status_code().as_u16(), "request complete");
            res
        }
        .instrument(span)
        .await
    }

    /// Runs the middleware chain, then picks the handler. `Err` carries the
    /// response to send when the chain halts.
    async fn select(&self, gate: Gate<'_>, req: &Request, ctx: &Context) -> Result<BoxedHandler, Response> {
        if let Some(res) = self.run_middleware(req, ctx).await {
            return Err(res);
        }
        Ok(match gate {
            Gate::Handler(handler) => Arc::clone(handler),
            Gate::Interceptor(interceptor) => {
                let selected = interceptor.intercept(req, ctx).await;
                debug!(user = ?ctx.user().map(|u| u.username), "interceptor selected handler");
                selected
            }
        })
    }

    /// Runs the chain. Returns the response to send when the chain halts.
    async fn run_middleware(&self, req: &Request, ctx: &Context) -> Option<Response> {
        for middleware in &self.middleware {
            let Err(e) = middleware.handle(req, ctx).await else {
                continue;
            };
            match self.policy {
                ChainPolicy::FailFast => {
                    error!(middleware = middleware.name(), "middleware failed: {e}");
                    return Some(self.server_error(&e.to_string()));
                }
                ChainPolicy::Continue => {
                    warn!(middleware = middleware.name(), "middleware failed, continuing: {e}");
                    ctx.record_failure(format!("{}: {e}", middleware.name()));
                }
            }
        }
        None
    }

    async fn invoke(&self, handler: BoxedHandler, req: Request, ctx: Context) -> Response {
        match AssertUnwindSafe(handler.call(req, ctx)).catch_unwind().await {
            Ok(Ok(res)) => res,
            Ok(Err(e)) => {
                error!("handler failed: {e}");
                self.server_error(&e.message())
            }
            Err(panic) => self.panicked(panic.as_ref()),
        }
    }

    fn panicked(&self, panic: &(dyn Any + Send)) -> Response {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "request panicked".to_owned());
        error!("panicked: {message}");
        self.server_error(&message)
    }

    fn server_error(&self, message: &str) -> Response {
        let body = if self.expose_errors { message } else { "Internal Server Error" };
        Response::plain(StatusCode::INTERNAL_SERVER_ERROR, body)
    }
}

enum Gate<'a> {
    Handler(&'a BoxedHandler),
    Interceptor(&'a BoxedInterceptor),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::error::{Error, HandlerError};
    use crate::handler::{self, HandlerResult};
    use crate::method::Methods;
    use crate::store::Connection;

    async fn hello(req: Request, _ctx: Context) -> HandlerResult<String> {
        Ok(format!("hello {}", req.param("name").unwrap_or("nobody")))
    }

    async fn broken(_req: Request, _ctx: Context) -> HandlerResult {
        Err(HandlerError::msg("kaput"))
    }

    async fn panics(_req: Request, _ctx: Context) -> HandlerResult {
        panic!("handler blew up");
    }

    async fn failures(_req: Request, ctx: Context) -> HandlerResult<String> {
        Ok(ctx.middleware_failures().join(","))
    }

    async fn raw(_req: Request) -> StatusCode {
        StatusCode::NO_CONTENT
    }

    fn router() -> Router {
        Router::new()
            .get("/hello/{name}", "hello", hello)
            .post("/broken", "broken", broken)
            .get("/panics", "panics", panics)
            .get("/failures", "failures", failures)
            .delegate("/raw/{*rest}", "raw", raw)
    }

    async fn failing(_req: Request, _ctx: Context) -> Result<(), Error> {
        Err(Error::Middleware("boom".into()))
    }

    #[tokio::test]
    async fn routes_with_params() {
        let res = Dispatcher::new(router()).dispatch(Request::get("/hello/billy")).await;
        assert_eq!(res.status_code(), StatusCode::OK);
        assert_eq!(res.body_text(), "hello billy");
    }

    #[tokio::test]
    async fn unknown_path_is_404() {
        let res = Dispatcher::new(router()).dispatch(Request::get("/nowhere")).await;
        assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn wrong_method_is_405_with_allow() {
        let res = Dispatcher::new(router()).dispatch(Request::get("/broken")).await;
        assert_eq!(res.status_code(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(res.headers().get(ALLOW).unwrap(), "POST");
    }

    #[tokio::test]
    async fn handler_errors_become_500() {
        let dispatcher = Dispatcher::new(router());
        let res = dispatcher.dispatch(Request::post("/broken")).await;
        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(res.body_text(), "kaput");

        let hidden = Dispatcher::new(router()).expose_errors(false);
        let res = hidden.dispatch(Request::post("/broken")).await;
        assert_eq!(res.body_text(), "Internal Server Error");
    }

    #[tokio::test]
    async fn panics_become_500_and_release_the_database() {
        let conn = Connection::open("memory://localhost/app").unwrap();
        let db_conn = conn.clone();
        let dispatcher = Dispatcher::new(router()).middleware(move |_req: Request, ctx: Context| {
            let conn = db_conn.clone();
            async move {
                ctx.attach_database(conn.database("app"));
                Ok::<_, Error>(())
            }
        });

        let res = dispatcher.dispatch(Request::get("/panics")).await;
        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(res.body_text(), "handler blew up");
        assert_eq!(conn.acquired(), 1);
        assert_eq!(conn.released(), 1);
    }

    #[tokio::test]
    async fn fail_fast_skips_the_handler() {
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        let dispatcher = Dispatcher::new(Router::new().get("/", "index", move |_req: Request, _ctx: Context| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, HandlerError>("ran")
            }
        }))
        .middleware(failing);

        let res = dispatcher.dispatch(Request::get("/")).await;
        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn continue_records_failures_for_the_handler() {
        let dispatcher = Dispatcher::new(router())
            .policy(ChainPolicy::Continue)
            .middleware(failing);
        let res = dispatcher.dispatch(Request::get("/failures")).await;
        assert_eq!(res.status_code(), StatusCode::OK);
        assert!(res.body_text().ends_with(": boom"), "{}", res.body_text());
    }

    #[tokio::test]
    async fn delegates_skip_middleware() {
        let dispatcher = Dispatcher::new(router()).middleware(failing);
        let res = dispatcher.dispatch(Request::get("/raw/anything/at/all")).await;
        assert_eq!(res.status_code(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn interceptor_selection_is_what_runs() {
        let router = Router::new().intercept(
            "/gate",
            "gate",
            Methods::GET,
            |req: Request, _ctx: Context| async move {
                if req.header("x-key").is_some() {
                    handler::boxed(hello)
                } else {
                    handler::boxed(handler::forbidden)
                }
            },
        );
        let dispatcher = Dispatcher::new(router);

        let res = dispatcher.dispatch(Request::get("/gate")).await;
        assert_eq!(res.status_code(), StatusCode::FORBIDDEN);
        let res = dispatcher.dispatch(Request::get("/gate").with_header("x-key", "1")).await;
        assert_eq!(res.body_text(), "hello nobody");
    }

    #[tokio::test]
    async fn dispatch_named_skips_matching() {
        let dispatcher = Dispatcher::new(router());
        let res = dispatcher
            .dispatch_named("hello", Request::get("/ignored"), &[("name", "nanny")])
            .await;
        assert_eq!(res.body_text(), "hello nanny");

        let res = dispatcher.dispatch_named("missing", Request::get("/"), &[]).await;
        assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn policy_parses() {
        assert_eq!("fail-fast".parse(), Ok(ChainPolicy::FailFast));
        assert_eq!("Continue".parse(), Ok(ChainPolicy::Continue));
        assert!("sometimes".parse::<ChainPolicy>().is_err());
    }
}
