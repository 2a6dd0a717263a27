//! # goat
//!
//! A small web framework: named routes, a middleware chain that fills a
//! per-request [`Context`], interceptors that pick a handler at request time,
//! and a [`Dispatcher`] that guarantees every request's resources are
//! released however the handler ends.
//!
//! ## Pieces
//!
//! - [`Router`] maps path templates and method sets to named routes and builds
//!   URLs back from names ([`Router::url_for`]).
//! - [`middleware`] runs before every routed request. The bundled ones attach
//!   a signed cookie [`Session`] and a per-request database handle.
//! - [`interceptor`] chooses which handler serves a request; the bundled ones
//!   implement HTTP Basic and session based authentication.
//! - [`Dispatcher`] ties it together; [`Server`] puts it on the network.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use goat::handler::unauthorized;
//! use goat::interceptor::SessionAuth;
//! use goat::middleware::{DatabaseMiddleware, SessionMiddleware};
//! use goat::{Context, CookieStore, Dispatcher, HandlerResult, Methods, Request, Router, Server};
//!
//! async fn index(_req: Request, ctx: Context) -> HandlerResult<String> {
//!     let visits = ctx.session_value("visits").and_then(|v| v.as_u64()).unwrap_or(0) + 1;
//!     ctx.set_session_value("visits", visits);
//!     Ok(format!("visit number {visits}"))
//! }
//!
//! async fn secret(_req: Request, ctx: Context) -> HandlerResult<String> {
//!     let name = ctx.user().map(|u| u.username).unwrap_or_default();
//!     Ok(format!("hello {name}"))
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), goat::Error> {
//!     let router = Router::new()
//!         .get("/", "index", index)
//!         .intercept("/secret", "secret", Methods::GET, SessionAuth::new(secret, unauthorized));
//!
//!     let app = Dispatcher::new(router)
//!         .middleware(SessionMiddleware::new(CookieStore::new("change me"), "goat-session"))
//!         .middleware(DatabaseMiddleware::connect("memory://localhost/app", None)?);
//!
//!     Server::bind("0.0.0.0:3000").serve(app).await
//! }
//! ```

mod config;
mod context;
mod dispatcher;
mod error;
mod method;
mod request;
mod response;
mod router;
mod server;

pub mod auth;
pub mod handler;
pub mod interceptor;
pub mod logger;
pub mod middleware;
pub mod session;
pub mod store;

pub use config::Config;
pub use context::Context;
pub use dispatcher::{ChainPolicy, Dispatcher};
pub use error::{Error, HandlerError};
pub use handler::{BoxedHandler, Delegate, Handler, HandlerResult};
pub use method::{Method, Methods};
pub use request::Request;
pub use response::{ContentType, IntoResponse, Response, ResponseBuilder};
pub use router::{Resolution, Route, RouteError, Router, Target};
pub use server::Server;
pub use session::{CookieStore, Session, SessionError, SessionStore};
