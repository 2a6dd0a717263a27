//! Named route registry.
//!
//! Every route has a unique name, a path template, a set of methods, and
//! exactly one target: a handler, an interceptor that picks a handler per
//! request, or a pass-through delegate. Paths live in a radix tree
//! ([`matchit`]) for O(path-length) lookup; names map back to routes for
//! reverse routing with [`Router::url_for`].
//!
//! The first registration of a name wins. Registering the same name again is
//! a no-op, so the table is fixed once startup registration is done.

use std::collections::{HashMap, HashSet};
use std::fmt;

use matchit::Router as MatchitRouter;
use tracing::{debug, warn};

use crate::handler::{BoxedDelegate, BoxedHandler, Delegate, Handler};
use crate::interceptor::{BoxedInterceptor, Interceptor};
use crate::method::{Method, Methods};

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("no route named `{0}`")]
    UnknownRoute(String),

    #[error("route `{route}` needs parameter `{param}`")]
    MissingParam { route: String, param: String },

    #[error("route `{route}` has no parameter `{param}`")]
    UnexpectedParam { route: String, param: String },

    #[error("invalid value {value:?} for parameter `{param}` of route `{route}`")]
    InvalidParam { route: String, param: String, value: String },

    #[error("route `{route}` has a malformed path template")]
    InvalidTemplate { route: String },
}

// ── Target ────────────────────────────────────────────────────────────────────

/// What a route runs.
#[derive(Clone)]
pub enum Target {
    /// Runs after the middleware chain with the request's context.
    Handler(BoxedHandler),
    /// Runs after the middleware chain and selects the handler to run.
    Interceptor(BoxedInterceptor),
    /// Receives the bare request: no middleware, no context, any method.
    Delegate(BoxedDelegate),
}

impl Target {
    pub fn handler(handler: impl Handler) -> Self {
        Self::Handler(handler.into_boxed_handler())
    }

    pub fn interceptor(interceptor: impl Interceptor) -> Self {
        Self::Interceptor(std::sync::Arc::new(interceptor))
    }

    pub fn delegate(delegate: impl Delegate) -> Self {
        Self::Delegate(delegate.into_boxed_delegate())
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Handler(_) => "handler",
            Self::Interceptor(_) => "interceptor",
            Self::Delegate(_) => "delegate",
        }
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

// ── Route ─────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct Route {
    name: String,
    path: String,
    methods: Methods,
    target: Target,
}

impl Route {
    pub fn name(&self) -> &str { &self.name }
    pub fn path(&self) -> &str { &self.path }
    pub fn methods(&self) -> Methods { self.methods }
    pub fn target(&self) -> &Target { &self.target }
}

/// Outcome of [`Router::resolve`].
#[derive(Debug)]
pub enum Resolution<'a> {
    Found { route: &'a Route, params: HashMap<String, String> },
    /// The path exists, but not for this method. Carries the allowed methods.
    MethodNotAllowed(Methods),
    NotFound,
}

// ── Router ────────────────────────────────────────────────────────────────────

/// The application's route table.
///
/// Build it once at startup and hand it to a
/// [`Dispatcher`](crate::Dispatcher). Every registration returns `self`, so
/// calls chain:
///
/// ```rust
/// use goat::{Context, HandlerResult, Methods, Request, Response, Router};
///
/// async fn index(_req: Request, _ctx: Context) -> HandlerResult {
///     Ok(Response::text("hi"))
/// }
///
/// let router = Router::new()
///     .handle("/", "index", Methods::GET, index)
///     .handle("/users/{id}", "user", Methods::GET | Methods::PUT, index);
///
/// assert_eq!(router.url_for("user", &[("id", "42")]).unwrap(), "/users/42");
/// ```
pub struct Router {
    routes: Vec<Route>,
    names: HashMap<String, usize>,
    /// Path template → slot in `slots`.
    templates: HashMap<String, usize>,
    /// Routes sharing one path template, in registration order.
    slots: Vec<Vec<usize>>,
    tree: MatchitRouter<usize>,
}

impl Router {
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            names: HashMap::new(),
            templates: HashMap::new(),
            slots: Vec::new(),
            tree: MatchitRouter::new(),
        }
    }

    /// Binds `target` to `path` under `name` for `methods`.
    ///
    /// If `name` is already registered the call does nothing.
    ///
    /// # Panics
    ///
    /// Panics if `path` is not a valid template or conflicts with a
    /// registered one (e.g. `/users/{id}` next to `/users/{name}`). A broken
    /// route table is a programming error.
    pub fn register(mut self, path: &str, name: &str, methods: Methods, target: Target) -> Self {
        if self.names.contains_key(name) {
            warn!(route = name, path, "route name already registered, keeping the first");
            return self;
        }

        let methods = match target {
            Target::Delegate(_) => Methods::ALL,
            _ => methods,
        };

        let slot = match self.templates.get(path) {
            Some(&slot) => slot,
            None => {
                let slot = self.slots.len();
                self.tree
                    .insert(path, slot)
                    .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
                self.templates.insert(path.to_owned(), slot);
                self.slots.push(Vec::new());
                slot
            }
        };

        debug!(route = name, path, %methods, kind = target.kind(), "route registered");
        let index = self.routes.len();
        self.routes.push(Route {
            name: name.to_owned(),
            path: path.to_owned(),
            methods,
            target,
        });
        self.slots[slot].push(index);
        self.names.insert(name.to_owned(), index);
        self
    }

    /// Binds a handler.
    pub fn handle(self, path: &str, name: &str, methods: Methods, handler: impl Handler) -> Self {
        self.register(path, name, methods, Target::handler(handler))
    }

    /// Binds an interceptor.
    pub fn intercept(self, path: &str, name: &str, methods: Methods, interceptor: impl Interceptor) -> Self {
        self.register(path, name, methods, Target::interceptor(interceptor))
    }

    /// Binds a pass-through delegate for every method.
    pub fn delegate(self, path: &str, name: &str, delegate: impl Delegate) -> Self {
        self.register(path, name, Methods::ALL, Target::delegate(delegate))
    }

    pub fn get(self, path: &str, name: &str, handler: impl Handler) -> Self {
        self.handle(path, name, Methods::GET, handler)
    }

    pub fn post(self, path: &str, name: &str, handler: impl Handler) -> Self {
        self.handle(path, name, Methods::POST, handler)
    }

    pub fn route(&self, name: &str) -> Option<&Route> {
        self.names.get(name).map(|&i| &self.routes[i])
    }

    pub fn routes(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Finds the route for `method` and `path`. Among routes sharing a path
    /// template, the first registered one that accepts the method wins.
    pub fn resolve(&self, method: Method, path: &str) -> Resolution<'_> {
        let Ok(matched) = self.tree.at(path) else {
            return Resolution::NotFound;
        };
        let candidates = &self.slots[*matched.value];
        let mut allowed = Methods::NONE;
        for &i in candidates {
            let route = &self.routes[i];
            if route.methods.contains(method) {
                let params = matched
                    .params
                    .iter()
                    .map(|(k, v)| (k.to_owned(), v.to_owned()))
                    .collect();
                return Resolution::Found { route, params };
            }
            allowed |= route.methods;
        }
        Resolution::MethodNotAllowed(allowed)
    }

    /// Builds the path of route `name`, substituting `params` into its
    /// template. Every template parameter must be given, and nothing else.
    pub fn url_for(&self, name: &str, params: &[(&str, &str)]) -> Result<String, RouteError> {
        let route = self
            .route(name)
            .ok_or_else(|| RouteError::UnknownRoute(name.to_owned()))?;
        let mut url = String::with_capacity(route.path.len());
        let mut used = HashSet::new();
        let mut chars = route.path.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    url.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    url.push('}');
                }
                '{' => {
                    let mut param = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(ch) => param.push(ch),
                            None => return Err(RouteError::InvalidTemplate { route: name.to_owned() }),
                        }
                    }
                    let (catch_all, key) = match param.strip_prefix('*') {
                        Some(key) => (true, key),
                        None => (false, param.as_str()),
                    };
                    let value = params
                        .iter()
                        .find(|(k, _)| *k == key)
                        .map(|(_, v)| *v)
                        .ok_or_else(|| RouteError::MissingParam {
                            route: name.to_owned(),
                            param: key.to_owned(),
                        })?;
                    if value.is_empty() || (!catch_all && value.contains('/')) {
                        return Err(RouteError::InvalidParam {
                            route: name.to_owned(),
                            param: key.to_owned(),
                            value: value.to_owned(),
                        });
                    }
                    let encoded = value
                        .split('/')
                        .map(|segment| urlencoding::encode(segment).into_owned())
                        .collect::<Vec<_>>()
                        .join("/");
                    url.push_str(&encoded);
                    used.insert(key.to_owned());
                }
                c => url.push(c),
            }
        }

        if let Some((extra, _)) = params.iter().find(|(k, _)| !used.contains(*k)) {
            return Err(RouteError::UnexpectedParam {
                route: name.to_owned(),
                param: (*extra).to_owned(),
            });
        }
        Ok(url)
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Context, HandlerResult, Request, Response};

    async fn first(_req: Request, _ctx: Context) -> HandlerResult {
        Ok(Response::text("first"))
    }

    async fn second(_req: Request, _ctx: Context) -> HandlerResult {
        Ok(Response::text("second"))
    }

    async fn passthrough(_req: Request) -> &'static str {
        "raw"
    }

    fn found_name(router: &Router, method: Method, path: &str) -> Option<String> {
        match router.resolve(method, path) {
            Resolution::Found { route, .. } => Some(route.name().to_owned()),
            _ => None,
        }
    }

    #[tokio::test]
    async fn duplicate_name_keeps_first_binding() {
        let router = Router::new()
            .handle("/a", "dup", Methods::GET, first)
            .handle("/b", "dup", Methods::POST, second);

        assert_eq!(router.len(), 1);
        let route = router.route("dup").unwrap();
        assert_eq!(route.path(), "/a");
        assert_eq!(route.methods(), Methods::GET);
        assert!(matches!(router.resolve(Method::Post, "/b"), Resolution::NotFound));

        let Target::Handler(h) = route.target() else { panic!("expected a handler") };
        let res = h.call(Request::get("/a"), Context::new()).await.unwrap();
        assert_eq!(res.body_text(), "first");
    }

    #[test]
    fn resolves_by_path_and_method() {
        let router = Router::new()
            .handle("/users/{id}", "user", Methods::GET, first)
            .handle("/users/{id}", "user-update", Methods::PUT | Methods::POST, second);

        assert_eq!(found_name(&router, Method::Get, "/users/7").as_deref(), Some("user"));
        assert_eq!(found_name(&router, Method::Put, "/users/7").as_deref(), Some("user-update"));
        match router.resolve(Method::Delete, "/users/7") {
            Resolution::MethodNotAllowed(allowed) => {
                assert_eq!(allowed, Methods::GET | Methods::PUT | Methods::POST)
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(router.resolve(Method::Get, "/nobody"), Resolution::NotFound));
    }

    #[test]
    fn captures_params() {
        let router = Router::new().handle("/users/{id}/posts/{post}", "post", Methods::GET, first);
        let Resolution::Found { params, .. } = router.resolve(Method::Get, "/users/7/posts/9") else {
            panic!("route not found");
        };
        assert_eq!(params["id"], "7");
        assert_eq!(params["post"], "9");
    }

    #[test]
    fn delegates_accept_every_method() {
        let router = Router::new().delegate("/legacy", "legacy", passthrough);
        assert_eq!(router.route("legacy").unwrap().methods(), Methods::ALL);
        assert_eq!(found_name(&router, Method::Patch, "/legacy").as_deref(), Some("legacy"));
    }

    #[test]
    #[should_panic(expected = "invalid route")]
    fn conflicting_templates_panic() {
        let _ = Router::new()
            .handle("/users/{id}", "a", Methods::GET, first)
            .handle("/users/{name}", "b", Methods::GET, second);
    }

    #[test]
    fn url_for_substitutes_and_encodes() {
        let router = Router::new()
            .handle("/", "index", Methods::GET, first)
            .handle("/users/{id}", "user", Methods::GET, first)
            .handle("/files/{*path}", "file", Methods::GET, first);

        assert_eq!(router.url_for("index", &[]).unwrap(), "/");
        assert_eq!(router.url_for("user", &[("id", "billy goat")]).unwrap(), "/users/billy%20goat");
        assert_eq!(router.url_for("file", &[("path", "a/b c.txt")]).unwrap(), "/files/a/b%20c.txt");
    }

    #[test]
    fn url_for_rejects_bad_params() {
        let router = Router::new().handle("/users/{id}", "user", Methods::GET, first);

        assert!(matches!(router.url_for("ghost", &[]), Err(RouteError::UnknownRoute(_))));
        assert!(matches!(router.url_for("user", &[]), Err(RouteError::MissingParam { .. })));
        assert!(matches!(
            router.url_for("user", &[("id", "1"), ("extra", "2")]),
            Err(RouteError::UnexpectedParam { .. })
        ));
        assert!(matches!(router.url_for("user", &[("id", "a/b")]), Err(RouteError::InvalidParam { .. })));
        assert!(matches!(router.url_for("user", &[("id", "")]), Err(RouteError::InvalidParam { .. })));
    }

    #[test]
    fn reverse_route_resolves_back_to_its_name() {
        let router = Router::new()
            .handle("/", "index", Methods::GET, first)
            .handle("/users/{id}", "user", Methods::GET, first);

        for (name, params) in [("index", vec![]), ("user", vec![("id", "42")])] {
            let url = router.url_for(name, &params).unwrap();
            assert_eq!(found_name(&router, Method::Get, &url).as_deref(), Some(name));
        }
    }
}
