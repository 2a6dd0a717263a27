//! Incoming HTTP request type.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{COOKIE, HeaderMap, HeaderName, HeaderValue};

use crate::method::Method;

/// An incoming HTTP request.
///
/// Cloning is cheap: the parsed parts live behind an `Arc`, so an interceptor
/// and the handler it selects can both hold the same request.
#[derive(Clone)]
pub struct Request {
    inner: Arc<Parts>,
}

#[derive(Clone)]
struct Parts {
    method: Method,
    path: String,
    query: Option<String>,
    headers: HeaderMap,
    body: Bytes,
    params: HashMap<String, String>,
    remote_addr: Option<SocketAddr>,
}

impl Request {
    /// A request with no headers and an empty body.
    ///
    /// `target` may carry a query string: `Request::new(Method::Get, "/search?q=goat")`.
    pub fn new(method: Method, target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path.to_owned(), Some(query.to_owned())),
            None => (target.to_owned(), None),
        };
        Self {
            inner: Arc::new(Parts {
                method,
                path,
                query,
                headers: HeaderMap::new(),
                body: Bytes::new(),
                params: HashMap::new(),
                remote_addr: None,
            }),
        }
    }

    pub fn get(target: &str) -> Self {
        Self::new(Method::Get, target)
    }

    pub fn post(target: &str) -> Self {
        Self::new(Method::Post, target)
    }

    /// Adds a header. Invalid names or values are skipped.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.parts_mut().headers.append(name, value);
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.parts_mut().body = body.into();
        self
    }

    pub(crate) fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.parts_mut().headers = headers;
        self
    }

    pub(crate) fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.parts_mut().remote_addr = Some(addr);
        self
    }

    /// Attaches the path parameters captured by the router. Values are
    /// percent-decoded; undecodable values are kept verbatim.
    pub(crate) fn with_params(mut self, params: HashMap<String, String>) -> Self {
        self.parts_mut().params = params
            .into_iter()
            .map(|(k, v)| {
                let decoded = urlencoding::decode(&v).map(|d| d.into_owned()).unwrap_or(v);
                (k, decoded)
            })
            .collect();
        self
    }

    fn parts_mut(&mut self) -> &mut Parts {
        Arc::make_mut(&mut self.inner)
    }

    pub fn method(&self) -> Method { self.inner.method }
    pub fn path(&self) -> &str { &self.inner.path }
    pub fn query(&self) -> Option<&str> { self.inner.query.as_deref() }
    pub fn headers(&self) -> &HeaderMap { &self.inner.headers }
    pub fn body(&self) -> &Bytes { &self.inner.body }
    pub fn remote_addr(&self) -> Option<SocketAddr> { self.inner.remote_addr }

    /// Case-insensitive header lookup. Non-UTF-8 values read as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/{id}`, `req.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.inner.params.get(key).map(String::as_str)
    }

    /// Returns the value of a cookie sent with the request.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.inner
            .headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v)
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.inner.method)
            .field("path", &self.inner.path)
            .field("query", &self.inner.query)
            .finish_non_exhaustive()
    }
}
