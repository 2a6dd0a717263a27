//! HTTP method as a typed enum, and the bit-set routes use to declare which
//! methods they accept.
//!
//! Unknown method strings are rejected at the server level with `405 Method Not Allowed`
//! before they ever reach the dispatcher.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;

/// A known HTTP method (RFC 9110).
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Method {
    Connect,
    Delete,
    Get,
    Head,
    Options,
    Patch,
    Post,
    Put,
    Trace,
}

impl Method {
    /// Returns the uppercase wire representation (e.g. `"GET"`).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Delete  => "DELETE",
            Self::Get     => "GET",
            Self::Head    => "HEAD",
            Self::Options => "OPTIONS",
            Self::Patch   => "PATCH",
            Self::Post    => "POST",
            Self::Put     => "PUT",
            Self::Trace   => "TRACE",
        }
    }
}

/// Parses an uppercase method string (e.g. `"GET"`). Case-sensitive per RFC 9110 §9.1.
impl FromStr for Method {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CONNECT" => Ok(Self::Connect),
            "DELETE"  => Ok(Self::Delete),
            "GET"     => Ok(Self::Get),
            "HEAD"    => Ok(Self::Head),
            "OPTIONS" => Ok(Self::Options),
            "PATCH"   => Ok(Self::Patch),
            "POST"    => Ok(Self::Post),
            "PUT"     => Ok(Self::Put),
            "TRACE"   => Ok(Self::Trace),
            _         => Err(()),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Methods ──────────────────────────────────────────────────────────────────

/// The set of methods a route answers.
///
/// The four classic verbs keep their historical bit values so masks written
/// as plain integers still mean the same thing:
///
/// ```rust
/// use goat::{Method, Methods};
///
/// let rw = Methods::GET | Methods::POST;
/// assert!(rw.contains(Method::Post));
/// assert!(!rw.contains(Method::Delete));
/// assert_eq!(Methods::from_bits(0x3), rw);
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct Methods(u16);

impl Methods {
    pub const NONE: Self = Self(0);
    pub const GET: Self = Self(0x1);
    pub const POST: Self = Self(0x2);
    pub const PUT: Self = Self(0x4);
    pub const DELETE: Self = Self(0x8);
    pub const HEAD: Self = Self(0x10);
    pub const PATCH: Self = Self(0x20);
    pub const OPTIONS: Self = Self(0x40);
    pub const CONNECT: Self = Self(0x80);
    pub const TRACE: Self = Self(0x100);
    pub const ALL: Self = Self(0x1ff);

    /// Builds a mask from raw bits. Bits outside [`Methods::ALL`] are dropped.
    pub const fn from_bits(bits: u16) -> Self {
        Self(bits & Self::ALL.0)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, method: Method) -> bool {
        let bit = Self::from(method).0;
        self.0 & bit == bit
    }

    /// Members in a stable order, for `Allow` headers and logs.
    pub fn iter(self) -> impl Iterator<Item = Method> {
        const ORDER: [Method; 9] = [
            Method::Get,
            Method::Post,
            Method::Put,
            Method::Delete,
            Method::Head,
            Method::Patch,
            Method::Options,
            Method::Connect,
            Method::Trace,
        ];
        ORDER.into_iter().filter(move |m| self.contains(*m))
    }

    /// Renders the mask as an `Allow` header value, e.g. `"GET, POST"`.
    pub fn allow_header(self) -> String {
        self.iter().map(Method::as_str).collect::<Vec<_>>().join(", ")
    }
}

impl From<Method> for Methods {
    fn from(method: Method) -> Self {
        match method {
            Method::Get     => Self::GET,
            Method::Post    => Self::POST,
            Method::Put     => Self::PUT,
            Method::Delete  => Self::DELETE,
            Method::Head    => Self::HEAD,
            Method::Patch   => Self::PATCH,
            Method::Options => Self::OPTIONS,
            Method::Connect => Self::CONNECT,
            Method::Trace   => Self::TRACE,
        }
    }
}

impl BitOr for Methods {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Methods {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for Methods {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.allow_header())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classic_bits_match_integer_masks() {
        assert_eq!(Methods::GET.bits(), 0x1);
        assert_eq!(Methods::POST.bits(), 0x2);
        assert_eq!(Methods::PUT.bits(), 0x4);
        assert_eq!(Methods::DELETE.bits(), 0x8);
        assert_eq!(Methods::from_bits(0xffff), Methods::ALL);
    }

    #[test]
    fn contains_only_members() {
        let mask = Methods::GET | Methods::DELETE;
        assert!(mask.contains(Method::Get));
        assert!(mask.contains(Method::Delete));
        assert!(!mask.contains(Method::Put));
        assert!(Methods::ALL.contains(Method::Trace));
        assert!(!Methods::NONE.contains(Method::Get));
    }

    #[test]
    fn allow_header_is_ordered() {
        let mask = Methods::DELETE | Methods::GET | Methods::POST;
        assert_eq!(mask.allow_header(), "GET, POST, DELETE");
    }

    #[test]
    fn parses_wire_names() {
        assert_eq!("PATCH".parse::<Method>(), Ok(Method::Patch));
        assert!("get".parse::<Method>().is_err());
        assert!("PROPFIND".parse::<Method>().is_err());
    }
}
