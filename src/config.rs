//! Application configuration.

use std::env;
use std::net::SocketAddr;

use crate::dispatcher::ChainPolicy;
use crate::error::Error;

/// Settings for a goat application.
///
/// `Config::default()` is suitable for local development only: the session
/// secret is a fixed, public value.
#[derive(Clone, Debug)]
pub struct Config {
    /// Address the server binds to.
    pub addr: SocketAddr,
    /// Name of the session cookie.
    pub session_name: String,
    /// Key the session cookie is signed with.
    pub session_secret: String,
    /// Document store to connect to, e.g. `memory://localhost/app`.
    pub database_url: Option<String>,
    /// Database name; taken from the URL path when unset.
    pub database_name: Option<String>,
    pub chain_policy: ChainPolicy,
    /// Send handler error messages to clients.
    pub expose_errors: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            session_name: "goat-session".to_owned(),
            session_secret: "development-only-session-secret".to_owned(),
            database_url: None,
            database_name: None,
            chain_policy: ChainPolicy::FailFast,
            expose_errors: true,
        }
    }
}

impl Config {
    /// Reads `GOAT_*` environment variables, falling back to the defaults:
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `GOAT_ADDR` | `addr` |
    /// | `GOAT_SESSION_NAME` | `session_name` |
    /// | `GOAT_SESSION_SECRET` | `session_secret` |
    /// | `GOAT_DATABASE_URL` | `database_url` |
    /// | `GOAT_DATABASE_NAME` | `database_name` |
    /// | `GOAT_MIDDLEWARE_POLICY` | `chain_policy` (`fail-fast` or `continue`) |
    /// | `GOAT_EXPOSE_ERRORS` | `expose_errors` (`true` or `false`) |
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let defaults = Self::default();
        Ok(Self {
            addr: match get("GOAT_ADDR") {
                Some(addr) => addr
                    .parse()
                    .map_err(|_| Error::Config(format!("invalid GOAT_ADDR `{addr}`")))?,
                None => defaults.addr,
            },
            session_name: get("GOAT_SESSION_NAME").unwrap_or(defaults.session_name),
            session_secret: get("GOAT_SESSION_SECRET").unwrap_or(defaults.session_secret),
            database_url: get("GOAT_DATABASE_URL"),
            database_name: get("GOAT_DATABASE_NAME"),
            chain_policy: match get("GOAT_MIDDLEWARE_POLICY") {
                Some(policy) => policy.parse().map_err(Error::Config)?,
                None => defaults.chain_policy,
            },
            expose_errors: match get("GOAT_EXPOSE_ERRORS") {
                Some(flag) => flag
                    .parse()
                    .map_err(|_| Error::Config(format!("invalid GOAT_EXPOSE_ERRORS `{flag}`")))?,
                None => defaults.expose_errors,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.addr.port(), 8080);
        assert_eq!(config.chain_policy, ChainPolicy::FailFast);
        assert!(config.expose_errors);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn reads_every_variable() {
        let config = Config::from_lookup(lookup(&[
            ("GOAT_ADDR", "127.0.0.1:3000"),
            ("GOAT_SESSION_NAME", "sid"),
            ("GOAT_SESSION_SECRET", "s3cret"),
            ("GOAT_DATABASE_URL", "memory://localhost/app"),
            ("GOAT_DATABASE_NAME", "other"),
            ("GOAT_MIDDLEWARE_POLICY", "continue"),
            ("GOAT_EXPOSE_ERRORS", "false"),
        ]))
        .unwrap();
        assert_eq!(config.addr, "127.0.0.1:3000".parse().unwrap());
        assert_eq!(config.session_name, "sid");
        assert_eq!(config.session_secret, "s3cret");
        assert_eq!(config.database_url.as_deref(), Some("memory://localhost/app"));
        assert_eq!(config.database_name.as_deref(), Some("other"));
        assert_eq!(config.chain_policy, ChainPolicy::Continue);
        assert!(!config.expose_errors);
    }

    #[test]
    fn invalid_values_are_config_errors() {
        for vars in [
            [("GOAT_ADDR", "nowhere")],
            [("GOAT_MIDDLEWARE_POLICY", "sometimes")],
            [("GOAT_EXPOSE_ERRORS", "maybe")],
        ] {
            assert!(matches!(Config::from_lookup(lookup(&vars)), Err(Error::Config(_))));
        }
    }
}
