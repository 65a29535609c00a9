//! Server endpoint: the advertised base URL and the URLs derived from it.
//!
//! A source server advertises an HTTP base URL such as
//! `http://192.168.1.20:8080`.  Two other URLs are derived from it:
//!
//! | Derived URL | Rule                                                    |
//! |-------------|---------------------------------------------------------|
//! | session     | scheme forced to `ws`, path forced to `/ws`             |
//! | file        | base + server-relative path + `?v=<cache buster>`       |
//!
//! The session URL ignores whatever path the advertisement carried; the
//! server always serves its WebSocket on `/ws`.

use thiserror::Error;
use url::Url;

/// Scheme of the persistent session transport.
pub const SESSION_SCHEME: &str = "ws";

/// Route the server serves its session on.
pub const SESSION_ROUTE: &str = "/ws";

/// Name of the cache-busting query parameter appended to file URLs.
pub const CACHE_BUSTER_PARAM: &str = "v";

/// Errors raised while deriving an endpoint from a server URL.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EndpointError {
    /// No URL was supplied.
    #[error("server URL is not set")]
    Empty,

    /// The URL could not be parsed.
    #[error("invalid server URL {url:?}: {reason}")]
    Invalid { url: String, reason: String },

    /// The URL parsed but names no host to connect to.
    #[error("server URL {0:?} has no host")]
    MissingHost(String),

    /// The URL's scheme cannot be rewritten to the session scheme.
    #[error("cannot derive a session URL from scheme {0:?}")]
    UnsupportedScheme(String),
}

/// A resolved server: its base URL plus the derived session URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEndpoint {
    base: Url,
    session: Url,
}

impl ServerEndpoint {
    /// Parses an advertised or configured server URL.
    ///
    /// A single leading `:` (left over from the legacy advertisement
    /// encoding) is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError`] when the URL is empty, unparsable, hostless,
    /// or uses a scheme that cannot become `ws`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hotwatch_core::ServerEndpoint;
    ///
    /// let ep = ServerEndpoint::parse("http://10.0.0.5:8080/files").unwrap();
    /// assert_eq!(ep.session_url().as_str(), "ws://10.0.0.5:8080/ws");
    /// ```
    pub fn parse(raw: &str) -> Result<Self, EndpointError> {
        let trimmed = raw.trim();
        let cleaned = trimmed.strip_prefix(':').unwrap_or(trimmed);
        if cleaned.is_empty() {
            return Err(EndpointError::Empty);
        }

        let base = Url::parse(cleaned).map_err(|e| EndpointError::Invalid {
            url: cleaned.to_string(),
            reason: e.to_string(),
        })?;
        if !base.has_host() {
            return Err(EndpointError::MissingHost(cleaned.to_string()));
        }

        let mut session = base.clone();
        session
            .set_scheme(SESSION_SCHEME)
            .map_err(|()| EndpointError::UnsupportedScheme(base.scheme().to_string()))?;
        session.set_path(SESSION_ROUTE);
        session.set_query(None);
        session.set_fragment(None);

        Ok(Self { base, session })
    }

    /// The base URL as advertised.
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// The WebSocket URL the session connects to.
    pub fn session_url(&self) -> &Url {
        &self.session
    }

    /// Builds the URL a viewer loads `server_path` from.
    ///
    /// `cache_buster` is appended as `?v=<cache_buster>` so the viewer's HTTP
    /// layer never serves a stale copy after a change notice.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::Invalid`] if the path cannot be resolved
    /// against the base URL.
    pub fn file_url(&self, server_path: &str, cache_buster: u64) -> Result<Url, EndpointError> {
        let mut base = self.base.clone();
        base.set_query(None);
        base.set_fragment(None);
        if !base.path().ends_with('/') {
            let with_slash = format!("{}/", base.path());
            base.set_path(&with_slash);
        }

        let relative = server_path.trim_start_matches('/');
        let mut url = base.join(relative).map_err(|e| EndpointError::Invalid {
            url: format!("{base}{relative}"),
            reason: e.to_string(),
        })?;
        url.query_pairs_mut()
            .clear()
            .append_pair(CACHE_BUSTER_PARAM, &cache_buster.to_string());
        Ok(url)
    }
}

/// Turns a statically configured host into a server URL.
///
/// `http://` is prepended unless the host already names `http://` or
/// `https://`.
pub fn url_from_host(host: &str) -> String {
    let host = host.trim();
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{host}")
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
