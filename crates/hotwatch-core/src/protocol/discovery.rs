//! UDP discovery datagrams.
//!
//! The client broadcasts [`PROBE_PAYLOAD`] to UDP port [`DISCOVERY_PORT`] on
//! every usable interface.  A source server listening on that port answers
//! with a unicast *advertisement* of the form:
//!
//! ```text
//! HotWatchServer:<url>
//! ```
//!
//! Some server builds emit one extra `:` in front of the URL
//! (`HotWatchServer::http://…`).  [`parse_advertisement`] strips that stray
//! separator exactly once so both encodings resolve to the same URL.
//!
//! # Why plain ASCII?
//!
//! The discovery exchange happens before any session exists, between
//! processes written in different languages.  A fixed ASCII marker is the
//! lowest common denominator: any implementation can produce and recognise it
//! without a shared codec.

use thiserror::Error;

/// Well-known UDP port the source server listens on for probes.
pub const DISCOVERY_PORT: u16 = 45454;

/// Datagram broadcast by the client to ask servers to announce themselves.
pub const PROBE_PAYLOAD: &[u8] = b"HotWatchDiscovery";

/// Marker every valid advertisement begins with.
pub const ADVERTISEMENT_MARKER: &str = "HotWatchServer";

/// Separator between the marker and the URL.
const SEPARATOR: char = ':';

/// Reasons a datagram is not a usable advertisement.
///
/// These are never escalated: the discovery scheduler logs them at debug
/// level and keeps waiting for a valid response.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdvertisementError {
    /// The datagram is not valid UTF-8 text.
    #[error("advertisement is not valid UTF-8")]
    NotText,

    /// The datagram does not start with `HotWatchServer:`.
    #[error("datagram does not start with the advertisement marker")]
    MissingMarker,

    /// The marker was present but no URL followed it.
    #[error("advertisement carries an empty URL")]
    EmptyUrl,
}

/// Extracts the server URL from an advertisement datagram.
///
/// Trailing NUL, CR and LF bytes are ignored; some senders pad datagrams or
/// terminate them with a newline.
///
/// # Errors
///
/// Returns [`AdvertisementError`] when the payload is not text, lacks the
/// marker, or carries no URL.
///
/// # Examples
///
/// ```rust
/// use hotwatch_core::parse_advertisement;
///
/// let url = parse_advertisement(b"HotWatchServer:http://10.0.0.5:8080").unwrap();
/// assert_eq!(url, "http://10.0.0.5:8080");
///
/// // Legacy encoding with a stray separator.
/// let url = parse_advertisement(b"HotWatchServer::http://10.0.0.5:8080").unwrap();
/// assert_eq!(url, "http://10.0.0.5:8080");
/// ```
pub fn parse_advertisement(datagram: &[u8]) -> Result<String, AdvertisementError> {
    let text = std::str::from_utf8(datagram).map_err(|_| AdvertisementError::NotText)?;
    let text = text.trim_end_matches(['\0', '\r', '\n']);

    let rest = text
        .strip_prefix(ADVERTISEMENT_MARKER)
        .and_then(|rest| rest.strip_prefix(SEPARATOR))
        .ok_or(AdvertisementError::MissingMarker)?;

    // At most one stray separator is tolerated.
    let url = rest.strip_prefix(SEPARATOR).unwrap_or(rest);

    if url.is_empty() {
        return Err(AdvertisementError::EmptyUrl);
    }
    Ok(url.to_string())
}

/// Builds an advertisement datagram for `url`.
///
/// The client never sends advertisements; this exists so tests and local
/// tooling can impersonate a server.
pub fn encode_advertisement(url: &str) -> Vec<u8> {
    format!("{ADVERTISEMENT_MARKER}{SEPARATOR}{url}").into_bytes()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
