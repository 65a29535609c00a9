//! JSON session frames exchanged over the WebSocket.
//!
//! Every frame is a JSON object with a `"type"` field naming the variant:
//!
//! ```text
//! client → server   {"type":"hello","client":"qt"}
//! client → server   {"type":"error","message":"<text>"}
//! server → client   {"type":"fileChanged","path":"/a/b.qml"}
//! server → client   {"type":"connected"}
//! ```
//!
//! # Why separate inbound and outbound types?
//!
//! The two directions carry different information, and the inbound side must
//! tolerate tags it does not know (newer servers may send more).  Outbound
//! frames are a closed serde enum; inbound frames are decoded by hand into
//! [`InboundMessage`] so that an unknown tag becomes an explicit
//! [`InboundMessage::Unknown`] value instead of a parse failure.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Name this client reports in the handshake frame.
pub const CLIENT_NAME: &str = "qt";

/// Errors produced while decoding an inbound frame.
///
/// Protocol errors are logged and the frame is dropped; they never change the
/// connection state.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The frame is not valid JSON.
    #[error("frame is not valid JSON: {0}")]
    InvalidJson(String),

    /// The frame is JSON but not an object.
    #[error("frame is not a JSON object")]
    NotAnObject,

    /// The `"type"` field is absent or not a string.
    #[error("frame has no string \"type\" tag")]
    MissingTag,

    /// A field required by the tagged variant is absent or has the wrong type.
    #[error("\"{tag}\" frame is missing string field \"{field}\"")]
    MissingField { tag: &'static str, field: &'static str },
}

/// A decoded server → client frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// The server echoed a hello.
    Hello,
    /// A source file changed on the server.  `path` is server-relative.
    FileChanged { path: String },
    /// The server acknowledged the session.
    ConnectedAck,
    /// Any other tag.  Ignored by the router.
    Unknown { tag: String },
}

impl InboundMessage {
    /// Short name used in log lines.
    pub fn kind(&self) -> &str {
        match self {
            InboundMessage::Hello => TAG_HELLO,
            InboundMessage::FileChanged { .. } => TAG_FILE_CHANGED,
            InboundMessage::ConnectedAck => TAG_CONNECTED,
            InboundMessage::Unknown { tag } => tag,
        }
    }
}

const TAG_HELLO: &str = "hello";
const TAG_FILE_CHANGED: &str = "fileChanged";
const TAG_CONNECTED: &str = "connected";

/// A client → server frame.
///
/// `#[serde(tag = "type")]` puts the discriminant first, so the handshake
/// serializes to exactly `{"type":"hello","client":"qt"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundMessage {
    /// Handshake sent as soon as the session opens.
    Hello { client: String },
    /// A forwarded diagnostic record.
    Error { message: String },
}

impl OutboundMessage {
    /// The handshake frame identifying this client.
    pub fn hello() -> Self {
        OutboundMessage::Hello {
            client: CLIENT_NAME.to_string(),
        }
    }

    /// A diagnostic frame carrying `message`.
    pub fn diagnostic(message: impl Into<String>) -> Self {
        OutboundMessage::Error {
            message: message.into(),
        }
    }
}

/// Decodes one inbound text frame.
///
/// # Errors
///
/// Returns [`ProtocolError`] for frames that are not JSON objects, lack a
/// string `"type"`, or are `fileChanged` frames without a string `"path"`.
///
/// # Examples
///
/// ```rust
/// use hotwatch_core::{decode_inbound, InboundMessage};
///
/// let msg = decode_inbound(r#"{"type":"fileChanged","path":"/a/b.qml"}"#).unwrap();
/// assert_eq!(msg, InboundMessage::FileChanged { path: "/a/b.qml".into() });
/// ```
pub fn decode_inbound(frame: &str) -> Result<InboundMessage, ProtocolError> {
    let value: Value =
        serde_json::from_str(frame).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;
    let object = value.as_object().ok_or(ProtocolError::NotAnObject)?;
    let tag = object
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingTag)?;

    let message = match tag {
        TAG_HELLO => InboundMessage::Hello,
        TAG_CONNECTED => InboundMessage::ConnectedAck,
        TAG_FILE_CHANGED => {
            let path = object.get("path").and_then(Value::as_str).ok_or(
                ProtocolError::MissingField {
                    tag: TAG_FILE_CHANGED,
                    field: "path",
                },
            )?;
            InboundMessage::FileChanged {
                path: path.to_string(),
            }
        }
        other => InboundMessage::Unknown {
            tag: other.to_string(),
        },
    };
    Ok(message)
}

/// Serializes an outbound frame to its JSON text.
///
/// # Errors
///
/// Returns the underlying `serde_json` error; with the current variants this
/// cannot happen in practice.
pub fn encode_outbound(message: &OutboundMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
