//! Response classification shared by file sessions and metadata calls.
//!
//! One error taxonomy covers the whole protocol: every failure the server
//! reports becomes an [`ErrorEnvelope`] built by the same constructors,
//! whichever channel it arrived on. The status codes that select structured
//! decoding differ per channel and are kept as the server defines them:
//!
//! | channel            | filesystem error | service error        |
//! |--------------------|------------------|----------------------|
//! | session response   | 417              | any other > 400      |
//! | open handshake     | 417, 423         | any other            |
//! | metadata call      | 417              | 500 (other ≥ 400 are transport errors) |

use serde_json::Value;

use crate::codec::{Codec, Payload};
use crate::constants::status::{BAD_REQUEST, EXPECTATION_FAILED, INTERNAL_SERVER_ERROR, LOCKED};
use crate::error::{ErrorEnvelope, RemoteFsError, Result};
use crate::transport::{Frame, HttpResponse, TransportError};

/// Decoded `data` of a successful response.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// No `data` field, or `null`.
    None,
    Single(Payload),
    /// `data` was a list; each element decoded on its own.
    Many(Vec<Payload>),
}

impl Reply {
    /// The payload of a scalar response. A list here is a protocol error.
    pub fn into_single(self) -> Result<Option<Payload>> {
        match self {
            Reply::None => Ok(None),
            Reply::Single(payload) => Ok(Some(payload)),
            Reply::Many(items) => Err(RemoteFsError::Protocol(format!(
                "expected a single value, got a list of {}",
                items.len()
            ))),
        }
    }

    pub fn into_many(self) -> Vec<Payload> {
        match self {
            Reply::None => Vec::new(),
            Reply::Single(payload) => vec![payload],
            Reply::Many(items) => items,
        }
    }
}

/// Parse a session frame into its JSON envelope.
///
/// The server answers with binary frames; text frames are accepted too. A
/// close frame while a response is pending is a transport failure.
pub fn parse_frame(frame: Frame) -> Result<Value> {
    let parsed = match frame {
        Frame::Binary(bytes) => serde_json::from_slice(&bytes),
        Frame::Text(text) => serde_json::from_str(&text),
        Frame::Close(_) => return Err(TransportError::Closed.into()),
    };
    parsed.map_err(|e| RemoteFsError::Protocol(format!("response is not JSON: {e}")))
}

/// Classify a session response and decode its payload.
pub fn decode_response(message: Value, url: &str, codec: &Codec) -> Result<Reply> {
    let status = status_of(&message)?;
    if status > BAD_REQUEST {
        return Err(session_error(status, &message, url).into());
    }

    let data = match message {
        Value::Object(mut fields) => fields.remove("data").unwrap_or(Value::Null),
        _ => Value::Null,
    };

    match data {
        Value::Null => Ok(Reply::None),
        Value::Array(items) => items
            .into_iter()
            .map(|item| codec.decode(item).map_err(RemoteFsError::from))
            .collect::<Result<Vec<_>>>()
            .map(Reply::Many),
        other => Ok(Reply::Single(codec.decode(other)?)),
    }
}

/// Error for a failed session response (`status > 400`).
pub fn session_error(status: u16, body: &Value, url: &str) -> ErrorEnvelope {
    if status == EXPECTATION_FAILED {
        ErrorEnvelope::os_from_json(body, url)
    } else {
        ErrorEnvelope::service_from_json(body, url)
    }
}

/// Error for an open request the server rejected with a JSON diagnostic.
pub fn handshake_error(body: &Value, url: &str) -> ErrorEnvelope {
    match body.get("status").and_then(Value::as_u64) {
        Some(s) if s == u64::from(LOCKED) || s == u64::from(EXPECTATION_FAILED) => {
            ErrorEnvelope::os_from_json(body, url)
        }
        _ => ErrorEnvelope::service_from_json(body, url),
    }
}

/// Classify a metadata response and return its JSON body.
///
/// 417 and 500 carry structured error bodies (a malformed body decodes as
/// `{}`); any other failing status is surfaced as a transport error.
pub fn decode_http(response: HttpResponse) -> Result<Value> {
    let url = response.url.to_string();
    match response.status {
        EXPECTATION_FAILED | INTERNAL_SERVER_ERROR => {
            let body = serde_json::from_slice(&response.body)
                .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));
            let envelope = if response.status == EXPECTATION_FAILED {
                ErrorEnvelope::os_from_json(&body, url)
            } else {
                ErrorEnvelope::service_from_json(&body, url)
            };
            Err(envelope.into())
        }
        status if status >= BAD_REQUEST => Err(TransportError::Status { status, url }.into()),
        _ => serde_json::from_slice(&response.body)
            .map_err(|e| RemoteFsError::Protocol(format!("response body is not JSON: {e}"))),
    }
}

fn status_of(message: &Value) -> Result<u16> {
    message
        .get("status")
        .and_then(Value::as_u64)
        .and_then(|s| u16::try_from(s).ok())
        .ok_or_else(|| RemoteFsError::Protocol("response has no numeric status".into()))
}
