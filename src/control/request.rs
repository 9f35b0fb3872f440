//! Wire format of the control protocol.
//!
//! One JSON object per line:
//!
//! ```text
//! {"method":"volumeup"}
//! {"method":"set","param":"band3","value":-6}
//! ```
//!
//! The reply is a single `OK` or `ERROR` line.

use serde::Deserialize;
use thiserror::Error;

use crate::system::MixerAction;

/// Why a request line was rejected before dispatch.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    /// Not a JSON object, or a field has the wrong type.
    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("unknown method '{0}'")]
    UnknownMethod(String),

    #[error("missing field '{0}'")]
    MissingField(&'static str),
}

impl DecodeError {
    /// The line named no known method, or no method at all.
    pub fn is_unknown_message(&self) -> bool {
        matches!(
            self,
            DecodeError::UnknownMethod(_) | DecodeError::MissingField("method")
        )
    }
}

/// A decoded, validated control request.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlRequest {
    Mixer(MixerAction),
    Set { param: String, value: f64 },
}

#[derive(Debug, Deserialize)]
struct RawRequest {
    method: Option<String>,
    param: Option<String>,
    value: Option<serde_json::Value>,
}

/// Decode one request line (trailing newline optional).
///
/// ```rust
/// use live_eq::control::{decode, ControlRequest};
///
/// let req = decode(r#"{"method":"set","param":"band0","value":5}"#).unwrap();
/// assert_eq!(req, ControlRequest::Set { param: "band0".into(), value: 5.0 });
/// ```
pub fn decode(line: &str) -> Result<ControlRequest, DecodeError> {
    let raw: RawRequest = serde_json::from_str(line.trim_end_matches(['\r', '\n']))
        .map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let method = raw.method.ok_or(DecodeError::MissingField("method"))?;
    if let Some(action) = MixerAction::from_method(&method) {
        return Ok(ControlRequest::Mixer(action));
    }
    if method != "set" {
        return Err(DecodeError::UnknownMethod(method));
    }

    let param = raw.param.ok_or(DecodeError::MissingField("param"))?;
    let value = raw
        .value
        .ok_or(DecodeError::MissingField("value"))?
        .as_f64()
        .ok_or_else(|| DecodeError::Malformed("'value' must be a number".into()))?;
    Ok(ControlRequest::Set { param, value })
}

/// Reply sent back to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    Error,
}

impl Outcome {
    pub fn as_line(&self) -> &'static str {
        match self {
            Outcome::Ok => "OK\n",
            Outcome::Error => "ERROR\n",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
