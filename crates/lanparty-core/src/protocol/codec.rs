//! JSON codec for discovery datagrams.
//!
//! Wire format: one compact UTF-8 JSON object per UDP datagram, no length
//! prefix and no delimiter.  Receivers share the discovery port with whatever
//! else is broadcasting on the subnet, so a datagram that fails to decode is an
//! expected outcome, not an error worth surfacing: [`try_deserialize`] returns
//! `None` and never panics.

use thiserror::Error;
use tracing::trace;

use crate::protocol::messages::DiscoveryMessage;

/// Errors that can occur while encoding or decoding a discovery datagram.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The datagram is not valid UTF-8.
    #[error("datagram is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// The datagram is empty or whitespace only.
    #[error("empty datagram")]
    Empty,

    /// The text is not a discovery message.
    #[error("malformed discovery message: {0}")]
    Malformed(#[source] serde_json::Error),

    /// The message could not be encoded.
    #[error("failed to encode discovery message: {0}")]
    Encode(#[source] serde_json::Error),
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`DiscoveryMessage`] into the bytes of one datagram.
///
/// # Errors
///
/// Returns [`ProtocolError::Encode`] if serialization fails.
///
/// # Examples
///
/// ```rust
/// use lanparty_core::protocol::{serialize, try_deserialize, DiscoveryMessage};
///
/// let msg = DiscoveryMessage::not_found(None);
/// let bytes = serialize(&msg).unwrap();
/// assert_eq!(try_deserialize(&bytes), Some(msg));
/// ```
pub fn serialize(msg: &DiscoveryMessage) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(msg).map_err(ProtocolError::Encode)
}

/// Decodes one datagram, reporting why it was rejected.
///
/// Leading and trailing whitespace is ignored.
///
/// # Errors
///
/// Returns [`ProtocolError`] for non-UTF-8, empty, or non-conforming input.
pub fn decode(datagram: &[u8]) -> Result<DiscoveryMessage, ProtocolError> {
    let text = std::str::from_utf8(datagram)?.trim();
    if text.is_empty() {
        return Err(ProtocolError::Empty);
    }
    serde_json::from_str(text).map_err(ProtocolError::Malformed)
}

/// Decodes one datagram, returning `None` for anything that is not a
/// discovery message.
pub fn try_deserialize(datagram: &[u8]) -> Option<DiscoveryMessage> {
    match decode(datagram) {
        Ok(msg) => Some(msg),
        Err(e) => {
            trace!("discarding datagram: {e}");
            None
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
