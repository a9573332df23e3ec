//! Acceptance rules applied to decoded discovery messages.
//!
//! Decoding only proves a datagram is well formed.  A searcher still has to
//! check that it came from the same game, speaks a supported schema version,
//! and announces a usable endpoint with a sensible capacity.

use thiserror::Error;

use crate::protocol::messages::{DiscoveryMessage, DiscoveryStatus, GAME_TAG, PROTOCOL_VERSION};

/// Smallest session capacity an announcement may advertise by default.
pub const DEFAULT_MIN_CAPACITY: u32 = 2;

/// Largest session capacity an announcement may advertise by default.
pub const DEFAULT_MAX_CAPACITY: u32 = 8;

/// Why a message was rejected.  The first failing rule wins.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("tag mismatch: expected {expected:?}, got {actual:?}")]
    TagMismatch {
        expected: String,
        actual: Option<String>,
    },
    #[error("protocol version {actual} is below the minimum {minimum}")]
    VersionTooOld { minimum: u32, actual: u32 },
    #[error("status {0} is not an announcement")]
    NotSuccess(DiscoveryStatus),
    #[error("announcement has no ip address")]
    MissingIp,
    #[error("announcement has no port")]
    MissingPort,
    #[error("capacity {actual:?} outside [{min}, {max}]")]
    CapacityOutOfRange {
        min: u32,
        max: u32,
        actual: Option<u32>,
    },
}

/// Parameters for [`DiscoveryMessage::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationRules {
    pub expected_tag: String,
    pub min_proto_version: u32,
    pub min_capacity: u32,
    pub max_capacity: u32,
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self {
            expected_tag: GAME_TAG.to_string(),
            min_proto_version: PROTOCOL_VERSION,
            min_capacity: DEFAULT_MIN_CAPACITY,
            max_capacity: DEFAULT_MAX_CAPACITY,
        }
    }
}

impl ValidationRules {
    /// Default rules, except the announced capacity must be at least
    /// `target`.  Used by a searcher that wants a room of `target` players.
    pub fn for_capacity(target: u32) -> Self {
        Self {
            min_capacity: target,
            ..Self::default()
        }
    }
}

impl DiscoveryMessage {
    /// Checks the message against `rules`.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] encountered.  Any status other than
    /// `Success` is rejected once tag and version pass; callers that care about
    /// `NotFound` must branch on [`status`](Self::status) instead.
    pub fn check(&self, rules: &ValidationRules) -> Result<(), ValidationError> {
        if self.tag() != Some(rules.expected_tag.as_str()) {
            return Err(ValidationError::TagMismatch {
                expected: rules.expected_tag.clone(),
                actual: self.tag().map(str::to_string),
            });
        }
        if self.proto_version() < rules.min_proto_version {
            return Err(ValidationError::VersionTooOld {
                minimum: rules.min_proto_version,
                actual: self.proto_version(),
            });
        }
        if self.status() != DiscoveryStatus::Success {
            return Err(ValidationError::NotSuccess(self.status()));
        }
        if self.ip().map_or(true, |ip| ip.trim().is_empty()) {
            return Err(ValidationError::MissingIp);
        }
        if self.port().unwrap_or(0) == 0 {
            return Err(ValidationError::MissingPort);
        }
        match self.capacity() {
            Some(cap) if (rules.min_capacity..=rules.max_capacity).contains(&cap) => Ok(()),
            actual => Err(ValidationError::CapacityOutOfRange {
                min: rules.min_capacity,
                max: rules.max_capacity,
                actual,
            }),
        }
    }

    /// Returns `true` when [`check`](Self::check) passes.
    pub fn validate(&self, rules: &ValidationRules) -> bool {
        self.check(rules).is_ok()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
