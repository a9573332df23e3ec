//! Protocol module containing the discovery message, its codec, and validation.

pub mod codec;
pub mod messages;
pub mod validation;

pub use codec::{decode, serialize, try_deserialize, ProtocolError};
pub use messages::*;
pub use validation::{ValidationError, ValidationRules};
