//! Core constants, configuration, and error types.
//!
//! Everything above this layer depends on `core`; `core` depends on
//! nothing else in the crate.

pub mod config;
pub mod constants;
pub mod error;

pub use config::ProtocolConfig;
pub use constants::*;
pub use error::{
    CodecError, CryptoError, HandshakeError, JournalError, ProtocolError, TransferError,
};

use serde::{Deserialize, Serialize};

/// Which side of the transfer a peer plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Emits blocks and the manifest.
    Sender,
    /// Verifies, journals, and reassembles blocks.
    Receiver,
}

impl Role {
    /// The role on the other end of the session.
    pub fn peer(self) -> Self {
        match self {
            Role::Sender => Role::Receiver,
            Role::Receiver => Role::Sender,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_peer() {
        assert_eq!(Role::Sender.peer(), Role::Receiver);
        assert_eq!(Role::Receiver.peer(), Role::Sender);
    }

    #[test]
    fn test_role_wire_names() {
        assert_eq!(serde_json::to_string(&Role::Sender).unwrap(), "\"sender\"");
        assert_eq!(
            serde_json::to_string(&Role::Receiver).unwrap(),
            "\"receiver\""
        );
    }
}
