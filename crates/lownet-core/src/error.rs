use thiserror::Error;

/// Failures reported back to a caller. The receive path never returns these —
/// malformed or unauthenticated frames are dropped and logged, not surfaced.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("payload of {0} bytes exceeds the {1} byte frame payload limit")]
    PayloadTooLarge(usize, usize),

    #[error("protocol registry is full ({0} slots in use)")]
    RegistryFull(usize),

    #[error("protocol {0:#04x} is already registered")]
    ProtocolAlreadyRegistered(u8),

    #[error("no AES key is active; encrypted send requested without one")]
    NoActiveKey,

    #[error("keystore slot {0} is out of range")]
    InvalidKeystoreSlot(u8),

    #[error("failed to parse signing key PEM: {0}")]
    InvalidSigningKey(String),

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LinkError>;
