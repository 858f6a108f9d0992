//! Error types for the wallet core

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by deterministic key derivation and address generation.
///
/// These are programming or input errors: they are never retried and the
/// engine never silently falls back to a different derivation.
#[derive(Debug, thiserror::Error)]
pub enum DerivationError {
    /// Child index outside the 31-bit range
    #[error("Derivation index {0} is out of range (must be below 2^31)")]
    IndexOutOfRange(u32),

    /// A base address was requested without a staking key
    #[error("Missing staking key: {0}")]
    MissingStakingKey(String),

    /// The requested address kind is not defined for the wallet's network
    #[error("Unsupported address kind for this network: {0}")]
    UnsupportedAddressKind(String),

    /// The recovery phrase failed BIP-39 validation
    #[error("Invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    /// Derivation path malformed or empty where segments are required
    #[error("Invalid derivation path: {0}")]
    InvalidPath(String),
}

/// Wallet core errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Key derivation or address generation failure
    #[error(transparent)]
    Derivation(#[from] DerivationError),

    /// Token amount arithmetic overflowed
    #[error("Amount overflow: {0}")]
    AmountOverflow(String),

    /// Token amount arithmetic underflowed (subtracting more than held)
    #[error("Amount underflow: {0}")]
    AmountUnderflow(String),

    /// Invalid address string
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derivation_error_messages_name_precondition() {
        let e = DerivationError::IndexOutOfRange(u32::MAX);
        assert!(e.to_string().contains("out of range"));

        let e = DerivationError::MissingStakingKey("base address".into());
        assert!(e.to_string().contains("Missing staking key"));
    }

    #[test]
    fn test_derivation_error_converts_to_core_error() {
        let e: Error = DerivationError::InvalidPath("empty".into()).into();
        assert!(matches!(e, Error::Derivation(_)));
    }
}
