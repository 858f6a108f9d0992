//! Error types for sync operations

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Remote/backend fetch failure; the cycle aborted without committing
    /// and may be retried by the caller
    #[error("Remote fetch error: {0}")]
    RemoteFetch(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] kabuto_storage_sqlite::Error),

    /// Key derivation or address generation failure
    #[error("Derivation error: {0}")]
    Derivation(String),

    /// Wallet id not present in the store
    #[error("Wallet not found: {0}")]
    WalletNotFound(i64),

    /// No deriver registered for the wallet in this session
    #[error("No deriver registered for wallet {0}")]
    DeriverNotRegistered(i64),

    /// A wallet with the same key material already exists
    #[error("Wallet already exists: '{name}' (id {wallet_id})")]
    DuplicateWallet {
        /// Row id of the existing wallet
        wallet_id: i64,
        /// Name of the existing wallet
        name: String,
    },

    /// Operation cancelled
    #[error("Cancelled")]
    Cancelled,
}

impl From<kabuto_core::Error> for Error {
    fn from(e: kabuto_core::Error) -> Self {
        Error::Derivation(e.to_string())
    }
}

impl Error {
    /// Whether the caller may retry the failed cycle (with backoff)
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::RemoteFetch(_))
    }
}
