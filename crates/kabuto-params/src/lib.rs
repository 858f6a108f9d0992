//! Network parameters and constants for Kabuto wallets
//!
//! This crate provides network-specific constants, derivation purposes,
//! and default-token metadata for the supported chain families.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod network;

pub use network::{
    ChainFamily, DerivationPurpose, Network, NetworkType, TokenInfo,
    CARDANO_COIN_TYPE, CHIMERIC_CHAIN_INDEX, DEFAULT_GAP_LIMIT, ERGO_COIN_TYPE,
    HISTORY_PAGE_SIZE, STAKING_KEY_INDEX,
};

/// Error types for parameter operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid network specified
    #[error("Invalid network: {0}")]
    InvalidNetwork(String),

    /// Chain family does not support the requested derivation purpose
    #[error("Purpose {purpose:?} is not supported on {family:?}")]
    UnsupportedPurpose {
        /// Requested derivation purpose
        purpose: DerivationPurpose,
        /// Chain family it was requested for
        family: ChainFamily,
    },
}

/// Result type for parameter operations
pub type Result<T> = std::result::Result<T, Error>;
