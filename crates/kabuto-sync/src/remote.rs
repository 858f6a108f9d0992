//! Injected remote capabilities
//!
//! The engine never speaks a wire protocol itself; the surrounding
//! application injects a [`ChainBackend`] implementing these five
//! queries. All calls are asynchronous and may be retried by the engine's
//! caller; the backend owns timeout policy.

use async_trait::async_trait;
use kabuto_core::TokenId;
use serde::{Deserialize, Serialize};

/// Remote-side failures
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// Network or backend failure; retryable with backoff
    #[error("Network error: {0}")]
    Network(String),

    /// The supplied reference block is not an ancestor of the remote's
    /// current chain: a reorganization happened below it
    #[error("Reference block is not on the remote chain")]
    ReferenceBlockMismatch,
}

/// Result type for remote calls
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Identifies a block the local store believes is on the canonical chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    /// Block hash
    pub hash: Vec<u8>,
    /// Block height
    pub height: u64,
}

/// The remote chain tip
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteBlock {
    /// Block hash
    pub hash: Vec<u8>,
    /// Height
    pub height: u64,
    /// Slot
    pub slot: u64,
    /// Wall-clock time (unix seconds)
    pub time: i64,
}

/// Block placement of a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteBlockInfo {
    /// Block hash
    pub hash: Vec<u8>,
    /// Height
    pub height: u64,
    /// Slot
    pub slot: u64,
    /// Ordinal position of the transaction within the block
    pub tx_ordinal: u32,
}

/// One per-token amount entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTokenAmount {
    /// Token identity
    pub token: TokenId,
    /// Amount in the token's smallest unit
    pub amount: u64,
}

/// An unspent output as reported by the remote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteUtxo {
    /// Hash of the producing transaction
    pub tx_hash: Vec<u8>,
    /// Output index within that transaction
    pub output_index: u32,
    /// Receiving address
    pub receiver: String,
    /// Per-token amounts
    pub amounts: Vec<RemoteTokenAmount>,
    /// Block placement, when the remote knows it
    pub block: Option<RemoteBlockInfo>,
}

/// An input of a remote transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTxInput {
    /// Hash of the transaction that produced the spent output
    pub source_tx_hash: Vec<u8>,
    /// Output index within the source transaction
    pub source_output_index: u32,
    /// Address the spent output paid to, when reported
    pub address: Option<String>,
}

/// An output of a remote transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTxOutput {
    /// Receiving address
    pub address: String,
    /// Per-token amounts
    pub amounts: Vec<RemoteTokenAmount>,
}

/// Chain-variant-specific transaction payload.
///
/// One tagged union over the common transaction shape; the engine stores
/// it opaquely and never interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "variant")]
pub enum TxVariantExtra {
    /// Cardano-family payload
    Cardano {
        /// Stake/pool certificates attached to the transaction
        certificates: Vec<serde_json::Value>,
        /// Transaction metadata
        metadata: Option<serde_json::Value>,
    },
    /// Ergo-compatible payload
    Ergo {
        /// Spending-proof extension values
        extension: Option<serde_json::Value>,
    },
}

/// A transaction as reported by the remote history query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTransaction {
    /// Transaction hash
    pub hash: Vec<u8>,
    /// Block placement; `None` while pending
    pub block: Option<RemoteBlockInfo>,
    /// Inputs
    pub inputs: Vec<RemoteTxInput>,
    /// Outputs
    pub outputs: Vec<RemoteTxOutput>,
    /// Chain-variant payload
    pub extra: Option<TxVariantExtra>,
}

/// Token metadata as reported by the remote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTokenInfo {
    /// Token identity
    pub token: TokenId,
    /// Display ticker
    pub ticker: Option<String>,
    /// Decimal places
    pub decimals: u32,
    /// Arbitrary extra metadata
    pub metadata: Option<serde_json::Value>,
}

/// Remote ledger queries injected into the engine
#[async_trait]
pub trait ChainBackend: Send + Sync {
    /// Subset of `addresses` the remote has seen used
    async fn check_addresses_in_use(&self, addresses: &[String]) -> RemoteResult<Vec<String>>;

    /// Current unspent outputs paying to any of `addresses`
    async fn get_utxos_for_addresses(&self, addresses: &[String]) -> RemoteResult<Vec<RemoteUtxo>>;

    /// Transaction history touching `addresses`, windowed after the
    /// reference block. Fails with [`RemoteError::ReferenceBlockMismatch`]
    /// when `after` is no longer on the canonical chain.
    async fn get_transactions_history(
        &self,
        addresses: &[String],
        after: Option<BlockRef>,
    ) -> RemoteResult<Vec<RemoteTransaction>>;

    /// The remote's current best block
    async fn get_best_block(&self) -> RemoteResult<RemoteBlock>;

    /// Metadata for the given tokens
    async fn get_token_info(&self, tokens: &[TokenId]) -> RemoteResult<Vec<RemoteTokenInfo>>;
}
