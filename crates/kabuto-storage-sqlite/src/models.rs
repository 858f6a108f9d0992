//! Row models for the wallet schema

use crate::{Error, Result};
use kabuto_core::ChainIndex;
use serde::{Deserialize, Serialize};

/// Lifecycle of a transaction row.
///
/// Transitions: `Pending` → `InBlock` (stays) or → `Failed`. An `InBlock`
/// transaction is mutated again only by an explicit rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxStatus {
    /// Observed but not yet in a block
    Pending,
    /// Included in a block
    InBlock,
    /// Dropped or superseded; kept for history
    Failed,
}

impl TxStatus {
    /// Column representation
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "Pending",
            TxStatus::InBlock => "InBlock",
            TxStatus::Failed => "Failed",
        }
    }

    /// Parse the column representation
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "Pending" => Ok(TxStatus::Pending),
            "InBlock" => Ok(TxStatus::InBlock),
            "Failed" => Ok(TxStatus::Failed),
            other => Err(Error::Validation(format!("unknown tx status: {other}"))),
        }
    }
}

/// Column representation of a chain role
pub fn chain_as_str(chain: ChainIndex) -> &'static str {
    match chain {
        ChainIndex::External => "External",
        ChainIndex::Internal => "Internal",
    }
}

/// Parse the column representation of a chain role
pub fn chain_from_str(s: &str) -> Result<ChainIndex> {
    match s {
        "External" => Ok(ChainIndex::External),
        "Internal" => Ok(ChainIndex::Internal),
        other => Err(Error::Validation(format!("unknown chain: {other}"))),
    }
}

/// Column representation of a derivation purpose
pub fn purpose_as_str(purpose: kabuto_params::DerivationPurpose) -> &'static str {
    match purpose {
        kabuto_params::DerivationPurpose::Bip44 => "Bip44",
        kabuto_params::DerivationPurpose::Cip1852 => "Cip1852",
    }
}

/// Column representation of a chain family
pub fn family_as_str(family: kabuto_params::ChainFamily) -> &'static str {
    match family {
        kabuto_params::ChainFamily::Cardano => "Cardano",
        kabuto_params::ChainFamily::Ergo => "Ergo",
    }
}

/// Column representation of a network type
pub fn network_type_as_str(network_type: kabuto_params::NetworkType) -> &'static str {
    match network_type {
        kabuto_params::NetworkType::Mainnet => "Mainnet",
        kabuto_params::NetworkType::Testnet => "Testnet",
    }
}

/// Convert a stored i64 amount back to the u64 domain value
pub fn amount_from_column(value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|_| Error::Validation(format!("negative amount column: {value}")))
}

/// Convert a u64 domain amount into its i64 column form
pub fn amount_to_column(value: u64) -> Result<i64> {
    i64::try_from(value)
        .map_err(|_| Error::Validation(format!("amount exceeds column range: {value}")))
}

/// Wallet identity row
#[derive(Debug, Clone)]
pub struct WalletRow {
    /// Row id
    pub id: i64,
    /// Display name
    pub name: String,
    /// Chain family column (`Cardano` / `Ergo`)
    pub chain_family: String,
    /// Network column (`Mainnet` / `Testnet`)
    pub network: String,
    /// Derivation purpose column (`Bip44` / `Cip1852`)
    pub purpose: String,
    /// Account index under the purpose/coin prefix
    pub account_index: u32,
    /// Checksum plate text for duplicate detection and restore verification
    pub plate_text: String,
    /// Account public material (public key ‖ chain code)
    pub public_deriver: Vec<u8>,
    /// Creation timestamp (unix seconds)
    pub created_at: i64,
}

/// Address row; append-only
#[derive(Debug, Clone)]
pub struct AddressRow {
    /// Row id
    pub id: i64,
    /// Owning wallet
    pub wallet_id: i64,
    /// Chain role
    pub chain: ChainIndex,
    /// Index within the chain
    pub address_index: u32,
    /// Encoded address
    pub address: String,
    /// Raw byte representation
    pub raw: Vec<u8>,
    /// Derivation path string
    pub derivation_path: String,
}

/// Transaction row
#[derive(Debug, Clone)]
pub struct TransactionRow {
    /// Row id
    pub id: i64,
    /// Owning wallet
    pub wallet_id: i64,
    /// Transaction hash
    pub hash: Vec<u8>,
    /// Lifecycle status
    pub status: TxStatus,
    /// Containing block row, once known
    pub block_id: Option<i64>,
    /// Ordinal position within the block
    pub tx_ordinal: Option<u32>,
    /// Last-update timestamp (unix seconds)
    pub last_update: i64,
    /// Per-chain-variant extra payload, JSON-encoded tagged union
    pub extra_json: Option<String>,
}

/// Output row plus its per-token amounts
#[derive(Debug, Clone)]
pub struct TxOutputRow {
    /// Row id
    pub id: i64,
    /// Producing transaction row
    pub tx_id: i64,
    /// Index within the transaction
    pub output_index: u32,
    /// Receiving address text
    pub address: String,
    /// Owned-address row, when the receiver is ours
    pub address_id: Option<i64>,
    /// Spending transaction row; `None` while unspent
    pub spent_by_tx: Option<i64>,
}

/// Input row
#[derive(Debug, Clone)]
pub struct TxInputRow {
    /// Row id
    pub id: i64,
    /// Spending transaction row
    pub tx_id: i64,
    /// Index within the transaction
    pub input_index: u32,
    /// Hash of the transaction that produced the spent output
    pub source_tx_hash: Vec<u8>,
    /// Output index within the source transaction
    pub source_output_index: u32,
    /// Resolved owned output; `None` for foreign outputs
    pub resolved_output_id: Option<i64>,
}

/// Token registry row
#[derive(Debug, Clone)]
pub struct TokenRow {
    /// Row id
    pub id: i64,
    /// Content fingerprint (dedup key)
    pub fingerprint: Vec<u8>,
    /// Minting policy; `None` for the default token
    pub policy: Option<Vec<u8>>,
    /// Asset name; `None` for the default token
    pub asset_name: Option<Vec<u8>>,
    /// Display ticker
    pub ticker: Option<String>,
    /// Decimal places
    pub decimals: u32,
    /// Default-token marker
    pub is_default: bool,
    /// Remote-provided metadata, JSON-encoded
    pub metadata_json: Option<String>,
}

/// Block row
#[derive(Debug, Clone)]
pub struct BlockRow {
    /// Row id
    pub id: i64,
    /// Owning wallet
    pub wallet_id: i64,
    /// Block hash
    pub hash: Vec<u8>,
    /// Height
    pub height: u64,
    /// Slot
    pub slot: u64,
    /// Parent block hash
    pub parent_hash: Option<Vec<u8>>,
}

/// Per-wallet sync cursor
#[derive(Debug, Clone, Default)]
pub struct LastSyncInfo {
    /// Highest fully-synced block hash
    pub block_hash: Option<Vec<u8>>,
    /// Height of that block
    pub height: u64,
    /// Slot of that block
    pub slot: u64,
    /// Wall-clock time of the sync (unix seconds)
    pub time: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tx_status_round_trip() {
        for status in [TxStatus::Pending, TxStatus::InBlock, TxStatus::Failed] {
            assert_eq!(TxStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(TxStatus::parse("Confirmed").is_err());
    }

    #[test]
    fn test_chain_round_trip() {
        for chain in ChainIndex::both() {
            assert_eq!(chain_from_str(chain_as_str(chain)).unwrap(), chain);
        }
        assert!(chain_from_str("Chimeric").is_err());
    }

    #[test]
    fn test_amount_column_conversion() {
        assert_eq!(amount_to_column(2_100_000).unwrap(), 2_100_000);
        assert_eq!(amount_from_column(2_100_000).unwrap(), 2_100_000);
        assert!(amount_from_column(-1).is_err());
        assert!(amount_to_column(u64::MAX).is_err());
    }
}
