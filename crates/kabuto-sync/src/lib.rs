//! Synchronization bridge for Kabuto wallets
//!
//! Reconciles remote ledger data (blocks, transactions, UTXOs) into the
//! local row store for each wallet's hierarchically-derived address set,
//! with gap-limit frontier scanning, chain-reorganization repair, and
//! atomic per-cycle commits. Exposes the balance aggregator, memo
//! operations, and the duplicate-wallet detector to UI code.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod balance;
pub mod cancel;
pub mod error;
pub mod existence;
pub mod remote;
pub mod sync;

pub use balance::{all_utxos, last_sync_info, utxo_balance};
pub use cancel::CancelToken;
pub use error::{Error, Result};
pub use existence::{deriver_material, find_match, generate_plates, RestorePreview};
pub use remote::{
    BlockRef, ChainBackend, RemoteBlock, RemoteBlockInfo, RemoteError, RemoteResult,
    RemoteTokenAmount, RemoteTokenInfo, RemoteTransaction, RemoteTxInput, RemoteTxOutput,
    RemoteUtxo, TxVariantExtra,
};
pub use sync::{SyncConfig, SyncEngine, SyncSummary, WalletHandle};
