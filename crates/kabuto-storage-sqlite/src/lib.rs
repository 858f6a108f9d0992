//! SQLite row store for Kabuto wallets
//!
//! Provides the versioned relational schema (wallets, addresses,
//! transactions, inputs/outputs, tokens, blocks, sync cursors, memos)
//! with WAL mode, migrations, and transactional write primitives. The
//! store enforces uniqueness and reference invariants itself; callers
//! state conflict intent explicitly on every insert.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub use rusqlite;

pub mod database;
pub mod error;
pub mod memo_store;
pub mod migrations;
pub mod models;
pub mod repository;
pub mod sync_state;

pub use database::Database;
pub use error::{Error, Result};
pub use memo_store::{MemoEntry, MemoStore};
pub use models::{
    AddressRow, BlockRow, LastSyncInfo, TokenRow, TransactionRow, TxInputRow, TxOutputRow,
    TxStatus, WalletRow,
};
pub use repository::{ConflictStrategy, Repository, UtxoRow};
pub use sync_state::{truncate_above_height_tx, LastSyncStorage};
