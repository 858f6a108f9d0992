//! Data access layer
//!
//! Reads go through [`Repository`] over a live connection; writes that
//! belong to a sync cycle are associated functions over an open
//! [`rusqlite::Transaction`], so one cycle commits atomically or not at
//! all. Uniqueness and reference invariants are enforced here (and by the
//! schema), never by callers.

use crate::models::*;
use crate::{Database, Error, Result};
use kabuto_core::{AssetId, ChainIndex, MultiTokenValue, TokenId};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::collections::HashMap;

/// Conflict resolution for the store's insert primitive.
///
/// Callers state their intent explicitly instead of choosing between ad
/// hoc `INSERT OR ...` spellings per call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictStrategy {
    /// Fail with `ConstraintViolation` on conflict
    Abort,
    /// Replace the conflicting row
    Replace,
    /// Keep the existing row and skip the write
    Ignore,
}

impl ConflictStrategy {
    fn insert_verb(&self) -> &'static str {
        match self {
            ConflictStrategy::Abort => "INSERT",
            ConflictStrategy::Replace => "INSERT OR REPLACE",
            ConflictStrategy::Ignore => "INSERT OR IGNORE",
        }
    }
}

/// An unspent output with its resolved per-token amounts
#[derive(Debug, Clone)]
pub struct UtxoRow {
    /// The output row
    pub output: TxOutputRow,
    /// Hash of the producing transaction
    pub tx_hash: Vec<u8>,
    /// Height of the producing block, if in a block
    pub block_height: Option<u64>,
    /// Per-token amounts
    pub amounts: MultiTokenValue,
}

/// Repository for database operations
pub struct Repository<'a> {
    db: &'a Database,
}

impl<'a> Repository<'a> {
    /// Create repository
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    fn conn(&self) -> Result<&Connection> {
        self.db.conn()
    }

    // ---- wallets ----

    /// Insert a wallet row, returning its id
    #[allow(clippy::too_many_arguments)]
    pub fn insert_wallet(
        &self,
        name: &str,
        chain_family: &str,
        network: &str,
        purpose: &str,
        account_index: u32,
        plate_text: &str,
        public_deriver: &[u8],
    ) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO wallets
                (name, chain_family, network, purpose, account_index,
                 plate_text, public_deriver, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                name,
                chain_family,
                network,
                purpose,
                account_index,
                plate_text,
                public_deriver,
                chrono::Utc::now().timestamp(),
            ],
        )?;
        let id = conn.last_insert_rowid();

        // Seed cutoffs at zero for both chains.
        for chain in ChainIndex::both() {
            conn.execute(
                r#"
                INSERT INTO derivation_state (wallet_id, chain, cutoff_index, updated_at)
                VALUES (?1, ?2, 0, ?3)
                "#,
                params![id, chain_as_str(chain), chrono::Utc::now().timestamp()],
            )?;
        }
        conn.execute(
            "INSERT INTO last_sync_info (wallet_id) VALUES (?1)",
            params![id],
        )?;
        Ok(id)
    }

    fn wallet_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<WalletRow> {
        Ok(WalletRow {
            id: row.get(0)?,
            name: row.get(1)?,
            chain_family: row.get(2)?,
            network: row.get(3)?,
            purpose: row.get(4)?,
            account_index: row.get(5)?,
            plate_text: row.get(6)?,
            public_deriver: row.get(7)?,
            created_at: row.get(8)?,
        })
    }

    /// Get wallet by id
    pub fn get_wallet(&self, wallet_id: i64) -> Result<WalletRow> {
        self.conn()?
            .query_row(
                r#"
                SELECT id, name, chain_family, network, purpose, account_index,
                       plate_text, public_deriver, created_at
                FROM wallets WHERE id = ?1
                "#,
                [wallet_id],
                Self::wallet_from_row,
            )
            .optional()?
            .ok_or_else(|| Error::NotFound(format!("wallet {wallet_id}")))
    }

    /// List all wallets
    pub fn list_wallets(&self) -> Result<Vec<WalletRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, name, chain_family, network, purpose, account_index,
                   plate_text, public_deriver, created_at
            FROM wallets ORDER BY id
            "#,
        )?;
        let rows = stmt
            .query_map([], Self::wallet_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Wallets whose plate and account position match the candidate.
    /// Plates can collide; callers decide on the full key material.
    pub fn find_wallets_by_plate(
        &self,
        plate_text: &str,
        purpose: &str,
        account_index: u32,
    ) -> Result<Vec<WalletRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, name, chain_family, network, purpose, account_index,
                   plate_text, public_deriver, created_at
            FROM wallets
            WHERE plate_text = ?1 AND purpose = ?2 AND account_index = ?3
            ORDER BY id
            "#,
        )?;
        let rows = stmt
            .query_map(
                params![plate_text, purpose, account_index],
                Self::wallet_from_row,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Delete a wallet and (via cascading keys) every dependent row
    pub fn delete_wallet(&self, wallet_id: i64) -> Result<()> {
        let deleted = self
            .conn()?
            .execute("DELETE FROM wallets WHERE id = ?1", [wallet_id])?;
        if deleted == 0 {
            return Err(Error::NotFound(format!("wallet {wallet_id}")));
        }
        Ok(())
    }

    // ---- derivation state ----

    /// Current cutoff index for one chain
    pub fn get_cutoff(&self, wallet_id: i64, chain: ChainIndex) -> Result<u32> {
        let cutoff = self
            .conn()?
            .query_row(
                "SELECT cutoff_index FROM derivation_state WHERE wallet_id = ?1 AND chain = ?2",
                params![wallet_id, chain_as_str(chain)],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
            .unwrap_or(0);
        Ok(cutoff as u32)
    }

    /// Advance the cutoff; the pointer is monotonic and never regresses.
    pub fn advance_cutoff_tx(
        tx: &Transaction<'_>,
        wallet_id: i64,
        chain: ChainIndex,
        new_cutoff: u32,
    ) -> Result<()> {
        tx.execute(
            r#"
            UPDATE derivation_state
            SET cutoff_index = MAX(cutoff_index, ?3), updated_at = ?4
            WHERE wallet_id = ?1 AND chain = ?2
            "#,
            params![
                wallet_id,
                chain_as_str(chain),
                new_cutoff,
                chrono::Utc::now().timestamp(),
            ],
        )?;
        Ok(())
    }

    // ---- addresses ----

    /// Insert an address row
    #[allow(clippy::too_many_arguments)]
    pub fn insert_address_tx(
        tx: &Transaction<'_>,
        strategy: ConflictStrategy,
        wallet_id: i64,
        chain: ChainIndex,
        address_index: u32,
        address: &str,
        raw: &[u8],
        derivation_path: &str,
    ) -> Result<i64> {
        tx.execute(
            &format!(
                r#"
                {} INTO addresses
                    (wallet_id, chain, address_index, address, raw, derivation_path)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                strategy.insert_verb()
            ),
            params![
                wallet_id,
                chain_as_str(chain),
                address_index,
                address,
                raw,
                derivation_path
            ],
        )?;
        // With Ignore the row may predate this call; resolve the id either way.
        let id = tx.query_row(
            "SELECT id FROM addresses WHERE wallet_id = ?1 AND chain = ?2 AND address_index = ?3",
            params![wallet_id, chain_as_str(chain), address_index],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    fn address_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(AddressRow, String)> {
        let chain_text: String = row.get(2)?;
        Ok((
            AddressRow {
                id: row.get(0)?,
                wallet_id: row.get(1)?,
                chain: ChainIndex::External, // patched by caller from chain_text
                address_index: row.get(3)?,
                address: row.get(4)?,
                raw: row.get(5)?,
                derivation_path: row.get(6)?,
            },
            chain_text,
        ))
    }

    /// All addresses of a wallet, in (chain, index) order
    pub fn get_addresses(&self, wallet_id: i64) -> Result<Vec<AddressRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, wallet_id, chain, address_index, address, raw, derivation_path
            FROM addresses WHERE wallet_id = ?1
            ORDER BY chain, address_index
            "#,
        )?;
        let rows = stmt
            .query_map([wallet_id], Self::address_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(mut addr, chain_text)| {
                addr.chain = chain_from_str(&chain_text)?;
                Ok(addr)
            })
            .collect()
    }

    /// Addresses of one chain up to (excluding) the given index
    pub fn get_addresses_below(
        &self,
        wallet_id: i64,
        chain: ChainIndex,
        below_index: u32,
    ) -> Result<Vec<AddressRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, wallet_id, chain, address_index, address, raw, derivation_path
            FROM addresses
            WHERE wallet_id = ?1 AND chain = ?2 AND address_index < ?3
            ORDER BY address_index
            "#,
        )?;
        let rows = stmt
            .query_map(
                params![wallet_id, chain_as_str(chain), below_index],
                Self::address_from_row,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows
            .into_iter()
            .map(|(mut addr, _)| {
                addr.chain = chain;
                addr
            })
            .collect())
    }

    /// Map address text to owned-address row id for a wallet
    pub fn address_ids_by_text(&self, wallet_id: i64) -> Result<HashMap<String, i64>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT address, id FROM addresses WHERE wallet_id = ?1")?;
        let rows = stmt
            .query_map([wallet_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<std::result::Result<HashMap<_, _>, _>>()?;
        Ok(rows)
    }

    // ---- tokens ----

    /// Resolve or create a token row by content fingerprint, returning its id
    pub fn upsert_token_tx(
        tx: &Transaction<'_>,
        token: &TokenId,
        ticker: Option<&str>,
        decimals: u32,
        metadata_json: Option<&str>,
    ) -> Result<i64> {
        let fingerprint = token.fingerprint();
        let (policy, asset_name, is_default) = match token {
            TokenId::Default => (None, None, true),
            TokenId::Asset(asset) => {
                (Some(asset.policy.clone()), Some(asset.name.clone()), false)
            }
        };
        tx.execute(
            r#"
            INSERT INTO tokens (fingerprint, policy, asset_name, ticker, decimals, is_default, metadata_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(fingerprint) DO UPDATE SET
                ticker = COALESCE(excluded.ticker, ticker),
                decimals = MAX(decimals, excluded.decimals),
                metadata_json = COALESCE(excluded.metadata_json, metadata_json)
            "#,
            params![
                fingerprint.as_slice(),
                policy,
                asset_name,
                ticker,
                decimals,
                is_default,
                metadata_json
            ],
        )?;
        let id = tx.query_row(
            "SELECT id FROM tokens WHERE fingerprint = ?1",
            [fingerprint.as_slice()],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Get a token row by id
    pub fn get_token(&self, token_id: i64) -> Result<TokenRow> {
        self.conn()?
            .query_row(
                r#"
                SELECT id, fingerprint, policy, asset_name, ticker, decimals, is_default, metadata_json
                FROM tokens WHERE id = ?1
                "#,
                [token_id],
                |row| {
                    Ok(TokenRow {
                        id: row.get(0)?,
                        fingerprint: row.get(1)?,
                        policy: row.get(2)?,
                        asset_name: row.get(3)?,
                        ticker: row.get(4)?,
                        decimals: row.get(5)?,
                        is_default: row.get(6)?,
                        metadata_json: row.get(7)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| Error::NotFound(format!("token {token_id}")))
    }

    // ---- blocks ----

    /// Insert a block row, returning its id
    pub fn insert_block_tx(
        tx: &Transaction<'_>,
        strategy: ConflictStrategy,
        wallet_id: i64,
        hash: &[u8],
        height: u64,
        slot: u64,
        parent_hash: Option<&[u8]>,
    ) -> Result<i64> {
        tx.execute(
            &format!(
                r#"
                {} INTO blocks (wallet_id, hash, height, slot, parent_hash)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                strategy.insert_verb()
            ),
            params![wallet_id, hash, height as i64, slot as i64, parent_hash],
        )?;
        let id = tx.query_row(
            "SELECT id FROM blocks WHERE wallet_id = ?1 AND hash = ?2",
            params![wallet_id, hash],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Locally stored block hash at a height, if any
    pub fn get_block_hash_at_height(
        &self,
        wallet_id: i64,
        height: u64,
    ) -> Result<Option<Vec<u8>>> {
        let hash = self
            .conn()?
            .query_row(
                "SELECT hash FROM blocks WHERE wallet_id = ?1 AND height = ?2",
                params![wallet_id, height as i64],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hash)
    }

    /// Highest stored block strictly below a height (reorg walk-back)
    pub fn get_block_below(&self, wallet_id: i64, height: u64) -> Result<Option<BlockRow>> {
        let row = self
            .conn()?
            .query_row(
                r#"
                SELECT id, wallet_id, hash, height, slot, parent_hash
                FROM blocks
                WHERE wallet_id = ?1 AND height < ?2
                ORDER BY height DESC LIMIT 1
                "#,
                params![wallet_id, height as i64],
                |row| {
                    Ok(BlockRow {
                        id: row.get(0)?,
                        wallet_id: row.get(1)?,
                        hash: row.get(2)?,
                        height: row.get::<_, i64>(3)? as u64,
                        slot: row.get::<_, i64>(4)? as u64,
                        parent_hash: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    // ---- transactions ----

    /// Resolve or create a transaction row, deduplicated by (wallet, hash).
    ///
    /// Status moves forward only: a `Pending` row is upgraded when block
    /// metadata arrives, but an `InBlock` row is never demoted here (that
    /// requires an explicit rollback).
    pub fn upsert_transaction_tx(
        tx: &Transaction<'_>,
        wallet_id: i64,
        hash: &[u8],
        status: TxStatus,
        block_id: Option<i64>,
        tx_ordinal: Option<u32>,
        extra_json: Option<&str>,
    ) -> Result<i64> {
        let now = chrono::Utc::now().timestamp();
        let existing: Option<(i64, String, Option<i64>)> = tx
            .query_row(
                "SELECT id, status, block_id FROM transactions WHERE wallet_id = ?1 AND hash = ?2",
                params![wallet_id, hash],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        match existing {
            None => {
                tx.execute(
                    r#"
                    INSERT INTO transactions
                        (wallet_id, hash, status, block_id, tx_ordinal, last_update, extra_json)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                    "#,
                    params![
                        wallet_id,
                        hash,
                        status.as_str(),
                        block_id,
                        tx_ordinal,
                        now,
                        extra_json
                    ],
                )?;
                Ok(tx.last_insert_rowid())
            }
            Some((id, stored_status, stored_block)) => {
                let stored = TxStatus::parse(&stored_status)?;
                let demotion = stored == TxStatus::InBlock && status == TxStatus::Pending;
                let fills_block = block_id.is_some() && stored_block.is_none();
                // Re-observing an unchanged transaction must not touch the
                // row, so repeated cycles with no new data are no-ops.
                if !demotion && (stored != status || fills_block) {
                    tx.execute(
                        r#"
                        UPDATE transactions
                        SET status = ?2,
                            block_id = COALESCE(?3, block_id),
                            tx_ordinal = COALESCE(?4, tx_ordinal),
                            last_update = ?5,
                            extra_json = COALESCE(?6, extra_json)
                        WHERE id = ?1
                        "#,
                        params![id, status.as_str(), block_id, tx_ordinal, now, extra_json],
                    )?;
                }
                Ok(id)
            }
        }
    }

    /// Look up a transaction row id by hash
    pub fn find_transaction_id(&self, wallet_id: i64, hash: &[u8]) -> Result<Option<i64>> {
        let id = self
            .conn()?
            .query_row(
                "SELECT id FROM transactions WHERE wallet_id = ?1 AND hash = ?2",
                params![wallet_id, hash],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Transaction-id lookup inside an open unit of work
    pub fn find_transaction_id_tx(
        tx: &Transaction<'_>,
        wallet_id: i64,
        hash: &[u8],
    ) -> Result<Option<i64>> {
        let id = tx
            .query_row(
                "SELECT id FROM transactions WHERE wallet_id = ?1 AND hash = ?2",
                params![wallet_id, hash],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    fn transaction_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(TransactionRow, String)> {
        let status_text: String = row.get(3)?;
        Ok((
            TransactionRow {
                id: row.get(0)?,
                wallet_id: row.get(1)?,
                hash: row.get(2)?,
                status: TxStatus::Pending, // patched by caller
                block_id: row.get(4)?,
                tx_ordinal: row.get(5)?,
                last_update: row.get(6)?,
                extra_json: row.get(7)?,
            },
            status_text,
        ))
    }

    /// Transaction history for a wallet: in-block rows in chain order,
    /// then pending rows, then failed ones.
    pub fn get_transaction_history(&self, wallet_id: i64) -> Result<Vec<TransactionRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT t.id, t.wallet_id, t.hash, t.status, t.block_id, t.tx_ordinal,
                   t.last_update, t.extra_json
            FROM transactions t
            LEFT JOIN blocks b ON b.id = t.block_id
            WHERE t.wallet_id = ?1
            ORDER BY
                CASE t.status WHEN 'InBlock' THEN 0 WHEN 'Pending' THEN 1 ELSE 2 END,
                b.height, t.tx_ordinal, t.id
            "#,
        )?;
        let rows = stmt
            .query_map([wallet_id], Self::transaction_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(mut txn, status_text)| {
                txn.status = TxStatus::parse(&status_text)?;
                Ok(txn)
            })
            .collect()
    }

    // ---- outputs and inputs ----

    /// Insert an output row plus its per-token amounts, returning the row id
    #[allow(clippy::too_many_arguments)]
    pub fn insert_output_tx(
        tx: &Transaction<'_>,
        strategy: ConflictStrategy,
        tx_id: i64,
        output_index: u32,
        address: &str,
        address_id: Option<i64>,
        amounts: &[(i64, u64)],
    ) -> Result<i64> {
        tx.execute(
            &format!(
                r#"
                {} INTO tx_outputs (tx_id, output_index, address, address_id)
                VALUES (?1, ?2, ?3, ?4)
                "#,
                strategy.insert_verb()
            ),
            params![tx_id, output_index, address, address_id],
        )?;
        let output_id: i64 = tx.query_row(
            "SELECT id FROM tx_outputs WHERE tx_id = ?1 AND output_index = ?2",
            params![tx_id, output_index],
            |row| row.get(0),
        )?;
        for (token_row_id, amount) in amounts {
            tx.execute(
                r#"
                INSERT INTO tx_output_amounts (output_id, token_id, amount)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(output_id, token_id) DO UPDATE SET amount = excluded.amount
                "#,
                params![output_id, token_row_id, amount_to_column(*amount)?],
            )?;
        }
        Ok(output_id)
    }

    /// Insert an input row
    pub fn insert_input_tx(
        tx: &Transaction<'_>,
        strategy: ConflictStrategy,
        tx_id: i64,
        input_index: u32,
        source_tx_hash: &[u8],
        source_output_index: u32,
        resolved_output_id: Option<i64>,
    ) -> Result<i64> {
        tx.execute(
            &format!(
                r#"
                {} INTO tx_inputs
                    (tx_id, input_index, source_tx_hash, source_output_index, resolved_output_id)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                strategy.insert_verb()
            ),
            params![
                tx_id,
                input_index,
                source_tx_hash,
                source_output_index,
                resolved_output_id
            ],
        )?;
        let id = tx.query_row(
            "SELECT id FROM tx_inputs WHERE tx_id = ?1 AND input_index = ?2",
            params![tx_id, input_index],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Find an owned output row by its producing transaction hash and index
    pub fn find_output_tx(
        tx: &Transaction<'_>,
        wallet_id: i64,
        source_tx_hash: &[u8],
        output_index: u32,
    ) -> Result<Option<(i64, Option<i64>)>> {
        let row = tx
            .query_row(
                r#"
                SELECT o.id, o.spent_by_tx
                FROM tx_outputs o
                JOIN transactions t ON t.id = o.tx_id
                WHERE t.wallet_id = ?1 AND t.hash = ?2 AND o.output_index = ?3
                "#,
                params![wallet_id, source_tx_hash, output_index],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(row)
    }

    /// Mark an output spent by one transaction, exactly once.
    ///
    /// A second spender for the same output is a double-spend and fails
    /// with `ConstraintViolation`, aborting the surrounding transaction.
    pub fn mark_output_spent_tx(
        tx: &Transaction<'_>,
        output_id: i64,
        spending_tx_id: i64,
    ) -> Result<()> {
        let updated = tx.execute(
            "UPDATE tx_outputs SET spent_by_tx = ?2 WHERE id = ?1 AND spent_by_tx IS NULL",
            params![output_id, spending_tx_id],
        )?;
        if updated == 1 {
            return Ok(());
        }
        let current: Option<i64> = tx.query_row(
            "SELECT spent_by_tx FROM tx_outputs WHERE id = ?1",
            [output_id],
            |row| row.get(0),
        )?;
        match current {
            Some(existing) if existing == spending_tx_id => Ok(()),
            Some(existing) => Err(Error::ConstraintViolation(format!(
                "output {output_id} already spent by transaction {existing}"
            ))),
            None => Err(Error::NotFound(format!("output {output_id}"))),
        }
    }

    /// Map address text to owned-address row id inside an open unit of work
    pub fn address_ids_by_text_tx(
        tx: &Transaction<'_>,
        wallet_id: i64,
    ) -> Result<HashMap<String, i64>> {
        let mut stmt = tx.prepare("SELECT address, id FROM addresses WHERE wallet_id = ?1")?;
        let rows = stmt
            .query_map([wallet_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<std::result::Result<HashMap<_, _>, _>>()?;
        Ok(rows)
    }

    /// Insert a block row, verifying it agrees with any block already
    /// stored at that height. Disagreement is a mid-cycle chain
    /// divergence and aborts the surrounding transaction.
    pub fn insert_block_checked_tx(
        tx: &Transaction<'_>,
        wallet_id: i64,
        hash: &[u8],
        height: u64,
        slot: u64,
    ) -> Result<i64> {
        let stored: Option<Vec<u8>> = tx
            .query_row(
                "SELECT hash FROM blocks WHERE wallet_id = ?1 AND height = ?2",
                params![wallet_id, height as i64],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(existing) = stored {
            if existing != hash {
                return Err(Error::ConstraintViolation(format!(
                    "conflicting block hash at height {height}"
                )));
            }
        }
        Self::insert_block_tx(tx, ConflictStrategy::Ignore, wallet_id, hash, height, slot, None)
    }

    /// Fail pending transactions whose resolved inputs were spent by a
    /// different in-block transaction; they can never confirm. Returns
    /// the number of rows marked.
    pub fn fail_superseded_pending_tx(tx: &Transaction<'_>, wallet_id: i64) -> Result<usize> {
        let marked = tx.execute(
            r#"
            UPDATE transactions
            SET status = 'Failed', last_update = ?2
            WHERE wallet_id = ?1 AND status = 'Pending' AND id IN (
                SELECT i.tx_id FROM tx_inputs i
                JOIN tx_outputs o ON o.id = i.resolved_output_id
                WHERE o.spent_by_tx IS NOT NULL AND o.spent_by_tx != i.tx_id
            )
            "#,
            params![wallet_id, chrono::Utc::now().timestamp()],
        )?;
        Ok(marked)
    }

    /// Undo spent markers set by the given transactions (rollback path)
    pub fn unspend_outputs_spent_by_tx(
        tx: &Transaction<'_>,
        spending_tx_ids: &[i64],
    ) -> Result<usize> {
        let mut total = 0;
        for id in spending_tx_ids {
            total += tx.execute(
                "UPDATE tx_outputs SET spent_by_tx = NULL WHERE spent_by_tx = ?1",
                [id],
            )?;
        }
        Ok(total)
    }

    /// Unspent outputs owned by the wallet, with resolved token amounts
    pub fn get_unspent_outputs(&self, wallet_id: i64) -> Result<Vec<UtxoRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT o.id, o.tx_id, o.output_index, o.address, o.address_id,
                   t.hash, b.height
            FROM tx_outputs o
            JOIN transactions t ON t.id = o.tx_id
            LEFT JOIN blocks b ON b.id = t.block_id
            WHERE t.wallet_id = ?1
              AND o.spent_by_tx IS NULL
              AND o.address_id IS NOT NULL
              AND t.status != 'Failed'
            ORDER BY b.height, t.tx_ordinal, o.output_index
            "#,
        )?;
        let mut utxos: Vec<UtxoRow> = stmt
            .query_map([wallet_id], |row| {
                Ok(UtxoRow {
                    output: TxOutputRow {
                        id: row.get(0)?,
                        tx_id: row.get(1)?,
                        output_index: row.get(2)?,
                        address: row.get(3)?,
                        address_id: row.get(4)?,
                        spent_by_tx: None,
                    },
                    tx_hash: row.get(5)?,
                    block_height: row.get::<_, Option<i64>>(6)?.map(|h| h as u64),
                    amounts: MultiTokenValue::new(),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut amount_stmt = conn.prepare(
            r#"
            SELECT tok.is_default, tok.policy, tok.asset_name, a.amount
            FROM tx_output_amounts a
            JOIN tokens tok ON tok.id = a.token_id
            WHERE a.output_id = ?1
            "#,
        )?;
        for utxo in &mut utxos {
            let entries = amount_stmt
                .query_map([utxo.output.id], |row| {
                    Ok((
                        row.get::<_, bool>(0)?,
                        row.get::<_, Option<Vec<u8>>>(1)?,
                        row.get::<_, Option<Vec<u8>>>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            for (is_default, policy, asset_name, amount) in entries {
                let token = if is_default {
                    TokenId::Default
                } else {
                    TokenId::Asset(AssetId {
                        policy: policy.unwrap_or_default(),
                        name: asset_name.unwrap_or_default(),
                    })
                };
                utxo.amounts
                    .checked_add(token, amount_from_column(amount)?)
                    .map_err(|e| Error::Validation(e.to_string()))?;
            }
        }
        Ok(utxos)
    }
}
