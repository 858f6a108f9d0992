//! Per-wallet sync cursor and rollback truncation
//!
//! The cursor records the highest fully-synced block; truncation removes
//! every chain-derived row above a divergence height inside the caller's
//! transaction, undoing spent markers set by the removed transactions.

use crate::models::LastSyncInfo;
use crate::{Database, Result};
use rusqlite::{params, OptionalExtension, Transaction};

/// Sync cursor storage operations
pub struct LastSyncStorage<'a> {
    db: &'a Database,
}

impl<'a> LastSyncStorage<'a> {
    /// Create new sync cursor storage
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Load the cursor for a wallet
    pub fn load(&self, wallet_id: i64) -> Result<LastSyncInfo> {
        let row = self
            .db
            .conn()?
            .query_row(
                r#"
                SELECT block_hash, height, slot, time
                FROM last_sync_info WHERE wallet_id = ?1
                "#,
                [wallet_id],
                |row| {
                    Ok(LastSyncInfo {
                        block_hash: row.get(0)?,
                        height: row.get::<_, i64>(1)? as u64,
                        slot: row.get::<_, i64>(2)? as u64,
                        time: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(row.unwrap_or_default())
    }

    /// Save the cursor within a transaction
    pub fn save_tx(tx: &Transaction<'_>, wallet_id: i64, info: &LastSyncInfo) -> Result<()> {
        tx.execute(
            r#"
            INSERT INTO last_sync_info (wallet_id, block_hash, height, slot, time)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(wallet_id) DO UPDATE SET
                block_hash = excluded.block_hash,
                height = excluded.height,
                slot = excluded.slot,
                time = excluded.time
            "#,
            params![
                wallet_id,
                info.block_hash,
                info.height as i64,
                info.slot as i64,
                info.time
            ],
        )?;
        Ok(())
    }
}

/// Remove all chain-derived rows above `height` for one wallet.
///
/// Order matters: spent markers and input resolutions referencing doomed
/// rows are cleared first so the deletes cannot trip reference checks.
/// Returns the number of transactions removed. The cursor is rewound to
/// the retained tip. Address rows and cutoffs are untouched: addresses
/// are append-only and the cutoff never regresses.
pub fn truncate_above_height_tx(
    tx: &Transaction<'_>,
    wallet_id: i64,
    height: u64,
) -> Result<usize> {
    let height = height as i64;

    // Undo spent markers set by transactions that are about to go away.
    tx.execute(
        r#"
        UPDATE tx_outputs SET spent_by_tx = NULL
        WHERE spent_by_tx IN (
            SELECT t.id FROM transactions t
            JOIN blocks b ON b.id = t.block_id
            WHERE t.wallet_id = ?1 AND b.height > ?2
        )
        "#,
        params![wallet_id, height],
    )?;

    // Surviving (pending) inputs may resolve to doomed outputs.
    tx.execute(
        r#"
        UPDATE tx_inputs SET resolved_output_id = NULL
        WHERE resolved_output_id IN (
            SELECT o.id FROM tx_outputs o
            JOIN transactions t ON t.id = o.tx_id
            JOIN blocks b ON b.id = t.block_id
            WHERE t.wallet_id = ?1 AND b.height > ?2
        )
        "#,
        params![wallet_id, height],
    )?;

    let removed = tx.execute(
        r#"
        DELETE FROM transactions WHERE id IN (
            SELECT t.id FROM transactions t
            JOIN blocks b ON b.id = t.block_id
            WHERE t.wallet_id = ?1 AND b.height > ?2
        )
        "#,
        params![wallet_id, height],
    )?;

    tx.execute(
        "DELETE FROM blocks WHERE wallet_id = ?1 AND height > ?2",
        params![wallet_id, height],
    )?;

    // Rewind the cursor to the retained tip.
    let tip: Option<(Vec<u8>, i64, i64)> = tx
        .query_row(
            r#"
            SELECT hash, height, slot FROM blocks
            WHERE wallet_id = ?1
            ORDER BY height DESC LIMIT 1
            "#,
            [wallet_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;
    let (block_hash, tip_height, tip_slot) = match tip {
        Some((hash, h, s)) => (Some(hash), h, s),
        None => (None, 0, 0),
    };
    tx.execute(
        r#"
        UPDATE last_sync_info
        SET block_hash = ?2, height = ?3, slot = ?4, time = ?5
        WHERE wallet_id = ?1
        "#,
        params![
            wallet_id,
            block_hash,
            tip_height,
            tip_slot,
            chrono::Utc::now().timestamp()
        ],
    )?;

    if removed > 0 {
        tracing::info!(
            "Rolled back {} transactions above height {} for wallet {}",
            removed,
            height,
            wallet_id
        );
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TxStatus;
    use crate::repository::{ConflictStrategy, Repository};
    use crate::Database;
    use kabuto_core::{ChainIndex, TokenId};

    fn test_db() -> (Database, i64) {
        let db = Database::open_in_memory().unwrap();
        let id = Repository::new(&db)
            .insert_wallet(
                "test",
                "Cardano",
                "Mainnet",
                "Cip1852",
                0,
                "AAAA-0000",
                &[1],
            )
            .unwrap();
        (db, id)
    }

    #[test]
    fn test_cursor_round_trip() {
        let (mut db, wallet) = test_db();
        {
            let tx = db.transaction().unwrap();
            let info = LastSyncInfo {
                block_hash: Some(b"tip".to_vec()),
                height: 218_608,
                slot: 9_000,
                time: 1_700_000_000,
            };
            LastSyncStorage::save_tx(&tx, wallet, &info).unwrap();
            tx.commit().unwrap();
        }
        let info = LastSyncStorage::new(&db).load(wallet).unwrap();
        assert_eq!(info.height, 218_608);
        assert_eq!(info.block_hash.as_deref(), Some(b"tip".as_slice()));
    }

    #[test]
    fn test_default_cursor_for_fresh_wallet() {
        let (db, wallet) = test_db();
        let info = LastSyncStorage::new(&db).load(wallet).unwrap();
        assert_eq!(info.height, 0);
        assert!(info.block_hash.is_none());
    }

    #[test]
    fn test_truncate_reverts_spends_and_rewinds_cursor() {
        let (mut db, wallet) = test_db();

        {
            let tx = db.transaction().unwrap();
            let b1 = Repository::insert_block_tx(
                &tx,
                ConflictStrategy::Abort,
                wallet,
                b"hash-100",
                100,
                1_000,
                None,
            )
            .unwrap();
            let b2 = Repository::insert_block_tx(
                &tx,
                ConflictStrategy::Abort,
                wallet,
                b"hash-101",
                101,
                1_010,
                Some(b"hash-100"),
            )
            .unwrap();

            let addr = Repository::insert_address_tx(
                &tx,
                ConflictStrategy::Abort,
                wallet,
                ChainIndex::External,
                0,
                "addr1x",
                &[0],
                "m/1852'/1815'/0'/0/0",
            )
            .unwrap();
            let token =
                Repository::upsert_token_tx(&tx, &TokenId::Default, Some("ADA"), 6, None).unwrap();

            // t1 at height 100 creates an output; t2 at height 101 spends it.
            let t1 = Repository::upsert_transaction_tx(
                &tx,
                wallet,
                b"t1",
                TxStatus::InBlock,
                Some(b1),
                Some(0),
                None,
            )
            .unwrap();
            let out = Repository::insert_output_tx(
                &tx,
                ConflictStrategy::Abort,
                t1,
                0,
                "addr1x",
                Some(addr),
                &[(token, 2_100_000)],
            )
            .unwrap();
            let t2 = Repository::upsert_transaction_tx(
                &tx,
                wallet,
                b"t2",
                TxStatus::InBlock,
                Some(b2),
                Some(0),
                None,
            )
            .unwrap();
            Repository::insert_input_tx(
                &tx,
                ConflictStrategy::Abort,
                t2,
                0,
                b"t1",
                0,
                Some(out),
            )
            .unwrap();
            Repository::mark_output_spent_tx(&tx, out, t2).unwrap();

            LastSyncStorage::save_tx(
                &tx,
                wallet,
                &LastSyncInfo {
                    block_hash: Some(b"hash-101".to_vec()),
                    height: 101,
                    slot: 1_010,
                    time: 0,
                },
            )
            .unwrap();
            tx.commit().unwrap();
        }

        // Roll back everything above height 100.
        {
            let tx = db.transaction().unwrap();
            let removed = truncate_above_height_tx(&tx, wallet, 100).unwrap();
            assert_eq!(removed, 1);
            tx.commit().unwrap();
        }

        let repo = Repository::new(&db);
        let utxos = repo.get_unspent_outputs(wallet).unwrap();
        assert_eq!(utxos.len(), 1, "spent marker must be undone");
        assert_eq!(utxos[0].amounts.default_amount(), 2_100_000);

        let info = LastSyncStorage::new(&db).load(wallet).unwrap();
        assert_eq!(info.height, 100);
        assert_eq!(info.block_hash.as_deref(), Some(b"hash-100".as_slice()));
    }

    #[test]
    fn test_truncate_on_empty_wallet_is_noop() {
        let (mut db, wallet) = test_db();
        let tx = db.transaction().unwrap();
        assert_eq!(truncate_above_height_tx(&tx, wallet, 1_000).unwrap(), 0);
        tx.commit().unwrap();
    }
}
