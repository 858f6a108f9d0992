//! Balance aggregation
//!
//! Pull-based projections over the row store: balances are recomputed
//! from the unspent-output set on every call, never read from a cached
//! aggregate, so they are correct from a cold start.

use crate::error::Result;
use kabuto_core::MultiTokenValue;
use kabuto_storage_sqlite::{Database, LastSyncStorage, Repository, UtxoRow};

/// Per-token balance over the wallet's unspent outputs.
///
/// The default token and other assets ride in the same value; callers
/// read them independently via `default_amount` and
/// `non_default_entries`.
pub fn utxo_balance(db: &Database, wallet_id: i64) -> Result<MultiTokenValue> {
    let repo = Repository::new(db);
    let mut total = MultiTokenValue::new();
    for utxo in repo.get_unspent_outputs(wallet_id)? {
        total.checked_merge(&utxo.amounts).map_err(|e| {
            kabuto_storage_sqlite::Error::Validation(format!("balance overflow: {e}"))
        })?;
    }
    Ok(total)
}

/// The wallet's current unspent outputs
pub fn all_utxos(db: &Database, wallet_id: i64) -> Result<Vec<UtxoRow>> {
    Ok(Repository::new(db).get_unspent_outputs(wallet_id)?)
}

/// The wallet's sync cursor
pub fn last_sync_info(db: &Database, wallet_id: i64) -> Result<kabuto_storage_sqlite::LastSyncInfo> {
    Ok(LastSyncStorage::new(db).load(wallet_id)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kabuto_core::{ChainIndex, TokenId};
    use kabuto_storage_sqlite::{ConflictStrategy, TxStatus};

    fn seeded_db() -> (Database, i64) {
        let db = Database::open_in_memory().unwrap();
        let wallet = Repository::new(&db)
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
        (db, wallet)
    }

    #[test]
    fn test_balance_sums_unspent_outputs() {
        let (mut db, wallet) = seeded_db();
        {
            let tx = db.transaction().unwrap();
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
            let night = Repository::upsert_token_tx(
                &tx,
                &TokenId::asset(vec![9u8; 28], b"NIGHT".to_vec()),
                Some("NIGHT"),
                6,
                None,
            )
            .unwrap();

            let t1 = Repository::upsert_transaction_tx(
                &tx,
                wallet,
                b"t1",
                TxStatus::Pending,
                None,
                None,
                None,
            )
            .unwrap();
            Repository::insert_output_tx(
                &tx,
                ConflictStrategy::Abort,
                t1,
                0,
                "addr1x",
                Some(addr),
                &[(token, 1_100_000), (night, 42)],
            )
            .unwrap();
            Repository::insert_output_tx(
                &tx,
                ConflictStrategy::Abort,
                t1,
                1,
                "addr1x",
                Some(addr),
                &[(token, 900_000)],
            )
            .unwrap();
            tx.commit().unwrap();
        }

        let balance = utxo_balance(&db, wallet).unwrap();
        assert_eq!(balance.default_amount(), 2_000_000);
        let non_default: Vec<_> = balance.non_default_entries().collect();
        assert_eq!(non_default.len(), 1);
        assert_eq!(non_default[0].1, 42);
    }

    #[test]
    fn test_empty_wallet_balance_is_zero() {
        let (db, wallet) = seeded_db();
        let balance = utxo_balance(&db, wallet).unwrap();
        assert_eq!(balance.default_amount(), 0);
        assert!(balance.is_empty());
        assert!(all_utxos(&db, wallet).unwrap().is_empty());
    }
}
