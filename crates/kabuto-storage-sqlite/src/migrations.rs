//! Database schema migrations

use crate::{Error, Result};
use rusqlite::Connection;

const SCHEMA_VERSION: i32 = 3;

/// Run all migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    tracing::debug!(
        "Running migrations: current_version={}, target_version={}",
        current_version,
        SCHEMA_VERSION
    );

    if current_version < 1 {
        migrate_v1(conn)?;
    }

    if current_version < 2 {
        migrate_v2(conn)?;
    }

    if current_version < 3 {
        migrate_v3(conn)?;
    }

    let final_version = get_schema_version(conn)?;
    if final_version != SCHEMA_VERSION {
        set_schema_version(conn, SCHEMA_VERSION)?;
    }

    Ok(())
}

fn get_schema_version(conn: &Connection) -> Result<i32> {
    let result = conn.query_row(
        "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
        [],
        |row| row.get(0),
    );

    match result {
        Ok(v) => Ok(v),
        Err(_) => Ok(0),
    }
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
        [],
    )?;

    // INSERT OR IGNORE keeps re-runs idempotent.
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    Ok(())
}

/// Wallet identity, derivation cutoffs, addresses, and the token registry.
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE wallets (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            chain_family TEXT NOT NULL CHECK (chain_family IN ('Cardano', 'Ergo')),
            network TEXT NOT NULL CHECK (network IN ('Mainnet', 'Testnet')),
            purpose TEXT NOT NULL CHECK (purpose IN ('Bip44', 'Cip1852')),
            account_index INTEGER NOT NULL,
            plate_text TEXT NOT NULL,
            public_deriver BLOB NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE INDEX idx_wallets_plate ON wallets(plate_text);

        -- Per-chain address-generation cutoff; advances monotonically.
        CREATE TABLE derivation_state (
            wallet_id INTEGER NOT NULL,
            chain TEXT NOT NULL CHECK (chain IN ('External', 'Internal')),
            cutoff_index INTEGER NOT NULL DEFAULT 0,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (wallet_id, chain),
            FOREIGN KEY (wallet_id) REFERENCES wallets(id) ON DELETE CASCADE
        );

        -- Append-only: address rows are never deleted, only superseded by
        -- the cutoff pointer.
        CREATE TABLE addresses (
            id INTEGER PRIMARY KEY,
            wallet_id INTEGER NOT NULL,
            chain TEXT NOT NULL CHECK (chain IN ('External', 'Internal')),
            address_index INTEGER NOT NULL,
            address TEXT NOT NULL,
            raw BLOB NOT NULL,
            derivation_path TEXT NOT NULL,
            UNIQUE (wallet_id, chain, address_index),
            FOREIGN KEY (wallet_id) REFERENCES wallets(id) ON DELETE CASCADE
        );

        CREATE INDEX idx_addresses_wallet ON addresses(wallet_id);
        CREATE INDEX idx_addresses_text ON addresses(address);

        -- Deduplicated by content fingerprint.
        CREATE TABLE tokens (
            id INTEGER PRIMARY KEY,
            fingerprint BLOB NOT NULL UNIQUE,
            policy BLOB,
            asset_name BLOB,
            ticker TEXT,
            decimals INTEGER NOT NULL DEFAULT 0,
            is_default BOOLEAN NOT NULL DEFAULT 0,
            metadata_json TEXT
        );
        "#,
    )
    .map_err(|e| Error::Migration(e.to_string()))?;

    Ok(())
}

/// Chain data: blocks, transactions, inputs/outputs, per-token amounts,
/// and the per-wallet sync cursor.
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE blocks (
            id INTEGER PRIMARY KEY,
            wallet_id INTEGER NOT NULL,
            hash BLOB NOT NULL,
            height INTEGER NOT NULL,
            slot INTEGER NOT NULL,
            parent_hash BLOB,
            UNIQUE (wallet_id, height),
            UNIQUE (wallet_id, hash),
            FOREIGN KEY (wallet_id) REFERENCES wallets(id) ON DELETE CASCADE
        );

        CREATE TABLE transactions (
            id INTEGER PRIMARY KEY,
            wallet_id INTEGER NOT NULL,
            hash BLOB NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('Pending', 'InBlock', 'Failed')),
            block_id INTEGER,
            tx_ordinal INTEGER,
            last_update INTEGER NOT NULL,
            extra_json TEXT,
            UNIQUE (wallet_id, hash),
            FOREIGN KEY (wallet_id) REFERENCES wallets(id) ON DELETE CASCADE,
            FOREIGN KEY (block_id) REFERENCES blocks(id) ON DELETE SET NULL
        );

        CREATE INDEX idx_transactions_wallet ON transactions(wallet_id);
        CREATE INDEX idx_transactions_status ON transactions(wallet_id, status);
        CREATE INDEX idx_transactions_block ON transactions(block_id);

        -- spent_by_tx is NULL until exactly one input claims the output.
        CREATE TABLE tx_outputs (
            id INTEGER PRIMARY KEY,
            tx_id INTEGER NOT NULL,
            output_index INTEGER NOT NULL,
            address TEXT NOT NULL,
            address_id INTEGER,
            spent_by_tx INTEGER,
            UNIQUE (tx_id, output_index),
            FOREIGN KEY (tx_id) REFERENCES transactions(id) ON DELETE CASCADE,
            FOREIGN KEY (address_id) REFERENCES addresses(id) ON DELETE SET NULL,
            FOREIGN KEY (spent_by_tx) REFERENCES transactions(id) ON DELETE SET NULL
        );

        CREATE INDEX idx_tx_outputs_tx ON tx_outputs(tx_id);
        CREATE INDEX idx_tx_outputs_address ON tx_outputs(address_id);
        CREATE INDEX idx_tx_outputs_spent ON tx_outputs(spent_by_tx);

        CREATE TABLE tx_output_amounts (
            output_id INTEGER NOT NULL,
            token_id INTEGER NOT NULL,
            amount INTEGER NOT NULL,
            PRIMARY KEY (output_id, token_id),
            FOREIGN KEY (output_id) REFERENCES tx_outputs(id) ON DELETE CASCADE,
            FOREIGN KEY (token_id) REFERENCES tokens(id)
        );

        -- resolved_output_id stays NULL for inputs spending outputs the
        -- wallet does not own.
        CREATE TABLE tx_inputs (
            id INTEGER PRIMARY KEY,
            tx_id INTEGER NOT NULL,
            input_index INTEGER NOT NULL,
            source_tx_hash BLOB NOT NULL,
            source_output_index INTEGER NOT NULL,
            resolved_output_id INTEGER,
            UNIQUE (tx_id, input_index),
            FOREIGN KEY (tx_id) REFERENCES transactions(id) ON DELETE CASCADE,
            FOREIGN KEY (resolved_output_id) REFERENCES tx_outputs(id) ON DELETE SET NULL
        );

        CREATE INDEX idx_tx_inputs_tx ON tx_inputs(tx_id);
        CREATE INDEX idx_tx_inputs_source ON tx_inputs(source_tx_hash, source_output_index);

        CREATE TABLE last_sync_info (
            wallet_id INTEGER PRIMARY KEY,
            block_hash BLOB,
            height INTEGER NOT NULL DEFAULT 0,
            slot INTEGER NOT NULL DEFAULT 0,
            time INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY (wallet_id) REFERENCES wallets(id) ON DELETE CASCADE
        );
        "#,
    )
    .map_err(|e| Error::Migration(e.to_string()))?;

    Ok(())
}

/// Memo storage: per-wallet digest salt and sealing key, memo rows keyed
/// by salted digest rather than the raw transaction hash.
fn migrate_v3(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE memo_seeds (
            wallet_id INTEGER PRIMARY KEY,
            salt BLOB NOT NULL,
            enc_key BLOB NOT NULL,
            FOREIGN KEY (wallet_id) REFERENCES wallets(id) ON DELETE CASCADE
        );

        CREATE TABLE memos (
            wallet_id INTEGER NOT NULL,
            digest BLOB NOT NULL,
            content BLOB NOT NULL,
            nonce BLOB NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (wallet_id, digest),
            FOREIGN KEY (wallet_id) REFERENCES wallets(id) ON DELETE CASCADE
        );
        "#,
    )
    .map_err(|e| Error::Migration(e.to_string()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        conn
    }

    #[test]
    fn test_migrations_run_from_empty() {
        let conn = fresh_conn();
        run_migrations(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_migrations_idempotent() {
        let conn = fresh_conn();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_all_tables_exist() {
        let conn = fresh_conn();
        run_migrations(&conn).unwrap();
        for table in [
            "wallets",
            "derivation_state",
            "addresses",
            "tokens",
            "blocks",
            "transactions",
            "tx_outputs",
            "tx_output_amounts",
            "tx_inputs",
            "last_sync_info",
            "memo_seeds",
            "memos",
        ] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "missing table {table}");
        }
    }
}
