//! Database connection and initialization

use crate::{migrations, Error, Result};
use rusqlite::{Connection, OpenFlags};
use std::path::Path;

/// Database connection wrapper.
///
/// Opening runs migrations before any other operation; a closed handle
/// rejects every subsequent call with `StoreClosed`.
pub struct Database {
    conn: Option<Connection>,
}

impl Database {
    /// Open (or create) an on-disk database
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Self::init(conn)
    }

    /// Open an in-memory database (tests and ephemeral sessions)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;",
        )?;

        migrations::run_migrations(&conn)?;

        Ok(Self { conn: Some(conn) })
    }

    /// Get the live connection
    pub fn conn(&self) -> Result<&Connection> {
        self.conn.as_ref().ok_or(Error::StoreClosed)
    }

    /// Begin a unit of work; commit or nothing
    pub fn transaction(&mut self) -> Result<rusqlite::Transaction<'_>> {
        let conn = self.conn.as_mut().ok_or(Error::StoreClosed)?;
        Ok(conn.transaction()?)
    }

    /// Tear down the connection. Later calls fail with `StoreClosed`.
    pub fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            // close() hands the connection back on failure; drop it anyway.
            if let Err((_conn, e)) = conn.close() {
                tracing::warn!("Error closing database: {}", e);
            }
        }
    }

    /// Whether the handle is still usable
    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_open_database() {
        let file = NamedTempFile::new().unwrap();
        let result = Database::open(file.path());
        assert!(result.is_ok());
    }

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.is_open());
    }

    #[test]
    fn test_reopen_preserves_schema() {
        let file = NamedTempFile::new().unwrap();
        {
            let db = Database::open(file.path()).unwrap();
            db.conn()
                .unwrap()
                .execute(
                    "INSERT INTO wallets (name, chain_family, network, purpose, account_index,
                     plate_text, public_deriver, created_at)
                     VALUES ('w', 'Cardano', 'Mainnet', 'Cip1852', 0, 'AAAA-0000', x'00', 0)",
                    [],
                )
                .unwrap();
        }
        // Re-running migrations on an up-to-date file must be a no-op.
        let db = Database::open(file.path()).unwrap();
        let count: i64 = db
            .conn()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM wallets", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_closed_handle_fails_with_store_closed() {
        let mut db = Database::open_in_memory().unwrap();
        db.close();
        assert!(!db.is_open());
        assert!(matches!(db.conn(), Err(Error::StoreClosed)));
        assert!(matches!(db.transaction(), Err(Error::StoreClosed)));
    }

    #[test]
    fn test_foreign_keys_enforced() {
        let db = Database::open_in_memory().unwrap();
        let result = db.conn().unwrap().execute(
            "INSERT INTO addresses (wallet_id, chain, address_index, address, raw, derivation_path)
             VALUES (999, 'External', 0, 'addr1x', x'00', 'm/0')",
            [],
        );
        assert!(result.is_err());
    }
}
