//! Per-wallet transaction memos
//!
//! Memo rows are keyed by a salted digest of the transaction hash, not
//! the hash itself, so scanning the memo table does not reveal which
//! public transactions carry annotations without the per-wallet salt.
//! Content is sealed with ChaCha20-Poly1305 under a per-wallet key.

use crate::{Database, Error, Result};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use rusqlite::{params, OptionalExtension};
use sha2::{Digest, Sha256};

const SALT_LEN: usize = 32;
const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// A decrypted memo entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoEntry {
    /// Salted digest keying the row (not the raw transaction hash)
    pub digest: Vec<u8>,
    /// Memo text
    pub content: String,
    /// Last-updated timestamp (unix seconds)
    pub updated_at: i64,
}

/// Memo storage operations
pub struct MemoStore<'a> {
    db: &'a Database,
}

impl<'a> MemoStore<'a> {
    /// Create new memo storage
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Resolve the wallet's memo seed, creating one on first use
    fn seed_for(&self, wallet_id: i64) -> Result<(Vec<u8>, Vec<u8>)> {
        let conn = self.db.conn()?;
        let existing: Option<(Vec<u8>, Vec<u8>)> = conn
            .query_row(
                "SELECT salt, enc_key FROM memo_seeds WHERE wallet_id = ?1",
                [wallet_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        if let Some(seed) = existing {
            return Ok(seed);
        }

        let mut salt = vec![0u8; SALT_LEN];
        let mut key = vec![0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        rand::thread_rng().fill_bytes(&mut key);
        // A concurrent writer may have seeded first; keep whichever row won.
        conn.execute(
            "INSERT OR IGNORE INTO memo_seeds (wallet_id, salt, enc_key) VALUES (?1, ?2, ?3)",
            params![wallet_id, salt, key],
        )?;
        let seed = conn.query_row(
            "SELECT salt, enc_key FROM memo_seeds WHERE wallet_id = ?1",
            [wallet_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(seed)
    }

    /// Digest keying the memo row for a transaction hash
    pub fn digest(&self, wallet_id: i64, tx_hash: &[u8]) -> Result<Vec<u8>> {
        let (salt, _) = self.seed_for(wallet_id)?;
        Ok(digest_with_salt(tx_hash, &salt))
    }

    /// Insert or replace the memo for a transaction
    pub fn upsert_memo(&self, wallet_id: i64, tx_hash: &[u8], content: &str) -> Result<()> {
        let (salt, key) = self.seed_for(wallet_id)?;
        let digest = digest_with_salt(tx_hash, &salt);

        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce), content.as_bytes())
            .map_err(|e| Error::MemoEncryption(e.to_string()))?;

        self.db.conn()?.execute(
            r#"
            INSERT INTO memos (wallet_id, digest, content, nonce, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(wallet_id, digest) DO UPDATE SET
                content = excluded.content,
                nonce = excluded.nonce,
                updated_at = excluded.updated_at
            "#,
            params![
                wallet_id,
                digest,
                sealed,
                nonce.as_slice(),
                chrono::Utc::now().timestamp()
            ],
        )?;
        Ok(())
    }

    /// Fetch the memo for a transaction, if present
    pub fn get_memo(&self, wallet_id: i64, tx_hash: &[u8]) -> Result<Option<MemoEntry>> {
        let (salt, key) = self.seed_for(wallet_id)?;
        let digest = digest_with_salt(tx_hash, &salt);

        let row: Option<(Vec<u8>, Vec<u8>, i64)> = self
            .db
            .conn()?
            .query_row(
                "SELECT content, nonce, updated_at FROM memos WHERE wallet_id = ?1 AND digest = ?2",
                params![wallet_id, digest],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        match row {
            None => Ok(None),
            Some((sealed, nonce, updated_at)) => {
                let content = unseal(&key, &nonce, &sealed)?;
                Ok(Some(MemoEntry {
                    digest,
                    content,
                    updated_at,
                }))
            }
        }
    }

    /// Delete the memo for a transaction; returns whether a row existed
    pub fn delete_memo(&self, wallet_id: i64, tx_hash: &[u8]) -> Result<bool> {
        let (salt, _) = self.seed_for(wallet_id)?;
        let digest = digest_with_salt(tx_hash, &salt);
        let deleted = self.db.conn()?.execute(
            "DELETE FROM memos WHERE wallet_id = ?1 AND digest = ?2",
            params![wallet_id, digest],
        )?;
        Ok(deleted > 0)
    }

    /// All memos for a wallet, decrypted
    pub fn get_all_memos(&self, wallet_id: i64) -> Result<Vec<MemoEntry>> {
        let (_, key) = self.seed_for(wallet_id)?;
        let conn = self.db.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT digest, content, nonce, updated_at
            FROM memos WHERE wallet_id = ?1
            ORDER BY updated_at DESC
            "#,
        )?;
        let rows = stmt
            .query_map([wallet_id], |row| {
                Ok((
                    row.get::<_, Vec<u8>>(0)?,
                    row.get::<_, Vec<u8>>(1)?,
                    row.get::<_, Vec<u8>>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(digest, sealed, nonce, updated_at)| {
                Ok(MemoEntry {
                    digest,
                    content: unseal(&key, &nonce, &sealed)?,
                    updated_at,
                })
            })
            .collect()
    }
}

fn digest_with_salt(tx_hash: &[u8], salt: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(tx_hash);
    hasher.update(salt);
    hasher.finalize().to_vec()
}

fn unseal(key: &[u8], nonce: &[u8], sealed: &[u8]) -> Result<String> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let plain = cipher
        .decrypt(Nonce::from_slice(nonce), sealed)
        .map_err(|e| Error::MemoEncryption(e.to_string()))?;
    String::from_utf8(plain).map_err(|e| Error::MemoEncryption(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::Repository;

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
    fn test_memo_round_trip() {
        let (db, wallet) = test_db();
        let memos = MemoStore::new(&db);

        memos.upsert_memo(wallet, b"tx-hash-1", "rent payment").unwrap();
        let entry = memos.get_memo(wallet, b"tx-hash-1").unwrap().unwrap();
        assert_eq!(entry.content, "rent payment");
    }

    #[test]
    fn test_memo_addressable_without_raw_hash_key() {
        let (db, wallet) = test_db();
        let memos = MemoStore::new(&db);
        let tx_hash = b"tx-hash-1";

        memos.upsert_memo(wallet, tx_hash, "note").unwrap();

        let all = memos.get_all_memos(wallet).unwrap();
        assert_eq!(all.len(), 1);
        // The entry is addressable through the salted digest...
        let digest = memos.digest(wallet, tx_hash).unwrap();
        assert_eq!(all[0].digest, digest);
        assert_ne!(digest, tx_hash.to_vec());

        // ...and neither the raw hash nor the plaintext appears in the row.
        let (stored_digest, stored_content): (Vec<u8>, Vec<u8>) = db
            .conn()
            .unwrap()
            .query_row(
                "SELECT digest, content FROM memos WHERE wallet_id = ?1",
                [wallet],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_ne!(stored_digest, tx_hash.to_vec());
        assert_ne!(stored_content, b"note".to_vec());
    }

    #[test]
    fn test_memo_upsert_replaces() {
        let (db, wallet) = test_db();
        let memos = MemoStore::new(&db);
        memos.upsert_memo(wallet, b"tx", "first").unwrap();
        memos.upsert_memo(wallet, b"tx", "second").unwrap();

        let all = memos.get_all_memos(wallet).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].content, "second");
    }

    #[test]
    fn test_memo_delete() {
        let (db, wallet) = test_db();
        let memos = MemoStore::new(&db);
        memos.upsert_memo(wallet, b"tx", "gone soon").unwrap();
        assert!(memos.delete_memo(wallet, b"tx").unwrap());
        assert!(!memos.delete_memo(wallet, b"tx").unwrap());
        assert!(memos.get_memo(wallet, b"tx").unwrap().is_none());
    }

    #[test]
    fn test_salts_differ_per_wallet() {
        let (db, wallet_a) = test_db();
        let wallet_b = Repository::new(&db)
            .insert_wallet(
                "other",
                "Cardano",
                "Mainnet",
                "Cip1852",
                1,
                "BBBB-1111",
                &[2],
            )
            .unwrap();
        let memos = MemoStore::new(&db);
        let digest_a = memos.digest(wallet_a, b"tx").unwrap();
        let digest_b = memos.digest(wallet_b, b"tx").unwrap();
        assert_ne!(digest_a, digest_b);
    }
}
