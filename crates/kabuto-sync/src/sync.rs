//! Synchronization engine
//!
//! Brings the local store to agreement with the remote ledger for each
//! wallet's address set. One cycle scans the address frontier under the
//! gap limit, fetches the remote UTXO set and windowed history, repairs
//! chain reorganizations, and commits everything in a single store
//! transaction: either the whole cycle lands or none of it does.
//!
//! Cycles for the same wallet are serialized in issuance order; distinct
//! wallets sync concurrently. Remote I/O happens before the write
//! transaction opens, so abandoning a cycle at any await point is safe.

use crate::balance;
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::existence;
use crate::remote::{
    BlockRef, ChainBackend, RemoteBlockInfo, RemoteError, RemoteTransaction, RemoteUtxo,
};
use kabuto_core::{
    generate_address, plate_for_account, AccountDeriver, ChainIndex, MultiTokenValue, RootKey,
    TokenId,
};
use kabuto_params::{DerivationPurpose, Network};
use kabuto_storage_sqlite::models::{family_as_str, network_type_as_str, purpose_as_str};
use kabuto_storage_sqlite::rusqlite::Transaction;
use kabuto_storage_sqlite::{
    truncate_above_height_tx, ConflictStrategy, Database, LastSyncInfo, LastSyncStorage,
    MemoEntry, MemoStore, Repository, TransactionRow, TxStatus, UtxoRow,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

/// Engine tuning knobs
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Upper bound on gap-scan batches per chain per cycle
    pub max_scan_batches: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_scan_batches: 64,
        }
    }
}

/// Outcome of one committed sync cycle
#[derive(Debug, Clone, Default)]
pub struct SyncSummary {
    /// Transactions inserted or updated this cycle
    pub transactions_applied: usize,
    /// Transactions removed by reorg repair
    pub rolled_back: usize,
    /// Remote tip height at commit time
    pub tip_height: u64,
}

/// A freshly derived address pending persistence
struct DerivedSlot {
    chain: ChainIndex,
    index: u32,
    text: String,
    raw: Vec<u8>,
    path: String,
}

/// Result of scanning one chain's address frontier
struct ScanOutcome {
    new_slots: Vec<DerivedSlot>,
    new_cutoff: u32,
}

/// The synchronization engine.
///
/// Owns the store handle and the injected remote backend; wallet key
/// material is registered per session and never persisted here.
pub struct SyncEngine<B: ChainBackend> {
    db: AsyncMutex<Database>,
    backend: B,
    config: SyncConfig,
    derivers: parking_lot::RwLock<HashMap<i64, AccountDeriver>>,
    wallet_locks: parking_lot::Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>,
}

impl<B: ChainBackend> SyncEngine<B> {
    /// Create an engine over an open store and a remote backend
    pub fn new(db: Database, backend: B) -> Self {
        Self::with_config(db, backend, SyncConfig::default())
    }

    /// Create an engine with explicit tuning
    pub fn with_config(db: Database, backend: B, config: SyncConfig) -> Self {
        Self {
            db: AsyncMutex::new(db),
            backend,
            config,
            derivers: parking_lot::RwLock::new(HashMap::new()),
            wallet_locks: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    fn wallet_lock(&self, wallet_id: i64) -> Arc<AsyncMutex<()>> {
        let mut locks = self.wallet_locks.lock();
        locks
            .entry(wallet_id)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    fn deriver_for(&self, wallet_id: i64) -> Result<AccountDeriver> {
        self.derivers
            .read()
            .get(&wallet_id)
            .cloned()
            .ok_or(Error::DeriverNotRegistered(wallet_id))
    }

    /// Create a wallet from a recovery phrase.
    ///
    /// The duplicate check runs before any address scanning, so restoring
    /// an already-known wallet never spends network work.
    pub async fn create_wallet(
        &self,
        name: &str,
        phrase: &str,
        passphrase: &str,
        network: &Network,
        purpose: DerivationPurpose,
        account_index: u32,
    ) -> Result<i64> {
        let root = RootKey::from_mnemonic(phrase, passphrase)?;
        let deriver = root.derive_account(network, purpose, account_index)?;
        let plate = plate_for_account(&deriver);

        let wallet_id = {
            let db = self.db.lock().await;
            let repo = Repository::new(&db);
            if let Some(existing) =
                existence::find_match(&repo, &plate, &deriver, purpose, account_index)?
            {
                return Err(Error::DuplicateWallet {
                    wallet_id: existing.id,
                    name: existing.name,
                });
            }
            repo.insert_wallet(
                name,
                family_as_str(network.chain_family),
                network_type_as_str(network.network_type),
                purpose_as_str(purpose),
                account_index,
                &plate.text,
                &existence::deriver_material(&deriver),
            )?
        };

        self.derivers.write().insert(wallet_id, deriver);
        tracing::info!("Created wallet {} ({})", wallet_id, plate.text);
        Ok(wallet_id)
    }

    /// Register key material for a wallet restored in an earlier session
    pub fn register_deriver(&self, wallet_id: i64, deriver: AccountDeriver) {
        self.derivers.write().insert(wallet_id, deriver);
    }

    /// Check a candidate recovery phrase against stored wallets
    pub async fn find_existing_wallet(
        &self,
        phrase: &str,
        passphrase: &str,
        network: &Network,
        purpose: DerivationPurpose,
        account_index: u32,
    ) -> Result<Option<kabuto_storage_sqlite::WalletRow>> {
        let root = RootKey::from_mnemonic(phrase, passphrase)?;
        let deriver = root.derive_account(network, purpose, account_index)?;
        let plate = plate_for_account(&deriver);
        let db = self.db.lock().await;
        let repo = Repository::new(&db);
        Ok(existence::find_match(
            &repo,
            &plate,
            &deriver,
            purpose,
            account_index,
        )?)
    }

    /// Run one sync cycle for a wallet
    pub async fn sync(&self, wallet_id: i64) -> Result<SyncSummary> {
        self.sync_with_cancel(wallet_id, &CancelToken::new()).await
    }

    /// Run one sync cycle, abandoning cleanly if `cancel` fires
    pub async fn sync_with_cancel(
        &self,
        wallet_id: i64,
        cancel: &CancelToken,
    ) -> Result<SyncSummary> {
        // Per-wallet serialization; the queue is FIFO, so cycles commit
        // in issuance order and a late cycle can never resurrect state a
        // rollback already removed.
        let lock = self.wallet_lock(wallet_id);
        let _guard = lock.lock().await;

        let deriver = self.deriver_for(wallet_id)?;

        // Snapshot local state.
        let (cursor, existing_slots, cutoffs) = {
            let db = self.db.lock().await;
            let repo = Repository::new(&db);
            match repo.get_wallet(wallet_id) {
                Ok(_) => {}
                Err(kabuto_storage_sqlite::Error::NotFound(_)) => {
                    return Err(Error::WalletNotFound(wallet_id))
                }
                Err(e) => return Err(e.into()),
            }
            let cursor = LastSyncStorage::new(&db).load(wallet_id)?;
            let addresses = repo.get_addresses(wallet_id)?;
            let cutoffs = (
                repo.get_cutoff(wallet_id, ChainIndex::External)?,
                repo.get_cutoff(wallet_id, ChainIndex::Internal)?,
            );
            (cursor, addresses, cutoffs)
        };

        let mut known: HashMap<(ChainIndex, u32), String> = existing_slots
            .iter()
            .map(|a| ((a.chain, a.address_index), a.address.clone()))
            .collect();

        // Stage 1: extend the address frontier under the gap limit.
        let mut scans: Vec<(ChainIndex, ScanOutcome)> = Vec::new();
        for (chain, cutoff) in [
            (ChainIndex::External, cutoffs.0),
            (ChainIndex::Internal, cutoffs.1),
        ] {
            self.check_cancel(cancel)?;
            let outcome = self
                .scan_chain(&deriver, chain, cutoff, &mut known, cancel)
                .await?;
            scans.push((chain, outcome));
        }

        let all_addresses: Vec<String> = known.values().cloned().collect();

        // Stage 2: fetch the remote view.
        self.check_cancel(cancel)?;
        let best = self
            .backend
            .get_best_block()
            .await
            .map_err(remote_to_error)?;
        let utxos = self
            .backend
            .get_utxos_for_addresses(&all_addresses)
            .await
            .map_err(remote_to_error)?;

        // Stage 3: windowed history with reorg walk-back. A reference
        // rejection means our chain view diverged; step the reference
        // down our stored blocks until the remote accepts it, and
        // remember the divergence height for repair.
        let mut reference = cursor
            .block_hash
            .as_ref()
            .map(|hash| BlockRef {
                hash: hash.clone(),
                height: cursor.height,
            });
        let mut rollback_to: Option<u64> = None;
        let history = loop {
            self.check_cancel(cancel)?;
            match self
                .backend
                .get_transactions_history(&all_addresses, reference.clone())
                .await
            {
                Ok(txs) => break txs,
                Err(RemoteError::ReferenceBlockMismatch) => {
                    let ref_height = reference.as_ref().map(|r| r.height).unwrap_or(0);
                    tracing::warn!(
                        "Reorg detected for wallet {}: reference at height {} rejected",
                        wallet_id,
                        ref_height
                    );
                    let prev = {
                        let db = self.db.lock().await;
                        Repository::new(&db).get_block_below(wallet_id, ref_height)?
                    };
                    match prev {
                        Some(block) => {
                            rollback_to = Some(block.height);
                            reference = Some(BlockRef {
                                hash: block.hash,
                                height: block.height,
                            });
                        }
                        None => {
                            rollback_to = Some(0);
                            reference = None;
                        }
                    }
                }
                Err(e) => return Err(remote_to_error(e)),
            }
        };

        // Stage 4: token metadata for everything the fetch surfaced.
        let token_ids = collect_token_ids(&utxos, &history);
        let token_info = if token_ids.is_empty() {
            Vec::new()
        } else {
            self.backend
                .get_token_info(&token_ids)
                .await
                .map_err(remote_to_error)?
        };

        // Stage 5: apply everything in one store transaction.
        self.check_cancel(cancel)?;
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;

        let mut summary = SyncSummary {
            tip_height: best.height,
            ..SyncSummary::default()
        };

        if let Some(height) = rollback_to {
            summary.rolled_back = truncate_above_height_tx(&tx, wallet_id, height)?;
        }

        for (chain, outcome) in &scans {
            for slot in &outcome.new_slots {
                Repository::insert_address_tx(
                    &tx,
                    ConflictStrategy::Ignore,
                    wallet_id,
                    slot.chain,
                    slot.index,
                    &slot.text,
                    &slot.raw,
                    &slot.path,
                )?;
            }
            Repository::advance_cutoff_tx(&tx, wallet_id, *chain, outcome.new_cutoff)?;
        }

        let mut token_rows: HashMap<TokenId, i64> = HashMap::new();
        for info in &token_info {
            let metadata = info
                .metadata
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(kabuto_storage_sqlite::Error::from)?;
            let row = Repository::upsert_token_tx(
                &tx,
                &info.token,
                info.ticker.as_deref(),
                info.decimals,
                metadata.as_deref(),
            )?;
            token_rows.insert(info.token.clone(), row);
        }
        for token in &token_ids {
            if !token_rows.contains_key(token) {
                let row = Repository::upsert_token_tx(&tx, token, None, 0, None)?;
                token_rows.insert(token.clone(), row);
            }
        }

        let owned = Repository::address_ids_by_text_tx(&tx, wallet_id)?;

        for utxo in &utxos {
            summary.transactions_applied +=
                apply_utxo(&tx, wallet_id, utxo, &owned, &token_rows)?;
        }

        let mut ordered: Vec<&RemoteTransaction> = history.iter().collect();
        ordered.sort_by_key(|t| match &t.block {
            Some(b) => (0u8, b.height, b.tx_ordinal),
            None => (1u8, u64::MAX, u32::MAX),
        });
        for rtx in ordered {
            apply_history_transaction(&tx, wallet_id, rtx, &owned, &token_rows)?;
            summary.transactions_applied += 1;
        }

        Repository::fail_superseded_pending_tx(&tx, wallet_id)?;

        LastSyncStorage::save_tx(
            &tx,
            wallet_id,
            &LastSyncInfo {
                block_hash: Some(best.hash.clone()),
                height: best.height,
                slot: best.slot,
                time: best.time,
            },
        )?;

        tx.commit().map_err(kabuto_storage_sqlite::Error::from)?;

        tracing::info!(
            "Sync cycle for wallet {} committed: {} transactions, {} rolled back, tip {}",
            wallet_id,
            summary.transactions_applied,
            summary.rolled_back,
            summary.tip_height
        );
        Ok(summary)
    }

    /// Derive-and-check one chain in gap-sized batches. Scanning starts
    /// at the stored cutoff and stops after the first fully silent batch;
    /// the cutoff lands on the end of the last batch that showed use.
    async fn scan_chain(
        &self,
        deriver: &AccountDeriver,
        chain: ChainIndex,
        current_cutoff: u32,
        known: &mut HashMap<(ChainIndex, u32), String>,
        cancel: &CancelToken,
    ) -> Result<ScanOutcome> {
        let gap = deriver.network().gap_limit;
        let mut new_slots = Vec::new();
        let mut cutoff = current_cutoff;
        let mut batch_start = current_cutoff;

        for _ in 0..self.config.max_scan_batches {
            self.check_cancel(cancel)?;

            let mut batch_texts = Vec::with_capacity(gap as usize);
            for index in batch_start..batch_start.saturating_add(gap) {
                let text = match known.get(&(chain, index)) {
                    Some(text) => text.clone(),
                    None => {
                        let address = generate_address(deriver, chain, index)?;
                        let path = deriver.path_for(chain, index)?.to_string();
                        known.insert((chain, index), address.text.clone());
                        new_slots.push(DerivedSlot {
                            chain,
                            index,
                            text: address.text.clone(),
                            raw: address.raw,
                            path,
                        });
                        address.text
                    }
                };
                batch_texts.push(text);
            }

            let used = self
                .backend
                .check_addresses_in_use(&batch_texts)
                .await
                .map_err(remote_to_error)?;
            if used.is_empty() {
                break;
            }
            batch_start = batch_start.saturating_add(gap);
            cutoff = batch_start;
        }

        Ok(ScanOutcome {
            new_slots,
            new_cutoff: cutoff,
        })
    }

    fn check_cancel(&self, cancel: &CancelToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    // ---- read-side views ----

    /// Per-token balance over the wallet's unspent outputs
    pub async fn get_utxo_balance(&self, wallet_id: i64) -> Result<MultiTokenValue> {
        let db = self.db.lock().await;
        balance::utxo_balance(&db, wallet_id)
    }

    /// The wallet's unspent outputs
    pub async fn get_all_utxos(&self, wallet_id: i64) -> Result<Vec<UtxoRow>> {
        let db = self.db.lock().await;
        balance::all_utxos(&db, wallet_id)
    }

    /// The wallet's sync cursor
    pub async fn get_last_sync_info(&self, wallet_id: i64) -> Result<LastSyncInfo> {
        let db = self.db.lock().await;
        Ok(LastSyncStorage::new(&db).load(wallet_id)?)
    }

    /// Ordered transaction history view
    pub async fn get_transaction_history(&self, wallet_id: i64) -> Result<Vec<TransactionRow>> {
        let db = self.db.lock().await;
        Ok(Repository::new(&db).get_transaction_history(wallet_id)?)
    }

    /// Stored cutoff for one chain
    pub async fn get_cutoff(&self, wallet_id: i64, chain: ChainIndex) -> Result<u32> {
        let db = self.db.lock().await;
        Ok(Repository::new(&db).get_cutoff(wallet_id, chain)?)
    }

    // ---- memos ----

    /// Insert or replace the memo for a transaction
    pub async fn upsert_memo(&self, wallet_id: i64, tx_hash: &[u8], content: &str) -> Result<()> {
        let db = self.db.lock().await;
        Ok(MemoStore::new(&db).upsert_memo(wallet_id, tx_hash, content)?)
    }

    /// Delete the memo for a transaction
    pub async fn delete_memo(&self, wallet_id: i64, tx_hash: &[u8]) -> Result<bool> {
        let db = self.db.lock().await;
        Ok(MemoStore::new(&db).delete_memo(wallet_id, tx_hash)?)
    }

    /// Fetch one memo
    pub async fn get_memo(&self, wallet_id: i64, tx_hash: &[u8]) -> Result<Option<MemoEntry>> {
        let db = self.db.lock().await;
        Ok(MemoStore::new(&db).get_memo(wallet_id, tx_hash)?)
    }

    /// All memos for a wallet
    pub async fn get_all_memos(&self, wallet_id: i64) -> Result<Vec<MemoEntry>> {
        let db = self.db.lock().await;
        Ok(MemoStore::new(&db).get_all_memos(wallet_id)?)
    }
}

fn remote_to_error(e: RemoteError) -> Error {
    match e {
        RemoteError::Network(msg) => Error::RemoteFetch(msg),
        // A mismatch escaping the walk-back loop means the backend broke
        // its contract (rejected an empty reference).
        RemoteError::ReferenceBlockMismatch => {
            Error::RemoteFetch("reference rejected without a stored ancestor".to_string())
        }
    }
}

fn collect_token_ids(utxos: &[RemoteUtxo], history: &[RemoteTransaction]) -> Vec<TokenId> {
    let mut seen: HashSet<TokenId> = HashSet::new();
    for utxo in utxos {
        for entry in &utxo.amounts {
            seen.insert(entry.token.clone());
        }
    }
    for tx in history {
        for output in &tx.outputs {
            for entry in &output.amounts {
                seen.insert(entry.token.clone());
            }
        }
    }
    let mut ids: Vec<TokenId> = seen.into_iter().collect();
    ids.sort();
    ids
}

fn insert_block_checked(
    tx: &Transaction<'_>,
    wallet_id: i64,
    block: &RemoteBlockInfo,
) -> Result<i64> {
    Ok(Repository::insert_block_checked_tx(
        tx,
        wallet_id,
        &block.hash,
        block.height,
        block.slot,
    )?)
}

fn amounts_to_rows(
    amounts: &[crate::remote::RemoteTokenAmount],
    token_rows: &HashMap<TokenId, i64>,
) -> Result<Vec<(i64, u64)>> {
    amounts
        .iter()
        .map(|entry| {
            token_rows
                .get(&entry.token)
                .copied()
                .map(|row| (row, entry.amount))
                .ok_or_else(|| {
                    Error::Storage(kabuto_storage_sqlite::Error::NotFound(format!(
                        "token row for {}",
                        entry.token
                    )))
                })
        })
        .collect()
}

/// Record one remote UTXO: its producing transaction (deduplicated by
/// hash) and the output row with per-token amounts. Returns 1 when a new
/// transaction row was created.
fn apply_utxo(
    tx: &Transaction<'_>,
    wallet_id: i64,
    utxo: &RemoteUtxo,
    owned: &HashMap<String, i64>,
    token_rows: &HashMap<TokenId, i64>,
) -> Result<usize> {
    let existed = Repository::find_transaction_id_tx(tx, wallet_id, &utxo.tx_hash)?.is_some();

    let (status, block_id, ordinal) = match &utxo.block {
        Some(block) => {
            let block_row = insert_block_checked(tx, wallet_id, block)?;
            (TxStatus::InBlock, Some(block_row), Some(block.tx_ordinal))
        }
        None => (TxStatus::Pending, None, None),
    };
    let tx_row = Repository::upsert_transaction_tx(
        tx,
        wallet_id,
        &utxo.tx_hash,
        status,
        block_id,
        ordinal,
        None,
    )?;

    let address_id = owned.get(&utxo.receiver).copied();
    Repository::insert_output_tx(
        tx,
        ConflictStrategy::Ignore,
        tx_row,
        utxo.output_index,
        &utxo.receiver,
        address_id,
        &amounts_to_rows(&utxo.amounts, token_rows)?,
    )?;

    Ok(usize::from(!existed))
}

/// Record one history transaction: block placement, outputs, inputs, and
/// spent markers. Inputs spending outputs the wallet does not own are
/// recorded with only the owned side populated. Only in-block
/// transactions set spent markers; a pending spend is reflected once it
/// lands in a block.
fn apply_history_transaction(
    tx: &Transaction<'_>,
    wallet_id: i64,
    rtx: &RemoteTransaction,
    owned: &HashMap<String, i64>,
    token_rows: &HashMap<TokenId, i64>,
) -> Result<()> {
    let (status, block_id, ordinal) = match &rtx.block {
        Some(block) => {
            let block_row = insert_block_checked(tx, wallet_id, block)?;
            (TxStatus::InBlock, Some(block_row), Some(block.tx_ordinal))
        }
        None => (TxStatus::Pending, None, None),
    };

    let extra_json = rtx
        .extra
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(kabuto_storage_sqlite::Error::from)?;

    let tx_row = Repository::upsert_transaction_tx(
        tx,
        wallet_id,
        &rtx.hash,
        status,
        block_id,
        ordinal,
        extra_json.as_deref(),
    )?;

    for (index, output) in rtx.outputs.iter().enumerate() {
        let address_id = owned.get(&output.address).copied();
        Repository::insert_output_tx(
            tx,
            ConflictStrategy::Ignore,
            tx_row,
            index as u32,
            &output.address,
            address_id,
            &amounts_to_rows(&output.amounts, token_rows)?,
        )?;
    }

    for (index, input) in rtx.inputs.iter().enumerate() {
        let resolved = Repository::find_output_tx(
            tx,
            wallet_id,
            &input.source_tx_hash,
            input.source_output_index,
        )?;
        Repository::insert_input_tx(
            tx,
            ConflictStrategy::Ignore,
            tx_row,
            index as u32,
            &input.source_tx_hash,
            input.source_output_index,
            resolved.map(|(id, _)| id),
        )?;
        if status == TxStatus::InBlock {
            if let Some((output_id, _)) = resolved {
                Repository::mark_output_spent_tx(tx, output_id, tx_row)?;
            }
        }
    }

    Ok(())
}

/// A wallet façade binding one wallet id to its engine: the typed
/// capability surface handed to UI code.
pub struct WalletHandle<B: ChainBackend> {
    engine: Arc<SyncEngine<B>>,
    wallet_id: i64,
}

impl<B: ChainBackend> WalletHandle<B> {
    /// Bind a wallet id to an engine
    pub fn new(engine: Arc<SyncEngine<B>>, wallet_id: i64) -> Self {
        Self { engine, wallet_id }
    }

    /// Wallet row id
    pub fn wallet_id(&self) -> i64 {
        self.wallet_id
    }

    /// Run one sync cycle
    pub async fn sync(&self) -> Result<SyncSummary> {
        self.engine.sync(self.wallet_id).await
    }

    /// Per-token balance
    pub async fn utxo_balance(&self) -> Result<MultiTokenValue> {
        self.engine.get_utxo_balance(self.wallet_id).await
    }

    /// Unspent outputs
    pub async fn all_utxos(&self) -> Result<Vec<UtxoRow>> {
        self.engine.get_all_utxos(self.wallet_id).await
    }

    /// Sync cursor
    pub async fn last_sync_info(&self) -> Result<LastSyncInfo> {
        self.engine.get_last_sync_info(self.wallet_id).await
    }

    /// Transaction history view
    pub async fn transaction_history(&self) -> Result<Vec<TransactionRow>> {
        self.engine.get_transaction_history(self.wallet_id).await
    }

    /// Insert or replace a memo
    pub async fn upsert_memo(&self, tx_hash: &[u8], content: &str) -> Result<()> {
        self.engine
            .upsert_memo(self.wallet_id, tx_hash, content)
            .await
    }

    /// Delete a memo
    pub async fn delete_memo(&self, tx_hash: &[u8]) -> Result<bool> {
        self.engine.delete_memo(self.wallet_id, tx_hash).await
    }

    /// All memos
    pub async fn all_memos(&self) -> Result<Vec<MemoEntry>> {
        self.engine.get_all_memos(self.wallet_id).await
    }
}
