// The persisted chain: an append-only sequence of blocks keyed by hash in
// the embedded store, plus the movable tip pointer. Sled's default tree is
// the single keyspace; block writes and tip writes share one store
// transaction so a crash can never leave a dangling tip.

use crate::config::GLOBAL_CONFIG;
use crate::core::{Block, ProofOfWork, TXOutput, Transaction};
use crate::error::{LedgerError, Result};
use data_encoding::HEXLOWER;
use log::info;
use sled::Db;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

/// Reserved store key holding the hash of the most recent block.
const TIP_BLOCK_HASH_KEY: &str = "lh";

const GENESIS_MEMO: &str = "First Transaction from Genesis";

/// Handle to one persisted ledger. The tip lives on the handle rather than
/// in process-wide state; every operation opens and releases its own store
/// scope.
#[derive(Clone)]
pub struct Blockchain {
    tip_hash: Arc<RwLock<Vec<u8>>>,
    db: Db,
    db_path: PathBuf,
}

impl Blockchain {
    /// Create a brand-new chain at the configured data directory, minting
    /// the genesis coinbase to `genesis_address`.
    pub fn create_blockchain(genesis_address: &str) -> Result<Blockchain> {
        Self::create_blockchain_with_path(genesis_address, &GLOBAL_CONFIG.get_data_dir())
    }

    /// Create a brand-new chain at `db_path`. Fails with `AlreadyExists`
    /// when a persisted chain is already present there.
    pub fn create_blockchain_with_path(genesis_address: &str, db_path: &str) -> Result<Blockchain> {
        let path = PathBuf::from(db_path);
        let db = sled::open(&path)
            .map_err(|e| LedgerError::Database(format!("Failed to open database: {e}")))?;

        if db
            .get(TIP_BLOCK_HASH_KEY)
            .map_err(|e| LedgerError::Database(format!("Failed to read tip hash: {e}")))?
            .is_some()
        {
            return Err(LedgerError::AlreadyExists(db_path.to_string()));
        }

        info!("Creating genesis block for address: {genesis_address}");
        let coinbase_tx = Transaction::new_coinbase_tx(genesis_address, GENESIS_MEMO)?;
        let genesis = Block::generate_genesis_block(&coinbase_tx)?;
        Self::persist_block(&db, &genesis)?;
        info!("Genesis created: {}", HEXLOWER.encode(genesis.get_hash()));

        Ok(Blockchain {
            tip_hash: Arc::new(RwLock::new(genesis.get_hash().to_vec())),
            db,
            db_path: path,
        })
    }

    /// Reopen the chain at the configured data directory.
    pub fn open_blockchain() -> Result<Blockchain> {
        Self::open_blockchain_with_path(&GLOBAL_CONFIG.get_data_dir())
    }

    /// Reopen an existing chain. Fails with `NotFound` when no persisted
    /// chain exists at `db_path`.
    pub fn open_blockchain_with_path(db_path: &str) -> Result<Blockchain> {
        let path = PathBuf::from(db_path);
        let db = sled::open(&path)
            .map_err(|e| LedgerError::Database(format!("Failed to open database: {e}")))?;

        let tip_bytes = db
            .get(TIP_BLOCK_HASH_KEY)
            .map_err(|e| LedgerError::Database(format!("Failed to read tip hash: {e}")))?
            .ok_or_else(|| {
                LedgerError::NotFound(format!("No existing chain at {db_path}, create one first"))
            })?;

        Ok(Blockchain {
            tip_hash: Arc::new(RwLock::new(tip_bytes.to_vec())),
            db,
            db_path: path,
        })
    }

    /// Block write and tip write, committed as one unit.
    fn persist_block(db: &Db, block: &Block) -> Result<()> {
        let block_hash = block.get_hash().to_vec();
        let block_data = block.serialize()?;

        db.transaction(|tx_db| {
            tx_db.insert(block_hash.as_slice(), block_data.as_slice())?;
            tx_db.insert(TIP_BLOCK_HASH_KEY, block_hash.as_slice())?;
            Ok(())
        })
        .map_err(|e: sled::transaction::TransactionError| {
            LedgerError::Database(format!("Failed to persist block: {e}"))
        })?;

        Ok(())
    }

    /// Mine a new block carrying `transactions` on top of the current tip,
    /// persist it, and advance the tip. Every transaction is verified and
    /// intra-block double spends are rejected before any mining work starts.
    pub fn mine_block(&self, transactions: &[Transaction]) -> Result<Block> {
        for (i, transaction) in transactions.iter().enumerate() {
            if !self.verify_transaction(transaction)? {
                return Err(LedgerError::Transaction(format!(
                    "Invalid transaction at index {i}"
                )));
            }
        }
        Self::check_for_double_spending(transactions)?;

        let block = Block::new_block(self.get_tip_hash(), transactions)?;
        Self::persist_block(&self.db, &block)?;
        self.set_tip_hash(block.get_hash());

        info!(
            "Mined block {} with {} transactions",
            HEXLOWER.encode(block.get_hash()),
            transactions.len()
        );
        Ok(block)
    }

    // The same prior output must not be referenced twice within one block;
    // each spend consumes an unspent output exactly once.
    fn check_for_double_spending(transactions: &[Transaction]) -> Result<()> {
        let mut spent_outputs: HashSet<(Vec<u8>, i64)> = HashSet::new();

        for transaction in transactions {
            if transaction.is_coinbase() {
                continue;
            }
            for input in transaction.get_vin() {
                let reference = (input.get_txid().to_vec(), input.get_vout());
                if !spent_outputs.insert(reference) {
                    return Err(LedgerError::Transaction(format!(
                        "Double spend within block: output {}:{} referenced twice",
                        HEXLOWER.encode(input.get_txid()),
                        input.get_vout()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Cursor over the chain from the tip back to genesis.
    pub fn iterator(&self) -> ChainIterator {
        ChainIterator::new(self.get_tip_hash(), self.db.clone())
    }

    /// Reverse-scan the chain for a transaction by id.
    pub fn find_transaction(&self, txid: &[u8]) -> Result<Transaction> {
        let mut iterator = self.iterator();
        while let Some(block) = iterator.next_block()? {
            for transaction in block.get_transactions() {
                if transaction.get_id().eq(txid) {
                    return Ok(transaction.clone());
                }
            }
        }
        Err(LedgerError::TransactionNotFound(HEXLOWER.encode(txid)))
    }

    /// Ground-truth unspent-output computation: one reverse full-chain scan
    /// recording, per transaction id, the outputs (with their original
    /// indices) never referenced by any spending input. The UTXO index's
    /// reindex persists exactly this result.
    pub fn find_utxo(&self) -> Result<HashMap<String, Vec<(usize, TXOutput)>>> {
        let mut utxo: HashMap<String, Vec<(usize, TXOutput)>> = HashMap::new();
        let mut spent_txos: HashMap<String, Vec<i64>> = HashMap::new();

        let mut iterator = self.iterator();
        while let Some(block) = iterator.next_block()? {
            for tx in block.get_transactions() {
                let txid_hex = HEXLOWER.encode(tx.get_id());

                for (idx, out) in tx.get_vout().iter().enumerate() {
                    let spent = spent_txos
                        .get(txid_hex.as_str())
                        .is_some_and(|outs| outs.contains(&(idx as i64)));
                    if !spent {
                        utxo.entry(txid_hex.clone())
                            .or_default()
                            .push((idx, out.clone()));
                    }
                }

                if tx.is_coinbase() {
                    continue;
                }
                for txin in tx.get_vin() {
                    spent_txos
                        .entry(HEXLOWER.encode(txin.get_txid()))
                        .or_default()
                        .push(txin.get_vout());
                }
            }
        }
        Ok(utxo)
    }

    /// Resolve each input's prior transaction and sign every input.
    pub fn sign_transaction(&self, tx: &mut Transaction, pkcs8: &[u8]) -> Result<()> {
        let prev_txs = self.resolve_prior_transactions(tx)?;
        tx.sign(pkcs8, &prev_txs)
    }

    /// Resolve each input's prior transaction and verify every input.
    pub fn verify_transaction(&self, tx: &Transaction) -> Result<bool> {
        if tx.is_coinbase() {
            return Ok(true);
        }
        let prev_txs = self.resolve_prior_transactions(tx)?;
        tx.verify(&prev_txs)
    }

    fn resolve_prior_transactions(&self, tx: &Transaction) -> Result<HashMap<String, Transaction>> {
        let mut prev_txs = HashMap::new();
        for input in tx.get_vin() {
            let prev_tx = self.find_transaction(input.get_txid()).map_err(|e| match e {
                LedgerError::TransactionNotFound(id) => LedgerError::MissingPriorTransaction(id),
                other => other,
            })?;
            prev_txs.insert(HEXLOWER.encode(prev_tx.get_id()), prev_tx);
        }
        Ok(prev_txs)
    }

    pub fn get_tip_hash(&self) -> Vec<u8> {
        self.tip_hash
            .read()
            .expect("Failed to acquire read lock on tip hash")
            .clone()
    }

    fn set_tip_hash(&self, new_tip_hash: &[u8]) {
        let mut tip_hash = self
            .tip_hash
            .write()
            .expect("Failed to acquire write lock on tip hash");
        *tip_hash = new_tip_hash.to_vec();
    }

    pub fn get_db(&self) -> &Db {
        &self.db
    }

    pub fn get_db_path(&self) -> &PathBuf {
        &self.db_path
    }
}

/// Newest-to-oldest cursor. `next_block` yields `None` exactly once the
/// genesis block has been returned, so callers never probe for a
/// non-existent predecessor.
pub struct ChainIterator {
    db: Db,
    current_hash: Option<Vec<u8>>,
}

impl ChainIterator {
    fn new(tip_hash: Vec<u8>, db: Db) -> ChainIterator {
        ChainIterator {
            current_hash: Some(tip_hash),
            db,
        }
    }

    /// Load, proof-validate, and decode the block at the cursor, then move
    /// the cursor to its predecessor. A block failing proof-of-work
    /// validation surfaces `InvalidProof` rather than being accepted.
    pub fn next_block(&mut self) -> Result<Option<Block>> {
        let current_hash = match self.current_hash.take() {
            Some(hash) => hash,
            None => return Ok(None),
        };

        let block_bytes = self
            .db
            .get(current_hash.as_slice())
            .map_err(|e| LedgerError::Database(format!("Failed to load block: {e}")))?
            .ok_or_else(|| {
                LedgerError::NotFound(format!(
                    "Block {} not present in store",
                    HEXLOWER.encode(current_hash.as_slice())
                ))
            })?;
        let block = Block::deserialize(block_bytes.as_ref())?;

        if !ProofOfWork::validate(&block)? {
            return Err(LedgerError::InvalidProof(HEXLOWER.encode(block.get_hash())));
        }

        self.current_hash = if block.is_genesis() {
            None
        } else {
            Some(block.get_prev_block_hash().to_vec())
        };
        Ok(Some(block))
    }
}
