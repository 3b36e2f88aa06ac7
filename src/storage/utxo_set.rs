// Persisted unspent-output index. One keyed entry per transaction that still
// has unspent outputs, stored under a reserved prefix in the same store as
// the chain itself. Entries carry each output's original index within its
// transaction, so spends recorded later always reference the right slot.

use crate::core::{Block, Blockchain, TXOutput};
use crate::error::{LedgerError, Result};
use crate::utils::{deserialize, serialize};
use data_encoding::HEXLOWER;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Key prefix separating index entries from block records.
const UTXO_PREFIX: &[u8] = b"utxo-";

/// Keys removed per store batch during a reindex.
const DELETE_BATCH_SIZE: usize = 1000;

/// One still-unspent output with its index in the owning transaction's
/// output list.
#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct UnspentOutput {
    index: usize,
    output: TXOutput,
}

impl UnspentOutput {
    pub fn get_index(&self) -> usize {
        self.index
    }

    pub fn get_output(&self) -> &TXOutput {
        &self.output
    }
}

/// The stored value for one transaction id.
#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
struct UnspentOutputs {
    outputs: Vec<UnspentOutput>,
}

/// Read and write access to the unspent-output index of one chain.
pub struct UTXOSet {
    blockchain: Blockchain,
}

impl UTXOSet {
    pub fn new(blockchain: Blockchain) -> UTXOSet {
        UTXOSet { blockchain }
    }

    pub fn get_blockchain(&self) -> &Blockchain {
        &self.blockchain
    }

    fn utxo_key(txid_hex: &str) -> Vec<u8> {
        let mut key = UTXO_PREFIX.to_vec();
        key.extend_from_slice(txid_hex.as_bytes());
        key
    }

    /// Drop the whole index and rebuild it from a full chain scan. The result
    /// is identical to replaying `update` over every block since genesis.
    pub fn reindex(&self) -> Result<()> {
        let db = self.blockchain.get_db();

        let mut stale_keys = vec![];
        for entry in db.scan_prefix(UTXO_PREFIX) {
            let (key, _) = entry
                .map_err(|e| LedgerError::Database(format!("Failed to scan index: {e}")))?;
            stale_keys.push(key);
        }
        for chunk in stale_keys.chunks(DELETE_BATCH_SIZE) {
            let mut batch = sled::Batch::default();
            for key in chunk {
                batch.remove(key.as_ref());
            }
            db.apply_batch(batch)
                .map_err(|e| LedgerError::Database(format!("Failed to clear index: {e}")))?;
        }

        let utxo_map = self.blockchain.find_utxo()?;
        for (txid_hex, outs) in &utxo_map {
            let entry = UnspentOutputs {
                outputs: outs
                    .iter()
                    .map(|(index, output)| UnspentOutput {
                        index: *index,
                        output: output.clone(),
                    })
                    .collect(),
            };
            db.insert(Self::utxo_key(txid_hex), serialize(&entry)?)
                .map_err(|e| LedgerError::Database(format!("Failed to write index: {e}")))?;
        }

        info!("Reindexed {} transactions with unspent outputs", utxo_map.len());
        Ok(())
    }

    /// Fold one freshly mined block into the index: remove each output a
    /// spend consumes, drop entries that become empty, and add every output
    /// the block's transactions create. All writes land in one store
    /// transaction.
    pub fn update(&self, block: &Block) -> Result<()> {
        let db = self.blockchain.get_db();

        db.transaction(|tx_db| {
            for tx in block.get_transactions() {
                if !tx.is_coinbase() {
                    for input in tx.get_vin() {
                        let spent_key = Self::utxo_key(&HEXLOWER.encode(input.get_txid()));
                        let entry_bytes = tx_db.get(spent_key.as_slice())?.ok_or_else(|| {
                            sled::transaction::ConflictableTransactionError::Abort(format!(
                                "No index entry for spent transaction {}",
                                HEXLOWER.encode(input.get_txid())
                            ))
                        })?;
                        let mut entry: UnspentOutputs = deserialize(entry_bytes.as_ref())
                            .map_err(|e| {
                                sled::transaction::ConflictableTransactionError::Abort(
                                    e.to_string(),
                                )
                            })?;

                        let spent_index = input.get_vout();
                        entry
                            .outputs
                            .retain(|unspent| unspent.index as i64 != spent_index);

                        if entry.outputs.is_empty() {
                            tx_db.remove(spent_key.as_slice())?;
                        } else {
                            let bytes = serialize(&entry).map_err(|e| {
                                sled::transaction::ConflictableTransactionError::Abort(
                                    e.to_string(),
                                )
                            })?;
                            tx_db.insert(spent_key.as_slice(), bytes)?;
                        }
                    }
                }

                let fresh = UnspentOutputs {
                    outputs: tx
                        .get_vout()
                        .iter()
                        .enumerate()
                        .map(|(index, output)| UnspentOutput {
                            index,
                            output: output.clone(),
                        })
                        .collect(),
                };
                let bytes = serialize(&fresh).map_err(|e| {
                    sled::transaction::ConflictableTransactionError::Abort(e.to_string())
                })?;
                tx_db.insert(Self::utxo_key(&HEXLOWER.encode(tx.get_id())), bytes)?;
            }
            Ok(())
        })
        .map_err(|e: sled::transaction::TransactionError<String>| match e {
            sled::transaction::TransactionError::Abort(msg) => LedgerError::Database(msg),
            sled::transaction::TransactionError::Storage(e) => {
                LedgerError::Database(format!("Failed to update index: {e}"))
            }
        })?;

        Ok(())
    }

    /// Greedy coin selection: walk index entries accumulating outputs locked
    /// to `pub_key_hash` until `amount` is covered, returning the total
    /// gathered and the selected output indices grouped by transaction id.
    /// The accumulated value may still fall short; the caller decides whether
    /// that is an error.
    pub fn find_spendable_outputs(
        &self,
        pub_key_hash: &[u8],
        amount: u64,
    ) -> Result<(u64, HashMap<String, Vec<usize>>)> {
        let mut accumulated = 0;
        let mut spendable: HashMap<String, Vec<usize>> = HashMap::new();
        let db = self.blockchain.get_db();

        'scan: for entry in db.scan_prefix(UTXO_PREFIX) {
            let (key, value) = entry
                .map_err(|e| LedgerError::Database(format!("Failed to scan index: {e}")))?;
            let txid_hex = String::from_utf8(key[UTXO_PREFIX.len()..].to_vec())
                .map_err(|e| LedgerError::Database(format!("Corrupt index key: {e}")))?;
            let outs: UnspentOutputs = deserialize(value.as_ref())?;

            for unspent in &outs.outputs {
                if unspent.output.is_locked_with_key(pub_key_hash) {
                    accumulated += unspent.output.get_value();
                    spendable
                        .entry(txid_hex.clone())
                        .or_default()
                        .push(unspent.index);
                    if accumulated >= amount {
                        break 'scan;
                    }
                }
            }
        }
        Ok((accumulated, spendable))
    }

    /// All outputs in the index locked to `pub_key_hash`. Summing their
    /// values yields the address balance.
    pub fn find_unspent_outputs(&self, pub_key_hash: &[u8]) -> Result<Vec<TXOutput>> {
        let mut unspent = vec![];
        let db = self.blockchain.get_db();

        for entry in db.scan_prefix(UTXO_PREFIX) {
            let (_, value) = entry
                .map_err(|e| LedgerError::Database(format!("Failed to scan index: {e}")))?;
            let outs: UnspentOutputs = deserialize(value.as_ref())?;
            for item in outs.outputs {
                if item.output.is_locked_with_key(pub_key_hash) {
                    unspent.push(item.output);
                }
            }
        }
        Ok(unspent)
    }

    /// Number of transactions that still have at least one unspent output.
    pub fn count_transactions(&self) -> Result<usize> {
        let mut count = 0;
        for entry in self.blockchain.get_db().scan_prefix(UTXO_PREFIX) {
            entry.map_err(|e| LedgerError::Database(format!("Failed to scan index: {e}")))?;
            count += 1;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Transaction, SUBSIDY};
    use crate::wallet::{hash_pub_key, Wallet};
    use tempfile::tempdir;

    fn balance(utxo_set: &UTXOSet, pub_key_hash: &[u8]) -> u64 {
        utxo_set
            .find_unspent_outputs(pub_key_hash)
            .unwrap()
            .iter()
            .map(|out| out.get_value())
            .sum()
    }

    fn new_chain(dir: &tempfile::TempDir, address: &str) -> Blockchain {
        let path = dir.path().join("chain").to_string_lossy().to_string();
        Blockchain::create_blockchain_with_path(address, &path).unwrap()
    }

    #[test]
    fn test_reindex_from_genesis() {
        let dir = tempdir().unwrap();
        let wallet = Wallet::new().unwrap();
        let chain = new_chain(&dir, &wallet.get_address());
        let utxo_set = UTXOSet::new(chain);

        utxo_set.reindex().unwrap();

        let pub_key_hash = hash_pub_key(wallet.get_public_key());
        assert_eq!(balance(&utxo_set, &pub_key_hash), SUBSIDY);
        assert_eq!(utxo_set.count_transactions().unwrap(), 1);
    }

    #[test]
    fn test_reindex_is_idempotent() {
        let dir = tempdir().unwrap();
        let wallet = Wallet::new().unwrap();
        let chain = new_chain(&dir, &wallet.get_address());
        let utxo_set = UTXOSet::new(chain);

        utxo_set.reindex().unwrap();
        utxo_set.reindex().unwrap();

        let pub_key_hash = hash_pub_key(wallet.get_public_key());
        assert_eq!(balance(&utxo_set, &pub_key_hash), SUBSIDY);
        assert_eq!(utxo_set.count_transactions().unwrap(), 1);
    }

    #[test]
    fn test_find_spendable_outputs_short_accumulation() {
        let dir = tempdir().unwrap();
        let wallet = Wallet::new().unwrap();
        let chain = new_chain(&dir, &wallet.get_address());
        let utxo_set = UTXOSet::new(chain);
        utxo_set.reindex().unwrap();

        let pub_key_hash = hash_pub_key(wallet.get_public_key());
        let (accumulated, selected) = utxo_set
            .find_spendable_outputs(&pub_key_hash, SUBSIDY * 10)
            .unwrap();
        assert_eq!(accumulated, SUBSIDY);
        assert_eq!(selected.len(), 1);
    }

    #[test]
    fn test_spend_updates_index_and_balances() {
        let dir = tempdir().unwrap();
        let sender = Wallet::new().unwrap();
        let receiver = Wallet::new().unwrap();
        let miner = Wallet::new().unwrap();

        let chain = new_chain(&dir, &sender.get_address());
        let utxo_set = UTXOSet::new(chain);
        utxo_set.reindex().unwrap();

        let amount = 30;
        let spend =
            Transaction::new_utxo_transaction(&sender, &receiver.get_address(), amount, &utxo_set)
                .unwrap();
        let reward = Transaction::new_coinbase_tx(&miner.get_address(), "").unwrap();
        let block = utxo_set
            .get_blockchain()
            .mine_block(&[reward, spend])
            .unwrap();
        utxo_set.update(&block).unwrap();

        assert_eq!(
            balance(&utxo_set, &hash_pub_key(sender.get_public_key())),
            SUBSIDY - amount
        );
        assert_eq!(
            balance(&utxo_set, &hash_pub_key(receiver.get_public_key())),
            amount
        );
        assert_eq!(
            balance(&utxo_set, &hash_pub_key(miner.get_public_key())),
            SUBSIDY
        );
        // Genesis coinbase is fully spent: only the spend and the new
        // coinbase keep entries.
        assert_eq!(utxo_set.count_transactions().unwrap(), 2);
    }

    #[test]
    fn test_update_matches_reindex() {
        let dir = tempdir().unwrap();
        let sender = Wallet::new().unwrap();
        let receiver = Wallet::new().unwrap();

        let chain = new_chain(&dir, &sender.get_address());
        let utxo_set = UTXOSet::new(chain);
        utxo_set.reindex().unwrap();

        let spend =
            Transaction::new_utxo_transaction(&sender, &receiver.get_address(), 45, &utxo_set)
                .unwrap();
        let block = utxo_set.get_blockchain().mine_block(&[spend]).unwrap();
        utxo_set.update(&block).unwrap();

        let sender_hash = hash_pub_key(sender.get_public_key());
        let receiver_hash = hash_pub_key(receiver.get_public_key());
        let incremental = (
            balance(&utxo_set, &sender_hash),
            balance(&utxo_set, &receiver_hash),
            utxo_set.count_transactions().unwrap(),
        );

        utxo_set.reindex().unwrap();
        let rebuilt = (
            balance(&utxo_set, &sender_hash),
            balance(&utxo_set, &receiver_hash),
            utxo_set.count_transactions().unwrap(),
        );
        assert_eq!(incremental, rebuilt);
    }

    #[test]
    fn test_insufficient_funds() {
        let dir = tempdir().unwrap();
        let sender = Wallet::new().unwrap();
        let receiver = Wallet::new().unwrap();

        let chain = new_chain(&dir, &sender.get_address());
        let utxo_set = UTXOSet::new(chain);
        utxo_set.reindex().unwrap();

        let result = Transaction::new_utxo_transaction(
            &sender,
            &receiver.get_address(),
            SUBSIDY + 1,
            &utxo_set,
        );
        assert!(matches!(
            result,
            Err(LedgerError::InsufficientFunds {
                required: _,
                available: _
            })
        ));
    }

    #[test]
    fn test_tampered_signature_fails_verification() {
        let dir = tempdir().unwrap();
        let sender = Wallet::new().unwrap();
        let receiver = Wallet::new().unwrap();

        let chain = new_chain(&dir, &sender.get_address());
        let utxo_set = UTXOSet::new(chain);
        utxo_set.reindex().unwrap();

        let mut spend =
            Transaction::new_utxo_transaction(&sender, &receiver.get_address(), 10, &utxo_set)
                .unwrap();
        assert!(utxo_set.get_blockchain().verify_transaction(&spend).unwrap());

        spend.flip_signature_bit(0);
        assert!(!utxo_set.get_blockchain().verify_transaction(&spend).unwrap());
    }

    #[test]
    fn test_tampered_pub_key_fails_verification() {
        let dir = tempdir().unwrap();
        let sender = Wallet::new().unwrap();
        let receiver = Wallet::new().unwrap();

        let chain = new_chain(&dir, &sender.get_address());
        let utxo_set = UTXOSet::new(chain);
        utxo_set.reindex().unwrap();

        let mut spend =
            Transaction::new_utxo_transaction(&sender, &receiver.get_address(), 10, &utxo_set)
                .unwrap();
        spend.flip_pub_key_bit(0);
        assert!(!utxo_set.get_blockchain().verify_transaction(&spend).unwrap());
    }
}
