use crate::core::merkle::calculate_merkle_root;
use crate::core::{ProofOfWork, Transaction};
use crate::error::{LedgerError, Result};
use crate::utils::{deserialize, serialize};
use serde::{Deserialize, Serialize};

/// A mined bundle of transactions, hash-linked to its predecessor.
///
/// An empty `prev_block_hash` marks the genesis block. The hash is the
/// proof-of-work digest over (merkle root, previous hash, nonce, difficulty)
/// and is set exactly once by mining; blocks are immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Block {
    hash: Vec<u8>,
    transactions: Vec<Transaction>,
    prev_block_hash: Vec<u8>,
    nonce: i64,
}

impl Block {
    /// Assemble and mine a block on top of `prev_block_hash`. A block must
    /// carry at least one transaction; a coinbase-only block is valid.
    pub fn new_block(prev_block_hash: Vec<u8>, transactions: &[Transaction]) -> Result<Block> {
        if transactions.is_empty() {
            return Err(LedgerError::InvalidBlock(
                "Block must contain at least one transaction".to_string(),
            ));
        }

        let mut block = Block {
            hash: vec![],
            transactions: transactions.to_vec(),
            prev_block_hash,
            nonce: 0,
        };

        let pow = ProofOfWork::new_proof_of_work(&block)?;
        let (nonce, hash) = pow.run()?;
        block.nonce = nonce;
        block.hash = hash;
        Ok(block)
    }

    /// The first block of a chain: a single coinbase and no predecessor.
    pub fn generate_genesis_block(coinbase: &Transaction) -> Result<Block> {
        Block::new_block(vec![], &[coinbase.clone()])
    }

    /// Merkle root over the ordered full serializations of the block's
    /// transactions.
    pub fn hash_transactions(&self) -> Result<Vec<u8>> {
        let serialized: Vec<Vec<u8>> = self
            .transactions
            .iter()
            .map(|tx| tx.serialize())
            .collect::<Result<_>>()?;
        calculate_merkle_root(&serialized)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Block> {
        deserialize::<Block>(bytes)
    }

    pub fn get_hash(&self) -> &[u8] {
        self.hash.as_slice()
    }

    pub fn get_prev_block_hash(&self) -> &[u8] {
        self.prev_block_hash.as_slice()
    }

    pub fn get_nonce(&self) -> i64 {
        self.nonce
    }

    pub fn get_transactions(&self) -> &[Transaction] {
        self.transactions.as_slice()
    }

    pub fn is_genesis(&self) -> bool {
        self.prev_block_hash.is_empty()
    }

    /// Build a block without mining it. Test-only: lets proof validation be
    /// exercised against deliberately inconsistent fields.
    #[cfg(test)]
    pub(crate) fn new_test_block(
        hash: Vec<u8>,
        transactions: &[Transaction],
        prev_block_hash: Vec<u8>,
        nonce: i64,
    ) -> Block {
        Block {
            hash,
            transactions: transactions.to_vec(),
            prev_block_hash,
            nonce,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::Wallet;

    fn coinbase() -> Transaction {
        let address = Wallet::new().unwrap().get_address();
        Transaction::new_coinbase_tx(&address, "").unwrap()
    }

    #[test]
    fn test_empty_block_is_rejected() {
        let result = Block::new_block(vec![], &[]);
        assert!(matches!(result, Err(LedgerError::InvalidBlock(_))));
    }

    #[test]
    fn test_genesis_block_shape() {
        let block = Block::generate_genesis_block(&coinbase()).unwrap();
        assert!(block.is_genesis());
        assert!(block.get_prev_block_hash().is_empty());
        assert_eq!(block.get_hash().len(), 32);
        assert_eq!(block.get_transactions().len(), 1);
    }

    #[test]
    fn test_serialize_round_trip() {
        let block = Block::generate_genesis_block(&coinbase()).unwrap();
        let bytes = block.serialize().unwrap();
        let decoded = Block::deserialize(&bytes).unwrap();

        assert_eq!(decoded.get_hash(), block.get_hash());
        assert_eq!(decoded.get_prev_block_hash(), block.get_prev_block_hash());
        assert_eq!(decoded.get_nonce(), block.get_nonce());
        assert_eq!(
            decoded.get_transactions()[0].get_id(),
            block.get_transactions()[0].get_id()
        );
    }

    #[test]
    fn test_deserialize_garbage_fails() {
        let result = Block::deserialize(&[0xDE, 0xAD, 0xBE, 0xEF]);
        assert!(matches!(result, Err(LedgerError::Serialization(_))));
    }

    #[test]
    fn test_merkle_root_changes_with_order() {
        let a = coinbase();
        let b = coinbase();
        let block_ab = Block::new_test_block(vec![], &[a.clone(), b.clone()], vec![], 0);
        let block_ba = Block::new_test_block(vec![], &[b, a], vec![], 0);
        assert_ne!(
            block_ab.hash_transactions().unwrap(),
            block_ba.hash_transactions().unwrap()
        );
    }
}
