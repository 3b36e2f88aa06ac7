use crate::config::GLOBAL_CONFIG;
use crate::core::Block;
use crate::error::{LedgerError, Result};
use crate::utils::sha256_digest;
use data_encoding::HEXLOWER;
use log::info;
use num_bigint::{BigInt, Sign};
use std::ops::ShlAssign;
use std::sync::atomic::{AtomicBool, Ordering};

const MAX_NONCE: i64 = i64::MAX;

/// Nonce search and re-validation against a fixed difficulty target.
///
/// The search is expensive and the check is O(1); that asymmetry is the
/// admission control for new blocks. Any mutation of committed transaction
/// data changes the Merkle root and invalidates the stored nonce.
pub struct ProofOfWork {
    merkle_root: Vec<u8>,
    prev_block_hash: Vec<u8>,
    target: BigInt,
    difficulty: u64,
}

impl ProofOfWork {
    pub fn new_proof_of_work(block: &Block) -> Result<ProofOfWork> {
        let difficulty = GLOBAL_CONFIG.get_mining_difficulty();
        let mut target = BigInt::from(1);
        target.shl_assign(256 - difficulty as usize);
        Ok(ProofOfWork {
            merkle_root: block.hash_transactions()?,
            prev_block_hash: block.get_prev_block_hash().to_vec(),
            target,
            difficulty,
        })
    }

    /// Re-check a block's stored proof: the recorded hash must equal the
    /// digest recomputed at the stored nonce, and that digest must fall
    /// strictly below the target.
    pub fn validate(block: &Block) -> Result<bool> {
        let pow = ProofOfWork::new_proof_of_work(block)?;
        let hash = sha256_digest(pow.prepare_data(block.get_nonce()).as_slice());
        if hash != block.get_hash() {
            return Ok(false);
        }
        let hash_int = BigInt::from_bytes_be(Sign::Plus, hash.as_slice());
        Ok(hash_int < pow.target)
    }

    /// Digest pre-image for a candidate nonce: Merkle root, previous block
    /// hash, big-endian nonce, big-endian difficulty.
    fn prepare_data(&self, nonce: i64) -> Vec<u8> {
        let mut data_bytes = vec![];
        data_bytes.extend(self.merkle_root.as_slice());
        data_bytes.extend(self.prev_block_hash.as_slice());
        data_bytes.extend(nonce.to_be_bytes());
        data_bytes.extend(self.difficulty.to_be_bytes());
        data_bytes
    }

    /// Search nonces from zero upward until the digest drops below the
    /// target. Blocking and unbounded in expectation; exhausting the signed
    /// 64-bit nonce space is a fatal error rather than a wrap-around.
    pub fn run(&self) -> Result<(i64, Vec<u8>)> {
        self.run_with_cancel(&AtomicBool::new(false))
    }

    /// Same search with a cancellation hook: setting the flag makes the
    /// search return a `Mining` error on its next iteration.
    pub fn run_with_cancel(&self, cancel: &AtomicBool) -> Result<(i64, Vec<u8>)> {
        info!(
            "Mining block with difficulty {} (prev: {})",
            self.difficulty,
            HEXLOWER.encode(self.prev_block_hash.as_slice())
        );

        let mut nonce: i64 = 0;
        while nonce < MAX_NONCE {
            if cancel.load(Ordering::Relaxed) {
                return Err(LedgerError::Mining("Mining cancelled".to_string()));
            }

            let hash = sha256_digest(self.prepare_data(nonce).as_slice());
            let hash_int = BigInt::from_bytes_be(Sign::Plus, hash.as_slice());
            if hash_int < self.target {
                info!("Proof found: {}", HEXLOWER.encode(hash.as_slice()));
                return Ok((nonce, hash));
            }
            nonce += 1;
        }

        Err(LedgerError::Mining(
            "Nonce space exhausted without finding a proof".to_string(),
        ))
    }

    #[cfg(test)]
    pub(crate) fn get_target(&self) -> &BigInt {
        &self.target
    }
}
