//! Single-node UTXO ledger engine.
//!
//! A persisted chain of proof-of-work blocks over an embedded key-value
//! store, with per-input ECDSA-signed transactions, Merkle commitments over
//! block contents, and a maintained index of unspent outputs for balance
//! queries and coin selection. Networking, consensus between nodes, and
//! mempool management are out of scope; this crate is the ledger a node
//! would build on.
//!
//! ```no_run
//! use anvil_ledger::core::{Blockchain, Transaction};
//! use anvil_ledger::storage::UTXOSet;
//! use anvil_ledger::wallet::Wallet;
//!
//! # fn main() -> anvil_ledger::error::Result<()> {
//! let miner = Wallet::new()?;
//! let chain = Blockchain::create_blockchain(&miner.get_address())?;
//! let utxo_set = UTXOSet::new(chain);
//! utxo_set.reindex()?;
//!
//! let receiver = Wallet::new()?;
//! let tx = Transaction::new_utxo_transaction(&miner, &receiver.get_address(), 10, &utxo_set)?;
//! let reward = Transaction::new_coinbase_tx(&miner.get_address(), "")?;
//! let block = utxo_set.get_blockchain().mine_block(&[reward, tx])?;
//! utxo_set.update(&block)?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod storage;
pub mod utils;
pub mod wallet;

pub use crate::config::GLOBAL_CONFIG;
pub use crate::core::{
    Block, Blockchain, ChainIterator, MerkleTree, ProofOfWork, Transaction, SUBSIDY,
};
pub use crate::error::{LedgerError, Result};
pub use crate::storage::UTXOSet;
pub use crate::wallet::Wallet;
