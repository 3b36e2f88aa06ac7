pub mod block;
pub mod blockchain;
pub mod merkle;
pub mod proof_of_work;
pub mod transaction;

pub use block::Block;
pub use blockchain::{Blockchain, ChainIterator};
pub use merkle::{calculate_merkle_root, MerkleTree};
pub use proof_of_work::ProofOfWork;
pub use transaction::{Transaction, TXInput, TXOutput, SUBSIDY};
