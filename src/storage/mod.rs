pub mod utxo_set;

pub use utxo_set::{UTXOSet, UnspentOutput};
