//! Key-encoding primitives and in-memory wallets
//!
//! The ledger core consumes these as opaque operations: derive a public-key
//! hash from a public key, turn a hash into checksummed address text, and
//! validate that text. Key-file persistence is deliberately not handled here.

#[allow(clippy::module_inception)]
pub mod wallet;

pub use wallet::{
    convert_address, decode_pub_key_hash, hash_pub_key, validate_address, Wallet,
    ADDRESS_CHECK_SUM_LEN,
};
