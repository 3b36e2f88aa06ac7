//! Utility functions and helpers
//!
//! Cryptographic primitives, encoding helpers, and the bincode wrapper
//! used for every persisted value in the ledger.

pub mod crypto;
pub mod serialization;

pub use crypto::{
    base58_decode, base58_encode, ecdsa_p256_sha256_sign_digest, ecdsa_p256_sha256_sign_verify,
    new_key_pair, ripemd160_digest, sha256_digest,
};

pub use serialization::{deserialize, serialize};
