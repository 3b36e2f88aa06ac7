//! Error handling for the ledger engine
//!
//! Every failure the core can produce is a typed variant here; nothing is
//! swallowed and nothing panics the process. Store-level I/O failures are
//! treated as fatal for the current operation and propagated unchanged.

use std::fmt;

/// Result type alias for ledger operations
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Typed failures for ledger operations
#[derive(Debug, Clone)]
pub enum LedgerError {
    /// Store-level errors from the embedded key-value engine
    Database(String),
    /// Cryptographic operation errors
    Crypto(String),
    /// Serialization/deserialization errors (corrupt or foreign bytes)
    Serialization(String),
    /// File I/O errors
    Io(String),
    /// Invalid address format or checksum
    InvalidAddress(String),
    /// A persisted chain already exists at the given location
    AlreadyExists(String),
    /// No persisted chain exists, or a store key is missing
    NotFound(String),
    /// Sign/verify referenced a prior transaction that could not be resolved
    MissingPriorTransaction(String),
    /// A full chain scan exhausted without finding the transaction
    TransactionNotFound(String),
    /// A loaded block failed proof-of-work validation
    InvalidProof(String),
    /// Block structure errors
    InvalidBlock(String),
    /// Transaction structure or validation errors
    Transaction(String),
    /// Mining errors (nonce space exhausted or search cancelled)
    Mining(String),
    /// Spend amount exceeds accumulated spendable outputs
    InsufficientFunds { required: u64, available: u64 },
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerError::Database(msg) => write!(f, "Database error: {msg}"),
            LedgerError::Crypto(msg) => write!(f, "Cryptographic error: {msg}"),
            LedgerError::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            LedgerError::Io(msg) => write!(f, "I/O error: {msg}"),
            LedgerError::InvalidAddress(addr) => write!(f, "Invalid address: {addr}"),
            LedgerError::AlreadyExists(msg) => write!(f, "Chain already exists: {msg}"),
            LedgerError::NotFound(msg) => write!(f, "Not found: {msg}"),
            LedgerError::MissingPriorTransaction(msg) => {
                write!(f, "Missing prior transaction: {msg}")
            }
            LedgerError::TransactionNotFound(msg) => {
                write!(f, "Transaction not found: {msg}")
            }
            LedgerError::InvalidProof(msg) => write!(f, "Invalid proof of work: {msg}"),
            LedgerError::InvalidBlock(msg) => write!(f, "Invalid block: {msg}"),
            LedgerError::Transaction(msg) => write!(f, "Transaction error: {msg}"),
            LedgerError::Mining(msg) => write!(f, "Mining error: {msg}"),
            LedgerError::InsufficientFunds {
                required,
                available,
            } => {
                write!(
                    f,
                    "Insufficient funds: required {required}, available {available}"
                )
            }
        }
    }
}

impl std::error::Error for LedgerError {}

impl From<std::io::Error> for LedgerError {
    fn from(err: std::io::Error) -> Self {
        LedgerError::Io(err.to_string())
    }
}

impl From<sled::Error> for LedgerError {
    fn from(err: sled::Error) -> Self {
        LedgerError::Database(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for LedgerError {
    fn from(err: bincode::error::EncodeError) -> Self {
        LedgerError::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for LedgerError {
    fn from(err: bincode::error::DecodeError) -> Self {
        LedgerError::Serialization(err.to_string())
    }
}
