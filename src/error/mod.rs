//! Error handling for the ledger
//!
//! Every failure path in the ledger surfaces as a [`BlockchainError`]. Nothing
//! here is retried automatically; store-level retries belong to sled.

use std::fmt;

/// Result type alias for ledger operations
pub type Result<T> = std::result::Result<T, BlockchainError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockchainError {
    /// Signature or ownership mismatch, or a double-spend attempt
    InvalidTransaction(String),
    /// Spend request exceeds the spendable balance
    InsufficientFunds { required: u64, available: u64 },
    /// A transaction or block is absent from the chain
    NotFound(String),
    /// An input's source transaction could not be resolved
    PriorTransactionMissing(String),
    /// A persisted block or output list failed to decode
    CorruptRecord(String),
    /// The nonce space was exhausted without meeting the target
    MiningExhausted,
    /// Block construction errors
    InvalidBlock(String),
    /// Storage engine errors
    Database(String),
    /// Cryptographic operation errors
    Crypto(String),
    /// Encoding errors
    Serialization(String),
    /// File I/O errors
    Io(String),
    /// Invalid address format
    InvalidAddress(String),
    /// Wallet file and lookup errors
    Wallet(String),
    /// Configuration errors
    Config(String),
}

impl fmt::Display for BlockchainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockchainError::InvalidTransaction(msg) => write!(f, "Invalid transaction: {msg}"),
            BlockchainError::InsufficientFunds {
                required,
                available,
            } => {
                write!(
                    f,
                    "Insufficient funds: required {required}, available {available}"
                )
            }
            BlockchainError::NotFound(msg) => write!(f, "Not found: {msg}"),
            BlockchainError::PriorTransactionMissing(txid) => {
                write!(f, "Prior transaction missing: {txid}")
            }
            BlockchainError::CorruptRecord(msg) => write!(f, "Corrupt record: {msg}"),
            BlockchainError::MiningExhausted => {
                write!(f, "Mining exhausted the nonce space without meeting the target")
            }
            BlockchainError::InvalidBlock(msg) => write!(f, "Invalid block: {msg}"),
            BlockchainError::Database(msg) => write!(f, "Database error: {msg}"),
            BlockchainError::Crypto(msg) => write!(f, "Cryptographic error: {msg}"),
            BlockchainError::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            BlockchainError::Io(msg) => write!(f, "I/O error: {msg}"),
            BlockchainError::InvalidAddress(addr) => write!(f, "Invalid address: {addr}"),
            BlockchainError::Wallet(msg) => write!(f, "Wallet error: {msg}"),
            BlockchainError::Config(msg) => write!(f, "Configuration error: {msg}"),
        }
    }
}

impl std::error::Error for BlockchainError {}

impl From<std::io::Error> for BlockchainError {
    fn from(err: std::io::Error) -> Self {
        BlockchainError::Io(err.to_string())
    }
}

impl From<sled::Error> for BlockchainError {
    fn from(err: sled::Error) -> Self {
        BlockchainError::Database(err.to_string())
    }
}

impl From<sled::transaction::TransactionError<BlockchainError>> for BlockchainError {
    fn from(err: sled::transaction::TransactionError<BlockchainError>) -> Self {
        match err {
            sled::transaction::TransactionError::Abort(e) => e,
            sled::transaction::TransactionError::Storage(e) => {
                BlockchainError::Database(e.to_string())
            }
        }
    }
}

impl From<bincode::error::EncodeError> for BlockchainError {
    fn from(err: bincode::error::EncodeError) -> Self {
        BlockchainError::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for BlockchainError {
    fn from(err: bincode::error::DecodeError) -> Self {
        BlockchainError::CorruptRecord(err.to_string())
    }
}

impl From<toml::de::Error> for BlockchainError {
    fn from(err: toml::de::Error) -> Self {
        BlockchainError::Config(err.to_string())
    }
}
