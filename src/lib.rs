//! # utxo-chain
//!
//! A single-node proof-of-work ledger in the UTXO model.
//!
//! ## Layout
//! - `core/`: blocks, transactions, Merkle commitment, mining and the chain
//! - `storage/`: the UTXO index derived from the chain
//! - `wallet/`: ECDSA P-256 keys and base58 addresses
//! - `config/`: data directory and wallet file locations
//! - `utils/`: hashing, signing and bincode helpers
//! - `cli/`: command-line parsing for the binary
//!
//! Blocks and the UTXO index share one sled database. The chain is the
//! source of truth; the index can always be rebuilt from it with
//! [`UTXOSet::reindex`].

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod storage;
pub mod utils;
pub mod wallet;

pub use cli::{Command, Opt};
pub use config::{Config, GLOBAL_CONFIG};
pub use core::{
    Block, Blockchain, BlockchainIterator, MerkleProof, MerkleTree, ProofOfWork, TXInput,
    TXOutput, TXOutputs, Transaction, SUBSIDY, TARGET_BITS,
};
pub use error::{BlockchainError, Result};
pub use storage::UTXOSet;
pub use utils::{
    base58_decode, base58_encode, current_timestamp, ecdsa_p256_sha256_sign_digest,
    ecdsa_p256_sha256_sign_verify, new_key_pair, ripemd160_digest, sha256_digest,
};
pub use wallet::{
    convert_address, hash_pub_key, locking_hash_from_address, validate_address, Wallet, Wallets,
    ADDRESS_CHECK_SUM_LEN,
};
