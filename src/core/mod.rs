//! Core ledger functionality
//!
//! Blocks, transactions, the Merkle commitment, proof-of-work and the
//! persisted chain itself.

pub mod block;
pub mod blockchain;
pub mod merkle;
pub mod proof_of_work;
pub mod transaction;

pub use block::{Block, BLOCK_VERSION};
pub use blockchain::{Blockchain, BlockchainIterator, GENESIS_COINBASE_DATA};
pub use merkle::{MerkleProof, MerkleTree, ProofElement};
pub use proof_of_work::{ProofOfWork, TARGET_BITS};
pub use transaction::{TXInput, TXOutput, TXOutputs, Transaction, COINBASE_VOUT, SUBSIDY};
