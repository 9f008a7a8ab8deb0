use crate::core::Transaction;
use crate::error::{BlockchainError, Result};
use crate::utils::sha256_digest;
use serde::{Deserialize, Serialize};

/// Merkle tree over a block's transactions.
///
/// The tree is stored as an arena of levels: `levels[0]` holds the leaf
/// digests and the last level holds the single root. Every level except the
/// root has even length; an odd level gets its last node duplicated before
/// pairing.
///
/// A leaf is the SHA-256 of the fully serialized transaction, signatures
/// included, so the block hash commits to the exact bytes that were stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerkleTree {
    levels: Vec<Vec<Vec<u8>>>,
    leaf_count: usize,
}

/// Inclusion proof for one leaf
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    /// Leaf digest being proven
    pub leaf_hash: Vec<u8>,
    /// Root the proof folds up to
    pub merkle_root: Vec<u8>,
    /// Sibling hashes from the leaf level upward
    pub proof_path: Vec<ProofElement>,
    /// Position of the leaf among the original leaves
    pub leaf_index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofElement {
    pub hash: Vec<u8>,
    /// true if the sibling sits on the right
    pub is_right: bool,
}

impl MerkleTree {
    pub fn new(transactions: &[Transaction]) -> Result<Self> {
        let leaves = transactions
            .iter()
            .map(Self::leaf_digest)
            .collect::<Result<Vec<Vec<u8>>>>()?;
        Self::from_hashes(&leaves)
    }

    pub fn from_hashes(leaves: &[Vec<u8>]) -> Result<Self> {
        if leaves.is_empty() {
            return Err(BlockchainError::InvalidBlock(
                "Cannot build a Merkle tree from an empty leaf list".to_string(),
            ));
        }

        let mut levels = Vec::new();
        let mut current = leaves.to_vec();
        loop {
            if current.len() % 2 != 0 {
                let last = current[current.len() - 1].clone();
                current.push(last);
            }
            let next: Vec<Vec<u8>> = current
                .chunks(2)
                .map(|pair| Self::hash_pair(&pair[0], &pair[1]))
                .collect();
            levels.push(current);
            if next.len() == 1 {
                levels.push(next);
                break;
            }
            current = next;
        }

        Ok(MerkleTree {
            levels,
            leaf_count: leaves.len(),
        })
    }

    /// Root of the tree built over `leaves`.
    pub fn build_merkle_root(leaves: &[Vec<u8>]) -> Result<Vec<u8>> {
        Ok(Self::from_hashes(leaves)?.get_root_hash().to_vec())
    }

    pub fn leaf_digest(transaction: &Transaction) -> Result<Vec<u8>> {
        Ok(sha256_digest(transaction.serialize()?.as_slice()))
    }

    pub fn get_root_hash(&self) -> &[u8] {
        // from_hashes always pushes a one-element root level
        &self.levels[self.levels.len() - 1][0]
    }

    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    pub fn generate_proof(&self, leaf_index: usize) -> Result<MerkleProof> {
        if leaf_index >= self.leaf_count {
            return Err(BlockchainError::InvalidBlock(format!(
                "Leaf index {} out of bounds (leaves: {})",
                leaf_index, self.leaf_count
            )));
        }

        let mut proof_path = Vec::with_capacity(self.levels.len() - 1);
        let mut index = leaf_index;
        for level in &self.levels[..self.levels.len() - 1] {
            let sibling = index ^ 1;
            proof_path.push(ProofElement {
                hash: level[sibling].clone(),
                is_right: index % 2 == 0,
            });
            index /= 2;
        }

        Ok(MerkleProof {
            leaf_hash: self.levels[0][leaf_index].clone(),
            merkle_root: self.get_root_hash().to_vec(),
            proof_path,
            leaf_index,
        })
    }

    pub fn verify_proof(proof: &MerkleProof) -> bool {
        let folded = proof
            .proof_path
            .iter()
            .fold(proof.leaf_hash.clone(), |current, element| {
                if element.is_right {
                    Self::hash_pair(&current, &element.hash)
                } else {
                    Self::hash_pair(&element.hash, &current)
                }
            });
        folded == proof.merkle_root
    }

    fn hash_pair(left: &[u8], right: &[u8]) -> Vec<u8> {
        let mut combined = Vec::with_capacity(left.len() + right.len());
        combined.extend_from_slice(left);
        combined.extend_from_slice(right);
        sha256_digest(&combined)
    }
}
