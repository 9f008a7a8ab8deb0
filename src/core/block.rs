use crate::core::{MerkleProof, MerkleTree, ProofOfWork, Transaction};
use crate::error::{BlockchainError, Result};
use crate::utils::{current_timestamp, deserialize, serialize};
use data_encoding::HEXLOWER;
use log::info;
use serde::{Deserialize, Serialize};

pub const BLOCK_VERSION: i32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Block {
    version: i32,
    timestamp: i64,
    transactions: Vec<Transaction>,
    pre_block_hash: Vec<u8>, // empty for genesis
    hash: Vec<u8>,
    nonce: i64,
}

impl Block {
    /// Mines a block holding `transactions` on top of `pre_block_hash`.
    pub fn new_block(pre_block_hash: &[u8], transactions: &[Transaction]) -> Result<Block> {
        if transactions.is_empty() {
            return Err(BlockchainError::InvalidBlock(
                "Block must contain at least one transaction".to_string(),
            ));
        }

        let mut block = Block {
            version: BLOCK_VERSION,
            timestamp: current_timestamp()?,
            transactions: transactions.to_vec(),
            pre_block_hash: pre_block_hash.to_vec(),
            hash: vec![],
            nonce: 0,
        };

        let (nonce, hash) = ProofOfWork::new_proof_of_work(&block)?.run()?;
        block.nonce = nonce;
        block.hash = hash;
        info!(
            "Mined block {} with {} transactions",
            HEXLOWER.encode(&block.hash),
            block.transactions.len()
        );

        Ok(block)
    }

    pub fn generate_genesis_block(coinbase: &Transaction) -> Result<Block> {
        Block::new_block(&[], std::slice::from_ref(coinbase))
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Block> {
        deserialize::<Block>(bytes)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn get_version(&self) -> i32 {
        self.version
    }

    pub fn get_transactions(&self) -> &[Transaction] {
        self.transactions.as_slice()
    }

    pub fn get_pre_block_hash(&self) -> &[u8] {
        self.pre_block_hash.as_slice()
    }

    pub fn is_genesis(&self) -> bool {
        self.pre_block_hash.is_empty()
    }

    pub fn get_hash(&self) -> &[u8] {
        self.hash.as_slice()
    }

    pub fn get_timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn get_nonce(&self) -> i64 {
        self.nonce
    }

    /// Merkle root committing to the block's transactions
    pub fn hash_transactions(&self) -> Result<Vec<u8>> {
        Ok(MerkleTree::new(&self.transactions)?.get_root_hash().to_vec())
    }

    pub fn generate_merkle_proof(&self, transaction_index: usize) -> Result<MerkleProof> {
        MerkleTree::new(&self.transactions)?.generate_proof(transaction_index)
    }

    /// Checks a proof against this block's own Merkle root.
    pub fn verify_merkle_proof(&self, proof: &MerkleProof) -> Result<bool> {
        if proof.merkle_root != self.hash_transactions()? {
            return Ok(false);
        }
        Ok(MerkleTree::verify_proof(proof))
    }

    #[cfg(test)]
    pub(crate) fn with_nonce(&self, nonce: i64) -> Block {
        Block {
            nonce,
            ..self.clone()
        }
    }

    #[cfg(test)]
    pub(crate) fn new_unmined(
        timestamp: i64,
        pre_block_hash: &[u8],
        transactions: &[Transaction],
    ) -> Block {
        Block {
            version: BLOCK_VERSION,
            timestamp,
            transactions: transactions.to_vec(),
            pre_block_hash: pre_block_hash.to_vec(),
            hash: vec![0xab; 32],
            nonce: 7,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::Wallet;

    fn coinbase() -> Transaction {
        Transaction::new_coinbase_tx(&Wallet::new().unwrap().get_address(), "").unwrap()
    }

    #[test]
    fn test_empty_block_is_rejected() {
        let result = Block::new_block(&[], &[]);
        assert!(matches!(result, Err(BlockchainError::InvalidBlock(_))));
    }

    #[test]
    fn test_genesis_block() {
        let block = Block::generate_genesis_block(&coinbase()).unwrap();
        assert!(block.is_genesis());
        assert_eq!(block.get_version(), BLOCK_VERSION);
        assert_eq!(block.get_hash().len(), 32);
        assert!(ProofOfWork::validate(&block).unwrap());
    }

    #[test]
    fn test_round_trip_multi_transaction_block() {
        let txs = vec![coinbase(), coinbase(), coinbase()];
        let block = Block::new_block(&[0x11; 32], &txs).unwrap();

        let decoded = Block::deserialize(&block.serialize().unwrap()).unwrap();
        assert_eq!(decoded, block);
        assert_eq!(decoded.get_transactions().len(), 3);
    }

    #[test]
    fn test_round_trip_empty_block() {
        let block = Block::new_unmined(1_700_000_000, &[], &[]);
        let decoded = Block::deserialize(&block.serialize().unwrap()).unwrap();
        assert_eq!(decoded, block);
        assert!(decoded.get_transactions().is_empty());
    }

    #[test]
    fn test_truncated_record_is_corrupt() {
        let block = Block::new_unmined(1, &[0x22; 32], &[coinbase()]);
        let bytes = block.serialize().unwrap();
        let result = Block::deserialize(&bytes[..bytes.len() / 2]);
        assert!(matches!(result, Err(BlockchainError::CorruptRecord(_))));
    }

    #[test]
    fn test_merkle_proof_for_transaction() {
        let txs = vec![coinbase(), coinbase(), coinbase()];
        let block = Block::new_unmined(1, &[], &txs);

        let proof = block.generate_merkle_proof(2).unwrap();
        assert_eq!(proof.leaf_hash, MerkleTree::leaf_digest(&txs[2]).unwrap());
        assert!(block.verify_merkle_proof(&proof).unwrap());

        let other = Block::new_unmined(1, &[], &[coinbase()]);
        assert!(!other.verify_merkle_proof(&proof).unwrap());
    }

    #[test]
    fn test_transaction_order_changes_commitment() {
        let (a, b) = (coinbase(), coinbase());
        let forward = Block::new_unmined(1, &[], &[a.clone(), b.clone()]);
        let reversed = Block::new_unmined(1, &[], &[b, a]);
        assert_ne!(
            forward.hash_transactions().unwrap(),
            reversed.hash_transactions().unwrap()
        );
    }
}
