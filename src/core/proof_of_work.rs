use crate::core::Block;
use crate::error::{BlockchainError, Result};
use crate::utils::sha256_digest;
use data_encoding::HEXLOWER;
use log::{debug, info};
use num_bigint::{BigInt, Sign};
use std::ops::ShlAssign;

/// Fixed mining difficulty: a winning hash is below 2^(256 - TARGET_BITS).
pub const TARGET_BITS: u32 = 16;

const MAX_NONCE: i64 = i64::MAX;

pub struct ProofOfWork<'a> {
    block: &'a Block,
    merkle_root: Vec<u8>,
    target: BigInt,
}

impl<'a> ProofOfWork<'a> {
    pub fn new_proof_of_work(block: &'a Block) -> Result<ProofOfWork<'a>> {
        let mut target = BigInt::from(1);
        target.shl_assign(256 - TARGET_BITS);
        Ok(ProofOfWork {
            block,
            merkle_root: block.hash_transactions()?,
            target,
        })
    }

    /// Checks the stored nonce against the target without searching.
    pub fn validate(block: &Block) -> Result<bool> {
        let pow = ProofOfWork::new_proof_of_work(block)?;
        let hash = sha256_digest(pow.prepare_data(block.get_nonce()).as_slice());
        Ok(pow.meets_target(&hash))
    }

    /// Header hash of `block` at its stored nonce.
    pub fn compute_hash(block: &Block) -> Result<Vec<u8>> {
        let pow = ProofOfWork::new_proof_of_work(block)?;
        Ok(sha256_digest(pow.prepare_data(block.get_nonce()).as_slice()))
    }

    fn meets_target(&self, hash: &[u8]) -> bool {
        BigInt::from_bytes_be(Sign::Plus, hash) < self.target
    }

    // prev hash ‖ merkle root ‖ timestamp ‖ target bits ‖ nonce, integers big-endian
    fn prepare_data(&self, nonce: i64) -> Vec<u8> {
        let mut data_bytes = vec![];
        data_bytes.extend(self.block.get_pre_block_hash());
        data_bytes.extend(self.merkle_root.as_slice());
        data_bytes.extend(self.block.get_timestamp().to_be_bytes());
        data_bytes.extend(i64::from(TARGET_BITS).to_be_bytes());
        data_bytes.extend(nonce.to_be_bytes());
        data_bytes
    }

    pub fn run(&self) -> Result<(i64, Vec<u8>)> {
        self.run_with_limit(MAX_NONCE)
    }

    fn run_with_limit(&self, max_nonce: i64) -> Result<(i64, Vec<u8>)> {
        debug!(
            "Mining block over {} transactions",
            self.block.get_transactions().len()
        );
        for nonce in 0..max_nonce {
            let hash = sha256_digest(self.prepare_data(nonce).as_slice());
            if self.meets_target(&hash) {
                info!("Found nonce {nonce}: {}", HEXLOWER.encode(hash.as_slice()));
                return Ok((nonce, hash));
            }
        }
        Err(BlockchainError::MiningExhausted)
    }
}
