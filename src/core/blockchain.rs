// The ledger: blocks live in a sled tree keyed by their hash, next to one
// sentinel key holding the tip. Blocks are only ever appended on top of the
// tip, so walking `pre_block_hash` links from it always ends at genesis.

use crate::core::{Block, ProofOfWork, TXOutputs, Transaction, SUBSIDY};
use crate::error::{BlockchainError, Result};
use data_encoding::HEXLOWER;
use log::{debug, info};
use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult};
use sled::{Db, Tree};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

const TIP_BLOCK_HASH_KEY: &str = "tip_block_hash";
const BLOCKS_TREE: &str = "blocks";

/// Coinbase data of the genesis block
pub const GENESIS_COINBASE_DATA: &str =
    "The Times 03/Jan/2009 Chancellor on brink of second bailout for banks";

/// Handle to one on-disk chain. Clones share the store, the cached tip and
/// the writer lock.
#[derive(Clone)]
pub struct Blockchain {
    tip_hash: Arc<RwLock<Vec<u8>>>,
    // held by every ledger mutation, including UTXO index writes
    writer: Arc<Mutex<()>>,
    db: Db,
    blocks: Tree,
}

impl Blockchain {
    /// Opens the chain at `db_path`, mining a genesis block paying
    /// `genesis_address` if the store is empty.
    pub fn create_blockchain(genesis_address: &str, db_path: &Path) -> Result<Blockchain> {
        let db = sled::open(db_path)
            .map_err(|e| BlockchainError::Database(format!("Failed to open database: {e}")))?;
        let blocks = db.open_tree(BLOCKS_TREE)?;

        let tip_hash = match blocks.get(TIP_BLOCK_HASH_KEY)? {
            Some(tip) => {
                info!("Blockchain already exists at {}", db_path.display());
                tip.to_vec()
            }
            None => {
                // An empty store gets a genesis block before I hand out the handle
                info!("Creating genesis block for address: {genesis_address}");
                let coinbase_tx = Transaction::new_coinbase_tx(genesis_address, GENESIS_COINBASE_DATA)?;
                let genesis = Block::generate_genesis_block(&coinbase_tx)?;
                Self::update_blocks_tree(&blocks, &genesis, None)?;
                genesis.get_hash().to_vec()
            }
        };

        Ok(Blockchain {
            tip_hash: Arc::new(RwLock::new(tip_hash)),
            writer: Arc::new(Mutex::new(())),
            db,
            blocks,
        })
    }

    /// Opens an existing chain.
    pub fn open(db_path: &Path) -> Result<Blockchain> {
        let db = sled::open(db_path)
            .map_err(|e| BlockchainError::Database(format!("Failed to open database: {e}")))?;
        let blocks = db.open_tree(BLOCKS_TREE)?;

        let tip_hash = blocks.get(TIP_BLOCK_HASH_KEY)?.ok_or_else(|| {
            BlockchainError::NotFound(format!(
                "No existing blockchain found at {}. Create one first.",
                db_path.display()
            ))
        })?;

        Ok(Blockchain {
            tip_hash: Arc::new(RwLock::new(tip_hash.to_vec())),
            writer: Arc::new(Mutex::new(())),
            db,
            blocks,
        })
    }

    // Stores the block and moves the tip in one store transaction. Aborts if
    // the stored tip is no longer `expected_tip`.
    fn update_blocks_tree(blocks: &Tree, block: &Block, expected_tip: Option<&[u8]>) -> Result<()> {
        let block_hash = block.get_hash();
        let block_data = block.serialize()?;

        blocks.transaction(
            |tx_db| -> ConflictableTransactionResult<(), BlockchainError> {
                let current_tip = tx_db.get(TIP_BLOCK_HASH_KEY)?;
                if current_tip.as_deref() != expected_tip {
                    return Err(ConflictableTransactionError::Abort(
                        BlockchainError::InvalidBlock(format!(
                            "Chain tip moved while mining block {}",
                            HEXLOWER.encode(block_hash)
                        )),
                    ));
                }
                tx_db.insert(block_hash, block_data.as_slice())?;
                tx_db.insert(TIP_BLOCK_HASH_KEY, block_hash)?;
                Ok(())
            },
        )?;
        Ok(())
    }

    pub fn get_db(&self) -> &Db {
        &self.db
    }

    pub fn get_tip_hash(&self) -> Vec<u8> {
        self.tip_hash
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_tip_hash(&self, new_tip_hash: &[u8]) {
        let mut tip_hash = self.tip_hash.write().unwrap_or_else(PoisonError::into_inner);
        *tip_hash = new_tip_hash.to_vec();
    }

    pub(crate) fn lock_writer(&self) -> MutexGuard<'_, ()> {
        // a poisoned lock only means an earlier mutation panicked before committing
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Verifies `transactions`, mines them into a block on top of the tip and
    /// persists it. Nothing is written unless every transaction is valid.
    pub fn mine_block(&self, transactions: &[Transaction]) -> Result<Block> {
        // I hold the writer lock for the whole append, mining included
        let _writer = self.lock_writer();

        if transactions.is_empty() {
            return Err(BlockchainError::InvalidBlock(
                "Block must contain at least one transaction".to_string(),
            ));
        }

        Self::check_coinbase(transactions)?;
        for (i, transaction) in transactions.iter().enumerate() {
            if !self.verify_transaction(transaction)? {
                return Err(BlockchainError::InvalidTransaction(format!(
                    "Transaction {} at index {i} failed verification",
                    HEXLOWER.encode(transaction.get_id())
                )));
            }
        }
        self.check_for_conflicts(transactions)?;

        // I read the tip from the store, not the cached copy
        let last_hash = self
            .blocks
            .get(TIP_BLOCK_HASH_KEY)?
            .ok_or_else(|| BlockchainError::NotFound("Chain tip".to_string()))?
            .to_vec();

        info!(
            "Mining block with {} transactions on top of {}",
            transactions.len(),
            HEXLOWER.encode(&last_hash)
        );
        let block = Block::new_block(&last_hash, transactions)?;

        Self::update_blocks_tree(&self.blocks, &block, Some(last_hash.as_slice()))?;
        // Only after the commit do I move the cached tip
        self.set_tip_hash(block.get_hash());
        info!("Appended block {}", HEXLOWER.encode(block.get_hash()));

        Ok(block)
    }

    /// Fresh cursor at the current tip, walking toward genesis.
    pub fn iterator(&self) -> BlockchainIterator {
        BlockchainIterator::new(self.get_tip_hash(), self.blocks.clone())
    }

    pub fn get_block(&self, block_hash: &[u8]) -> Result<Block> {
        load_block(&self.blocks, block_hash)
    }

    pub fn get_block_hashes(&self) -> Result<Vec<Vec<u8>>> {
        self.iterator()
            .map(|block| block.map(|b| b.get_hash().to_vec()))
            .collect()
    }

    /// All unspent outputs on the chain, keyed by hex transaction ID.
    pub fn find_utxo(&self) -> Result<HashMap<String, TXOutputs>> {
        let mut utxo: HashMap<String, TXOutputs> = HashMap::new();
        let mut spent_txos: HashMap<String, HashSet<usize>> = HashMap::new();

        for block in self.iterator() {
            let block = block?;

            // spends first, so an output consumed inside its own block is skipped
            for tx in block.get_transactions() {
                if tx.is_coinbase() {
                    continue;
                }
                for txin in tx.get_vin() {
                    if let Some(idx) = txin.output_index() {
                        spent_txos
                            .entry(HEXLOWER.encode(txin.get_txid()))
                            .or_default()
                            .insert(idx);
                    }
                }
            }

            for tx in block.get_transactions() {
                let txid_hex = HEXLOWER.encode(tx.get_id());
                let spent = spent_txos.get(txid_hex.as_str());
                for (idx, out) in tx.get_vout().iter().enumerate() {
                    if spent.is_some_and(|outs| outs.contains(&idx)) {
                        continue;
                    }
                    utxo.entry(txid_hex.clone())
                        .or_default()
                        .insert(idx, out.clone());
                }
            }
        }
        Ok(utxo)
    }

    pub fn find_transaction(&self, txid: &[u8]) -> Result<Transaction> {
        for block in self.iterator() {
            let block = block?;
            if let Some(tx) = block.get_transactions().iter().find(|tx| tx.get_id() == txid) {
                return Ok(tx.clone());
            }
        }
        Err(BlockchainError::NotFound(format!(
            "Transaction {}",
            HEXLOWER.encode(txid)
        )))
    }

    // Resolves every transaction the inputs of `tx` spend from, in one pass.
    fn prior_transactions(&self, tx: &Transaction) -> Result<HashMap<String, Transaction>> {
        let mut wanted: HashSet<Vec<u8>> = tx
            .get_vin()
            .iter()
            .map(|vin| vin.get_txid().to_vec())
            .collect();
        let mut prev_txs = HashMap::new();

        for block in self.iterator() {
            if wanted.is_empty() {
                break;
            }
            let block = block?;
            for candidate in block.get_transactions() {
                if wanted.remove(candidate.get_id()) {
                    prev_txs.insert(HEXLOWER.encode(candidate.get_id()), candidate.clone());
                }
            }
        }

        if let Some(missing) = wanted.iter().next() {
            return Err(BlockchainError::PriorTransactionMissing(
                HEXLOWER.encode(missing),
            ));
        }
        Ok(prev_txs)
    }

    pub fn sign_transaction(&self, tx: &mut Transaction, pkcs8: &[u8]) -> Result<()> {
        let prev_txs = self.prior_transactions(tx)?;
        tx.sign(pkcs8, &prev_txs)
    }

    pub fn verify_transaction(&self, tx: &Transaction) -> Result<bool> {
        if tx.is_coinbase() {
            return Ok(true);
        }
        debug!("Verifying transaction {}", HEXLOWER.encode(tx.get_id()));
        let prev_txs = self.prior_transactions(tx)?;
        tx.verify(&prev_txs)
    }

    // I allow one coinbase per block, first in the batch, minting exactly SUBSIDY.
    fn check_coinbase(transactions: &[Transaction]) -> Result<()> {
        for (tx_index, transaction) in transactions.iter().enumerate() {
            if !transaction.is_coinbase() {
                continue;
            }
            if tx_index != 0 {
                return Err(BlockchainError::InvalidTransaction(format!(
                    "Coinbase {} must be the first transaction, found at index {tx_index}",
                    HEXLOWER.encode(transaction.get_id())
                )));
            }
            let minted = transaction
                .get_vout()
                .iter()
                .try_fold(0u64, |acc, out| acc.checked_add(out.get_value()));
            if minted != Some(SUBSIDY) {
                return Err(BlockchainError::InvalidTransaction(format!(
                    "Coinbase {} must pay exactly {SUBSIDY}",
                    HEXLOWER.encode(transaction.get_id())
                )));
            }
        }
        Ok(())
    }

    // Transaction IDs are unique across the chain and every outpoint is spent
    // at most once. Checks the batch against itself, then against the chain.
    fn check_for_conflicts(&self, transactions: &[Transaction]) -> Result<()> {
        let mut batch_ids: HashSet<Vec<u8>> = HashSet::new();
        let mut referenced: HashSet<(Vec<u8>, i32)> = HashSet::new();

        for (tx_index, transaction) in transactions.iter().enumerate() {
            if !batch_ids.insert(transaction.get_id().to_vec()) {
                return Err(BlockchainError::InvalidTransaction(format!(
                    "Transaction {} appears twice in this block",
                    HEXLOWER.encode(transaction.get_id())
                )));
            }
            if transaction.is_coinbase() {
                continue;
            }
            for input in transaction.get_vin() {
                let outpoint = (input.get_txid().to_vec(), input.get_vout());
                if !referenced.insert(outpoint) {
                    return Err(BlockchainError::InvalidTransaction(format!(
                        "Double spend in transaction {}: output {}:{} already spent in this block",
                        tx_index,
                        HEXLOWER.encode(input.get_txid()),
                        input.get_vout()
                    )));
                }
            }
        }

        // I walk the whole chain once and check both IDs and spends as I go
        for block in self.iterator() {
            let block = block?;
            for tx in block.get_transactions() {
                if batch_ids.contains(tx.get_id()) {
                    return Err(BlockchainError::InvalidTransaction(format!(
                        "Transaction {} is already on chain",
                        HEXLOWER.encode(tx.get_id())
                    )));
                }
                if tx.is_coinbase() {
                    continue;
                }
                for input in tx.get_vin() {
                    if referenced.contains(&(input.get_txid().to_vec(), input.get_vout())) {
                        return Err(BlockchainError::InvalidTransaction(format!(
                            "Output {}:{} is already spent",
                            HEXLOWER.encode(input.get_txid()),
                            input.get_vout()
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Re-checks every stored block: key/hash agreement, header hash and
    /// proof of work. Returns the number of blocks audited.
    pub fn audit(&self) -> Result<usize> {
        let mut expected_hash = self.get_tip_hash();
        let mut count = 0;

        for block in self.iterator() {
            let block = block?;
            let hex = HEXLOWER.encode(block.get_hash());
            if block.get_hash() != expected_hash.as_slice() {
                return Err(BlockchainError::InvalidBlock(format!(
                    "Block {hex} is stored under hash {}",
                    HEXLOWER.encode(&expected_hash)
                )));
            }
            if ProofOfWork::compute_hash(&block)? != block.get_hash() {
                return Err(BlockchainError::InvalidBlock(format!(
                    "Block {hex} does not match its header"
                )));
            }
            if !ProofOfWork::validate(&block)? {
                return Err(BlockchainError::InvalidBlock(format!(
                    "Block {hex} fails proof of work"
                )));
            }
            expected_hash = block.get_pre_block_hash().to_vec();
            count += 1;
        }

        info!("Audited {count} blocks");
        Ok(count)
    }
}

fn load_block(blocks: &Tree, block_hash: &[u8]) -> Result<Block> {
    let data = blocks.get(block_hash)?.ok_or_else(|| {
        BlockchainError::NotFound(format!("Block {}", HEXLOWER.encode(block_hash)))
    })?;
    Block::deserialize(data.as_ref())
}

/// Walks from a tip toward genesis. Stops after genesis or after the first
/// error.
pub struct BlockchainIterator {
    blocks: Tree,
    current_hash: Option<Vec<u8>>,
}

impl BlockchainIterator {
    fn new(tip_hash: Vec<u8>, blocks: Tree) -> BlockchainIterator {
        BlockchainIterator {
            blocks,
            current_hash: Some(tip_hash),
        }
    }
}

impl Iterator for BlockchainIterator {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        let hash = self.current_hash.take()?;
        match load_block(&self.blocks, &hash) {
            Ok(block) => {
                if !block.is_genesis() {
                    self.current_hash = Some(block.get_pre_block_hash().to_vec());
                }
                Some(Ok(block))
            }
            Err(e) => Some(Err(e)),
        }
    }
}
