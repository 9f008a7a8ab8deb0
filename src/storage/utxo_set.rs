use crate::core::{Block, Blockchain, TXOutput, TXOutputs};
use crate::error::{BlockchainError, Result};
use data_encoding::HEXLOWER;
use log::{debug, info};
use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult};
use sled::{Batch, Tree};
use std::collections::BTreeMap;

const UTXO_TREE: &str = "chainstate";

/// Index of unspent outputs, keyed by raw transaction ID. Entries keep each
/// output's original position in its transaction.
pub struct UTXOSet {
    blockchain: Blockchain,
}

impl UTXOSet {
    pub fn new(blockchain: Blockchain) -> UTXOSet {
        UTXOSet { blockchain }
    }

    pub fn get_blockchain(&self) -> &Blockchain {
        &self.blockchain
    }

    fn utxo_tree(&self) -> Result<Tree> {
        self.blockchain
            .get_db()
            .open_tree(UTXO_TREE)
            .map_err(|e| BlockchainError::Database(format!("Failed to open UTXO tree: {e}")))
    }

    /// Walks the index in key order, taking outputs locked to `pub_key_hash`
    /// until at least `amount` is gathered. Returns the accumulated value and
    /// the chosen output positions per hex transaction ID.
    pub fn find_spendable_outputs(
        &self,
        pub_key_hash: &[u8],
        amount: u64,
    ) -> Result<(u64, BTreeMap<String, Vec<usize>>)> {
        let mut unspent_outputs: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        let mut accumulated = 0;

        'entries: for item in self.utxo_tree()?.iter() {
            let (k, v) = item?;
            let outs = TXOutputs::deserialize(v.as_ref())?;

            for (idx, out) in outs.iter() {
                if accumulated >= amount {
                    break 'entries;
                }
                if out.is_locked_with_key(pub_key_hash) {
                    accumulated = checked_total(accumulated, out.get_value())?;
                    unspent_outputs
                        .entry(HEXLOWER.encode(k.as_ref()))
                        .or_default()
                        .push(idx);
                }
            }
        }

        debug!("Gathered {accumulated} of {amount} requested");
        Ok((accumulated, unspent_outputs))
    }

    pub fn find_utxo(&self, pub_key_hash: &[u8]) -> Result<Vec<TXOutput>> {
        let mut utxos = vec![];
        for item in self.utxo_tree()?.iter() {
            let (_, v) = item?;
            let outs = TXOutputs::deserialize(v.as_ref())?;
            utxos.extend(
                outs.iter()
                    .filter(|(_, out)| out.is_locked_with_key(pub_key_hash))
                    .map(|(_, out)| out.clone()),
            );
        }
        Ok(utxos)
    }

    pub fn get_balance(&self, pub_key_hash: &[u8]) -> Result<u64> {
        self.find_utxo(pub_key_hash)?
            .iter()
            .try_fold(0u64, |acc, out| checked_total(acc, out.get_value()))
    }

    /// Number of transactions with at least one unspent output
    pub fn count_transactions(&self) -> Result<u64> {
        let mut counter = 0;
        for item in self.utxo_tree()?.iter() {
            item?;
            counter += 1;
        }
        Ok(counter)
    }

    /// Rebuilds the index from a full chain scan. The old contents are
    /// replaced in a single batch.
    pub fn reindex(&self) -> Result<()> {
        let _writer = self.blockchain.lock_writer();
        let utxo_tree = self.utxo_tree()?;
        let utxo_map = self.blockchain.find_utxo()?;

        // I clear and refill in one batch; readers see the old index or the new one
        let mut batch = Batch::default();
        for key in utxo_tree.iter().keys() {
            batch.remove(key?);
        }
        for (txid_hex, outs) in &utxo_map {
            let txid = HEXLOWER.decode(txid_hex.as_bytes()).map_err(|e| {
                BlockchainError::CorruptRecord(format!("Invalid transaction ID {txid_hex}: {e}"))
            })?;
            batch.insert(txid, outs.serialize()?);
        }
        utxo_tree.apply_batch(batch)?;

        info!("Reindexed UTXO set: {} transactions", utxo_map.len());
        Ok(())
    }

    /// Applies `block` to the index: spent outputs are dropped, new ones
    /// added. All of it commits or none of it does.
    pub fn update(&self, block: &Block) -> Result<()> {
        let _writer = self.blockchain.lock_writer();
        let utxo_tree = self.utxo_tree()?;

        utxo_tree.transaction(|tx_db| -> ConflictableTransactionResult<(), BlockchainError> {
            for tx in block.get_transactions() {
                if !tx.is_coinbase() {
                    for vin in tx.get_vin() {
                        let txid_hex = HEXLOWER.encode(vin.get_txid());
                        let outs_bytes = match tx_db.get(vin.get_txid())? {
                            Some(bytes) => bytes,
                            None => {
                                return Err(ConflictableTransactionError::Abort(
                                    BlockchainError::NotFound(format!(
                                        "Unspent outputs of {txid_hex}"
                                    )),
                                ))
                            }
                        };
                        let mut outs = TXOutputs::deserialize(outs_bytes.as_ref())
                            .map_err(ConflictableTransactionError::Abort)?;

                        // I drop just the spent output; the others keep their positions
                        let removed = vin.output_index().and_then(|idx| outs.remove(idx));
                        if removed.is_none() {
                            return Err(ConflictableTransactionError::Abort(
                                BlockchainError::NotFound(format!(
                                    "Output {txid_hex}:{} in UTXO set",
                                    vin.get_vout()
                                )),
                            ));
                        }

                        if outs.is_empty() {
                            tx_db.remove(vin.get_txid())?;
                        } else {
                            let bytes = outs
                                .serialize()
                                .map_err(ConflictableTransactionError::Abort)?;
                            tx_db.insert(vin.get_txid(), bytes)?;
                        }
                    }
                }

                let new_outputs = TXOutputs::from_transaction(tx);
                if !new_outputs.is_empty() {
                    let bytes = new_outputs
                        .serialize()
                        .map_err(ConflictableTransactionError::Abort)?;
                    tx_db.insert(tx.get_id(), bytes)?;
                }
            }
            Ok(())
        })?;

        debug!("Applied block {} to UTXO set", HEXLOWER.encode(block.get_hash()));
        Ok(())
    }

    /// Raw key/value pairs of the index in key order
    pub fn entries(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.utxo_tree()?
            .iter()
            .map(|item| {
                let (k, v) = item?;
                Ok((k.to_vec(), v.to_vec()))
            })
            .collect()
    }
}

fn checked_total(acc: u64, value: u64) -> Result<u64> {
    acc.checked_add(value).ok_or_else(|| {
        BlockchainError::CorruptRecord(format!("Output values overflow: {acc} + {value}"))
    })
}
