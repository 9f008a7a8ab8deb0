// Value moves through the ledger as transactions: each one consumes earlier
// outputs through its inputs and creates new outputs locked to a public key hash.

use crate::error::{BlockchainError, Result};
use crate::storage::UTXOSet;
use crate::utils::{
    deserialize, ecdsa_p256_sha256_sign_digest, ecdsa_p256_sha256_sign_verify,
    public_key_from_pkcs8, serialize, sha256_digest,
};
use crate::wallet::{hash_pub_key, locking_hash_from_address, validate_address, Wallet};
use data_encoding::HEXLOWER;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Reward paid by every coinbase transaction
pub const SUBSIDY: u64 = 10;

/// Output index carried by the single input of a coinbase transaction
pub const COINBASE_VOUT: i32 = -1;

#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct TXInput {
    txid: Vec<u8>,      // ID of the transaction holding the spent output
    vout: i32,          // index of that output, -1 for coinbase
    signature: Vec<u8>, // ECDSA signature over the trimmed copy
    pub_key: Vec<u8>,   // raw public key; arbitrary data for coinbase
}

impl TXInput {
    pub fn new(txid: &[u8], vout: i32) -> TXInput {
        TXInput {
            txid: txid.to_vec(),
            vout,
            signature: vec![],
            pub_key: vec![],
        }
    }

    pub fn get_txid(&self) -> &[u8] {
        self.txid.as_slice()
    }

    pub fn get_vout(&self) -> i32 {
        self.vout
    }

    /// The referenced output index, `None` for the coinbase marker.
    pub fn output_index(&self) -> Option<usize> {
        usize::try_from(self.vout).ok()
    }

    pub fn get_signature(&self) -> &[u8] {
        self.signature.as_slice()
    }

    pub fn get_pub_key(&self) -> &[u8] {
        self.pub_key.as_slice()
    }

    pub fn uses_key(&self, pub_key_hash: &[u8]) -> bool {
        hash_pub_key(self.pub_key.as_slice()).eq(pub_key_hash)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct TXOutput {
    value: u64,
    pub_key_hash: Vec<u8>, // locking hash of the recipient
}

impl TXOutput {
    /// Output paying `value` to a base58check address.
    pub fn new(value: u64, address: &str) -> Result<TXOutput> {
        Ok(TXOutput {
            value,
            pub_key_hash: locking_hash_from_address(address)?,
        })
    }

    pub fn new_locked(value: u64, pub_key_hash: &[u8]) -> TXOutput {
        TXOutput {
            value,
            pub_key_hash: pub_key_hash.to_vec(),
        }
    }

    pub fn get_value(&self) -> u64 {
        self.value
    }

    pub fn get_pub_key_hash(&self) -> &[u8] {
        self.pub_key_hash.as_slice()
    }

    pub fn is_locked_with_key(&self, pub_key_hash: &[u8]) -> bool {
        self.pub_key_hash.eq(pub_key_hash)
    }
}

/// Unspent outputs of one transaction, keyed by their original output index.
///
/// Keeping the index means a partially spent transaction still reports the
/// right `vout` for the outputs that remain.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct TXOutputs {
    outputs: BTreeMap<usize, TXOutput>,
}

impl TXOutputs {
    pub fn new() -> TXOutputs {
        TXOutputs::default()
    }

    pub fn from_transaction(tx: &Transaction) -> TXOutputs {
        TXOutputs {
            outputs: tx.vout.iter().cloned().enumerate().collect(),
        }
    }

    pub fn insert(&mut self, index: usize, output: TXOutput) {
        self.outputs.insert(index, output);
    }

    pub fn remove(&mut self, index: usize) -> Option<TXOutput> {
        self.outputs.remove(&index)
    }

    pub fn get(&self, index: usize) -> Option<&TXOutput> {
        self.outputs.get(&index)
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &TXOutput)> {
        self.outputs.iter().map(|(idx, out)| (*idx, out))
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<TXOutputs> {
        deserialize(bytes)
    }
}

#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    id: Vec<u8>,
    vin: Vec<TXInput>,
    vout: Vec<TXOutput>,
}

impl Transaction {
    /// Block reward paying [`SUBSIDY`] to `to`.
    ///
    /// `data` is stored in the input's public-key slot; an empty string is
    /// replaced with random bytes so two rewards to the same address never
    /// share an ID.
    pub fn new_coinbase_tx(to: &str, data: &str) -> Result<Transaction> {
        let txout = TXOutput::new(SUBSIDY, to)?;
        let data = if data.is_empty() {
            Uuid::new_v4().as_bytes().to_vec()
        } else {
            data.as_bytes().to_vec()
        };
        let tx_input = TXInput {
            txid: vec![],
            vout: COINBASE_VOUT,
            signature: vec![],
            pub_key: data,
        };

        let mut tx = Transaction {
            id: vec![],
            vin: vec![tx_input],
            vout: vec![txout],
        };
        tx.id = tx.hash()?;
        Ok(tx)
    }

    /// Transfer of `amount` from the wallet's address to `to`, signed against
    /// the chain behind `utxo_set`.
    pub fn new_utxo_transaction(
        wallet: &Wallet,
        to: &str,
        amount: u64,
        utxo_set: &UTXOSet,
    ) -> Result<Transaction> {
        if amount == 0 {
            return Err(BlockchainError::InvalidTransaction(
                "Amount must be positive".to_string(),
            ));
        }
        if !validate_address(to) {
            return Err(BlockchainError::InvalidAddress(format!(
                "Invalid to address: {to}"
            )));
        }

        let pub_key_hash = wallet.get_pub_key_hash();
        let (accumulated, valid_outputs) =
            utxo_set.find_spendable_outputs(pub_key_hash.as_slice(), amount)?;

        if accumulated < amount {
            return Err(BlockchainError::InsufficientFunds {
                required: amount,
                available: accumulated,
            });
        }

        let mut inputs = vec![];
        for (txid_hex, outs) in valid_outputs {
            let txid = HEXLOWER.decode(txid_hex.as_bytes()).map_err(|e| {
                BlockchainError::CorruptRecord(format!("Invalid transaction ID {txid_hex}: {e}"))
            })?;
            for out in outs {
                let vout = i32::try_from(out).map_err(|_| {
                    BlockchainError::CorruptRecord(format!("Output index {out} out of range"))
                })?;
                inputs.push(TXInput {
                    txid: txid.clone(),
                    vout,
                    signature: vec![],
                    pub_key: wallet.get_public_key().to_vec(),
                });
            }
        }

        let mut outputs = vec![TXOutput::new(amount, to)?];
        if accumulated > amount {
            outputs.push(TXOutput::new_locked(
                accumulated - amount,
                pub_key_hash.as_slice(),
            ));
        }

        let mut tx = Transaction {
            id: vec![],
            vin: inputs,
            vout: outputs,
        };
        tx.id = tx.hash()?;

        utxo_set
            .get_blockchain()
            .sign_transaction(&mut tx, wallet.get_pkcs8())?;
        Ok(tx)
    }

    /// Assembles a transaction from parts and computes its ID. Inputs are
    /// left unsigned.
    pub fn from_parts(vin: Vec<TXInput>, vout: Vec<TXOutput>) -> Result<Transaction> {
        let mut tx = Transaction {
            id: vec![],
            vin,
            vout,
        };
        tx.id = tx.hash()?;
        Ok(tx)
    }

    fn trimmed_copy(&self) -> Transaction {
        Transaction {
            id: vec![],
            vin: self
                .vin
                .iter()
                .map(|input| TXInput::new(input.get_txid(), input.get_vout()))
                .collect(),
            vout: self.vout.clone(),
        }
    }

    // The digest input `idx` signs: the trimmed copy with that input carrying
    // the locking hash of the output it spends.
    fn trimmed_digest(tx_copy: &mut Transaction, idx: usize, locking_hash: &[u8]) -> Result<Vec<u8>> {
        tx_copy.vin[idx].pub_key = locking_hash.to_vec();
        let digest = sha256_digest(Transaction::serialize(tx_copy)?.as_slice());
        tx_copy.vin[idx].pub_key = vec![];
        Ok(digest)
    }

    fn prior_output<'a>(
        input: &TXInput,
        prev_txs: &'a HashMap<String, Transaction>,
    ) -> Result<Option<&'a TXOutput>> {
        let txid_hex = HEXLOWER.encode(input.get_txid());
        let prev_tx = prev_txs
            .get(txid_hex.as_str())
            .ok_or(BlockchainError::PriorTransactionMissing(txid_hex))?;
        Ok(input
            .output_index()
            .and_then(|idx| prev_tx.vout.get(idx)))
    }

    /// Signs every input with the key in `pkcs8`. `prev_txs` maps hex
    /// transaction IDs to the transactions the inputs spend from.
    pub fn sign(&mut self, pkcs8: &[u8], prev_txs: &HashMap<String, Transaction>) -> Result<()> {
        if self.is_coinbase() {
            return Ok(());
        }

        let public_key = public_key_from_pkcs8(pkcs8)?;
        let mut tx_copy = self.trimmed_copy();

        for idx in 0..self.vin.len() {
            let locking_hash = Self::prior_output(&self.vin[idx], prev_txs)?
                .map(|out| out.pub_key_hash.clone())
                .ok_or_else(|| {
                    BlockchainError::InvalidTransaction(format!(
                        "Input {idx} references a missing output index {}",
                        self.vin[idx].vout
                    ))
                })?;

            let digest = Self::trimmed_digest(&mut tx_copy, idx, locking_hash.as_slice())?;
            self.vin[idx].signature = ecdsa_p256_sha256_sign_digest(pkcs8, digest.as_slice())?;
            self.vin[idx].pub_key = public_key.clone();
        }
        Ok(())
    }

    /// Checks ownership, signatures and value conservation of every input.
    ///
    /// Mismatches return `Ok(false)`; an unresolvable prior transaction is an
    /// error.
    pub fn verify(&self, prev_txs: &HashMap<String, Transaction>) -> Result<bool> {
        if self.is_coinbase() {
            return Ok(true);
        }
        if self.vin.is_empty() {
            warn!("Transaction {} has no inputs", HEXLOWER.encode(&self.id));
            return Ok(false);
        }
        if self.id != self.hash()? {
            warn!("Transaction {} does not match its content hash", HEXLOWER.encode(&self.id));
            return Ok(false);
        }

        let mut tx_copy = self.trimmed_copy();
        let mut input_value = 0u64;

        for (idx, vin) in self.vin.iter().enumerate() {
            let prev_output = match Self::prior_output(vin, prev_txs)? {
                Some(out) => out,
                None => {
                    warn!("Input {idx} references an output that does not exist");
                    return Ok(false);
                }
            };

            if !vin.uses_key(prev_output.get_pub_key_hash()) {
                warn!("Input {idx} is not signed by the owner of the output it spends");
                return Ok(false);
            }

            let digest = Self::trimmed_digest(&mut tx_copy, idx, prev_output.get_pub_key_hash())?;
            if !ecdsa_p256_sha256_sign_verify(
                vin.pub_key.as_slice(),
                vin.signature.as_slice(),
                digest.as_slice(),
            ) {
                warn!("Input {idx} carries an invalid signature");
                return Ok(false);
            }

            input_value = match input_value.checked_add(prev_output.get_value()) {
                Some(sum) => sum,
                None => return Ok(false),
            };
        }

        let output_value = match self
            .vout
            .iter()
            .try_fold(0u64, |acc, out| acc.checked_add(out.get_value()))
        {
            Some(sum) => sum,
            None => return Ok(false),
        };

        if input_value != output_value {
            warn!("Transaction does not balance: inputs={input_value}, outputs={output_value}");
            return Ok(false);
        }

        debug!("Verified transaction {}", HEXLOWER.encode(&self.id));
        Ok(true)
    }

    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && self.vin[0].txid.is_empty() && self.vin[0].vout == COINBASE_VOUT
    }

    /// Content hash with the ID and, outside coinbase, every signature and
    /// public key cleared.
    pub fn hash(&self) -> Result<Vec<u8>> {
        let mut tx_copy = self.clone();
        tx_copy.id = vec![];
        if !tx_copy.is_coinbase() {
            for input in tx_copy.vin.iter_mut() {
                input.signature = vec![];
                input.pub_key = vec![];
            }
        }
        Ok(sha256_digest(tx_copy.serialize()?.as_slice()))
    }

    pub fn get_id(&self) -> &[u8] {
        self.id.as_slice()
    }

    pub fn get_vin(&self) -> &[TXInput] {
        self.vin.as_slice()
    }

    pub fn get_vout(&self) -> &[TXOutput] {
        self.vout.as_slice()
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Transaction> {
        deserialize(bytes)
    }
}
