//! Ledger integration tests
//!
//! End-to-end flows over a real sled store: mining, spending, the UTXO
//! index and reopening a chain from disk.

use data_encoding::HEXLOWER;
use std::collections::BTreeMap;
use tempfile::{tempdir, TempDir};
use utxo_chain::core::{Blockchain, ProofOfWork, TXInput, TXOutput, Transaction, SUBSIDY};
use utxo_chain::storage::UTXOSet;
use utxo_chain::wallet::Wallet;
use utxo_chain::BlockchainError;

// fields drop in order, so the store closes before its directory is removed
struct TestChain {
    alice: Wallet,
    bob: Wallet,
    blockchain: Blockchain,
    utxo_set: UTXOSet,
    dir: TempDir,
}

impl TestChain {
    fn new() -> TestChain {
        let dir = tempdir().unwrap();
        let alice = Wallet::new().unwrap();
        let bob = Wallet::new().unwrap();
        let blockchain =
            Blockchain::create_blockchain(&alice.get_address(), &dir.path().join("chain")).unwrap();
        let utxo_set = UTXOSet::new(blockchain.clone());
        utxo_set.reindex().unwrap();

        TestChain {
            alice,
            bob,
            blockchain,
            utxo_set,
            dir,
        }
    }

    fn balance(&self, wallet: &Wallet) -> u64 {
        self.utxo_set.get_balance(&wallet.get_pub_key_hash()).unwrap()
    }

    fn transfer(&self, from: &Wallet, to: &Wallet, amount: u64) -> Transaction {
        Transaction::new_utxo_transaction(from, &to.get_address(), amount, &self.utxo_set).unwrap()
    }

    fn append(&self, transactions: &[Transaction]) {
        let block = self.blockchain.mine_block(transactions).unwrap();
        self.utxo_set.update(&block).unwrap();
    }
}

fn ground_truth_entries(blockchain: &Blockchain) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut entries: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
    for (txid_hex, outs) in blockchain.find_utxo().unwrap() {
        entries.insert(
            HEXLOWER.decode(txid_hex.as_bytes()).unwrap(),
            outs.serialize().unwrap(),
        );
    }
    entries.into_iter().collect()
}

#[test]
fn test_genesis_then_transfer() {
    let chain = TestChain::new();
    assert_eq!(chain.balance(&chain.alice), SUBSIDY);
    assert_eq!(chain.balance(&chain.bob), 0);

    let genesis = chain
        .blockchain
        .get_block(&chain.blockchain.get_tip_hash())
        .unwrap();
    let genesis_coinbase = genesis.get_transactions()[0].clone();

    let tx = chain.transfer(&chain.alice, &chain.bob, 4);
    assert_eq!(tx.get_vin().len(), 1);
    assert_eq!(tx.get_vout().len(), 2);
    chain.append(&[tx]);

    assert_eq!(chain.balance(&chain.alice), 6);
    assert_eq!(chain.balance(&chain.bob), 4);

    let entries = chain.utxo_set.entries().unwrap();
    assert!(entries
        .iter()
        .all(|(key, _)| key.as_slice() != genesis_coinbase.get_id()));
}

#[test]
fn test_spending_everything_leaves_no_change() {
    let chain = TestChain::new();
    let tx = chain.transfer(&chain.alice, &chain.bob, SUBSIDY);
    assert_eq!(tx.get_vout().len(), 1);

    chain.append(&[tx]);
    assert_eq!(chain.balance(&chain.alice), 0);
    assert_eq!(chain.balance(&chain.bob), SUBSIDY);
}

#[test]
fn test_insufficient_funds() {
    let chain = TestChain::new();
    let result = Transaction::new_utxo_transaction(
        &chain.alice,
        &chain.bob.get_address(),
        SUBSIDY + 1,
        &chain.utxo_set,
    );
    assert_eq!(
        result.unwrap_err(),
        BlockchainError::InsufficientFunds {
            required: SUBSIDY + 1,
            available: SUBSIDY,
        }
    );
}

#[test]
fn test_double_spend_within_one_block() {
    let chain = TestChain::new();
    let carol = Wallet::new().unwrap();
    let tip_before = chain.blockchain.get_tip_hash();

    // both built from the same index, so both spend the genesis output
    let to_bob = chain.transfer(&chain.alice, &chain.bob, 4);
    let to_carol = chain.transfer(&chain.alice, &carol, 3);

    let result = chain.blockchain.mine_block(&[to_bob, to_carol]);
    assert!(matches!(result, Err(BlockchainError::InvalidTransaction(_))));
    assert_eq!(chain.blockchain.get_tip_hash(), tip_before);
}

#[test]
fn test_spent_output_cannot_be_spent_again() {
    let chain = TestChain::new();
    let first = chain.transfer(&chain.alice, &chain.bob, 4);
    let stale = chain.transfer(&chain.alice, &chain.bob, 5);

    chain.append(&[first]);
    let tip = chain.blockchain.get_tip_hash();

    let result = chain.blockchain.mine_block(&[stale]);
    assert!(matches!(result, Err(BlockchainError::InvalidTransaction(_))));
    assert_eq!(chain.blockchain.get_tip_hash(), tip);
}

#[test]
fn test_repeated_transaction_in_one_block() {
    let chain = TestChain::new();
    let tip_before = chain.blockchain.get_tip_hash();

    let tx = chain.transfer(&chain.alice, &chain.bob, 4);
    let result = chain.blockchain.mine_block(&[tx.clone(), tx]);
    assert!(matches!(result, Err(BlockchainError::InvalidTransaction(_))));

    let reward = Transaction::new_coinbase_tx(&chain.bob.get_address(), "reward").unwrap();
    let result = chain.blockchain.mine_block(&[reward.clone(), reward]);
    assert!(matches!(result, Err(BlockchainError::InvalidTransaction(_))));

    assert_eq!(chain.blockchain.get_tip_hash(), tip_before);
}

#[test]
fn test_transaction_id_already_on_chain() {
    let chain = TestChain::new();
    let reward = Transaction::new_coinbase_tx(&chain.bob.get_address(), "reward").unwrap();
    let again = Transaction::new_coinbase_tx(&chain.bob.get_address(), "reward").unwrap();
    assert_eq!(reward.get_id(), again.get_id());

    chain.append(&[reward]);
    chain.append(&[chain.transfer(&chain.bob, &chain.alice, SUBSIDY)]);
    let tip = chain.blockchain.get_tip_hash();

    let result = chain.blockchain.mine_block(&[again]);
    assert!(matches!(result, Err(BlockchainError::InvalidTransaction(_))));
    assert_eq!(chain.blockchain.get_tip_hash(), tip);

    assert_eq!(chain.balance(&chain.bob), 0);
    assert_eq!(chain.balance(&chain.alice), 2 * SUBSIDY);
    assert_eq!(
        chain.utxo_set.entries().unwrap(),
        ground_truth_entries(&chain.blockchain)
    );
}

#[test]
fn test_coinbase_rules() {
    let chain = TestChain::new();
    let address = chain.bob.get_address();

    let inflated = Transaction::from_parts(
        vec![TXInput::new(&[], -1)],
        vec![TXOutput::new_locked(u64::MAX, &chain.bob.get_pub_key_hash())],
    )
    .unwrap();
    assert!(inflated.is_coinbase());
    let result = chain.blockchain.mine_block(&[inflated]);
    assert!(matches!(result, Err(BlockchainError::InvalidTransaction(_))));

    let first = Transaction::new_coinbase_tx(&address, "").unwrap();
    let second = Transaction::new_coinbase_tx(&address, "").unwrap();
    let result = chain.blockchain.mine_block(&[first, second]);
    assert!(matches!(result, Err(BlockchainError::InvalidTransaction(_))));

    let transfer = chain.transfer(&chain.alice, &chain.bob, 4);
    let late = Transaction::new_coinbase_tx(&address, "").unwrap();
    let result = chain.blockchain.mine_block(&[transfer.clone(), late.clone()]);
    assert!(matches!(result, Err(BlockchainError::InvalidTransaction(_))));

    chain.append(&[late, transfer]);
    assert_eq!(chain.balance(&chain.bob), SUBSIDY + 4);
}

#[test]
fn test_foreign_signature_is_rejected() {
    let chain = TestChain::new();
    let mallory = Wallet::new().unwrap();
    let genesis = chain
        .blockchain
        .get_block(&chain.blockchain.get_tip_hash())
        .unwrap();
    let coinbase_id = genesis.get_transactions()[0].get_id().to_vec();

    let mut theft = Transaction::from_parts(
        vec![TXInput::new(&coinbase_id, 0)],
        vec![TXOutput::new_locked(SUBSIDY, &mallory.get_pub_key_hash())],
    )
    .unwrap();
    chain
        .blockchain
        .sign_transaction(&mut theft, mallory.get_pkcs8())
        .unwrap();

    assert!(!chain.blockchain.verify_transaction(&theft).unwrap());
    let result = chain.blockchain.mine_block(&[theft]);
    assert!(matches!(result, Err(BlockchainError::InvalidTransaction(_))));
}

#[test]
fn test_unknown_prior_transaction() {
    let chain = TestChain::new();
    let orphan = Transaction::from_parts(
        vec![TXInput::new(&[0x42; 32], 0)],
        vec![TXOutput::new_locked(1, &chain.bob.get_pub_key_hash())],
    )
    .unwrap();

    let result = chain.blockchain.mine_block(&[orphan]);
    assert!(matches!(
        result,
        Err(BlockchainError::PriorTransactionMissing(_))
    ));
}

#[test]
fn test_iteration_is_tip_to_genesis() {
    let chain = TestChain::new();
    let address = chain.alice.get_address();

    let mut mined = vec![chain.blockchain.get_tip_hash()];
    for i in 0..3 {
        let coinbase = Transaction::new_coinbase_tx(&address, &format!("block {i}")).unwrap();
        let block = chain.blockchain.mine_block(&[coinbase]).unwrap();
        assert!(ProofOfWork::validate(&block).unwrap());
        mined.push(block.get_hash().to_vec());
    }
    mined.reverse();

    let walked = chain.blockchain.get_block_hashes().unwrap();
    assert_eq!(walked, mined);

    let last = chain.blockchain.iterator().last().unwrap().unwrap();
    assert!(last.is_genesis());
    assert_eq!(chain.blockchain.audit().unwrap(), 4);
}

#[test]
fn test_reindex_is_idempotent() {
    let chain = TestChain::new();
    chain.append(&[chain.transfer(&chain.alice, &chain.bob, 4)]);

    chain.utxo_set.reindex().unwrap();
    let first = chain.utxo_set.entries().unwrap();
    chain.utxo_set.reindex().unwrap();
    let second = chain.utxo_set.entries().unwrap();

    assert_eq!(first, second);
}

#[test]
fn test_update_matches_reindex_and_chain_scan() {
    let chain = TestChain::new();
    let carol = Wallet::new().unwrap();

    chain.append(&[chain.transfer(&chain.alice, &chain.bob, 4)]);
    let coinbase = Transaction::new_coinbase_tx(&chain.bob.get_address(), "").unwrap();
    chain.append(&[coinbase]);
    chain.append(&[chain.transfer(&chain.bob, &carol, 7)]);
    chain.append(&[chain.transfer(&chain.alice, &carol, 6)]);

    let updated = chain.utxo_set.entries().unwrap();
    assert_eq!(updated, ground_truth_entries(&chain.blockchain));

    chain.utxo_set.reindex().unwrap();
    assert_eq!(chain.utxo_set.entries().unwrap(), updated);

    assert_eq!(chain.balance(&chain.alice), 0);
    assert_eq!(chain.balance(&chain.bob), 7);
    assert_eq!(chain.balance(&carol), 13);
}

#[test]
fn test_reopen_from_disk() {
    let chain = TestChain::new();
    chain.append(&[chain.transfer(&chain.alice, &chain.bob, 4)]);

    let tip = chain.blockchain.get_tip_hash();
    let entries = chain.utxo_set.entries().unwrap();
    let TestChain {
        alice,
        bob,
        blockchain,
        utxo_set,
        dir,
    } = chain;
    drop(utxo_set);
    drop(blockchain);

    let reopened = Blockchain::open(&dir.path().join("chain")).unwrap();
    assert_eq!(reopened.get_tip_hash(), tip);
    assert_eq!(reopened.audit().unwrap(), 2);

    let utxo_set = UTXOSet::new(reopened);
    assert_eq!(utxo_set.entries().unwrap(), entries);
    assert_eq!(utxo_set.get_balance(&alice.get_pub_key_hash()).unwrap(), 6);
    assert_eq!(utxo_set.get_balance(&bob.get_pub_key_hash()).unwrap(), 4);
}
