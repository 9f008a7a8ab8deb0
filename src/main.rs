use clap::Parser;
use data_encoding::HEXLOWER;
use log::{error, LevelFilter};
use std::process;
use utxo_chain::{
    convert_address, hash_pub_key, locking_hash_from_address, validate_address, Blockchain,
    Command, Opt, ProofOfWork, Transaction, UTXOSet, Wallets, GLOBAL_CONFIG,
};

fn main() {
    // I log at Info level so mining and appends show up
    env_logger::builder().filter_level(LevelFilter::Info).init();

    let opt = Opt::parse();
    // Any error ends the process with code 1 after I log it
    if let Err(e) = run_command(opt.command) {
        error!("Error: {e}");
        process::exit(1);
    }
}

// Each subcommand maps onto one ledger operation
fn run_command(command: Command) -> Result<(), Box<dyn std::error::Error>> {
    let data_dir = GLOBAL_CONFIG.get_data_dir();

    match command {
        Command::Createblockchain { address } => {
            if !validate_address(&address) {
                return Err(format!("Invalid address: {address}").into());
            }
            // I mine the genesis block here, then build the index from it
            let blockchain = Blockchain::create_blockchain(&address, data_dir)?;
            let utxo_set = UTXOSet::new(blockchain);
            utxo_set.reindex()?;
            println!("Done!");
        }
        Command::Createwallet => {
            let mut wallets = Wallets::load(GLOBAL_CONFIG.get_wallet_file())?;
            let address = wallets.create_wallet()?;
            println!("Your new address: {address}")
        }
        Command::GetBalance { address } => {
            // The balance is whatever the index holds for this address's key hash
            let pub_key_hash = locking_hash_from_address(&address)?;
            let utxo_set = UTXOSet::new(Blockchain::open(data_dir)?);
            let balance = utxo_set.get_balance(&pub_key_hash)?;
            println!("Balance of {address}: {balance}");
        }
        Command::ListAddresses => {
            let wallets = Wallets::load(GLOBAL_CONFIG.get_wallet_file())?;
            for address in wallets.get_addresses() {
                println!("{address}")
            }
        }
        Command::Send { from, to, amount } => {
            if !validate_address(&from) {
                return Err(format!("Invalid sender address: {from}").into());
            }
            if !validate_address(&to) {
                return Err(format!("Invalid recipient address: {to}").into());
            }

            let wallets = Wallets::load(GLOBAL_CONFIG.get_wallet_file())?;
            let wallet = wallets.require_wallet(&from)?;

            let blockchain = Blockchain::open(data_dir)?;
            let utxo_set = UTXOSet::new(blockchain.clone());

            let transaction = Transaction::new_utxo_transaction(wallet, &to, amount, &utxo_set)?;
            // I let the sender mine the block and collect the subsidy
            let coinbase_tx = Transaction::new_coinbase_tx(&from, "")?;
            let block = blockchain.mine_block(&[coinbase_tx, transaction])?;
            // The index only moves after the block is safely on disk
            utxo_set.update(&block)?;
            println!("Success!")
        }
        Command::Printchain => {
            // I walk from the tip back to genesis
            for block in Blockchain::open(data_dir)?.iterator() {
                let block = block?;
                println!("Pre block hash: {}", HEXLOWER.encode(block.get_pre_block_hash()));
                println!("Cur block hash: {}", HEXLOWER.encode(block.get_hash()));
                println!("Cur block Timestamp: {}", block.get_timestamp());
                println!("Nonce: {}", block.get_nonce());
                println!("PoW valid: {}", ProofOfWork::validate(&block)?);

                for tx in block.get_transactions() {
                    println!("- Transaction txid_hex: {}", HEXLOWER.encode(tx.get_id()));

                    if !tx.is_coinbase() {
                        for input in tx.get_vin() {
                            let pub_key_hash = hash_pub_key(input.get_pub_key());
                            println!(
                                "-- Input txid = {}, vout = {}, from = {}",
                                HEXLOWER.encode(input.get_txid()),
                                input.get_vout(),
                                convert_address(pub_key_hash.as_slice()),
                            )
                        }
                    }
                    for output in tx.get_vout() {
                        println!(
                            "-- Output value = {}, to = {}",
                            output.get_value(),
                            convert_address(output.get_pub_key_hash()),
                        )
                    }
                }
                println!()
            }
        }
        Command::Reindexutxo => {
            let utxo_set = UTXOSet::new(Blockchain::open(data_dir)?);
            utxo_set.reindex()?;
            let count = utxo_set.count_transactions()?;
            println!("Done! There are {count} transactions in the UTXO set.");
        }
        Command::Audit => {
            let count = Blockchain::open(data_dir)?.audit()?;
            println!("Chain is consistent: {count} blocks checked.");
        }
    }
    Ok(())
}
