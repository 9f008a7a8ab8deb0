//! Wallet and address handling
//!
//! Key pairs, base58check addresses and the locking hashes outputs are paid to.

#[allow(clippy::module_inception)]
pub mod wallet;
pub mod wallets;

pub use wallet::{
    convert_address, hash_pub_key, locking_hash_from_address, validate_address, Wallet,
    ADDRESS_CHECK_SUM_LEN,
};
pub use wallets::{Wallets, WALLET_FILE};
