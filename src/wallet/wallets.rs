use crate::error::{BlockchainError, Result};
use crate::utils::{deserialize, serialize};
use crate::wallet::Wallet;
use log::debug;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const WALLET_FILE: &str = "wallet.dat";

/// Address -> key pair store backed by one bincode file.
pub struct Wallets {
    path: PathBuf,
    wallets: BTreeMap<String, Wallet>,
}

impl Wallets {
    /// Loads the wallet file at `path`, starting empty when it does not exist.
    pub fn load(path: &Path) -> Result<Wallets> {
        let mut wallets = Wallets {
            path: path.to_path_buf(),
            wallets: BTreeMap::new(),
        };
        if path.exists() {
            let bytes = fs::read(path)?;
            wallets.wallets = deserialize(bytes.as_slice())?;
            debug!("Loaded {} wallets from {}", wallets.wallets.len(), path.display());
        }
        Ok(wallets)
    }

    pub fn create_wallet(&mut self) -> Result<String> {
        let wallet = Wallet::new()?;
        let address = wallet.get_address();
        self.wallets.insert(address.clone(), wallet);
        self.save_to_file()?;
        Ok(address)
    }

    pub fn get_addresses(&self) -> Vec<String> {
        self.wallets.keys().cloned().collect()
    }

    pub fn get_wallet(&self, address: &str) -> Option<&Wallet> {
        self.wallets.get(address)
    }

    pub fn require_wallet(&self, address: &str) -> Result<&Wallet> {
        self.get_wallet(address)
            .ok_or_else(|| BlockchainError::Wallet(format!("Wallet not found for address: {address}")))
    }

    fn save_to_file(&self) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);
        let wallets_bytes = serialize(&self.wallets)?;
        writer.write_all(wallets_bytes.as_slice())?;
        writer.flush()?;
        Ok(())
    }
}
