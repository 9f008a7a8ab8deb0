use crate::error::{BlockchainError, Result};
use crate::wallet::WALLET_FILE;
use log::warn;
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub static GLOBAL_CONFIG: Lazy<Config> = Lazy::new(|| {
    Config::load().unwrap_or_else(|e| {
        warn!("Falling back to default configuration: {e}");
        Config::default()
    })
});

static DEFAULT_DATA_DIR: &str = "data";
static DEFAULT_CONFIG_FILE: &str = "chain.toml";

const CONFIG_FILE_KEY: &str = "UTXO_CHAIN_CONFIG";
const DATA_DIR_KEY: &str = "UTXO_CHAIN_DATA_DIR";
const WALLET_FILE_KEY: &str = "UTXO_CHAIN_WALLET_FILE";

/// Where the chain store and the wallet file live. Consensus parameters are
/// constants and never come from here.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_dir: PathBuf,
    pub wallet_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            wallet_file: PathBuf::from(WALLET_FILE),
        }
    }
}

impl Config {
    /// Reads the TOML file named by `UTXO_CHAIN_CONFIG` (default
    /// `chain.toml`, optional), then applies environment overrides.
    pub fn load() -> Result<Config> {
        let path = env::var(CONFIG_FILE_KEY).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        let mut config = Config::from_file(Path::new(&path))?;
        config.apply_overrides(
            env::var(DATA_DIR_KEY).ok(),
            env::var(WALLET_FILE_KEY).ok(),
        );
        Ok(config)
    }

    /// Missing file yields the defaults.
    pub fn from_file(path: &Path) -> Result<Config> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let contents = fs::read_to_string(path).map_err(|e| {
            BlockchainError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Config::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Config> {
        Ok(toml::from_str(contents)?)
    }

    fn apply_overrides(&mut self, data_dir: Option<String>, wallet_file: Option<String>) {
        if let Some(dir) = data_dir {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(file) = wallet_file {
            self.wallet_file = PathBuf::from(file);
        }
    }

    pub fn get_data_dir(&self) -> &Path {
        self.data_dir.as_path()
    }

    pub fn get_wallet_file(&self) -> &Path {
        self.wallet_file.as_path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.get_data_dir(), Path::new("data"));
        assert_eq!(config.get_wallet_file(), Path::new(WALLET_FILE));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml_str("data_dir = \"/var/lib/chain\"\n").unwrap();
        assert_eq!(config.get_data_dir(), Path::new("/var/lib/chain"));
        assert_eq!(config.get_wallet_file(), Path::new(WALLET_FILE));
    }

    #[test]
    fn test_malformed_toml() {
        let result = Config::from_toml_str("data_dir = [");
        assert!(matches!(result, Err(BlockchainError::Config(_))));
    }

    #[test]
    fn test_missing_file_and_overrides() {
        let dir = tempdir().unwrap();
        let mut config = Config::from_file(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());

        config.apply_overrides(Some("/tmp/chain".to_string()), None);
        assert_eq!(config.get_data_dir(), Path::new("/tmp/chain"));
        assert_eq!(config.get_wallet_file(), Path::new(WALLET_FILE));
    }

    #[test]
    fn test_reads_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chain.toml");
        fs::write(&path, "data_dir = \"ledger\"\nwallet_file = \"keys.dat\"\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.get_data_dir(), Path::new("ledger"));
        assert_eq!(config.get_wallet_file(), Path::new("keys.dat"));
    }
}
