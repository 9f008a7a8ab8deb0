//! Data storage and persistence
//!
//! Blocks live in the `blocks` tree owned by [`crate::core::Blockchain`];
//! this module holds the derived UTXO index kept next to them.

pub mod utxo_set;

pub use utxo_set::UTXOSet;
