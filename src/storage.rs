//! Accumulated-pot persistence for crash recovery.
//!
//! Rolled-over pots are real player money; they must survive a process
//! restart, along with the winnerless streak that drives the dispersion
//! rule. The store is a string-keyed map of u64 values, backed by RocksDB
//! in production and a DashMap in tests.

use crate::errors::StorageError;
use crate::money::Money;
use dashmap::DashMap;
use rocksdb::{Options, DB};
use std::path::Path;
use std::sync::Arc;

/// Persistent store for accumulated pots and tier rollover pools.
pub trait PotStore: Send + Sync {
    /// Loads the value under `key`, zero if absent.
    fn load_pot(&self, key: &str) -> Result<Money, StorageError>;

    /// Stores the value under `key`.
    fn store_pot(&self, key: &str, value: Money) -> Result<(), StorageError>;

    /// Loads the counter under `key`, zero if absent.
    fn load_counter(&self, key: &str) -> Result<u64, StorageError>;

    /// Stores the counter under `key`.
    fn store_counter(&self, key: &str, value: u64) -> Result<(), StorageError>;
}

/// RocksDB-backed pot store.
pub struct RocksPotStore {
    db: Arc<DB>,
}

impl RocksPotStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path).map_err(|e| StorageError::OpenFailed(e.to_string()))?;
        Ok(Self { db: Arc::new(db) })
    }

    fn get_u64(&self, key: &str) -> Result<Option<u64>, StorageError> {
        match self
            .db
            .get(key.as_bytes())
            .map_err(|e| StorageError::ReadFailed(e.to_string()))?
        {
            None => Ok(None),
            Some(bytes) => {
                let array: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| StorageError::CorruptedValue(key.to_string()))?;
                Ok(Some(u64::from_le_bytes(array)))
            }
        }
    }

    fn put_u64(&self, key: &str, value: u64) -> Result<(), StorageError> {
        self.db
            .put(key.as_bytes(), value.to_le_bytes())
            .map_err(|e| StorageError::WriteFailed(e.to_string()))
    }
}

impl PotStore for RocksPotStore {
    fn load_pot(&self, key: &str) -> Result<Money, StorageError> {
        Ok(self
            .get_u64(key)?
            .map(Money::from_minor)
            .unwrap_or(Money::ZERO))
    }

    fn store_pot(&self, key: &str, value: Money) -> Result<(), StorageError> {
        self.put_u64(key, value.minor())
    }

    fn load_counter(&self, key: &str) -> Result<u64, StorageError> {
        Ok(self.get_u64(key)?.unwrap_or(0))
    }

    fn store_counter(&self, key: &str, value: u64) -> Result<(), StorageError> {
        self.put_u64(key, value)
    }
}

/// In-memory pot store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryPotStore {
    pots: DashMap<String, u64>,
}

impl MemoryPotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PotStore for MemoryPotStore {
    fn load_pot(&self, key: &str) -> Result<Money, StorageError> {
        Ok(self
            .pots
            .get(key)
            .map(|v| Money::from_minor(*v))
            .unwrap_or(Money::ZERO))
    }

    fn store_pot(&self, key: &str, value: Money) -> Result<(), StorageError> {
        self.pots.insert(key.to_string(), value.minor());
        Ok(())
    }

    fn load_counter(&self, key: &str) -> Result<u64, StorageError> {
        Ok(self.pots.get(key).map(|v| *v).unwrap_or(0))
    }

    fn store_counter(&self, key: &str, value: u64) -> Result<(), StorageError> {
        self.pots.insert(key.to_string(), value);
        Ok(())
    }
}

/// Store key for a tier's rollover pool.
pub fn tier_pot_key(tier: crate::types::Tier) -> String {
    format!("rollover_pot_{}", tier)
}

/// Store key for a tier's winnerless-streak counter.
pub fn tier_streak_key(tier: crate::types::Tier) -> String {
    format!("rollover_streak_{}", tier)
}
