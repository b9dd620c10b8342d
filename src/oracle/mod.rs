//! Multi-exchange price oracle.
//!
//! Maintains a best-effort live mid-price aggregated from three independent
//! streaming feeds. Each feed owns one slot in the price map and is the only
//! writer to it; a disconnect clears the slot immediately so a dead feed
//! never contributes a stale price. Readers take the unweighted mean over
//! whatever slots are live.

pub mod feeds;

use crate::config::OracleConfig;
use crate::types::{ExchangePrice, PriceSnapshot};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// The exchanges the oracle subscribes to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeId {
    Binance,
    Coinbase,
    Kraken,
}

impl ExchangeId {
    pub fn all() -> [ExchangeId; 3] {
        [ExchangeId::Binance, ExchangeId::Coinbase, ExchangeId::Kraken]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExchangeId::Binance => "binance",
            ExchangeId::Coinbase => "coinbase",
            ExchangeId::Kraken => "kraken",
        }
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregated live price over independent exchange feeds.
///
/// Built once at startup and dependency-injected into every consumer; there
/// is deliberately no global instance.
pub struct PriceOracle {
    slots: DashMap<ExchangeId, f64>,
    config: OracleConfig,
}

impl PriceOracle {
    pub fn new(config: OracleConfig) -> Arc<Self> {
        Arc::new(Self {
            slots: DashMap::new(),
            config,
        })
    }

    /// Spawns one independent feed task per exchange. Each task handles its
    /// own reconnect schedule; the tasks never touch each other's slots.
    pub fn start(self: &Arc<Self>) {
        for exchange in ExchangeId::all() {
            let oracle = Arc::clone(self);
            let config = self.config.clone();
            tokio::spawn(async move {
                feeds::run_feed(oracle, exchange, config).await;
            });
        }
        info!("price oracle started with {} feeds", ExchangeId::all().len());
    }

    /// Records the latest tick for one exchange. Feed tasks and tests are
    /// the only callers.
    pub fn set_last_price(&self, exchange: ExchangeId, price: f64) {
        self.slots.insert(exchange, price);
    }

    /// Drops an exchange from the average, called the moment its connection
    /// closes. A price is trusted only while its socket is open.
    pub fn clear_price(&self, exchange: ExchangeId) {
        self.slots.remove(&exchange);
    }

    /// Unweighted mean of all live sources; `None` when none are connected.
    pub fn current_price(&self) -> Option<f64> {
        let mut sum = 0.0;
        let mut count = 0usize;
        for entry in self.slots.iter() {
            sum += *entry.value();
            count += 1;
        }
        if count == 0 {
            None
        } else {
            Some(sum / count as f64)
        }
    }

    /// Number of currently connected sources.
    pub fn source_count(&self) -> usize {
        self.slots.len()
    }

    /// Full reading with the per-exchange breakdown, `None` when no source
    /// is live.
    pub fn snapshot(&self) -> Option<PriceSnapshot> {
        let per_exchange: Vec<ExchangePrice> = self
            .slots
            .iter()
            .map(|entry| ExchangePrice {
                exchange: entry.key().to_string(),
                price: *entry.value(),
            })
            .collect();
        if per_exchange.is_empty() {
            return None;
        }
        let price = per_exchange.iter().map(|e| e.price).sum::<f64>() / per_exchange.len() as f64;
        Some(PriceSnapshot {
            price,
            source_count: per_exchange.len(),
            per_exchange,
        })
    }
}
