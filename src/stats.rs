//! House bookkeeping and the aggregated stats endpoint.

use crate::engine::RoundSnapshot;
use crate::money::Money;
use crate::oracle::PriceOracle;
use crate::registry::{RoomInfo, RoomRegistry};
use crate::types::PriceSnapshot;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Lifetime house counters, written by engines as rounds settle. All fields
/// are monotonic; readers may observe a snapshot mid-settlement.
#[derive(Default)]
pub struct HouseBook {
    rounds_resolved: AtomicU64,
    fees_minor: AtomicU64,
    dispersed_minor: AtomicU64,
    paid_out_minor: AtomicU64,
    burns: AtomicU64,
    biggest_win_minor: AtomicU64,
}

impl HouseBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called once per resolved round with the house fee it produced and
    /// any dispersion transfer that fired.
    pub fn record_round(&self, fee: Money, dispersion: Money) {
        self.rounds_resolved.fetch_add(1, Ordering::Relaxed);
        self.fees_minor.fetch_add(fee.minor(), Ordering::Relaxed);
        self.dispersed_minor
            .fetch_add(dispersion.minor(), Ordering::Relaxed);
    }

    pub fn record_win(&self, payout: Money) {
        self.paid_out_minor
            .fetch_add(payout.minor(), Ordering::Relaxed);
        self.biggest_win_minor
            .fetch_max(payout.minor(), Ordering::Relaxed);
    }

    pub fn record_burn(&self) {
        self.burns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HouseSnapshot {
        HouseSnapshot {
            rounds_resolved: self.rounds_resolved.load(Ordering::Relaxed),
            fees_collected: Money::from_minor(self.fees_minor.load(Ordering::Relaxed)),
            dispersed: Money::from_minor(self.dispersed_minor.load(Ordering::Relaxed)),
            paid_out: Money::from_minor(self.paid_out_minor.load(Ordering::Relaxed)),
            burns: self.burns.load(Ordering::Relaxed),
            biggest_win: Money::from_minor(self.biggest_win_minor.load(Ordering::Relaxed)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HouseSnapshot {
    pub rounds_resolved: u64,
    pub fees_collected: Money,
    pub dispersed: Money,
    pub paid_out: Money,
    pub burns: u64,
    pub biggest_win: Money,
}

/// Full stats payload served over HTTP.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub online_sessions: usize,
    pub active_trips: usize,
    pub rooms: Vec<RoomInfo>,
    /// In-flight round state per running trip (phase, pool, bet tally).
    pub rounds: Vec<RoundSnapshot>,
    pub price: Option<PriceSnapshot>,
    pub house: HouseSnapshot,
}

/// Read-side aggregator over the live game components.
pub struct StatsAggregator {
    registry: Arc<RoomRegistry>,
    oracle: Arc<PriceOracle>,
    book: Arc<HouseBook>,
}

impl StatsAggregator {
    pub fn new(registry: Arc<RoomRegistry>, oracle: Arc<PriceOracle>, book: Arc<HouseBook>) -> Self {
        Self {
            registry,
            oracle,
            book,
        }
    }

    /// Recomputed from live state on every call; nothing is cached.
    pub async fn snapshot(&self) -> StatsSnapshot {
        let rooms = self.registry.rooms_info();
        let mut rounds = Vec::new();
        for room in &rooms {
            if let Some(engine) = self.registry.engine_for(room.id) {
                rounds.push(engine.snapshot().await);
            }
        }
        StatsSnapshot {
            online_sessions: self.registry.online_sessions(),
            active_trips: rounds.len(),
            rooms,
            rounds,
            price: self.oracle.snapshot(),
            house: self.book.snapshot(),
        }
    }
}
