//! Core domain types shared across the game modules.

use crate::money::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Room identifier.
pub type RoomId = Uuid;
/// Persistent player identifier.
pub type UserId = String;
/// Transport session identifier (one per connected client).
pub type SessionId = String;

/// Room tier. Each tier has its own ticket price, capacity and access rules.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Training,
    Satoshi,
    Trader,
    Whale,
}

impl Tier {
    /// All tiers, in ascending stakes order.
    pub fn all() -> [Tier; 4] {
        [Tier::Training, Tier::Satoshi, Tier::Trader, Tier::Whale]
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Training => write!(f, "training"),
            Tier::Satoshi => write!(f, "satoshi"),
            Tier::Trader => write!(f, "trader"),
            Tier::Whale => write!(f, "whale"),
        }
    }
}

/// Direction a player bets the price will move.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "long"),
            Direction::Short => write!(f, "short"),
        }
    }
}

/// Outcome of a resolved round.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RoundResult {
    Long,
    Short,
    Draw,
}

impl RoundResult {
    /// Derives the result from captured prices. A missing price on either
    /// side forces a draw, which refunds every bet.
    pub fn from_prices(start: Option<f64>, end: Option<f64>) -> Self {
        match (start, end) {
            (Some(s), Some(e)) if e > s => RoundResult::Long,
            (Some(s), Some(e)) if e < s => RoundResult::Short,
            _ => RoundResult::Draw,
        }
    }

    /// Whether a bet in `direction` wins under this result.
    pub fn beats(self, direction: Direction) -> bool {
        matches!(
            (self, direction),
            (RoundResult::Long, Direction::Long) | (RoundResult::Short, Direction::Short)
        )
    }
}

/// Phase of an active round. Transitions are linear, one pass per round.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Betting,
    Locked,
    Resolving,
}

/// Lifecycle status of a room.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Boarding,
    Locked,
    InProgress,
    Finished,
}

/// A single player's wager for the current round.
///
/// The amount always equals the room's ticket price; it is never taken from
/// the client. Immutable once the round leaves the betting phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bet {
    pub user_id: UserId,
    pub session_id: SessionId,
    pub amount: Money,
    pub direction: Direction,
    pub placed_at: DateTime<Utc>,
}

/// Historical OHLC record kept per room for chart replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub result: RoundResult,
}

impl Candle {
    /// Builds a candle from round start/end prices with synthetic high/low
    /// jitter so the chart has a wick even on a straight move.
    pub fn synthesize(start: f64, end: f64, result: RoundResult) -> Self {
        let (lo, hi) = if start <= end { (start, end) } else { (end, start) };
        let span = (hi - lo).max(hi * 0.0004);
        // A flat zero-price round has no span to sample a wick from.
        let (wick_up, wick_down) = if span > 0.0 {
            let mut rng = rand::thread_rng();
            (
                rand::Rng::gen_range(&mut rng, 0.0..span * 0.5),
                rand::Rng::gen_range(&mut rng, 0.0..span * 0.5),
            )
        } else {
            (0.0, 0.0)
        };
        Self {
            open: start,
            high: hi + wick_up,
            low: (lo - wick_down).max(0.0),
            close: end,
            result,
        }
    }
}

/// Current oracle reading: mean over live sources plus the per-exchange
/// breakdown it was computed from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub price: f64,
    pub source_count: usize,
    pub per_exchange: Vec<ExchangePrice>,
}

/// One exchange's contribution to a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangePrice {
    pub exchange: String,
    pub price: f64,
}

/// Equipped cosmetic with durability. Owned and persisted by the ledger
/// collaborator; the engine only mutates it through ledger calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skin {
    pub level: u32,
    pub integrity: u32,
    pub max_integrity: u32,
    pub is_burned: bool,
    /// The freebie starter skin, restricted from farming low-stakes rooms.
    pub is_default: bool,
    /// Lifetime spend on this skin, basis for the ash-insurance refund.
    pub total_investment: Money,
}

impl Skin {
    /// A fresh default starter skin.
    pub fn starter() -> Self {
        Self {
            level: 1,
            integrity: 100,
            max_integrity: 100,
            is_burned: false,
            is_default: true,
            total_investment: Money::ZERO,
        }
    }

    /// Reduces integrity, returning true if the skin just burned.
    /// Burning is terminal; further damage on a burned skin is a no-op.
    pub fn take_damage(&mut self, amount: u32) -> bool {
        if self.is_burned {
            return false;
        }
        self.integrity = self.integrity.saturating_sub(amount);
        if self.integrity == 0 {
            self.is_burned = true;
            return true;
        }
        false
    }

    /// Restores integrity up to the maximum. Fails on a burned skin.
    pub fn repair(&mut self, amount: u32) -> bool {
        if self.is_burned {
            return false;
        }
        self.integrity = (self.integrity + amount).min(self.max_integrity);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_from_prices() {
        assert_eq!(RoundResult::from_prices(Some(100.0), Some(105.0)), RoundResult::Long);
        assert_eq!(RoundResult::from_prices(Some(100.0), Some(95.0)), RoundResult::Short);
        assert_eq!(RoundResult::from_prices(Some(100.0), Some(100.0)), RoundResult::Draw);
    }

    #[test]
    fn test_missing_price_forces_draw() {
        assert_eq!(RoundResult::from_prices(None, Some(100.0)), RoundResult::Draw);
        assert_eq!(RoundResult::from_prices(Some(100.0), None), RoundResult::Draw);
        assert_eq!(RoundResult::from_prices(None, None), RoundResult::Draw);
    }

    #[test]
    fn test_result_beats() {
        assert!(RoundResult::Long.beats(Direction::Long));
        assert!(!RoundResult::Long.beats(Direction::Short));
        assert!(!RoundResult::Draw.beats(Direction::Long));
        assert!(!RoundResult::Draw.beats(Direction::Short));
    }

    #[test]
    fn test_skin_burn_is_terminal() {
        let mut skin = Skin::starter();
        assert!(skin.take_damage(100));
        assert!(skin.is_burned);
        // Already burned: no second burn event, no repair.
        assert!(!skin.take_damage(10));
        assert!(!skin.repair(50));
    }

    #[test]
    fn test_skin_repair_caps_at_max() {
        let mut skin = Skin::starter();
        skin.take_damage(30);
        assert!(skin.repair(1000));
        assert_eq!(skin.integrity, skin.max_integrity);
    }

    #[test]
    fn test_zero_price_candle_has_no_wick() {
        let c = Candle::synthesize(0.0, 0.0, RoundResult::Draw);
        assert_eq!(c.high, 0.0);
        assert_eq!(c.low, 0.0);
    }

    #[test]
    fn test_candle_brackets_prices() {
        let c = Candle::synthesize(100.0, 105.0, RoundResult::Long);
        assert!(c.high >= 105.0);
        assert!(c.low <= 100.0);
        assert_eq!(c.open, 100.0);
        assert_eq!(c.close, 105.0);
    }
}
