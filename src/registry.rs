//! Room ("bus") lifecycle and seat admission.
//!
//! The registry owns every room, the session -> room index and the room ->
//! engine mapping (queried, never stored on the room itself). Seat admission
//! mutates a room only under its own map guard, so the fill trigger can fire
//! exactly once even under concurrent boarding.

use crate::config::GameConfig;
use crate::engine::RoundEngine;
use crate::errors::AdmissionError;
use crate::ledger::{Currency, Ledger};
use crate::money::Money;
use crate::types::{Candle, RoomId, RoomStatus, SessionId, Tier, UserId};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

/// The only legal room capacities. Anything else is coerced to the
/// configured default.
pub const FIBONACCI_CAPACITIES: [usize; 10] = [2, 3, 5, 8, 13, 21, 34, 55, 89, 144];

/// A fixed-capacity game room.
#[derive(Debug)]
pub struct Room {
    pub id: RoomId,
    pub tier: Tier,
    pub ticket_price: Money,
    pub capacity: usize,
    pub seats: HashMap<SessionId, UserId>,
    pub status: RoomStatus,
    pub created_at: Instant,
    pub last_fill: Option<Duration>,
    /// Monotonic round counter; survives room resets.
    pub rounds_played: u64,
    /// Bounded chart-replay history; survives room resets.
    pub candles: VecDeque<Candle>,
    // Tier rules copied at creation so admission never needs a config lookup.
    min_skin_level: u32,
    allow_default_skin: bool,
}

/// Public projection of a room for listings and stats.
#[derive(Debug, Clone, Serialize)]
pub struct RoomInfo {
    pub id: RoomId,
    pub tier: Tier,
    pub ticket_price: Money,
    pub capacity: usize,
    pub seated: usize,
    pub status: RoomStatus,
}

/// Returned when a seat completes a room. Fires exactly once per fill; the
/// caller is expected to start the room's engine.
#[derive(Debug)]
pub struct FillSignal {
    pub room_id: RoomId,
    pub fill_duration: Duration,
    /// Sibling room created by the mitosis heuristic, if the fill was fast.
    pub sibling: Option<RoomId>,
}

/// Pot carried between trips of the same tier, with the winnerless streak
/// that drives the dispersion rule.
#[derive(Debug, Clone, Copy)]
struct RolloverPool {
    pot: Money,
    streak: u32,
}

pub struct RoomRegistry {
    rooms: DashMap<RoomId, Room>,
    engines: DashMap<RoomId, Arc<RoundEngine>>,
    sessions: DashMap<SessionId, RoomId>,
    /// Pots inherited by the next trip of the same tier.
    tier_rollover: DashMap<Tier, RolloverPool>,
    config: Arc<GameConfig>,
    ledger: Arc<dyn Ledger>,
}

impl RoomRegistry {
    pub fn new(config: Arc<GameConfig>, ledger: Arc<dyn Ledger>) -> Self {
        Self {
            rooms: DashMap::new(),
            engines: DashMap::new(),
            sessions: DashMap::new(),
            tier_rollover: DashMap::new(),
            config,
            ledger,
        }
    }

    /// Creates the initial room for every configured tier.
    pub fn seed_default_rooms(&self) {
        for tier_cfg in &self.config.rooms.tiers {
            let id = self.create_room(tier_cfg.tier, tier_cfg.ticket_price, tier_cfg.capacity);
            info!(room_id = %id, tier = %tier_cfg.tier, "seeded room");
        }
    }

    /// Creates a room. A capacity outside the Fibonacci set is coerced to
    /// the configured default rather than rejected.
    pub fn create_room(&self, tier: Tier, ticket_price: Money, capacity: usize) -> RoomId {
        let capacity = self.coerce_capacity(capacity);
        let (min_skin_level, allow_default_skin) = self
            .config
            .tier(tier)
            .map(|t| (t.min_skin_level, t.allow_default_skin))
            .unwrap_or((1, true));
        let id = Uuid::new_v4();
        self.rooms.insert(
            id,
            Room {
                id,
                tier,
                ticket_price,
                capacity,
                seats: HashMap::new(),
                status: RoomStatus::Boarding,
                created_at: Instant::now(),
                last_fill: None,
                rounds_played: 0,
                candles: VecDeque::new(),
                min_skin_level,
                allow_default_skin,
            },
        );
        id
    }

    fn coerce_capacity(&self, requested: usize) -> usize {
        if FIBONACCI_CAPACITIES.contains(&requested) {
            requested
        } else {
            warn!(
                requested,
                default = self.config.rooms.default_capacity,
                "capacity not in the Fibonacci set, coerced"
            );
            self.config.rooms.default_capacity
        }
    }

    /// Seats a user. The admission gate runs its checks in a fixed order and
    /// the first failure returns without any state change. On the seat that
    /// fills the room, the room locks and a `FillSignal` is returned.
    pub async fn seat_user(
        &self,
        session_id: &str,
        user_id: &str,
        room_id: RoomId,
    ) -> Result<Option<FillSignal>, AdmissionError> {
        // Gate 1: room exists. Read what the async checks need, then release
        // the guard; ledger calls must not run under a map lock.
        let (tier, ticket, capacity, min_level, allow_default) = {
            let room = self.rooms.get(&room_id).ok_or(AdmissionError::RoomNotFound)?;
            (
                room.tier,
                room.ticket_price,
                room.capacity,
                room.min_skin_level,
                room.allow_default_skin,
            )
        };

        // Gate 2: user exists.
        if !self.ledger.user_exists(user_id).await {
            return Err(AdmissionError::UserNotFound);
        }

        // Gate 3: equipped skin meets the tier minimum.
        let skin = self
            .ledger
            .skin(user_id)
            .await
            .map_err(|_| AdmissionError::UserNotFound)?;
        if skin.level < min_level {
            return Err(AdmissionError::SkinLevelTooLow {
                required: min_level,
                actual: skin.level,
            });
        }

        // Gate 4: some tiers refuse the freebie default skin outright.
        if skin.is_default && !allow_default {
            return Err(AdmissionError::DefaultSkinForbidden);
        }

        // Gate 5: balance covers the ticket.
        let balance = self
            .ledger
            .balance(user_id, Currency::Primary)
            .await
            .map_err(|_| AdmissionError::UserNotFound)?;
        if balance < ticket {
            return Err(AdmissionError::InsufficientBalance { balance, ticket });
        }

        if self.sessions.contains_key(session_id) {
            return Err(AdmissionError::AlreadySeated);
        }

        // Gates 6-7 plus the seat itself run under the room guard, so two
        // concurrent seats cannot both observe "not full".
        let fill_duration = {
            let mut room = self.rooms.get_mut(&room_id).ok_or(AdmissionError::RoomNotFound)?;
            if room.status != RoomStatus::Boarding {
                return Err(AdmissionError::RoomNotBoarding(room.status));
            }
            if room.seats.len() >= room.capacity {
                return Err(AdmissionError::RoomFull {
                    capacity: room.capacity,
                });
            }
            room.seats.insert(session_id.to_string(), user_id.to_string());
            if room.seats.len() == room.capacity {
                room.status = RoomStatus::Locked;
                let duration = room.created_at.elapsed();
                room.last_fill = Some(duration);
                Some(duration)
            } else {
                None
            }
        };
        self.sessions.insert(session_id.to_string(), room_id);

        match fill_duration {
            None => Ok(None),
            Some(fill_duration) => {
                let sibling = self.maybe_mitose(tier, ticket, capacity, fill_duration);
                info!(
                    %room_id,
                    fill_ms = fill_duration.as_millis() as u64,
                    "room filled"
                );
                Ok(Some(FillSignal {
                    room_id,
                    fill_duration,
                    sibling,
                }))
            }
        }
    }

    /// Mitosis: a room that filled faster than the threshold gets a sibling
    /// of the same tier at the next larger Fibonacci capacity. Demand
    /// heuristic only, never required for correctness.
    fn maybe_mitose(
        &self,
        tier: Tier,
        ticket_price: Money,
        capacity: usize,
        fill_duration: Duration,
    ) -> Option<RoomId> {
        if fill_duration >= Duration::from_millis(self.config.rooms.mitosis_fill_ms) {
            return None;
        }
        let next_capacity = FIBONACCI_CAPACITIES
            .iter()
            .copied()
            .find(|&c| c > capacity)?;
        let sibling = self.create_room(tier, ticket_price, next_capacity);
        info!(
            %sibling,
            %tier,
            capacity = next_capacity,
            fill_ms = fill_duration.as_millis() as u64,
            "mitosis: fast fill spawned sibling room"
        );
        Some(sibling)
    }

    /// Clears a room back to boarding after its trip fully resolves. Candle
    /// history and the round counter survive the reset.
    pub fn reset_room(&self, room_id: RoomId) {
        if let Some(mut room) = self.rooms.get_mut(&room_id) {
            for session in room.seats.keys() {
                self.sessions.remove(session);
            }
            room.seats.clear();
            room.status = RoomStatus::Boarding;
            room.created_at = Instant::now();
            room.last_fill = None;
        }
    }

    /// Removes one seat (a burned skin cannot continue riding this bus).
    pub fn unseat_session(&self, session_id: &str) {
        if let Some((_, room_id)) = self.sessions.remove(session_id) {
            if let Some(mut room) = self.rooms.get_mut(&room_id) {
                room.seats.remove(session_id);
            }
        }
    }

    pub fn room_of_session(&self, session_id: &str) -> Option<RoomId> {
        self.sessions.get(session_id).map(|r| *r)
    }

    /// The user seated on `session_id` in `room_id`, if any.
    pub fn user_in_room(&self, room_id: RoomId, session_id: &str) -> Option<UserId> {
        self.rooms
            .get(&room_id)?
            .seats
            .get(session_id)
            .cloned()
    }

    pub fn seated_sessions(&self, room_id: RoomId) -> Vec<(SessionId, UserId)> {
        self.rooms
            .get(&room_id)
            .map(|room| {
                room.seats
                    .iter()
                    .map(|(s, u)| (s.clone(), u.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn room_status(&self, room_id: RoomId) -> Option<RoomStatus> {
        self.rooms.get(&room_id).map(|r| r.status)
    }

    pub fn set_room_status(&self, room_id: RoomId, status: RoomStatus) {
        if let Some(mut room) = self.rooms.get_mut(&room_id) {
            room.status = status;
        }
    }

    pub fn ticket_price(&self, room_id: RoomId) -> Option<Money> {
        self.rooms.get(&room_id).map(|r| r.ticket_price)
    }

    /// Next round number for a room (monotonic across resets).
    pub fn next_round_number(&self, room_id: RoomId) -> u64 {
        match self.rooms.get_mut(&room_id) {
            Some(mut room) => {
                room.rounds_played += 1;
                room.rounds_played
            }
            None => 1,
        }
    }

    /// Appends a candle, evicting the oldest beyond the window.
    pub fn push_candle(&self, room_id: RoomId, candle: Candle) {
        if let Some(mut room) = self.rooms.get_mut(&room_id) {
            room.candles.push_back(candle);
            while room.candles.len() > self.config.rooms.candle_window {
                room.candles.pop_front();
            }
        }
    }

    pub fn candles(&self, room_id: RoomId) -> Vec<Candle> {
        self.rooms
            .get(&room_id)
            .map(|r| r.candles.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn attach_engine(&self, room_id: RoomId, engine: Arc<RoundEngine>) {
        self.engines.insert(room_id, engine);
    }

    pub fn detach_engine(&self, room_id: RoomId) {
        self.engines.remove(&room_id);
    }

    pub fn engine_for(&self, room_id: RoomId) -> Option<Arc<RoundEngine>> {
        self.engines.get(&room_id).map(|e| Arc::clone(e.value()))
    }

    /// Hands a finished trip's pot (and its winnerless streak) to the tier
    /// pool so the next room of the same tier inherits both.
    pub fn add_tier_rollover(&self, tier: Tier, amount: Money, streak: u32) {
        if amount.is_zero() && streak == 0 {
            return;
        }
        let mut pool = self.tier_rollover.entry(tier).or_insert(RolloverPool {
            pot: Money::ZERO,
            streak: 0,
        });
        pool.pot += amount;
        pool.streak = streak;
    }

    /// Drains the tier's inherited pot and streak for a starting trip.
    pub fn take_tier_rollover(&self, tier: Tier) -> (Money, u32) {
        self.tier_rollover
            .remove(&tier)
            .map(|(_, p)| (p.pot, p.streak))
            .unwrap_or((Money::ZERO, 0))
    }

    pub fn rooms_info(&self) -> Vec<RoomInfo> {
        self.rooms
            .iter()
            .map(|entry| RoomInfo {
                id: entry.id,
                tier: entry.tier,
                ticket_price: entry.ticket_price,
                capacity: entry.capacity,
                seated: entry.seats.len(),
                status: entry.status,
            })
            .collect()
    }

    pub fn online_sessions(&self) -> usize {
        self.sessions.len()
    }
}
