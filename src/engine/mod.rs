//! Round lifecycle engine.
//!
//! One engine instance drives one "trip": a filled room plays exactly one
//! round (betting, locked, resolving), settles it, then hands the room back
//! to the registry for boarding. The engine owns the round's mutable state
//! behind a single async mutex; everything else it touches is a shared
//! collaborator injected at construction.

pub mod settlement;

use crate::config::GameConfig;
use crate::errors::{BetError, LedgerError};
use crate::events::{GameEvent, ParticipantOutcome, ParticipantStatus};
use crate::ledger::{Currency, Ledger, TxType};
use crate::money::Money;
use crate::oracle::PriceOracle;
use crate::registry::RoomRegistry;
use crate::storage::{tier_pot_key, tier_streak_key, PotStore};
use crate::transport::Broadcaster;
use crate::types::{Bet, Candle, Direction, Phase, RoomId, RoomStatus, RoundResult, Tier};
use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use settlement::{plan_settlement, SettlementPlan};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Shared collaborators every engine instance is built from.
#[derive(Clone)]
pub struct EngineDeps {
    pub registry: Arc<RoomRegistry>,
    pub ledger: Arc<dyn Ledger>,
    pub oracle: Arc<PriceOracle>,
    pub broadcaster: Arc<dyn Broadcaster>,
    pub pot_store: Arc<dyn PotStore>,
    pub config: Arc<GameConfig>,
    pub book: Arc<crate::stats::HouseBook>,
}

/// Mutable state of the round currently in flight.
struct RoundState {
    round_number: u64,
    phase: Phase,
    /// Unix millis when the current phase ends.
    deadline_ms: i64,
    bets: Vec<Bet>,
    pool: Money,
    start_price: Option<f64>,
    end_price: Option<f64>,
    /// Pot inherited from previous winnerless rounds of this tier.
    accumulated_pot: Money,
    rollover_streak: u32,
}

/// Read-only projection of the in-flight round for late joiners and stats.
#[derive(Debug, Clone, Serialize)]
pub struct RoundSnapshot {
    pub room_id: RoomId,
    pub round_number: u64,
    pub phase: Phase,
    pub deadline_ms: i64,
    pub pool: Money,
    pub accumulated_pot: Money,
    pub rollover_streak: u32,
    pub bet_count: usize,
    pub long_bets: usize,
    pub short_bets: usize,
}

/// Drives one room through a single round and its settlement.
pub struct RoundEngine {
    room_id: RoomId,
    tier: Tier,
    deps: EngineDeps,
    state: Mutex<RoundState>,
}

/// Aborts the wrapped task when dropped, so the price stream can never
/// outlive the phase that spawned it.
struct AbortOnDrop(tokio::task::JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl RoundEngine {
    /// Builds the engine for a freshly filled room, inheriting the tier's
    /// rolled-over pot. An empty in-memory pool falls back to the persisted
    /// pot and winnerless streak, which is how both survive a process
    /// restart.
    pub fn new(room_id: RoomId, tier: Tier, deps: EngineDeps) -> Arc<Self> {
        let (mut pot, mut streak) = deps.registry.take_tier_rollover(tier);
        if pot.is_zero() && streak == 0 {
            match deps.pot_store.load_pot(&tier_pot_key(tier)) {
                Ok(persisted) => {
                    if !persisted.is_zero() {
                        info!(%room_id, %tier, pot = %persisted, "recovered persisted pot");
                    }
                    pot = persisted;
                }
                Err(e) => warn!(%room_id, "pot recovery failed: {e}"),
            }
            match deps.pot_store.load_counter(&tier_streak_key(tier)) {
                Ok(persisted) => streak = persisted as u32,
                Err(e) => warn!(%room_id, "streak recovery failed: {e}"),
            }
        }
        Arc::new(Self {
            room_id,
            tier,
            deps,
            state: Mutex::new(RoundState {
                round_number: 0,
                phase: Phase::Resolving, // no round is open until the trip starts
                deadline_ms: 0,
                bets: Vec::new(),
                pool: Money::ZERO,
                start_price: None,
                end_price: None,
                accumulated_pot: pot,
                rollover_streak: streak,
            }),
        })
    }

    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    /// Runs the trip to completion. Cleanup always runs, even when the
    /// round itself fails, so the pot is never stranded on a dead engine.
    pub async fn run(self: Arc<Self>) {
        self.deps
            .registry
            .set_room_status(self.room_id, RoomStatus::InProgress);

        self.run_round().await;
        self.cleanup().await;
    }

    async fn run_round(&self) {
        let phases = &self.deps.config.phases;
        let round_number = self.deps.registry.next_round_number(self.room_id);

        // Betting phase: bets come in through place_bet.
        self.enter_phase(round_number, Phase::Betting, phases.betting_ms)
            .await;
        tokio::time::sleep(Duration::from_millis(phases.betting_ms)).await;

        // Locked phase: capture the start price, stream live updates.
        let start_price = self.deps.oracle.current_price();
        {
            let mut state = self.state.lock().await;
            state.start_price = start_price;
        }
        if start_price.is_none() {
            warn!(room_id = %self.room_id, "no oracle price at lock, round will draw");
        }
        self.enter_phase(round_number, Phase::Locked, phases.locked_ms)
            .await;
        {
            let _stream = self.spawn_price_stream();
            tokio::time::sleep(Duration::from_millis(phases.locked_ms)).await;
            // Guard drops here; the stream is aborted before resolution.
        }

        // Resolving phase: capture the end price and settle.
        let end_price = self.deps.oracle.current_price();
        {
            let mut state = self.state.lock().await;
            state.end_price = end_price;
        }
        self.enter_phase(round_number, Phase::Resolving, phases.resolving_ms)
            .await;
        self.resolve(round_number, start_price, end_price).await;
        // Settlement is done; the room shows as finished for the remainder
        // of the resolving window, until cleanup reopens boarding.
        self.deps
            .registry
            .set_room_status(self.room_id, RoomStatus::Finished);
        tokio::time::sleep(Duration::from_millis(phases.resolving_ms)).await;
    }

    async fn enter_phase(&self, round_number: u64, phase: Phase, duration_ms: u64) {
        let deadline_ms = Utc::now().timestamp_millis() + duration_ms as i64;
        {
            let mut state = self.state.lock().await;
            state.round_number = round_number;
            state.phase = phase;
            state.deadline_ms = deadline_ms;
        }
        info!(room_id = %self.room_id, round_number, ?phase, "phase change");
        self.deps.broadcaster.emit_to_room(
            self.room_id,
            GameEvent::PhaseChange {
                room_id: self.room_id,
                round_number,
                phase,
                deadline_ms,
            },
        );
    }

    /// Streams the live oracle price to the room while the guard is alive.
    fn spawn_price_stream(&self) -> AbortOnDrop {
        let oracle = Arc::clone(&self.deps.oracle);
        let broadcaster = Arc::clone(&self.deps.broadcaster);
        let room_id = self.room_id;
        let period = Duration::from_millis(self.deps.config.phases.price_stream_ms);
        AbortOnDrop(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                broadcaster.emit_to_room(
                    room_id,
                    GameEvent::PriceUpdate {
                        room_id,
                        price: oracle.current_price(),
                        timestamp_ms: Utc::now().timestamp_millis(),
                    },
                );
            }
        }))
    }

    /// Places (or redirects) a bet for a seated session. Returns the total
    /// pool after acceptance.
    ///
    /// The stake is always the room's ticket price; it is never taken from
    /// the client. A repeat bet from the same session only flips the
    /// direction, the stake stays escrowed from the first call.
    pub async fn place_bet(
        &self,
        session_id: &str,
        direction: Direction,
    ) -> Result<Money, BetError> {
        let ticket = self
            .deps
            .registry
            .ticket_price(self.room_id)
            .ok_or(BetError::NotSeated)?;
        let user_id = self
            .deps
            .registry
            .user_in_room(self.room_id, session_id)
            .ok_or(BetError::NotSeated)?;

        // The state lock is held across the ledger withdraw so two racing
        // bets from the same session cannot both escrow a stake.
        let mut state = self.state.lock().await;
        if state.phase != Phase::Betting {
            return Err(BetError::PhaseClosed(state.phase));
        }

        if let Some(existing) = state.bets.iter_mut().find(|b| b.session_id == session_id) {
            existing.direction = direction;
            existing.placed_at = Utc::now();
            let total_pool = state.pool;
            drop(state);
            self.emit_bet_accepted(&user_id, direction, ticket, total_pool);
            return Ok(total_pool);
        }

        let skin = self
            .deps
            .ledger
            .skin(&user_id)
            .await
            .map_err(|_| BetError::NotSeated)?;
        if skin.is_burned {
            return Err(BetError::SkinBurned);
        }
        let cap = self.deps.config.economy.default_skin_stake_cap;
        if skin.is_default && ticket > cap {
            return Err(BetError::DefaultSkinCap { cap, ticket });
        }

        // Ledger first, state second: a failed withdraw leaves no bet behind.
        self.deps
            .ledger
            .withdraw(&user_id, ticket, TxType::BetStake, Currency::Primary)
            .await
            .map_err(|e| match e {
                LedgerError::UnknownUser(_) => BetError::NotSeated,
                LedgerError::InsufficientFunds { .. } => BetError::InsufficientBalance { ticket },
                _ => BetError::TransferFailed,
            })?;

        state.bets.push(Bet {
            user_id: user_id.clone(),
            session_id: session_id.to_string(),
            amount: ticket,
            direction,
            placed_at: Utc::now(),
        });
        state.pool += ticket;
        let total_pool = state.pool;
        drop(state);

        self.emit_bet_accepted(&user_id, direction, ticket, total_pool);
        Ok(total_pool)
    }

    fn emit_bet_accepted(
        &self,
        user_id: &str,
        direction: Direction,
        amount: Money,
        total_pool: Money,
    ) {
        self.deps.broadcaster.emit_to_room(
            self.room_id,
            GameEvent::BetAccepted {
                room_id: self.room_id,
                user_id: user_id.to_string(),
                direction,
                amount,
                total_pool,
            },
        );
    }

    async fn resolve(&self, round_number: u64, start_price: Option<f64>, end_price: Option<f64>) {
        let result = RoundResult::from_prices(start_price, end_price);
        let (bets, pool, carried, streak) = {
            let state = self.state.lock().await;
            (
                state.bets.clone(),
                state.pool,
                state.accumulated_pot,
                state.rollover_streak,
            )
        };

        let plan = plan_settlement(
            &bets,
            result,
            pool,
            carried,
            streak,
            &self.deps.config.economy,
        );
        info!(
            room_id = %self.room_id,
            round_number,
            ?result,
            pool = %pool,
            payouts = plan.payouts.len(),
            pot_after = %plan.pot_after,
            "round resolved"
        );

        let participants = self.apply_settlement(&plan, &bets).await;

        // Settlement has fully applied; update the carried pot and persist it
        // before anyone is told the result.
        {
            let mut state = self.state.lock().await;
            state.accumulated_pot = plan.pot_after;
            state.rollover_streak = plan.streak_after;
        }
        if let Err(e) = self
            .deps
            .pot_store
            .store_pot(&tier_pot_key(self.tier), plan.pot_after)
        {
            error!(room_id = %self.room_id, "pot persist failed: {e}");
        }
        if let Err(e) = self
            .deps
            .pot_store
            .store_counter(&tier_streak_key(self.tier), plan.streak_after as u64)
        {
            error!(room_id = %self.room_id, "streak persist failed: {e}");
        }

        // Only rounds with real price data leave a candle in the history.
        if let (Some(start), Some(end)) = (start_price, end_price) {
            self.deps
                .registry
                .push_candle(self.room_id, Candle::synthesize(start, end, result));
        }

        self.deps.broadcaster.emit_to_room(
            self.room_id,
            GameEvent::RoundResult {
                room_id: self.room_id,
                round_number,
                start_price,
                end_price,
                result,
                candles: self.deps.registry.candles(self.room_id),
                participants: participants.clone(),
            },
        );
        for bet in &bets {
            if let Some(status) = participants.iter().find(|p| p.user_id == bet.user_id) {
                self.deps.broadcaster.emit_to_session(
                    &bet.session_id,
                    GameEvent::PersonalResult {
                        room_id: self.room_id,
                        round_number,
                        outcome: status.outcome.clone(),
                    },
                );
            }
        }
    }

    /// Executes the plan's transfers. Payouts run in parallel and all of
    /// them complete before this returns, so the result broadcast never
    /// races a pending deposit.
    async fn apply_settlement(
        &self,
        plan: &SettlementPlan,
        bets: &[Bet],
    ) -> Vec<ParticipantStatus> {
        let ledger = &self.deps.ledger;
        let economy = &self.deps.config.economy;
        let mut outcomes: HashMap<String, ParticipantOutcome> = HashMap::new();

        let refunds = plan.refunds.iter().map(|(user, amount)| async move {
            let outcome = match ledger
                .deposit(user, *amount, TxType::DrawRefund, Currency::Primary)
                .await
            {
                Ok(()) => ParticipantOutcome::Refunded { amount: *amount },
                Err(e) => {
                    error!(user, "draw refund failed: {e}");
                    ParticipantOutcome::Refunded { amount: Money::ZERO }
                }
            };
            (user.clone(), outcome)
        });
        outcomes.extend(join_all(refunds).await);

        let payouts = plan.payouts.iter().map(|(user, payout)| async move {
            let outcome = match ledger
                .deposit(user, *payout, TxType::Payout, Currency::Primary)
                .await
            {
                Ok(()) => ParticipantOutcome::Won { payout: *payout },
                Err(e) => {
                    error!(user, "payout failed: {e}");
                    ParticipantOutcome::Won { payout: Money::ZERO }
                }
            };
            (user.clone(), outcome)
        });
        for (user, outcome) in join_all(payouts).await {
            if let ParticipantOutcome::Won { payout } = outcome {
                self.deps.book.record_win(payout);
            }
            outcomes.insert(user, outcome);
        }

        // Losers take integrity damage sequentially; a burn triggers the
        // ash-insurance credit on the secondary balance and costs the
        // player their seat.
        for user in &plan.losers {
            let burned = match ledger.damage_skin(user, economy.integrity_damage).await {
                Ok(burned) => burned,
                Err(e) => {
                    error!(user, "skin damage failed: {e}");
                    false
                }
            };
            let mut ash_refund = None;
            if burned {
                self.deps.book.record_burn();
                // A burned skin cannot keep riding this bus.
                if let Some(bet) = bets.iter().find(|b| &b.user_id == user) {
                    self.deps.registry.unseat_session(&bet.session_id);
                }
                match ledger.skin(user).await {
                    Ok(skin) => {
                        let ash = skin.total_investment.mul_bp(economy.ash_insurance_bp);
                        if !ash.is_zero() {
                            match ledger
                                .deposit(user, ash, TxType::AshInsurance, Currency::Secondary)
                                .await
                            {
                                Ok(()) => ash_refund = Some(ash),
                                Err(e) => error!(user, "ash insurance credit failed: {e}"),
                            }
                        }
                    }
                    Err(e) => error!(user, "skin lookup after burn failed: {e}"),
                }
            }
            outcomes.insert(
                user.clone(),
                ParticipantOutcome::Lost {
                    integrity_damage: economy.integrity_damage,
                    burned,
                    ash_refund,
                },
            );
        }

        self.deps.book.record_round(plan.house_fee, plan.dispersion);

        bets.iter()
            .filter_map(|bet| {
                outcomes.get(&bet.user_id).map(|outcome| ParticipantStatus {
                    user_id: bet.user_id.clone(),
                    direction: bet.direction,
                    amount: bet.amount,
                    outcome: outcome.clone(),
                })
            })
            .collect()
    }

    /// Returns the room to boarding and hands any remaining pot back to the
    /// tier pool for the next trip to inherit.
    async fn cleanup(&self) {
        let (pot, streak) = {
            let state = self.state.lock().await;
            (state.accumulated_pot, state.rollover_streak)
        };
        self.deps.registry.add_tier_rollover(self.tier, pot, streak);
        if let Err(e) = self.deps.pot_store.store_pot(&tier_pot_key(self.tier), pot) {
            error!(room_id = %self.room_id, "pot persist failed during cleanup: {e}");
        }
        if let Err(e) = self
            .deps
            .pot_store
            .store_counter(&tier_streak_key(self.tier), streak as u64)
        {
            error!(room_id = %self.room_id, "streak persist failed during cleanup: {e}");
        }

        self.deps
            .broadcaster
            .emit_to_room(self.room_id, GameEvent::RoomReset { room_id: self.room_id });
        self.deps.registry.reset_room(self.room_id);
        self.deps.registry.detach_engine(self.room_id);
        info!(room_id = %self.room_id, pot = %pot, "trip complete, room back to boarding");
    }

    /// Snapshot of the in-flight round.
    pub async fn snapshot(&self) -> RoundSnapshot {
        let state = self.state.lock().await;
        RoundSnapshot {
            room_id: self.room_id,
            round_number: state.round_number,
            phase: state.phase,
            deadline_ms: state.deadline_ms,
            pool: state.pool,
            accumulated_pot: state.accumulated_pot,
            rollover_streak: state.rollover_streak,
            bet_count: state.bets.len(),
            long_bets: state
                .bets
                .iter()
                .filter(|b| b.direction == Direction::Long)
                .count(),
            short_bets: state
                .bets
                .iter()
                .filter(|b| b.direction == Direction::Short)
                .count(),
        }
    }

    /// Replays the current phase and price to a session that joined (or
    /// reconnected) mid-round.
    pub async fn catch_up(&self, session_id: &str) {
        let (round_number, phase, deadline_ms) = {
            let state = self.state.lock().await;
            (state.round_number, state.phase, state.deadline_ms)
        };
        self.deps.broadcaster.emit_to_session(
            session_id,
            GameEvent::PhaseChange {
                room_id: self.room_id,
                round_number,
                phase,
                deadline_ms,
            },
        );
        self.deps.broadcaster.emit_to_session(
            session_id,
            GameEvent::PriceUpdate {
                room_id: self.room_id,
                price: self.deps.oracle.current_price(),
                timestamp_ms: Utc::now().timestamp_millis(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;
    use crate::ledger::MemoryLedger;
    use crate::oracle::PriceOracle;
    use crate::registry::RoomRegistry;
    use crate::stats::HouseBook;
    use crate::storage::MemoryPotStore;
    use crate::transport::RecordingBroadcaster;
    use crate::types::Skin;

    struct Fixture {
        deps: EngineDeps,
        ledger: Arc<MemoryLedger>,
        broadcaster: Arc<RecordingBroadcaster>,
        room_id: RoomId,
    }

    fn fast_config() -> GameConfig {
        let mut config = GameConfig::default();
        config.phases.betting_ms = 40;
        config.phases.locked_ms = 40;
        config.phases.resolving_ms = 30;
        config.phases.price_stream_ms = 10;
        config
    }

    async fn fixture() -> Fixture {
        let config = Arc::new(fast_config());
        let ledger = Arc::new(MemoryLedger::new());
        let broadcaster = Arc::new(RecordingBroadcaster::new());
        let registry = Arc::new(RoomRegistry::new(
            Arc::clone(&config),
            ledger.clone() as Arc<dyn Ledger>,
        ));
        let oracle = PriceOracle::new(config.oracle.clone());
        let room_id = registry.create_room(Tier::Training, Money::from_whole(1), 2);

        for user in ["alice", "bob"] {
            ledger.add_user(
                user,
                Money::from_whole(100),
                Skin {
                    level: 5,
                    is_default: false,
                    total_investment: Money::from_whole(10),
                    ..Skin::starter()
                },
            );
        }
        registry.seat_user("s-alice", "alice", room_id).await.unwrap();
        registry.seat_user("s-bob", "bob", room_id).await.unwrap();

        Fixture {
            deps: EngineDeps {
                registry,
                ledger: ledger.clone() as Arc<dyn Ledger>,
                oracle,
                broadcaster: broadcaster.clone() as Arc<dyn Broadcaster>,
                pot_store: Arc::new(MemoryPotStore::new()),
                config,
                book: Arc::new(HouseBook::new()),
            },
            ledger,
            broadcaster,
            room_id,
        }
    }

    fn set_price(deps: &EngineDeps, price: f64) {
        deps.oracle
            .set_last_price(crate::oracle::ExchangeId::Binance, price);
    }

    #[tokio::test]
    async fn test_bet_rejected_before_trip_starts() {
        let fx = fixture().await;
        let engine = RoundEngine::new(fx.room_id, Tier::Training, fx.deps.clone());
        let err = engine.place_bet("s-alice", Direction::Long).await.unwrap_err();
        assert!(matches!(err, BetError::PhaseClosed(_)));
    }

    #[tokio::test]
    async fn test_bet_from_unseated_session_rejected() {
        let fx = fixture().await;
        let engine = RoundEngine::new(fx.room_id, Tier::Training, fx.deps.clone());
        let err = engine.place_bet("s-ghost", Direction::Long).await.unwrap_err();
        assert_eq!(err, BetError::NotSeated);
    }

    #[tokio::test]
    async fn test_full_round_pays_winner_and_damages_loser() {
        let fx = fixture().await;
        set_price(&fx.deps, 100.0);
        let engine = RoundEngine::new(fx.room_id, Tier::Training, fx.deps.clone());
        fx.deps.registry.attach_engine(fx.room_id, Arc::clone(&engine));
        let trip = tokio::spawn(Arc::clone(&engine).run());

        // Bets land during the betting phase.
        tokio::time::sleep(Duration::from_millis(15)).await;
        let pool = engine.place_bet("s-alice", Direction::Long).await.unwrap();
        assert_eq!(pool, Money::from_whole(1));
        engine.place_bet("s-bob", Direction::Short).await.unwrap();

        // Price moves up during the locked phase.
        tokio::time::sleep(Duration::from_millis(45)).await;
        set_price(&fx.deps, 105.0);
        trip.await.unwrap();

        // Alice staked 1, got the 1.90 net pool back (5% fee off 2.00).
        let alice = fx
            .ledger
            .balance("alice", Currency::Primary)
            .await
            .unwrap();
        assert_eq!(alice, Money::from_minor(100_900_000));
        // Bob lost his stake and 10 integrity.
        let bob = fx.ledger.balance("bob", Currency::Primary).await.unwrap();
        assert_eq!(bob, Money::from_whole(99));
        assert_eq!(fx.ledger.skin("bob").await.unwrap().integrity, 90);

        // Trip ended: room boarding again, engine detached, candle recorded.
        assert_eq!(
            fx.deps.registry.room_status(fx.room_id),
            Some(RoomStatus::Boarding)
        );
        assert!(fx.deps.registry.engine_for(fx.room_id).is_none());
        assert_eq!(fx.deps.registry.candles(fx.room_id).len(), 1);

        // Winner got a personal result on their session.
        let personal = fx.broadcaster.session_events("s-alice");
        assert!(personal
            .iter()
            .any(|e| matches!(e, GameEvent::PersonalResult { .. })));
    }

    #[tokio::test]
    async fn test_room_shows_finished_before_reboarding() {
        let fx = fixture().await;
        set_price(&fx.deps, 100.0);
        let engine = RoundEngine::new(fx.room_id, Tier::Training, fx.deps.clone());
        fx.deps.registry.attach_engine(fx.room_id, Arc::clone(&engine));
        let trip = tokio::spawn(Arc::clone(&engine).run());

        tokio::time::sleep(Duration::from_millis(15)).await;
        assert_eq!(
            fx.deps.registry.room_status(fx.room_id),
            Some(RoomStatus::InProgress)
        );

        // Settlement is done by now; the room shows the result until the
        // resolving window ends.
        tokio::time::sleep(Duration::from_millis(75)).await;
        assert_eq!(
            fx.deps.registry.room_status(fx.room_id),
            Some(RoomStatus::Finished)
        );

        trip.await.unwrap();
        assert_eq!(
            fx.deps.registry.room_status(fx.room_id),
            Some(RoomStatus::Boarding)
        );
    }

    #[tokio::test]
    async fn test_burned_skin_cannot_bet() {
        let fx = fixture().await;
        fx.ledger.damage_skin("bob", 100).await.unwrap();
        let engine = RoundEngine::new(fx.room_id, Tier::Training, fx.deps.clone());
        let trip = tokio::spawn(Arc::clone(&engine).run());

        tokio::time::sleep(Duration::from_millis(15)).await;
        let err = engine.place_bet("s-bob", Direction::Short).await.unwrap_err();
        assert_eq!(err, BetError::SkinBurned);
        // No stake was escrowed.
        let bob = fx.ledger.balance("bob", Currency::Primary).await.unwrap();
        assert_eq!(bob, Money::from_whole(100));
        trip.await.unwrap();
    }

    #[tokio::test]
    async fn test_default_skin_blocked_above_stake_cap() {
        let fx = fixture().await;
        fx.ledger.add_user("carol", Money::from_whole(100), Skin::starter());
        // Training admits default skins, but the $10 ticket is above the
        // $5 default-skin stake cap.
        let room_id = fx
            .deps
            .registry
            .create_room(Tier::Training, Money::from_whole(10), 2);
        fx.deps
            .registry
            .seat_user("s-carol", "carol", room_id)
            .await
            .unwrap();
        let engine = RoundEngine::new(room_id, Tier::Training, fx.deps.clone());
        let trip = tokio::spawn(Arc::clone(&engine).run());

        tokio::time::sleep(Duration::from_millis(15)).await;
        let err = engine.place_bet("s-carol", Direction::Long).await.unwrap_err();
        assert_eq!(
            err,
            BetError::DefaultSkinCap {
                cap: Money::from_whole(5),
                ticket: Money::from_whole(10),
            }
        );
        let carol = fx.ledger.balance("carol", Currency::Primary).await.unwrap();
        assert_eq!(carol, Money::from_whole(100));
        trip.await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_price_draws_and_refunds() {
        let fx = fixture().await;
        // No oracle price at all: the round must draw.
        let engine = RoundEngine::new(fx.room_id, Tier::Training, fx.deps.clone());
        let trip = tokio::spawn(Arc::clone(&engine).run());

        tokio::time::sleep(Duration::from_millis(15)).await;
        engine.place_bet("s-alice", Direction::Long).await.unwrap();
        engine.place_bet("s-bob", Direction::Short).await.unwrap();
        trip.await.unwrap();

        for user in ["alice", "bob"] {
            let balance = fx.ledger.balance(user, Currency::Primary).await.unwrap();
            assert_eq!(balance, Money::from_whole(100));
        }
        // A priceless round leaves no candle behind.
        assert!(fx.deps.registry.candles(fx.room_id).is_empty());
        assert_eq!(fx.ledger.skin("bob").await.unwrap().integrity, 100);
    }

    #[tokio::test]
    async fn test_rebet_flips_direction_without_double_charge() {
        let fx = fixture().await;
        set_price(&fx.deps, 100.0);
        let engine = RoundEngine::new(fx.room_id, Tier::Training, fx.deps.clone());
        let trip = tokio::spawn(Arc::clone(&engine).run());

        tokio::time::sleep(Duration::from_millis(15)).await;
        engine.place_bet("s-alice", Direction::Short).await.unwrap();
        let pool = engine.place_bet("s-alice", Direction::Long).await.unwrap();
        // Second call redirects, the pool holds a single stake.
        assert_eq!(pool, Money::from_whole(1));

        tokio::time::sleep(Duration::from_millis(45)).await;
        set_price(&fx.deps, 105.0);
        trip.await.unwrap();

        // The redirected long bet won the whole net pool.
        let alice = fx
            .ledger
            .balance("alice", Currency::Primary)
            .await
            .unwrap();
        assert_eq!(alice, Money::from_minor(99_950_000));
    }

    #[tokio::test]
    async fn test_winnerless_pot_rolls_into_tier_pool() {
        let fx = fixture().await;
        set_price(&fx.deps, 100.0);
        let engine = RoundEngine::new(fx.room_id, Tier::Training, fx.deps.clone());
        let trip = tokio::spawn(Arc::clone(&engine).run());

        tokio::time::sleep(Duration::from_millis(15)).await;
        engine.place_bet("s-alice", Direction::Short).await.unwrap();
        engine.place_bet("s-bob", Direction::Short).await.unwrap();

        tokio::time::sleep(Duration::from_millis(45)).await;
        set_price(&fx.deps, 105.0);
        trip.await.unwrap();

        // Both shorted a rising price: the whole pool rolls over.
        let (pot, streak) = fx.deps.registry.take_tier_rollover(Tier::Training);
        assert_eq!(pot, Money::from_whole(2));
        assert_eq!(streak, 1);
        // And both were persisted for crash recovery.
        let persisted = fx
            .deps
            .pot_store
            .load_pot(&tier_pot_key(Tier::Training))
            .unwrap();
        assert_eq!(persisted, Money::from_whole(2));
        let persisted_streak = fx
            .deps
            .pot_store
            .load_counter(&tier_streak_key(Tier::Training))
            .unwrap();
        assert_eq!(persisted_streak, 1);
    }

    #[tokio::test]
    async fn test_next_trip_inherits_persisted_pot_and_streak() {
        let fx = fixture().await;
        fx.deps
            .pot_store
            .store_pot(&tier_pot_key(Tier::Training), Money::from_whole(3))
            .unwrap();
        fx.deps
            .pot_store
            .store_counter(&tier_streak_key(Tier::Training), 2)
            .unwrap();
        let engine = RoundEngine::new(fx.room_id, Tier::Training, fx.deps.clone());
        let snapshot = engine.snapshot().await;
        assert_eq!(snapshot.accumulated_pot, Money::from_whole(3));
        // The dispersion countdown picks up where it left off.
        assert_eq!(snapshot.rollover_streak, 2);
    }

    #[tokio::test]
    async fn test_burn_credits_ash_insurance() {
        let fx = fixture().await;
        // Bob's skin is one hit from burning.
        fx.ledger.damage_skin("bob", 90).await.unwrap();
        set_price(&fx.deps, 100.0);
        let engine = RoundEngine::new(fx.room_id, Tier::Training, fx.deps.clone());
        let trip = tokio::spawn(Arc::clone(&engine).run());

        tokio::time::sleep(Duration::from_millis(15)).await;
        engine.place_bet("s-alice", Direction::Long).await.unwrap();
        engine.place_bet("s-bob", Direction::Short).await.unwrap();
        tokio::time::sleep(Duration::from_millis(45)).await;
        set_price(&fx.deps, 105.0);
        trip.await.unwrap();

        assert!(fx.ledger.skin("bob").await.unwrap().is_burned);
        // 0.618 of the 10.00 total investment, credited on the secondary
        // balance.
        let ash = fx
            .ledger
            .balance("bob", Currency::Secondary)
            .await
            .unwrap();
        assert_eq!(ash, Money::from_minor(6_180_000));
    }
}
