//! Game service facade.
//!
//! Ties admission, engines and the transport together behind the handful of
//! calls the server layer needs: board a bus, place a bet, list rooms, catch
//! a late joiner up. The service owns engine spawning; a fill signal from
//! the registry is the only thing that starts a trip.

use crate::engine::{EngineDeps, RoundEngine, RoundSnapshot};
use crate::errors::{GameError, GameResult};
use crate::events::GameEvent;
use crate::money::Money;
use crate::registry::RoomInfo;
use crate::stats::{StatsAggregator, StatsSnapshot};
use crate::types::{Direction, RoomId, Tier};
use std::sync::Arc;
use tracing::info;

pub struct GameService {
    deps: EngineDeps,
    stats: StatsAggregator,
}

impl GameService {
    pub fn new(deps: EngineDeps) -> Self {
        let stats = StatsAggregator::new(
            Arc::clone(&deps.registry),
            Arc::clone(&deps.oracle),
            Arc::clone(&deps.book),
        );
        Self { deps, stats }
    }

    /// Seats a session in a room. If this seat fills the room, the trip's
    /// engine is spawned here before the call returns, so a bet placed
    /// immediately after boarding finds its engine attached.
    pub async fn board(
        &self,
        session_id: &str,
        user_id: &str,
        room_id: RoomId,
    ) -> GameResult<()> {
        let fill = self
            .deps
            .registry
            .seat_user(session_id, user_id, room_id)
            .await?;

        self.emit_seat_update(room_id);

        if let Some(fill) = fill {
            if let Some(sibling) = fill.sibling {
                info!(%room_id, %sibling, "sibling room opened for boarding");
            }
            let tier = self.room_tier(room_id);
            let engine = RoundEngine::new(room_id, tier, self.deps.clone());
            self.deps.registry.attach_engine(room_id, Arc::clone(&engine));
            tokio::spawn(engine.run());
        }
        Ok(())
    }

    /// Routes a bet to the session's room engine.
    pub async fn place_bet(&self, session_id: &str, direction: Direction) -> GameResult<Money> {
        let room_id = self
            .deps
            .registry
            .room_of_session(session_id)
            .ok_or_else(|| GameError::SessionNotSeated(session_id.to_string()))?;
        let engine = self
            .deps
            .registry
            .engine_for(room_id)
            .ok_or(GameError::NoActiveRound(room_id))?;
        let pool = engine.place_bet(session_id, direction).await?;
        Ok(pool)
    }

    pub fn room_list(&self) -> Vec<RoomInfo> {
        self.deps.registry.rooms_info()
    }

    /// Room the session is currently seated in, if any.
    pub fn session_room(&self, session_id: &str) -> Option<RoomId> {
        self.deps.registry.room_of_session(session_id)
    }

    pub async fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot().await
    }

    /// In-flight round state of a room, if a trip is running.
    pub async fn round_snapshot(&self, room_id: RoomId) -> Option<RoundSnapshot> {
        let engine = self.deps.registry.engine_for(room_id)?;
        Some(engine.snapshot().await)
    }

    /// Replays room state, current phase and price to a session that
    /// connected (or reconnected) mid-round.
    pub async fn catch_up(&self, session_id: &str) {
        let Some(room_id) = self.deps.registry.room_of_session(session_id) else {
            return;
        };
        if let Some(info) = self
            .deps
            .registry
            .rooms_info()
            .into_iter()
            .find(|r| r.id == room_id)
        {
            self.deps.broadcaster.emit_to_session(
                session_id,
                GameEvent::RoomState {
                    room_id,
                    status: info.status,
                    seated: info.seated,
                    capacity: info.capacity,
                    candles: self.deps.registry.candles(room_id),
                    participants: self
                        .deps
                        .registry
                        .seated_sessions(room_id)
                        .into_iter()
                        .map(|(_, user)| user)
                        .collect(),
                },
            );
        }
        if let Some(engine) = self.deps.registry.engine_for(room_id) {
            engine.catch_up(session_id).await;
        }
    }

    /// Frees a seat when a session disconnects before its room fills.
    /// Seats in a locked or running room stay put; the bet (if any) rides
    /// the round to settlement.
    pub fn leave(&self, session_id: &str) {
        let Some(room_id) = self.deps.registry.room_of_session(session_id) else {
            return;
        };
        if self.deps.registry.engine_for(room_id).is_none()
            && self.deps.registry.room_status(room_id)
                == Some(crate::types::RoomStatus::Boarding)
        {
            self.deps.registry.unseat_session(session_id);
            self.emit_seat_update(room_id);
        }
    }

    /// Tells one session its action was refused and why.
    pub fn notify_rejection(&self, session_id: &str, error: &GameError) {
        self.deps.broadcaster.emit_to_session(
            session_id,
            GameEvent::Rejected {
                code: error.code().to_string(),
                message: error.to_string(),
            },
        );
    }

    fn emit_seat_update(&self, room_id: RoomId) {
        if let Some(info) = self
            .deps
            .registry
            .rooms_info()
            .into_iter()
            .find(|r| r.id == room_id)
        {
            self.deps.broadcaster.emit_to_room(
                room_id,
                GameEvent::SeatUpdate {
                    room_id,
                    seated: info.seated,
                    capacity: info.capacity,
                },
            );
        }
    }

    fn room_tier(&self, room_id: RoomId) -> Tier {
        self.deps
            .registry
            .rooms_info()
            .into_iter()
            .find(|r| r.id == room_id)
            .map(|r| r.tier)
            .unwrap_or(Tier::Training)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;
    use crate::errors::AdmissionError;
    use crate::ledger::{Currency, Ledger, MemoryLedger};
    use crate::oracle::PriceOracle;
    use crate::registry::RoomRegistry;
    use crate::stats::HouseBook;
    use crate::storage::MemoryPotStore;
    use crate::transport::{Broadcaster, RecordingBroadcaster};
    use crate::types::{RoomStatus, Skin};
    use std::time::Duration;

    fn fast_config() -> GameConfig {
        let mut config = GameConfig::default();
        config.phases.betting_ms = 40;
        config.phases.locked_ms = 20;
        config.phases.resolving_ms = 10;
        config.phases.price_stream_ms = 10;
        config
    }

    struct Fixture {
        service: GameService,
        ledger: Arc<MemoryLedger>,
        room_id: RoomId,
    }

    fn fixture() -> Fixture {
        let config = Arc::new(fast_config());
        let ledger = Arc::new(MemoryLedger::new());
        let registry = Arc::new(RoomRegistry::new(
            Arc::clone(&config),
            ledger.clone() as Arc<dyn Ledger>,
        ));
        let oracle = PriceOracle::new(config.oracle.clone());
        oracle.set_last_price(crate::oracle::ExchangeId::Binance, 100.0);
        let room_id = registry.create_room(Tier::Training, Money::from_whole(1), 2);

        for user in ["alice", "bob"] {
            ledger.add_user(
                user,
                Money::from_whole(50),
                Skin {
                    level: 5,
                    is_default: false,
                    ..Skin::starter()
                },
            );
        }

        let deps = EngineDeps {
            registry,
            ledger: ledger.clone() as Arc<dyn Ledger>,
            oracle,
            broadcaster: Arc::new(RecordingBroadcaster::new()) as Arc<dyn Broadcaster>,
            pot_store: Arc::new(MemoryPotStore::new()),
            config,
            book: Arc::new(HouseBook::new()),
        };
        Fixture {
            service: GameService::new(deps),
            ledger,
            room_id,
        }
    }

    #[tokio::test]
    async fn test_bet_without_seat_rejected() {
        let fx = fixture();
        let err = fx
            .service
            .place_bet("s-nobody", Direction::Long)
            .await
            .unwrap_err();
        assert!(matches!(err, GameError::SessionNotSeated(_)));
    }

    #[tokio::test]
    async fn test_bet_in_boarding_room_has_no_round() {
        let fx = fixture();
        fx.service.board("s-alice", "alice", fx.room_id).await.unwrap();
        let err = fx
            .service
            .place_bet("s-alice", Direction::Long)
            .await
            .unwrap_err();
        assert!(matches!(err, GameError::NoActiveRound(_)));
    }

    #[tokio::test]
    async fn test_fill_spawns_engine_and_trip_settles() {
        let fx = fixture();
        fx.service.board("s-alice", "alice", fx.room_id).await.unwrap();
        fx.service.board("s-bob", "bob", fx.room_id).await.unwrap();

        // The filling board attached an engine synchronously.
        let snapshot = fx.service.round_snapshot(fx.room_id).await;
        assert!(snapshot.is_some());

        tokio::time::sleep(Duration::from_millis(10)).await;
        fx.service.place_bet("s-alice", Direction::Long).await.unwrap();
        fx.service.place_bet("s-bob", Direction::Short).await.unwrap();

        // Flat price: draw, everyone refunded, room back to boarding.
        tokio::time::sleep(Duration::from_millis(120)).await;
        for user in ["alice", "bob"] {
            let balance = fx.ledger.balance(user, Currency::Primary).await.unwrap();
            assert_eq!(balance, Money::from_whole(50));
        }
        let rooms = fx.service.room_list();
        let room = rooms.iter().find(|r| r.id == fx.room_id).unwrap();
        assert_eq!(room.status, RoomStatus::Boarding);
        assert_eq!(room.seated, 0);
    }

    #[tokio::test]
    async fn test_leave_frees_boarding_seat_only() {
        let fx = fixture();
        fx.service.board("s-alice", "alice", fx.room_id).await.unwrap();
        fx.service.leave("s-alice");

        let rooms = fx.service.room_list();
        assert_eq!(rooms.iter().find(|r| r.id == fx.room_id).unwrap().seated, 0);
        // The seat is free again for someone else.
        fx.service.board("s-bob", "bob", fx.room_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_double_board_rejected() {
        let fx = fixture();
        fx.service.board("s-alice", "alice", fx.room_id).await.unwrap();
        let err = fx
            .service
            .board("s-alice", "alice", fx.room_id)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GameError::Admission(AdmissionError::AlreadySeated)
        ));
    }
}
