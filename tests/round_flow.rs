//! End-to-end round flow over the public service API.

use moonbus::engine::EngineDeps;
use moonbus::events::GameEvent;
use moonbus::ledger::{Currency, Ledger, MemoryLedger};
use moonbus::oracle::ExchangeId;
use moonbus::storage::MemoryPotStore;
use moonbus::transport::{Broadcaster, RecordingBroadcaster};
use moonbus::types::{Direction, Phase, RoomId, RoomStatus, RoundResult, Skin, Tier};
use moonbus::{GameConfig, GameService, HouseBook, Money, PriceOracle, RoomRegistry};
use std::sync::Arc;
use std::time::Duration;

struct World {
    service: GameService,
    deps: EngineDeps,
    ledger: Arc<MemoryLedger>,
    broadcaster: Arc<RecordingBroadcaster>,
    room_id: RoomId,
}

const BETTING_MS: u64 = 50;
const LOCKED_MS: u64 = 50;
const RESOLVING_MS: u64 = 10;

fn world() -> World {
    let mut config = GameConfig::default();
    config.phases.betting_ms = BETTING_MS;
    config.phases.locked_ms = LOCKED_MS;
    config.phases.resolving_ms = RESOLVING_MS;
    config.phases.price_stream_ms = 10;
    let config = Arc::new(config);

    let ledger = Arc::new(MemoryLedger::new());
    for user in ["alice", "bob", "carol"] {
        ledger.add_user(
            user,
            Money::from_whole(100),
            Skin {
                level: 10,
                is_default: false,
                total_investment: Money::from_whole(20),
                ..Skin::starter()
            },
        );
    }

    let registry = Arc::new(RoomRegistry::new(
        Arc::clone(&config),
        ledger.clone() as Arc<dyn Ledger>,
    ));
    let room_id = registry.create_room(Tier::Satoshi, Money::from_whole(5), 3);
    let broadcaster = Arc::new(RecordingBroadcaster::new());
    let oracle = PriceOracle::new(config.oracle.clone());

    let deps = EngineDeps {
        registry,
        ledger: ledger.clone() as Arc<dyn Ledger>,
        oracle,
        broadcaster: broadcaster.clone() as Arc<dyn Broadcaster>,
        pot_store: Arc::new(MemoryPotStore::new()),
        config,
        book: Arc::new(HouseBook::new()),
    };
    World {
        service: GameService::new(deps.clone()),
        deps,
        ledger,
        broadcaster,
        room_id,
    }
}

fn set_price(world: &World, price: f64) {
    world.deps.oracle.set_last_price(ExchangeId::Binance, price);
}

async fn board_all(world: &World) {
    for user in ["alice", "bob", "carol"] {
        world
            .service
            .board(&format!("s-{user}"), user, world.room_id)
            .await
            .unwrap();
    }
}

async fn wait_for_trip_end(world: &World) {
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if world.service.round_snapshot(world.room_id).await.is_none() {
            return;
        }
    }
    panic!("trip never finished");
}

#[tokio::test]
async fn long_bettors_split_pot_when_price_rises() {
    let world = world();
    set_price(&world, 50_000.0);
    board_all(&world).await;

    tokio::time::sleep(Duration::from_millis(10)).await;
    world.service.place_bet("s-alice", Direction::Long).await.unwrap();
    world.service.place_bet("s-bob", Direction::Long).await.unwrap();
    world.service.place_bet("s-carol", Direction::Short).await.unwrap();

    // Price jumps during the locked window.
    tokio::time::sleep(Duration::from_millis(BETTING_MS)).await;
    set_price(&world, 50_500.0);
    wait_for_trip_end(&world).await;

    // Pool 15.00, fee 0.75, net 14.25 split across two equal long stakes.
    for user in ["alice", "bob"] {
        let balance = world.ledger.balance(user, Currency::Primary).await.unwrap();
        assert_eq!(balance, Money::from_minor(102_125_000));
    }
    let carol = world
        .ledger
        .balance("carol", Currency::Primary)
        .await
        .unwrap();
    assert_eq!(carol, Money::from_whole(95));
    assert_eq!(world.ledger.skin("carol").await.unwrap().integrity, 90);

    // The public result names every participant.
    let events = world.broadcaster.room_events(world.room_id);
    let result = events
        .iter()
        .find_map(|e| match e {
            GameEvent::RoundResult {
                result,
                participants,
                ..
            } => Some((result, participants)),
            _ => None,
        })
        .expect("round result broadcast");
    assert_eq!(*result.0, RoundResult::Long);
    assert_eq!(result.1.len(), 3);

    // Room cycles back to boarding with its seats cleared.
    let rooms = world.service.room_list();
    let room = rooms.iter().find(|r| r.id == world.room_id).unwrap();
    assert_eq!(room.status, RoomStatus::Boarding);
    assert_eq!(room.seated, 0);
}

#[tokio::test]
async fn flat_price_draws_and_refunds_everyone() {
    let world = world();
    set_price(&world, 50_000.0);
    board_all(&world).await;

    tokio::time::sleep(Duration::from_millis(10)).await;
    world.service.place_bet("s-alice", Direction::Long).await.unwrap();
    world.service.place_bet("s-bob", Direction::Short).await.unwrap();
    wait_for_trip_end(&world).await;

    for user in ["alice", "bob", "carol"] {
        let balance = world.ledger.balance(user, Currency::Primary).await.unwrap();
        assert_eq!(balance, Money::from_whole(100));
    }
    // Nobody's skin took damage on a draw.
    assert_eq!(world.ledger.skin("alice").await.unwrap().integrity, 100);
}

#[tokio::test]
async fn winnerless_pot_carries_into_the_next_trip() {
    let world = world();
    set_price(&world, 50_000.0);
    board_all(&world).await;

    // Trip 1: everyone shorts a rising price.
    tokio::time::sleep(Duration::from_millis(10)).await;
    for session in ["s-alice", "s-bob", "s-carol"] {
        world.service.place_bet(session, Direction::Short).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(BETTING_MS)).await;
    set_price(&world, 51_000.0);
    wait_for_trip_end(&world).await;

    // Trip 2 on the same room: alice alone goes long and wins the
    // inherited 15.00 on top of the fresh 15.00.
    set_price(&world, 51_000.0);
    board_all(&world).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    world.service.place_bet("s-alice", Direction::Long).await.unwrap();
    world.service.place_bet("s-bob", Direction::Short).await.unwrap();
    world.service.place_bet("s-carol", Direction::Short).await.unwrap();
    tokio::time::sleep(Duration::from_millis(BETTING_MS)).await;
    set_price(&world, 52_000.0);
    wait_for_trip_end(&world).await;

    // Alice: 100 - 5 (lost trip 1) - 5 (stake) + 28.50 (95% of 30.00).
    let alice = world
        .ledger
        .balance("alice", Currency::Primary)
        .await
        .unwrap();
    assert_eq!(alice, Money::from_minor(118_500_000));
}

#[tokio::test]
async fn phase_sequence_is_broadcast_in_order() {
    let world = world();
    set_price(&world, 50_000.0);
    board_all(&world).await;
    wait_for_trip_end(&world).await;

    let phases: Vec<Phase> = world
        .broadcaster
        .room_events(world.room_id)
        .into_iter()
        .filter_map(|e| match e {
            GameEvent::PhaseChange { phase, .. } => Some(phase),
            _ => None,
        })
        .collect();
    assert_eq!(phases, vec![Phase::Betting, Phase::Locked, Phase::Resolving]);

    // Live prices streamed during the locked window, then a reset.
    let events = world.broadcaster.room_events(world.room_id);
    assert!(events
        .iter()
        .any(|e| matches!(e, GameEvent::PriceUpdate { .. })));
    assert!(matches!(events.last(), Some(GameEvent::RoomReset { .. })));
}

#[tokio::test]
async fn late_bet_is_rejected_after_betting_closes() {
    let world = world();
    set_price(&world, 50_000.0);
    board_all(&world).await;

    // Wait until the locked phase is underway.
    tokio::time::sleep(Duration::from_millis(BETTING_MS + 15)).await;
    let err = world
        .service
        .place_bet("s-alice", Direction::Long)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "phase_closed");
    wait_for_trip_end(&world).await;

    // The stake was never taken.
    let alice = world
        .ledger
        .balance("alice", Currency::Primary)
        .await
        .unwrap();
    assert_eq!(alice, Money::from_whole(100));
}
