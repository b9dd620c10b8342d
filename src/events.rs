//! Event payloads delivered to clients through the transport layer.

use crate::money::Money;
use crate::types::{Candle, Direction, Phase, RoomId, RoomStatus, RoundResult, UserId};
use serde::{Deserialize, Serialize};

/// Everything the core broadcasts, tagged for the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameEvent {
    /// A room's round moved to a new phase.
    PhaseChange {
        room_id: RoomId,
        round_number: u64,
        phase: Phase,
        /// Unix millis when this phase ends.
        deadline_ms: i64,
    },

    /// Live oracle reading streamed during the locked phase.
    PriceUpdate {
        room_id: RoomId,
        price: Option<f64>,
        timestamp_ms: i64,
    },

    /// A bet was accepted (also serves as the admin audit record).
    BetAccepted {
        room_id: RoomId,
        user_id: UserId,
        direction: Direction,
        amount: Money,
        total_pool: Money,
    },

    /// Seat map changed.
    SeatUpdate {
        room_id: RoomId,
        seated: usize,
        capacity: usize,
    },

    /// Full round outcome, broadcast once settlement has fully applied.
    RoundResult {
        room_id: RoomId,
        round_number: u64,
        start_price: Option<f64>,
        end_price: Option<f64>,
        result: RoundResult,
        candles: Vec<Candle>,
        participants: Vec<ParticipantStatus>,
    },

    /// Individual settlement notification sent to one session.
    PersonalResult {
        room_id: RoomId,
        round_number: u64,
        outcome: ParticipantOutcome,
    },

    /// The room finished its trip and reopened for boarding.
    RoomReset { room_id: RoomId },

    /// An inbound action was refused; delivered only to the offending
    /// session, with a stable machine-readable code.
    Rejected { code: String, message: String },

    /// Late-join resynchronization snapshot sent to one session, so a
    /// reconnecting client catches up without replaying the round.
    RoomState {
        room_id: RoomId,
        status: RoomStatus,
        seated: usize,
        capacity: usize,
        candles: Vec<Candle>,
        participants: Vec<UserId>,
    },
}

/// One participant's line in the public round result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantStatus {
    pub user_id: UserId,
    pub direction: Direction,
    pub amount: Money,
    pub outcome: ParticipantOutcome,
}

/// How settlement treated a single bet.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParticipantOutcome {
    Won { payout: Money },
    Refunded { amount: Money },
    Lost {
        integrity_damage: u32,
        burned: bool,
        /// Ash-insurance refund credited to the secondary balance on burn.
        ash_refund: Option<Money>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_tagging() {
        let event = GameEvent::PriceUpdate {
            room_id: RoomId::nil(),
            price: Some(51_000.0),
            timestamp_ms: 0,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "price_update");
        assert_eq!(json["price"], 51_000.0);
    }

    #[test]
    fn test_outcome_tagging() {
        let outcome = ParticipantOutcome::Lost {
            integrity_damage: 10,
            burned: true,
            ash_refund: Some(Money::from_whole(3)),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["kind"], "lost");
        assert_eq!(json["burned"], true);
    }
}
