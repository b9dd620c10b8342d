//! Error types for the moonbus game core.
//!
//! Admission and bet rejections are part of the protocol: they are returned
//! synchronously to the caller with a stable machine-readable code and never
//! leave partial state behind.

use crate::money::Money;
use crate::types::{Phase, RoomStatus};
use thiserror::Error;

/// Root error type for all game operations.
#[derive(Debug, Error)]
pub enum GameError {
    #[error("admission rejected: {0}")]
    Admission(#[from] AdmissionError),

    #[error("bet rejected: {0}")]
    Bet(#[from] BetError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("no active round for room {0}")]
    NoActiveRound(crate::types::RoomId),

    #[error("session {0} is not seated in any room")]
    SessionNotSeated(String),
}

impl GameError {
    /// Stable reason code for transport payloads.
    pub fn code(&self) -> &'static str {
        match self {
            GameError::Admission(e) => e.code(),
            GameError::Bet(e) => e.code(),
            GameError::SessionNotSeated(_) => "not_seated",
            GameError::NoActiveRound(_) => "no_active_round",
            _ => "internal",
        }
    }
}

/// Why a seat request was refused. Checks run in a fixed order and the first
/// failure short-circuits.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("room not found")]
    RoomNotFound,

    #[error("user not found")]
    UserNotFound,

    #[error("skin level {actual} below tier minimum {required}")]
    SkinLevelTooLow { required: u32, actual: u32 },

    #[error("default skin is not allowed in this tier")]
    DefaultSkinForbidden,

    #[error("balance {balance} below ticket price {ticket}")]
    InsufficientBalance { balance: Money, ticket: Money },

    #[error("room is not boarding (status {0:?})")]
    RoomNotBoarding(RoomStatus),

    #[error("room is full (capacity {capacity})")]
    RoomFull { capacity: usize },

    #[error("session is already seated")]
    AlreadySeated,
}

impl AdmissionError {
    /// Stable reason code for transport payloads.
    pub fn code(&self) -> &'static str {
        match self {
            AdmissionError::RoomNotFound => "room_not_found",
            AdmissionError::UserNotFound => "user_not_found",
            AdmissionError::SkinLevelTooLow { .. } => "skin_level_too_low",
            AdmissionError::DefaultSkinForbidden => "default_skin_forbidden",
            AdmissionError::InsufficientBalance { .. } => "insufficient_balance",
            AdmissionError::RoomNotBoarding(_) => "room_not_boarding",
            AdmissionError::RoomFull { .. } => "room_full",
            AdmissionError::AlreadySeated => "already_seated",
        }
    }
}

/// Why a bet was refused during (or outside) the betting phase.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BetError {
    #[error("betting is closed (phase {0:?})")]
    PhaseClosed(Phase),

    #[error("user is not seated in this room")]
    NotSeated,

    #[error("equipped skin is burned")]
    SkinBurned,

    #[error("default skin cannot stake above {cap} (ticket {ticket})")]
    DefaultSkinCap { cap: Money, ticket: Money },

    #[error("insufficient balance for stake {ticket}")]
    InsufficientBalance { ticket: Money },

    #[error("ledger transfer failed, bet not placed")]
    TransferFailed,
}

impl BetError {
    /// Stable reason code for transport payloads.
    pub fn code(&self) -> &'static str {
        match self {
            BetError::PhaseClosed(_) => "phase_closed",
            BetError::NotSeated => "not_seated",
            BetError::SkinBurned => "skin_burned",
            BetError::DefaultSkinCap { .. } => "default_skin_cap",
            BetError::InsufficientBalance { .. } => "insufficient_balance",
            BetError::TransferFailed => "transfer_failed",
        }
    }
}

/// Ledger collaborator failures. A failed withdraw/deposit means the
/// transfer did not happen; callers must not advance their own state.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("unknown user {0}")]
    UnknownUser(String),

    #[error("insufficient funds for user {user}")]
    InsufficientFunds { user: String },

    #[error("user {0} has no equipped skin")]
    NoSkinEquipped(String),

    #[error("ledger backend failure: {0}")]
    Backend(String),
}

/// Persistence-layer failures for the accumulated-pot store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database open failed: {0}")]
    OpenFailed(String),

    #[error("read failed: {0}")]
    ReadFailed(String),

    #[error("write failed: {0}")]
    WriteFailed(String),

    #[error("corrupted value under key {0}")]
    CorruptedValue(String),
}

impl From<rocksdb::Error> for StorageError {
    fn from(e: rocksdb::Error) -> Self {
        StorageError::WriteFailed(e.to_string())
    }
}

/// Configuration load/validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid value for {field}: '{value}' ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("missing required field: {0}")]
    MissingRequired(String),
}

/// Convenience alias used throughout the crate.
pub type GameResult<T> = Result<T, GameError>;
