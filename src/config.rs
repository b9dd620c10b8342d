//! Configuration for the moonbus game server.
//!
//! Loads a TOML file, applies `MOONBUS_*` environment overrides, then
//! validates the result before anything is wired up.

use crate::errors::{ConfigError, GameResult};
use crate::money::Money;
use crate::types::Tier;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub server: ServerConfig,
    pub phases: PhaseConfig,
    pub economy: EconomyConfig,
    pub rooms: RoomConfig,
    pub oracle: OracleConfig,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            phases: PhaseConfig::default(),
            economy: EconomyConfig::default(),
            rooms: RoomConfig::default(),
            oracle: OracleConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_address: String,
    pub port: u16,
    /// Directory for the accumulated-pot crash-recovery store.
    pub data_dir: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0".to_string(),
            port: 8080,
            data_dir: "./moonbus_data".to_string(),
        }
    }
}

/// Fixed phase durations driving every room's round timers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseConfig {
    pub betting_ms: u64,
    pub locked_ms: u64,
    pub resolving_ms: u64,
    /// Interval of the live price stream during the locked phase.
    pub price_stream_ms: u64,
}

impl Default for PhaseConfig {
    fn default() -> Self {
        Self {
            betting_ms: 30_000,
            locked_ms: 15_000,
            resolving_ms: 10_000,
            price_stream_ms: 500,
        }
    }
}

/// Monetary rules: fees, insurance, damage and the anti-hoarding
/// dispersion of rolled-over pots.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EconomyConfig {
    /// House cut of the total pot when winners exist, in basis points.
    pub house_fee_bp: u32,
    /// Share of a burned skin's total investment refunded as ash insurance,
    /// in basis points (6180 = the golden-ratio 0.618 of the original rule).
    pub ash_insurance_bp: u32,
    /// Integrity damage applied to each losing bettor's equipped skin.
    pub integrity_damage: u32,
    /// Winnerless rounds in a row before forced dispersion.
    pub dispersion_streak: u32,
    /// Share of the accumulated pot moved to the treasury on dispersion.
    pub dispersion_bp: u32,
    /// Maximum stake a default skin may ride at all, independent of tier
    /// access rules (kept as a second gate on purpose).
    pub default_skin_stake_cap: Money,
}

impl Default for EconomyConfig {
    fn default() -> Self {
        Self {
            house_fee_bp: 500,
            ash_insurance_bp: 6_180,
            integrity_damage: 10,
            dispersion_streak: 3,
            dispersion_bp: 5_000,
            default_skin_stake_cap: Money::from_whole(5),
        }
    }
}

/// Room/tier layout and the mitosis scale-out heuristic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomConfig {
    /// Candles kept per room for chart replay.
    pub candle_window: usize,
    /// A room filling faster than this spawns a larger sibling.
    pub mitosis_fill_ms: u64,
    /// Capacity used when a requested capacity is not in the Fibonacci set.
    pub default_capacity: usize,
    pub tiers: Vec<TierConfig>,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            candle_window: 20,
            mitosis_fill_ms: 10_000,
            default_capacity: 8,
            tiers: vec![
                TierConfig {
                    tier: Tier::Training,
                    ticket_price: Money::from_whole(1),
                    capacity: 5,
                    min_skin_level: 1,
                    allow_default_skin: true,
                },
                TierConfig {
                    tier: Tier::Satoshi,
                    ticket_price: Money::from_whole(5),
                    capacity: 8,
                    min_skin_level: 3,
                    allow_default_skin: false,
                },
                TierConfig {
                    tier: Tier::Trader,
                    ticket_price: Money::from_whole(25),
                    capacity: 13,
                    min_skin_level: 8,
                    allow_default_skin: false,
                },
                TierConfig {
                    tier: Tier::Whale,
                    ticket_price: Money::from_whole(100),
                    capacity: 21,
                    min_skin_level: 15,
                    allow_default_skin: false,
                },
            ],
        }
    }
}

/// Per-tier access rules and pricing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierConfig {
    pub tier: Tier,
    pub ticket_price: Money,
    pub capacity: usize,
    pub min_skin_level: u32,
    /// Tiers that refuse the freebie default skin outright.
    pub allow_default_skin: bool,
}

/// Oracle feed reconnect policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Base reconnect delay; actual delay is `base * attempt` (linear).
    pub reconnect_base_ms: u64,
    /// After this many failed attempts a source gives up until restart.
    pub max_reconnect_attempts: u32,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            reconnect_base_ms: 2_000,
            max_reconnect_attempts: 10,
        }
    }
}

impl GameConfig {
    /// Tier settings, if configured.
    pub fn tier(&self, tier: Tier) -> Option<&TierConfig> {
        self.rooms.tiers.iter().find(|t| t.tier == tier)
    }
}

/// Loads configuration from an optional TOML file plus environment
/// overrides, then validates.
pub struct ConfigLoader {
    config_path: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    pub fn load(&self) -> GameResult<GameConfig> {
        let mut config = if let Some(ref path) = self.config_path {
            self.load_from_file(path)?
        } else {
            GameConfig::default()
        };

        self.apply_env_overrides(&mut config)?;
        validate(&config)?;

        Ok(config)
    }

    fn load_from_file(&self, path: &str) -> GameResult<GameConfig> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::LoadFailed(format!("failed to read {}: {}", path, e)))?;

        toml::from_str(&content)
            .map_err(|e| ConfigError::LoadFailed(format!("failed to parse TOML: {}", e)).into())
    }

    fn apply_env_overrides(&self, config: &mut GameConfig) -> GameResult<()> {
        if let Ok(addr) = env::var("MOONBUS_LISTEN_ADDRESS") {
            config.server.listen_address = addr;
        }
        if let Ok(port) = env::var("MOONBUS_PORT") {
            config.server.port = port.parse().map_err(|_| ConfigError::InvalidValue {
                field: "MOONBUS_PORT".to_string(),
                value: port,
                reason: "invalid port number".to_string(),
            })?;
        }
        if let Ok(dir) = env::var("MOONBUS_DATA_DIR") {
            config.server.data_dir = dir;
        }
        if let Ok(ms) = env::var("MOONBUS_BETTING_MS") {
            config.phases.betting_ms = ms.parse().map_err(|_| ConfigError::InvalidValue {
                field: "MOONBUS_BETTING_MS".to_string(),
                value: ms,
                reason: "invalid duration".to_string(),
            })?;
        }
        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn validate(config: &GameConfig) -> GameResult<()> {
    if config.server.port == 0 {
        return Err(ConfigError::InvalidValue {
            field: "server.port".to_string(),
            value: "0".to_string(),
            reason: "port cannot be zero".to_string(),
        }
        .into());
    }
    if config.server.data_dir.is_empty() {
        return Err(ConfigError::MissingRequired("server.data_dir".to_string()).into());
    }
    for (field, value) in [
        ("phases.betting_ms", config.phases.betting_ms),
        ("phases.locked_ms", config.phases.locked_ms),
        ("phases.resolving_ms", config.phases.resolving_ms),
        ("phases.price_stream_ms", config.phases.price_stream_ms),
    ] {
        if value == 0 {
            return Err(ConfigError::InvalidValue {
                field: field.to_string(),
                value: "0".to_string(),
                reason: "phase timer cannot be zero".to_string(),
            }
            .into());
        }
    }
    if config.economy.house_fee_bp >= 10_000 {
        return Err(ConfigError::InvalidValue {
            field: "economy.house_fee_bp".to_string(),
            value: config.economy.house_fee_bp.to_string(),
            reason: "fee must be below 100%".to_string(),
        }
        .into());
    }
    if config.economy.dispersion_bp > 10_000 {
        return Err(ConfigError::InvalidValue {
            field: "economy.dispersion_bp".to_string(),
            value: config.economy.dispersion_bp.to_string(),
            reason: "dispersion share cannot exceed 100%".to_string(),
        }
        .into());
    }
    if config.economy.dispersion_streak == 0 {
        return Err(ConfigError::InvalidValue {
            field: "economy.dispersion_streak".to_string(),
            value: "0".to_string(),
            reason: "streak threshold must be at least 1".to_string(),
        }
        .into());
    }
    if config.rooms.candle_window == 0 {
        return Err(ConfigError::InvalidValue {
            field: "rooms.candle_window".to_string(),
            value: "0".to_string(),
            reason: "candle window must be at least 1".to_string(),
        }
        .into());
    }
    if config.rooms.tiers.is_empty() {
        return Err(ConfigError::MissingRequired("rooms.tiers".to_string()).into());
    }
    for tier in &config.rooms.tiers {
        if tier.ticket_price.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: format!("rooms.tiers[{}].ticket_price", tier.tier),
                value: "0".to_string(),
                reason: "ticket price cannot be zero".to_string(),
            }
            .into());
        }
    }
    if config.oracle.max_reconnect_attempts == 0 {
        return Err(ConfigError::InvalidValue {
            field: "oracle.max_reconnect_attempts".to_string(),
            value: "0".to_string(),
            reason: "at least one attempt is required".to_string(),
        }
        .into());
    }
    Ok(())
}
