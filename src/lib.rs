//! Moonbus - multiplayer price-prediction game server.
//!
//! Players board fixed-capacity rooms ("buses"), bet real money on the next
//! BTC price move and share the pot. A filled room runs exactly one round:
//! a betting window, a locked window where the live oracle price decides the
//! outcome, and a resolving window where winners are paid, losers' skins
//! take integrity damage and winnerless pots roll over to the tier's next
//! trip.

pub mod config;
pub mod engine;
pub mod errors;
pub mod events;
pub mod ledger;
pub mod money;
pub mod oracle;
pub mod registry;
pub mod server;
pub mod service;
pub mod stats;
pub mod storage;
pub mod transport;
pub mod types;

pub use config::{ConfigLoader, GameConfig};
pub use engine::{EngineDeps, RoundEngine};
pub use errors::{GameError, GameResult};
pub use ledger::{Ledger, MemoryLedger};
pub use money::Money;
pub use oracle::PriceOracle;
pub use registry::RoomRegistry;
pub use service::GameService;
pub use stats::HouseBook;
pub use storage::{MemoryPotStore, PotStore, RocksPotStore};
pub use transport::{Broadcaster, ChannelBroadcaster};
