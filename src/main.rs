//! Moonbus game server binary.

use clap::Parser;
use moonbus::engine::EngineDeps;
use moonbus::ledger::Ledger;
use moonbus::server::{run_server, AppState};
use moonbus::storage::PotStore;
use moonbus::transport::Broadcaster;
use moonbus::types::Skin;
use moonbus::{
    ChannelBroadcaster, ConfigLoader, GameService, HouseBook, MemoryLedger, Money, PriceOracle,
    RocksPotStore, RoomRegistry,
};
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "moonbus", about = "Multiplayer price-prediction game server")]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<String>,

    /// Override the listen port.
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "moonbus=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();
    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.with_path(path);
    }
    let mut config = loader.load()?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    let config = Arc::new(config);
    info!(
        port = config.server.port,
        data_dir = %config.server.data_dir,
        "starting moonbus"
    );

    // Demo ledger until the production wallet service is wired in.
    let ledger = Arc::new(MemoryLedger::new());
    seed_demo_users(&ledger);
    let ledger: Arc<dyn Ledger> = ledger;

    let pot_store: Arc<dyn PotStore> = Arc::new(RocksPotStore::open(&config.server.data_dir)?);
    let broadcaster = Arc::new(ChannelBroadcaster::new(1024));
    let oracle = PriceOracle::new(config.oracle.clone());
    oracle.start();

    let registry = Arc::new(RoomRegistry::new(Arc::clone(&config), Arc::clone(&ledger)));
    registry.seed_default_rooms();

    let deps = EngineDeps {
        registry,
        ledger,
        oracle,
        broadcaster: Arc::clone(&broadcaster) as Arc<dyn Broadcaster>,
        pot_store,
        config: Arc::clone(&config),
        book: Arc::new(HouseBook::new()),
    };
    let state = Arc::new(AppState {
        service: Arc::new(GameService::new(deps)),
        broadcaster,
    });

    run_server(state, &config.server.listen_address, config.server.port).await
}

fn seed_demo_users(ledger: &MemoryLedger) {
    for (name, balance, level) in [
        ("alice", 100u64, 5u32),
        ("bob", 100, 5),
        ("carol", 500, 10),
        ("dave", 2_000, 20),
    ] {
        ledger.add_user(
            name,
            Money::from_whole(balance),
            Skin {
                level,
                is_default: false,
                total_investment: Money::from_whole(balance / 10),
                ..Skin::starter()
            },
        );
    }
    info!("seeded 4 demo users");
}
