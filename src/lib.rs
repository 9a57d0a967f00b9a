pub mod cli;
pub mod clock;
pub mod config;
pub mod directory;
pub mod journal;
pub mod messages;
pub mod player;
pub mod selection;
pub mod utils;

pub use clock::{Clock, SystemClock, TokioClock};
pub use config::{ConfigError, GameConfig, PlayerConfig};
pub use directory::{Directory, DirectoryError, Instance, LocalDirectory, LocalHub, WsDirectory};
pub use messages::{Address, Body, Envelope, InstanceId, HOT_POTATO_TYPE};
pub use player::{Outcome, Player, PlayerError};

/// Installs the stderr log subscriber shared by the binaries.
/// `RUST_LOG` overrides the default `warn` level.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
