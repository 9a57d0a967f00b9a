//! # Hot potato player
//!
//! One player of the hot potato game. Start the other players first, then
//! the one that holds the potato:
//!
//! ```text
//! hpp bob
//! hpp carol
//! hpp alice true
//! ```
//!
//! The holder passes the potato to a random peer every second or two;
//! whoever holds it once it expires loses.

use anyhow::Context;
use tracing::{debug, error};

use hot_potato::cli::{self, Invocation};
use hot_potato::{init_tracing, Player, SystemClock, WsDirectory};

#[tokio::main]
async fn main() {
    init_tracing();

    let code = match run().await {
        Ok(()) => 0,
        Err(err) => {
            error!("{:#}", err);
            eprintln!("hpp: {:#}", err);
            1
        }
    };
    std::process::exit(code);
}

async fn run() -> anyhow::Result<()> {
    let (name, starter, config) = match Invocation::from_args(std::env::args_os()) {
        Ok(Invocation::Play { name, starter, config }) => (name, starter, config),
        Ok(Invocation::Usage) => {
            print!("{}", cli::USAGE);
            return Ok(());
        }
        Err(err) => err.exit(),
    };

    let config = cli::player_config(name, starter, config)
        .context("loading game configuration")?;
    let directory = WsDirectory::connect(&config.game.hub_url, config.game.request_timeout())
        .await
        .with_context(|| format!("connecting to hub at {}", config.game.hub_url))?;

    let player = Player::join(config, directory, SystemClock).await?;
    let outcome = player.run().await?;
    debug!(?outcome, "game finished");
    Ok(())
}
