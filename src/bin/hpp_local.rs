//! # Local hot potato
//!
//! Runs a whole hot potato game inside one process, with every player
//! connected to an in-process hub. Player 1 holds the potato.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use futures::future::join_all;
use tracing::info;

use hot_potato::{
    init_tracing, Body, Envelope, GameConfig, LocalHub, Outcome, Player, PlayerConfig, SystemClock,
};

#[derive(Parser, Debug)]
#[command(name = "hpp_local", version, about = "Play hot potato with simulated players")]
struct Args {
    /// Number of simulated players
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u32).range(1..))]
    players: u32,

    /// JSON game configuration [default: config/config.json if present]
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();
    let game = GameConfig::load(args.config.as_deref())
        .context("loading game configuration")?;

    let hub = LocalHub::new();

    // everyone registers before the holder starts counting down
    let mut players = Vec::new();
    for player_num in 1..=args.players {
        let config = PlayerConfig {
            name: format!("player-{}", player_num),
            starter: player_num == 1,
            game: game.clone(),
        };
        let player = Player::join(config, hub.connect(), SystemClock).await?;
        players.push(player);
    }

    let playing = join_all(players.into_iter().map(|player| async move {
        let name = player.name().to_string();
        (name, player.run().await)
    }));
    tokio::pin!(playing);

    // follow the hub traffic while the game runs
    let mut traffic = hub.traffic().reader();
    let mut passes = 0;
    let results = loop {
        tokio::select! {
            results = &mut playing => break results,
            message = traffic.recv() => passes += report(&message),
        }
    };
    while traffic.position() < hub.traffic().len() {
        passes += report(&*traffic.recv().await);
    }

    for (name, result) in results {
        match result? {
            Outcome::Lost { .. } => println!("{} lost", name),
            Outcome::GameOver { .. } => println!("{} survived", name),
            Outcome::NoPeers => println!("{} had no one to play with", name),
        }
    }

    info!(passes, "game finished");
    println!("the hot potato was passed {} times", passes);
    Ok(())
}

/// Logs one routed message; counts 1 if it passed the potato on.
fn report(message: &Envelope) -> usize {
    match message.decode_body::<Body>() {
        Ok(Body::HotPotato { expiration }) => {
            info!(mid = %message.mid, from = %message.from, to = %message.to, expiration,
                  "hot potato passed");
            1
        }
        _ => 0,
    }
}
