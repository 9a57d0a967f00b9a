use std::ffi::OsString;
use std::path::PathBuf;

use clap::Parser;

use crate::config::{ConfigError, GameConfig, PlayerConfig};

pub const USAGE: &str = "\
Hot Potato Player requires a username
Syntax: hpp username [true]
  true - The player set to true will start the game.
";

#[derive(Parser, Debug)]
#[command(name = "hpp", version, about = "Hot Potato Player")]
struct Args {
    /// Name announced when this player loses
    player_name: Option<String>,

    /// Any value makes this player start the game
    starter: Option<String>,

    /// Arguments after the starter flag are ignored
    #[arg(hide = true)]
    _rest: Vec<String>,

    /// JSON game configuration [default: config/config.json if present]
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Invocation {
    /// No player name was given.
    Usage,
    Play {
        name: String,
        starter: bool,
        config: Option<PathBuf>,
    },
}

impl Invocation {
    pub fn from_args<I, T>(args: I) -> Result<Self, clap::Error>
        where I: IntoIterator<Item = T>,
              T: Into<OsString> + Clone,
    {
        let args = Args::try_parse_from(args)?;
        Ok(match args.player_name {
            None => Invocation::Usage,
            Some(name) => Invocation::Play {
                name,
                starter: args.starter.is_some(),
                config: args.config,
            },
        })
    }
}

/// Loads the game settings and combines them with the player's own.
pub fn player_config(name: String, starter: bool, config: Option<PathBuf>)
    -> Result<PlayerConfig, ConfigError>
{
    let game = GameConfig::load(config.as_deref())?;
    Ok(PlayerConfig { name, starter, game })
}
