use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Game;
use crate::series::render::DEFAULT_TIMESTAMP_FORMAT;
use crate::series::{RenderFormat, DEFAULT_VARIANT};

#[derive(Debug, Parser)]
#[command(name = "ge-updater")]
#[command(about = "Keeps local Grand Exchange price databases for OSRS and RS up to date")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Directory holding one sub-directory of data per game
    #[arg(short, long, default_value = "data", global = true)]
    pub data_dir: PathBuf,

    /// JSON file overriding the built-in endpoint and fetch settings
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Check each game once and update the ones with newer exchange data
    Update {
        /// Games to update (osrs, rs); defaults to all
        games: Vec<Game>,

        /// Update even when the local marker is current
        #[arg(short, long)]
        force: bool,
    },

    /// Poll for exchange updates until interrupted
    Watch {
        /// Games to watch (osrs, rs); defaults to all
        games: Vec<Game>,

        /// Seconds between checks
        #[arg(short, long, default_value_t = 300)]
        interval: u64,
    },

    /// Show local and remote update times
    Status {
        /// Games to inspect (osrs, rs); defaults to all
        games: Vec<Game>,
    },

    /// Print one item's stored prices, newest first
    History {
        /// Game the item belongs to (osrs, rs)
        game: Game,

        /// Item id
        id: u32,

        /// Output format: csv, tsv, json or text
        #[arg(short, long, default_value = "csv")]
        format: RenderFormat,

        /// Price variant to print (all, 5m, 1h, ...)
        #[arg(long, default_value = DEFAULT_VARIANT)]
        variant: String,

        /// Separator for csv and tsv output
        #[arg(long)]
        delimiter: Option<String>,

        /// strftime pattern for timestamps in csv and tsv output
        #[arg(long, default_value = DEFAULT_TIMESTAMP_FORMAT)]
        timestamp_format: String,
    },
}

/// Requested games, or every game when none were named.
pub fn selected_games(games: &[Game]) -> Vec<Game> {
    if games.is_empty() {
        Game::ALL.to_vec()
    } else {
        let mut selected = games.to_vec();
        selected.sort();
        selected.dedup();
        selected
    }
}
