use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub mod loader;
pub mod validator;

pub use loader::load_config_overrides;
pub use validator::validate_game_config;

pub const DEFAULT_USER_AGENT: &str = concat!("ge-updater/", env!("CARGO_PKG_VERSION"));

/// Games whose exchange data can be tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Game {
    Osrs,
    Rs,
}

impl Game {
    pub const ALL: [Game; 2] = [Game::Osrs, Game::Rs];

    /// Identifier used by the upstream APIs and for on-disk directories.
    pub fn code(self) -> &'static str {
        match self {
            Game::Osrs => "osrs",
            Game::Rs => "rs",
        }
    }

    /// Prefix of the item dump file published for this game.
    pub fn dump_prefix(self) -> &'static str {
        match self {
            Game::Osrs => "os",
            Game::Rs => "rs",
        }
    }
}

impl fmt::Display for Game {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Game {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "osrs" => Ok(Game::Osrs),
            "rs" | "rs3" => Ok(Game::Rs),
            other => Err(AppError::message(format!(
                "`{other}` is an unsupported game mode (expected one of: osrs, rs)"
            ))),
        }
    }
}

/// How much history the upstream should return for each item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryLength {
    All,
    Last90d,
    Latest,
}

impl HistoryLength {
    pub fn as_str(self) -> &'static str {
        match self {
            HistoryLength::All => "all",
            HistoryLength::Last90d => "last90d",
            HistoryLength::Latest => "latest",
        }
    }

    /// Pick the narrowest window that still covers the gap since the last local update.
    pub fn for_days_since_update(days: i64) -> Self {
        if days >= 90 {
            HistoryLength::All
        } else if days >= 2 {
            HistoryLength::Last90d
        } else {
            HistoryLength::Latest
        }
    }
}

/// Throttling and retry settings for the batch fetcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub max_batch_size: usize,
    pub cooldown_secs: f64,
    pub max_retries: u32,
    pub request_timeout_secs: f64,
}

impl FetchConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::try_from_secs_f64(self.cooldown_secs.max(0.0)).unwrap_or(Duration::MAX)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.request_timeout_secs.max(0.0)).unwrap_or(Duration::MAX)
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            cooldown_secs: 3.0,
            max_retries: 3,
            request_timeout_secs: 30.0,
        }
    }
}

/// Intraday steps requested from the timeseries endpoint, each stored as its own variant.
pub const TIMESERIES_STEPS: [&str; 2] = ["5m", "1h"];

/// Upstream endpoints. Templates use `{game}`, `{prefix}`, `{length}`, `{timestep}` and `{id}`
/// placeholders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub update_times_url: String,
    pub metadata_url_template: String,
    pub history_url_template: String,
    #[serde(default)]
    pub realtime_url: Option<String>,
    #[serde(default)]
    pub timeseries_url_template: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GameConfig {
    pub game: Game,
    pub name: String,
    pub endpoints: EndpointConfig,
    pub fetch: FetchConfig,
    pub user_agent: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub games: HashMap<Game, GameConfig>,
}

impl Config {
    pub fn builtin() -> Self {
        let shared_endpoints = EndpointConfig {
            update_times_url: "https://api.weirdgloop.org/exchange".to_string(),
            metadata_url_template:
                "https://chisel.weirdgloop.org/gazproj/gazbot/{prefix}_dump.json".to_string(),
            history_url_template:
                "https://api.weirdgloop.org/exchange/history/{game}/{length}?compress=true&id={id}"
                    .to_string(),
            realtime_url: None,
            timeseries_url_template: None,
        };

        let osrs = GameConfig {
            game: Game::Osrs,
            name: "Old School RuneScape".to_string(),
            endpoints: EndpointConfig {
                realtime_url: Some("https://prices.runescape.wiki/api/v1/osrs/latest".to_string()),
                timeseries_url_template: Some(
                    "https://prices.runescape.wiki/api/v1/osrs/timeseries?timestep={timestep}&id={id}"
                        .to_string(),
                ),
                ..shared_endpoints.clone()
            },
            fetch: FetchConfig::default(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        };

        let rs = GameConfig {
            game: Game::Rs,
            name: "RuneScape".to_string(),
            endpoints: shared_endpoints,
            fetch: FetchConfig::default(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        };

        let games = HashMap::from([(Game::Osrs, osrs), (Game::Rs, rs)]);

        Config { games }
    }

    pub fn get_game_config(&self, game: Game) -> Option<&GameConfig> {
        self.games.get(&game)
    }

    pub fn available_games(&self) -> Vec<&GameConfig> {
        let mut games: Vec<&GameConfig> = self.games.values().collect();
        games.sort_by_key(|config| config.game);
        games
    }
}
