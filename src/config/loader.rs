use std::{collections::HashMap, fs, path::Path};

use serde::Deserialize;

use crate::error::{Context, Result};

use super::{validator, Config, Game, GameConfig};

/// Apply a JSON override file on top of `config`, then validate every game.
///
/// The file maps game codes to partial game configs; absent fields keep their current value:
///
/// ```json
/// { "osrs": { "fetch": { "max_batch_size": 50, "cooldown_secs": 5 } } }
/// ```
pub fn load_config_overrides(config: &mut Config, path: &Path) -> Result<()> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("failed to read config overrides at {}", path.display()))?;
    apply_config_overrides(config, &json)
        .with_context(|| format!("failed to apply config overrides from {}", path.display()))?;
    Ok(())
}

pub fn apply_config_overrides(config: &mut Config, json: &str) -> Result<()> {
    let raw: HashMap<String, RawGameOverride> =
        serde_json::from_str(json).context("failed to parse config override JSON")?;

    for (code, overrides) in raw {
        let game: Game = code.parse()?;
        let target = config
            .games
            .get_mut(&game)
            .with_context(|| format!("no builtin configuration for game `{game}`"))?;
        overrides.apply(target);
        validator::validate_game_config(target)?;
    }

    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawGameOverride {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    user_agent: Option<String>,
    #[serde(default)]
    endpoints: RawEndpointOverride,
    #[serde(default)]
    fetch: RawFetchOverride,
}

impl RawGameOverride {
    fn apply(self, target: &mut GameConfig) {
        if let Some(name) = self.name {
            target.name = name;
        }
        if let Some(user_agent) = self.user_agent {
            target.user_agent = user_agent;
        }
        self.endpoints.apply(target);
        self.fetch.apply(target);
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEndpointOverride {
    update_times_url: Option<String>,
    metadata_url_template: Option<String>,
    history_url_template: Option<String>,
    realtime_url: Option<String>,
    timeseries_url_template: Option<String>,
}

impl RawEndpointOverride {
    fn apply(self, target: &mut GameConfig) {
        let endpoints = &mut target.endpoints;
        if let Some(url) = self.update_times_url {
            endpoints.update_times_url = url;
        }
        if let Some(template) = self.metadata_url_template {
            endpoints.metadata_url_template = template;
        }
        if let Some(template) = self.history_url_template {
            endpoints.history_url_template = template;
        }
        // An empty string switches the optional endpoints off.
        if let Some(url) = self.realtime_url {
            endpoints.realtime_url = non_empty(url);
        }
        if let Some(template) = self.timeseries_url_template {
            endpoints.timeseries_url_template = non_empty(template);
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawFetchOverride {
    max_batch_size: Option<usize>,
    cooldown_secs: Option<f64>,
    max_retries: Option<u32>,
    request_timeout_secs: Option<f64>,
}

impl RawFetchOverride {
    fn apply(self, target: &mut GameConfig) {
        let fetch = &mut target.fetch;
        if let Some(size) = self.max_batch_size {
            fetch.max_batch_size = size;
        }
        if let Some(cooldown) = self.cooldown_secs {
            fetch.cooldown_secs = cooldown;
        }
        if let Some(retries) = self.max_retries {
            fetch.max_retries = retries;
        }
        if let Some(timeout) = self.request_timeout_secs {
            fetch.request_timeout_secs = timeout;
        }
    }
}
