use std::collections::HashMap;

use crate::config::{GameConfig, HistoryLength};
use crate::error::{AppError, Result};

use super::FetchError;

/// One distinct URL tracked by the batch fetcher across attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub url: String,
    pub attempts: u32,
    pub last_error: Option<FetchError>,
}

impl Request {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            attempts: 0,
            last_error: None,
        }
    }
}

pub fn metadata_url(config: &GameConfig) -> Result<String> {
    let replacements = base_replacements(config);
    render_template(&config.endpoints.metadata_url_template, &replacements)
}

pub fn history_url(config: &GameConfig, item_id: u32, length: HistoryLength) -> Result<String> {
    let mut replacements = base_replacements(config);
    replacements.insert("id", item_id.to_string());
    replacements.insert("length", length.as_str().to_string());
    render_template(&config.endpoints.history_url_template, &replacements)
}

/// Intraday series URL for one `timestep`, or `None` when the game has no such endpoint.
pub fn timeseries_url(config: &GameConfig, item_id: u32, timestep: &str) -> Result<Option<String>> {
    let Some(template) = config.endpoints.timeseries_url_template.as_deref() else {
        return Ok(None);
    };
    let mut replacements = base_replacements(config);
    replacements.insert("id", item_id.to_string());
    replacements.insert("timestep", timestep.to_string());
    render_template(template, &replacements).map(Some)
}

fn base_replacements(config: &GameConfig) -> HashMap<&'static str, String> {
    HashMap::from([
        ("game", config.game.code().to_string()),
        ("prefix", config.game.dump_prefix().to_string()),
    ])
}

/// Substitute every `{name}` in `template`. Unknown or malformed placeholders are errors.
fn render_template(template: &str, replacements: &HashMap<&str, String>) -> Result<String> {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        rendered.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after.find('}').ok_or_else(|| {
            AppError::message(format!("URL template `{template}` has an unclosed `{{`"))
        })?;

        let name = &after[..close];
        if name.is_empty() {
            return Err(AppError::message(format!(
                "URL template `{template}` contains an empty `{{}}`"
            )));
        }
        let value = replacements.get(name).ok_or_else(|| {
            AppError::message(format!("URL template `{template}` uses unknown key `{name}`"))
        })?;
        rendered.push_str(value);
        rest = &after[close + 1..];
    }

    rendered.push_str(rest);
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Game};

    #[test]
    fn renders_builtin_urls() {
        let config = Config::builtin();
        let osrs = config.get_game_config(Game::Osrs).unwrap();
        let rs = config.get_game_config(Game::Rs).unwrap();

        assert_eq!(
            history_url(osrs, 4151, HistoryLength::Last90d).unwrap(),
            "https://api.weirdgloop.org/exchange/history/osrs/last90d?compress=true&id=4151"
        );
        assert_eq!(
            metadata_url(osrs).unwrap(),
            "https://chisel.weirdgloop.org/gazproj/gazbot/os_dump.json"
        );
        assert_eq!(
            metadata_url(rs).unwrap(),
            "https://chisel.weirdgloop.org/gazproj/gazbot/rs_dump.json"
        );
    }

    #[test]
    fn rejects_unknown_placeholder() {
        let mut config = Config::builtin().get_game_config(Game::Rs).cloned().unwrap();
        config.endpoints.history_url_template = "https://example.invalid/{item}".to_string();

        let err = history_url(&config, 1, HistoryLength::All).expect_err("unknown placeholder");
        assert!(err.to_string().contains("`item`"), "{err}");
    }

    #[test]
    fn rejects_unterminated_placeholder() {
        let mut config = Config::builtin().get_game_config(Game::Rs).cloned().unwrap();
        config.endpoints.metadata_url_template = "https://example.invalid/{prefix".to_string();

        let err = metadata_url(&config).expect_err("unclosed placeholder");
        assert!(err.to_string().contains("unclosed"), "{err}");

        config.endpoints.metadata_url_template = "https://example.invalid/{}".to_string();
        let err = metadata_url(&config).expect_err("empty placeholder");
        assert!(err.to_string().contains("empty"), "{err}");
    }

    #[test]
    fn renders_timeseries_only_where_configured() {
        let config = Config::builtin();
        let osrs = config.get_game_config(Game::Osrs).unwrap();
        let rs = config.get_game_config(Game::Rs).unwrap();

        assert_eq!(
            timeseries_url(osrs, 4151, "5m").unwrap().as_deref(),
            Some("https://prices.runescape.wiki/api/v1/osrs/timeseries?timestep=5m&id=4151")
        );
        assert_eq!(timeseries_url(rs, 4151, "5m").unwrap(), None);
    }
}
