use std::time::Duration;

use crate::error::{AppError, Result};

use super::{EndpointConfig, FetchConfig, GameConfig};

/// Validate a single game configuration and surface every problem at once.
pub fn validate_game_config(config: &GameConfig) -> Result<()> {
    let mut issues = Vec::new();

    if config.name.trim().is_empty() {
        issues.push("name must not be empty".to_string());
    }
    if config.user_agent.trim().is_empty() {
        issues.push("user_agent must not be empty".to_string());
    }
    validate_endpoints(&config.endpoints, &mut issues);
    collect_fetch_issues(&config.fetch, &mut issues);

    if issues.is_empty() {
        Ok(())
    } else {
        Err(AppError::invalid_config(format!(
            "game `{}` config invalid:\n  - {}",
            config.game,
            issues.join("\n  - ")
        )))
    }
}

/// Contract checks the batch fetcher runs before touching the network.
pub fn validate_fetch_config(config: &FetchConfig) -> Result<()> {
    let mut issues = Vec::new();
    collect_fetch_issues(config, &mut issues);

    if issues.is_empty() {
        Ok(())
    } else {
        Err(AppError::invalid_config(issues.join("; ")))
    }
}

fn collect_fetch_issues(config: &FetchConfig, issues: &mut Vec<String>) {
    if config.max_batch_size == 0 {
        issues.push("fetch.max_batch_size must be greater than zero".to_string());
    }
    if !config.cooldown_secs.is_finite() || config.cooldown_secs < 0.0 {
        issues.push(format!(
            "fetch.cooldown_secs must be a finite, non-negative number (got {})",
            config.cooldown_secs
        ));
    } else if Duration::try_from_secs_f64(config.cooldown_secs).is_err() {
        issues.push(format!(
            "fetch.cooldown_secs is too large for a duration (got {})",
            config.cooldown_secs
        ));
    }
    if !config.request_timeout_secs.is_finite() || config.request_timeout_secs <= 0.0 {
        issues.push(format!(
            "fetch.request_timeout_secs must be a finite, positive number (got {})",
            config.request_timeout_secs
        ));
    } else if Duration::try_from_secs_f64(config.request_timeout_secs).is_err() {
        issues.push(format!(
            "fetch.request_timeout_secs is too large for a duration (got {})",
            config.request_timeout_secs
        ));
    }
}

fn validate_endpoints(endpoints: &EndpointConfig, issues: &mut Vec<String>) {
    if endpoints.update_times_url.trim().is_empty() {
        issues.push("endpoints.update_times_url must not be empty".to_string());
    }

    if endpoints.metadata_url_template.trim().is_empty() {
        issues.push("endpoints.metadata_url_template must not be empty".to_string());
    }

    let history = &endpoints.history_url_template;
    if history.trim().is_empty() {
        issues.push("endpoints.history_url_template must not be empty".to_string());
    } else {
        for placeholder in ["{id}", "{length}"] {
            if !history.contains(placeholder) {
                issues.push(format!(
                    "endpoints.history_url_template should reference `{placeholder}`"
                ));
            }
        }
    }

    if let Some(realtime) = &endpoints.realtime_url {
        if realtime.trim().is_empty() {
            issues.push("endpoints.realtime_url must not be empty when set".to_string());
        }
    }

    if let Some(timeseries) = &endpoints.timeseries_url_template {
        for placeholder in ["{id}", "{timestep}"] {
            if !timeseries.contains(placeholder) {
                issues.push(format!(
                    "endpoints.timeseries_url_template should reference `{placeholder}`"
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Game};

    fn osrs_config() -> GameConfig {
        Config::builtin()
            .get_game_config(Game::Osrs)
            .cloned()
            .expect("osrs config")
    }

    #[test]
    fn validates_builtin_osrs() {
        validate_game_config(&osrs_config()).expect("osrs config should be valid");
    }

    #[test]
    fn rejects_zero_batch_size() {
        let mut config = osrs_config();
        config.fetch.max_batch_size = 0;

        let err = validate_game_config(&config).expect_err("validation should fail");
        assert!(
            err.to_string().contains("max_batch_size"),
            "unexpected error message: {err}"
        );
    }

    #[test]
    fn reports_every_issue() {
        let mut config = osrs_config();
        config.fetch.cooldown_secs = f64::NAN;
        config.fetch.request_timeout_secs = 0.0;
        config.endpoints.history_url_template = "https://example.invalid/history".to_string();

        let message = validate_game_config(&config)
            .expect_err("validation should fail")
            .to_string();
        assert!(message.contains("cooldown_secs"), "{message}");
        assert!(message.contains("request_timeout_secs"), "{message}");
        assert!(message.contains("`{id}`"), "{message}");
        assert!(message.contains("`{length}`"), "{message}");
    }

    #[test]
    fn fetch_config_contract() {
        assert!(validate_fetch_config(&FetchConfig::default()).is_ok());

        let negative = FetchConfig {
            cooldown_secs: -1.0,
            ..FetchConfig::default()
        };
        assert!(matches!(
            validate_fetch_config(&negative),
            Err(AppError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_durations_beyond_range() {
        let huge = FetchConfig {
            cooldown_secs: 1e30,
            request_timeout_secs: 1e30,
            ..FetchConfig::default()
        };
        let message = validate_fetch_config(&huge)
            .expect_err("validation should fail")
            .to_string();
        assert!(message.contains("cooldown_secs is too large"), "{message}");
        assert!(message.contains("request_timeout_secs is too large"), "{message}");

        // Accessors saturate instead of panicking.
        assert_eq!(huge.cooldown(), Duration::MAX);
        assert_eq!(huge.request_timeout(), Duration::MAX);
    }
}
