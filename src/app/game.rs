use chrono::{DateTime, Utc};
use log::{debug, info};

use crate::catalog::ItemCatalog;
use crate::config::{Game, GameConfig, HistoryLength};
use crate::error::{AppError, Result};
use crate::fetch::decode::{latest_realtime_trade, parse_remote_update_time};
use crate::fetch::{fetch_one, JsonSource};
use crate::utils::whole_days_between;

use super::orchestrator::{RefreshSummary, UpdateOrchestrator};

impl Game {
    /// Time the exchange last published prices for this game.
    pub async fn remote_update_time<S>(self, source: &S, config: &GameConfig) -> Result<DateTime<Utc>>
    where
        S: JsonSource + ?Sized,
    {
        let payload = fetch_one(
            source,
            &config.endpoints.update_times_url,
            config.fetch.request_timeout(),
        )
        .await?;

        let raw = payload.get(self.code()).and_then(|value| value.as_str()).ok_or_else(|| {
            AppError::message(format!("Update times payload has no entry for {self}"))
        })?;
        parse_remote_update_time(raw)
    }

    /// Whether the exchange has data newer than `last_local`. OSRS additionally requires the
    /// realtime feed to show trades after the local marker.
    pub async fn is_update_available<S>(
        self,
        source: &S,
        config: &GameConfig,
        last_local: DateTime<Utc>,
        remote: DateTime<Utc>,
    ) -> Result<bool>
    where
        S: JsonSource + ?Sized,
    {
        if remote <= last_local {
            debug!("{self}: exchange update {remote} is not newer than local {last_local}");
            return Ok(false);
        }

        match self {
            Game::Rs => Ok(true),
            Game::Osrs => {
                let Some(url) = config.endpoints.realtime_url.as_deref() else {
                    return Ok(true);
                };
                let payload = fetch_one(source, url, config.fetch.request_timeout()).await?;
                match latest_realtime_trade(&payload)? {
                    Some(latest) if latest > last_local => Ok(true),
                    Some(latest) => {
                        debug!("{self}: newest realtime trade {latest} predates local {last_local}");
                        Ok(false)
                    }
                    None => Ok(false),
                }
            }
        }
    }

    /// Refresh metadata and price history for every tracked item, requesting only as much
    /// history as the gap since the last local update needs.
    pub async fn periodic_update<S>(
        self,
        orchestrator: &UpdateOrchestrator<S>,
        catalog: &mut ItemCatalog,
        last_local: DateTime<Utc>,
        remote: DateTime<Utc>,
    ) -> Result<RefreshSummary>
    where
        S: JsonSource,
    {
        let days = whole_days_between(last_local, remote);
        let length = HistoryLength::for_days_since_update(days);
        info!(
            "{self}: {days} days since last local update, requesting `{}` history",
            length.as_str()
        );

        orchestrator.refresh_catalog(catalog, length).await
    }
}
