//! One game's update pass: staleness check, metadata sync, history fetch, persistence.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{info, warn};

use crate::catalog::ItemCatalog;
use serde_json::Value;

use crate::config::{validate_game_config, Game, GameConfig, HistoryLength, TIMESERIES_STEPS};
use crate::error::{AppError, Result};
use crate::fetch::decode::{history_rows, timeseries_rows};
use crate::fetch::{
    fetch_one, history_url, metadata_url, timeseries_url, CancelFlag, FetchProgress, JsonSource,
    RateLimitedBatchFetcher,
};
use crate::records::Records;

/// Local and remote update times for one game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateCheck {
    pub last_local: DateTime<Utc>,
    pub remote: DateTime<Utc>,
    pub available: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub items: usize,
    pub requested: usize,
    pub refreshed: usize,
    pub failed: usize,
    pub samples: usize,
    pub cancelled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    UpToDate(UpdateCheck),
    Updated {
        check: UpdateCheck,
        summary: RefreshSummary,
    },
    /// Fetch stopped between batches. Ingested prices were saved but the marker was left alone.
    Cancelled {
        check: UpdateCheck,
        summary: RefreshSummary,
    },
}

pub struct UpdateOrchestrator<S> {
    config: GameConfig,
    fetcher: RateLimitedBatchFetcher<S>,
    records: Records,
}

impl<S: JsonSource> UpdateOrchestrator<S> {
    pub fn new(config: GameConfig, source: S, records: Records) -> Result<Self> {
        validate_game_config(&config)?;
        let fetcher = RateLimitedBatchFetcher::new(source, config.fetch.clone())?;
        Ok(Self {
            config,
            fetcher,
            records,
        })
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.fetcher = self.fetcher.with_cancel_flag(cancel);
        self
    }

    pub fn game(&self) -> Game {
        self.config.game
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn records(&self) -> &Records {
        &self.records
    }

    pub fn progress(&self) -> Arc<FetchProgress> {
        self.fetcher.progress()
    }

    pub fn source(&self) -> &S {
        self.fetcher.source()
    }

    pub async fn check(&self) -> Result<UpdateCheck> {
        let game = self.game();
        let last_local = self.records.read_last_update();
        let remote = game.remote_update_time(self.source(), &self.config).await?;
        let available = game
            .is_update_available(self.source(), &self.config, last_local, remote)
            .await?;
        Ok(UpdateCheck {
            last_local,
            remote,
            available,
        })
    }

    /// Run a full pass. `force` skips the staleness check but still stamps the remote time.
    pub async fn run(&self, force: bool) -> Result<UpdateOutcome> {
        let game = self.game();
        let mut check = self.check().await?;
        if !check.available {
            if !force {
                info!("{game}: local data is up to date ({})", check.last_local);
                return Ok(UpdateOutcome::UpToDate(check));
            }
            info!("{game}: forcing update despite up-to-date marker");
            check.available = true;
        }

        self.records.prepare()?;
        let mut catalog = self.records.load_catalog()?;
        info!("{game}: loaded {} tracked items", catalog.len());

        let summary = game
            .periodic_update(self, &mut catalog, check.last_local, check.remote)
            .await?;

        let json_path = self.records.save_catalog(&catalog)?;
        let tsv_path = self.records.save_tsv(&catalog)?;
        info!(
            "{game}: saved {} and {}",
            json_path.display(),
            tsv_path.display()
        );

        if summary.cancelled {
            warn!("{game}: update cancelled, keeping marker at {}", check.last_local);
            return Ok(UpdateOutcome::Cancelled { check, summary });
        }

        self.records.write_last_update(check.remote)?;
        info!(
            "{game}: refreshed {}/{} items ({} samples, {} failed), marker now {}",
            summary.refreshed, summary.requested, summary.samples, summary.failed, check.remote
        );
        Ok(UpdateOutcome::Updated { check, summary })
    }

    /// Sync metadata into `catalog`, then fetch and fold in `length` history for every item,
    /// plus the intraday timeseries variants where the game publishes them.
    pub async fn refresh_catalog(
        &self,
        catalog: &mut ItemCatalog,
        length: HistoryLength,
    ) -> Result<RefreshSummary> {
        let game = self.game();
        let dump_url = metadata_url(&self.config)?;
        let dump = fetch_one(self.source(), &dump_url, self.config.fetch.request_timeout()).await?;
        let synced = catalog.sync_metadata(&dump)?;
        info!("{game}: synced metadata for {synced} items ({} tracked)", catalog.len());

        let mut targets: HashMap<String, (u32, Option<&'static str>)> =
            HashMap::with_capacity(catalog.len());
        let mut urls = Vec::with_capacity(catalog.len());
        for id in catalog.ids() {
            let url = history_url(&self.config, id, length)?;
            targets.insert(url.clone(), (id, None));
            urls.push(url);
            for step in TIMESERIES_STEPS {
                if let Some(url) = timeseries_url(&self.config, id, step)? {
                    targets.insert(url.clone(), (id, Some(step)));
                    urls.push(url);
                }
            }
        }

        let report = self.fetcher.fetch_all(urls).await;
        let mut summary = RefreshSummary {
            items: catalog.len(),
            requested: targets.len(),
            cancelled: report.cancelled,
            ..RefreshSummary::default()
        };

        for (url, payload) in report.results {
            let Some(&(id, step)) = targets.get(&url) else {
                continue;
            };
            let Some(payload) = payload else {
                warn!("{game}: no price data for item {id} from {url}");
                summary.failed += 1;
                continue;
            };

            let ingested = match step {
                None => match history_rows(&payload, id) {
                    Some(rows) => catalog.ingest_price_json(id, rows),
                    None => {
                        warn!("{game}: unexpected history payload for item {id} from {url}");
                        summary.failed += 1;
                        continue;
                    }
                },
                Some(step) => match timeseries_rows(&payload) {
                    Some(rows) => catalog.ingest_price_json_as(id, &Value::Array(rows), Some(step)),
                    None => {
                        warn!("{game}: unexpected {step} timeseries for item {id} from {url}");
                        summary.failed += 1;
                        continue;
                    }
                },
            };

            match ingested {
                Ok(stored) => {
                    summary.refreshed += 1;
                    summary.samples += stored;
                }
                Err(err @ AppError::InvalidTimestamp(_)) => {
                    warn!("{game}: discarding prices for item {id} from {url}: {err}");
                    summary.failed += 1;
                }
                Err(err) => return Err(err),
            }
        }

        Ok(summary)
    }
}
