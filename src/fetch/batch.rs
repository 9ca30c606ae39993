//! Batched, rate-limited, retrying JSON fetcher.
//!
//! The coordinator owns the pending queue, the attempt counters and the result map. Each batch
//! is fanned out concurrently and every attempt hands back a `(Request, outcome)` pair, so no
//! state is shared with the in-flight futures.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use serde_json::Value;
use tokio::time::{sleep, sleep_until, timeout, Instant};

use crate::config::validator::validate_fetch_config;
use crate::config::FetchConfig;
use crate::error::Result;

use super::{AttemptResult, FetchError, JsonSource, Request};

/// URL → decoded document, or `None` once the retry budget is exhausted.
pub type FetchResults = HashMap<String, Option<Value>>;

#[derive(Debug, Clone, PartialEq)]
pub struct FetchReport {
    pub results: FetchResults,
    /// Set when the run was abandoned between batches; unresolved URLs are absent from `results`.
    pub cancelled: bool,
}

impl FetchReport {
    pub fn succeeded(&self) -> usize {
        self.results.values().filter(|value| value.is_some()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.values().filter(|value| value.is_none()).count()
    }
}

/// Counters a caller can poll while a fetch is running (progress bars, logging, tests).
#[derive(Debug, Default)]
pub struct FetchProgress {
    expected: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    attempts: AtomicUsize,
    batches: AtomicUsize,
}

impl FetchProgress {
    pub fn expected(&self) -> usize {
        self.expected.load(Ordering::SeqCst)
    }

    pub fn succeeded(&self) -> usize {
        self.succeeded.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    pub fn resolved(&self) -> usize {
        self.succeeded() + self.failed()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn batches(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }

    fn reset(&self, expected: usize) {
        self.expected.store(expected, Ordering::SeqCst);
        self.succeeded.store(0, Ordering::SeqCst);
        self.failed.store(0, Ordering::SeqCst);
        self.attempts.store(0, Ordering::SeqCst);
        self.batches.store(0, Ordering::SeqCst);
    }
}

/// Cooperative cancellation, honoured between batches.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct RateLimitedBatchFetcher<S> {
    source: S,
    config: FetchConfig,
    progress: Arc<FetchProgress>,
    cancel: CancelFlag,
}

impl<S: JsonSource> RateLimitedBatchFetcher<S> {
    /// Fails with `InvalidConfig` for a zero batch size or a cooldown that is negative,
    /// non-finite or too large for a `Duration`.
    pub fn new(source: S, config: FetchConfig) -> Result<Self> {
        validate_fetch_config(&config)?;
        Ok(Self {
            source,
            config,
            progress: Arc::new(FetchProgress::default()),
            cancel: CancelFlag::new(),
        })
    }

    pub fn with_progress(mut self, progress: Arc<FetchProgress>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn progress(&self) -> Arc<FetchProgress> {
        Arc::clone(&self.progress)
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Fetch every distinct URL, at most `max_batch_size` at a time and at least `cooldown`
    /// apart between batch starts. Per-URL failures never abort the run.
    pub async fn fetch_all<I, U>(&self, urls: I) -> FetchReport
    where
        I: IntoIterator<Item = U>,
        U: Into<String>,
    {
        let mut seen = HashSet::new();
        let mut pending: VecDeque<Request> = urls
            .into_iter()
            .map(Into::<String>::into)
            .filter(|url| seen.insert(url.clone()))
            .map(Request::new)
            .collect();

        let total = pending.len();
        self.progress.reset(total);
        let mut results = FetchResults::with_capacity(total);

        let cooldown = self.config.cooldown();
        let max_batch_size = self.config.max_batch_size.max(1);
        let mut last_dispatch: Option<Instant> = None;

        while !pending.is_empty() {
            if self.cancel.is_cancelled() {
                warn!(
                    "Fetch cancelled with {} of {} urls unresolved",
                    total - results.len(),
                    total
                );
                return FetchReport {
                    results,
                    cancelled: true,
                };
            }

            if let Some(previous) = last_dispatch {
                match previous.checked_add(cooldown) {
                    Some(deadline) => sleep_until(deadline).await,
                    None => sleep(cooldown).await,
                }
            }

            let batch_len = max_batch_size.min(pending.len());
            let batch: Vec<Request> = pending.drain(..batch_len).collect();
            last_dispatch = Some(Instant::now());
            let batch_number = self.progress.batches.fetch_add(1, Ordering::SeqCst) + 1;
            debug!(
                "Dispatching batch {batch_number} with {batch_len} requests ({} still queued)",
                pending.len()
            );

            for (mut request, outcome) in self.dispatch(batch).await {
                match outcome {
                    Ok(value) => {
                        self.progress.succeeded.fetch_add(1, Ordering::SeqCst);
                        results.insert(request.url, Some(value));
                    }
                    Err(err) if request.attempts <= self.config.max_retries => {
                        debug!(
                            "Attempt {} for {} failed, will retry: {err}",
                            request.attempts, request.url
                        );
                        request.last_error = Some(err);
                        pending.push_back(request);
                    }
                    Err(err) => {
                        warn!(
                            "Giving up on {} after {} attempts: {err}",
                            request.url, request.attempts
                        );
                        self.progress.failed.fetch_add(1, Ordering::SeqCst);
                        results.insert(request.url, None);
                    }
                }
            }

            debug!(
                "{}/{} urls resolved after batch {batch_number}",
                results.len(),
                total
            );
        }

        if total > 0 {
            info!(
                "Fetched {} urls in {} batches: {} succeeded, {} failed",
                total,
                self.progress.batches(),
                self.progress.succeeded(),
                self.progress.failed()
            );
        }

        FetchReport {
            results,
            cancelled: false,
        }
    }

    /// Run one attempt for every request in the batch concurrently and wait for all of them.
    async fn dispatch(&self, batch: Vec<Request>) -> Vec<(Request, AttemptResult)> {
        let width = batch.len().max(1);
        let request_timeout = self.config.request_timeout();

        stream::iter(batch)
            .map(|mut request| async move {
                request.attempts += 1;
                self.progress.attempts.fetch_add(1, Ordering::SeqCst);
                let outcome = match timeout(request_timeout, self.source.fetch_json(&request.url))
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => Err(FetchError::Timeout(request_timeout)),
                };
                (request, outcome)
            })
            .buffer_unordered(width)
            .collect()
            .await
    }
}
