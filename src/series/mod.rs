//! Per-item price history and the derived views used for reporting.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{AppError, Result};

pub mod render;
pub mod timestamp;

pub use render::{RenderFormat, RenderOptions};
pub use timestamp::TimestampLike;

/// Variant name used for samples ingested without a source tag.
pub const DEFAULT_VARIANT: &str = "all";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSample {
    pub timestamp: DateTime<Utc>,
    pub price: i64,
    pub volume: Option<i64>,
    pub source: Option<String>,
}

impl PriceSample {
    /// Row in the upstream history shape: `[timestamp_millis, price, volume?]`.
    pub fn to_row(&self) -> Value {
        match self.volume {
            Some(volume) => json!([self.timestamp.timestamp_millis(), self.price, volume]),
            None => json!([self.timestamp.timestamp_millis(), self.price]),
        }
    }

    pub fn variant(&self) -> &str {
        self.source.as_deref().unwrap_or(DEFAULT_VARIANT)
    }
}

/// Sample with its price rescaled by `normalize`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedSample {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub volume: Option<i64>,
    pub source: Option<String>,
}

impl From<&PriceSample> for NormalizedSample {
    fn from(sample: &PriceSample) -> Self {
        Self {
            timestamp: sample.timestamp,
            price: sample.price as f64,
            volume: sample.volume,
            source: sample.source.clone(),
        }
    }
}

/// Timestamp-keyed samples for one item. Adding at an existing timestamp replaces the sample.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceSeries {
    history: BTreeMap<DateTime<Utc>, PriceSample>,
}

impl PriceSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn get(&self, timestamp: &DateTime<Utc>) -> Option<&PriceSample> {
        self.history.get(timestamp)
    }

    pub fn latest(&self) -> Option<&PriceSample> {
        self.history.values().next_back()
    }

    /// Ascending by timestamp.
    pub fn iter(&self) -> impl Iterator<Item = &PriceSample> {
        self.history.values()
    }

    /// Normalize `timestamp` and upsert the sample, returning the resolved instant.
    pub fn add<T>(
        &mut self,
        timestamp: T,
        price: i64,
        volume: Option<i64>,
        source: Option<&str>,
    ) -> Result<DateTime<Utc>>
    where
        T: Into<TimestampLike>,
    {
        let timestamp = timestamp.into().resolve()?;
        self.insert(PriceSample {
            timestamp,
            price,
            volume,
            source: source.map(str::to_string),
        });
        Ok(timestamp)
    }

    pub fn insert(&mut self, sample: PriceSample) {
        self.history.insert(sample.timestamp, sample);
    }

    pub fn sorted_desc(&self) -> Vec<PriceSample> {
        self.history.values().rev().cloned().collect()
    }

    pub fn normalized_view(&self) -> Vec<NormalizedSample> {
        normalize(&self.sorted_desc())
    }

    pub fn simplified_view(&self) -> Vec<PriceSample> {
        simplify(&self.sorted_desc())
    }

    /// Descending samples at or after `since`, simplified before they are normalized.
    pub fn filtered_view(
        &self,
        filter: SeriesFilter,
        since: Option<DateTime<Utc>>,
    ) -> Vec<NormalizedSample> {
        let mut samples: Vec<PriceSample> = self
            .history
            .values()
            .rev()
            .take_while(|sample| since.map_or(true, |cutoff| sample.timestamp >= cutoff))
            .cloned()
            .collect();

        if filter.simplified {
            samples = simplify(&samples);
        }
        if filter.normalized {
            normalize(&samples)
        } else {
            samples.iter().map(NormalizedSample::from).collect()
        }
    }

    /// Descending samples grouped by source tag.
    pub fn variants(&self) -> BTreeMap<String, Vec<PriceSample>> {
        let mut grouped: BTreeMap<String, Vec<PriceSample>> = BTreeMap::new();
        for sample in self.history.values().rev() {
            grouped
                .entry(sample.variant().to_string())
                .or_default()
                .push(sample.clone());
        }
        grouped
    }

    /// Render every sample, newest first.
    pub fn render_rows(&self, format: RenderFormat, options: &RenderOptions) -> Result<Vec<String>> {
        self.history
            .values()
            .rev()
            .map(|sample| sample.render(format, options))
            .collect()
    }
}

/// Rescale prices linearly into `[0, 1]` (4 decimals). A flat series keeps its prices.
pub fn normalize(samples: &[PriceSample]) -> Vec<NormalizedSample> {
    let Some(min) = samples.iter().map(|sample| sample.price).min() else {
        return Vec::new();
    };
    let max = samples.iter().map(|sample| sample.price).max().unwrap_or(min);
    let range = (i128::from(max) - i128::from(min)) as f64;

    samples
        .iter()
        .map(|sample| {
            let mut normalized = NormalizedSample::from(sample);
            if range > 0.0 {
                let offset = (i128::from(sample.price) - i128::from(min)) as f64;
                normalized.price = round_to(offset / range, 4);
            }
            normalized
        })
        .collect()
}

/// Collapse every run of three or more equal prices to its first and last sample.
pub fn simplify(samples: &[PriceSample]) -> Vec<PriceSample> {
    let mut simplified = Vec::with_capacity(samples.len());
    let mut start = 0;

    while start < samples.len() {
        let price = samples[start].price;
        let end = samples[start..]
            .iter()
            .position(|sample| sample.price != price)
            .map_or(samples.len(), |offset| start + offset);

        let run = &samples[start..end];
        if run.len() >= 3 {
            simplified.push(run[0].clone());
            simplified.push(run[run.len() - 1].clone());
        } else {
            simplified.extend_from_slice(run);
        }
        start = end;
    }

    simplified
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Which views to compose, parsed from expressions such as `simplified|normalized`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeriesFilter {
    pub simplified: bool,
    pub normalized: bool,
}

impl FromStr for SeriesFilter {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self> {
        let mut filter = SeriesFilter::default();
        for token in value.split('|').map(|token| token.trim().to_lowercase()) {
            match token.as_str() {
                "all" => {}
                "simplified" => filter.simplified = true,
                "normalized" => filter.normalized = true,
                other => {
                    return Err(AppError::message(format!(
                        "Unsupported filter mode `{other}` (expected all, simplified or normalized)"
                    )))
                }
            }
        }
        Ok(filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    /// Builds a series whose descending view has exactly `prices`.
    fn series_desc(prices: &[i64]) -> PriceSeries {
        let mut series = PriceSeries::new();
        let count = prices.len() as i64;
        for (idx, price) in prices.iter().enumerate() {
            let at = base() + Duration::days(count - idx as i64);
            series.add(at, *price, Some(idx as i64), None).unwrap();
        }
        series
    }

    fn prices(samples: &[PriceSample]) -> Vec<i64> {
        samples.iter().map(|sample| sample.price).collect()
    }

    #[test]
    fn add_upserts_on_same_instant() {
        let mut series = PriceSeries::new();
        series.add(1_700_000_000i64, 10, None, Some("all")).unwrap();
        series.add(1_700_000_000_000i64, 12, Some(5), Some("all")).unwrap();

        assert_eq!(series.len(), 1);
        let sample = series.latest().unwrap();
        assert_eq!(sample.price, 12);
        assert_eq!(sample.volume, Some(5));
    }

    #[test]
    fn add_rejects_invalid_timestamp() {
        let mut series = PriceSeries::new();
        let err = series.add("not a time", 1, None, None).expect_err("invalid timestamp");
        assert!(matches!(err, AppError::InvalidTimestamp(_)));
        assert!(series.is_empty());
    }

    #[test]
    fn sorted_view_is_descending() {
        let series = series_desc(&[3, 2, 1]);
        let sorted = series.sorted_desc();
        assert!(sorted.windows(2).all(|pair| pair[0].timestamp > pair[1].timestamp));
        assert_eq!(prices(&sorted), vec![3, 2, 1]);
    }

    #[test]
    fn simplify_bookends_long_plateaus() {
        let series = series_desc(&[5, 5, 5, 5, 3, 3, 7]);
        let simplified = series.simplified_view();

        assert_eq!(prices(&simplified), vec![5, 5, 3, 3, 7]);
        // First and last members of the plateau survive.
        assert_eq!(simplified[0].volume, Some(0));
        assert_eq!(simplified[1].volume, Some(3));
    }

    #[test]
    fn simplify_is_idempotent() {
        for case in [
            vec![],
            vec![1],
            vec![1, 1],
            vec![1, 1, 1],
            vec![2, 2, 2, 1, 1, 1, 1, 2, 2, 2],
            vec![5, 5, 5, 5, 3, 3, 7],
            vec![9, 8, 8, 8, 8, 8, 9, 9],
        ] {
            let once = simplify(&series_desc(&case).sorted_desc());
            let twice = simplify(&once);
            assert_eq!(once, twice, "case {case:?}");
        }
    }

    #[test]
    fn normalize_rescales_into_unit_range() {
        let series = series_desc(&[10, 30, 20, 15]);
        let normalized = series.normalized_view();

        let values: Vec<f64> = normalized.iter().map(|sample| sample.price).collect();
        assert_eq!(values, vec![0.0, 1.0, 0.5, 0.25]);
        assert!(values.iter().all(|value| (0.0..=1.0).contains(value)));
    }

    #[test]
    fn normalize_leaves_flat_series_untouched() {
        let series = series_desc(&[42, 42, 42]);
        let normalized = series.normalized_view();

        assert!(normalized.iter().all(|sample| sample.price == 42.0));
        assert!(PriceSeries::new().normalized_view().is_empty());
    }

    #[test]
    fn normalize_handles_full_i64_spread() {
        let series = series_desc(&[i64::MAX, 0, i64::MIN]);
        let values: Vec<f64> = series
            .normalized_view()
            .iter()
            .map(|sample| sample.price)
            .collect();
        assert_eq!(values, vec![1.0, 0.5, 0.0]);
    }

    #[test]
    fn filtered_view_composes_and_cuts_off() {
        let series = series_desc(&[4, 4, 4, 4, 2, 0]);
        let filter: SeriesFilter = "simplified|normalized".parse().unwrap();

        let all = series.filtered_view(filter, None);
        let values: Vec<f64> = all.iter().map(|sample| sample.price).collect();
        assert_eq!(values, vec![1.0, 1.0, 0.5, 0.0]);

        // Only the three newest samples are at or after the cutoff.
        let cutoff = base() + Duration::days(4);
        let recent = series.filtered_view("all".parse().unwrap(), Some(cutoff));
        assert_eq!(recent.len(), 3);
        assert!(recent.iter().all(|sample| sample.timestamp >= cutoff));
    }

    #[test]
    fn parses_filter_expressions() {
        assert_eq!("all".parse::<SeriesFilter>().unwrap(), SeriesFilter::default());
        assert_eq!(
            " Normalized ".parse::<SeriesFilter>().unwrap(),
            SeriesFilter {
                simplified: false,
                normalized: true
            }
        );
        assert!("smoothed".parse::<SeriesFilter>().is_err());
    }

    #[test]
    fn groups_samples_by_source() {
        let mut series = PriceSeries::new();
        series.add(1_700_000_000i64, 1, None, None).unwrap();
        series.add(1_700_000_100i64, 2, None, Some("last90d")).unwrap();
        series.add(1_700_000_200i64, 3, None, None).unwrap();

        let variants = series.variants();
        assert_eq!(prices(&variants[DEFAULT_VARIANT]), vec![3, 1]);
        assert_eq!(prices(&variants["last90d"]), vec![2]);
    }

    #[test]
    fn rows_use_history_shape() {
        let mut series = PriceSeries::new();
        series.add(1_700_000_000_000i64, 7, Some(3), None).unwrap();
        series.add(1_700_000_100_000i64, 8, None, None).unwrap();

        let rows: Vec<Value> = series.iter().map(PriceSample::to_row).collect();
        assert_eq!(rows[0], json!([1_700_000_000_000i64, 7, 3]));
        assert_eq!(rows[1], json!([1_700_000_100_000i64, 8]));
    }
}
