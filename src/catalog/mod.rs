//! Tracked exchange items for one game and the merge rules for refreshing them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::Game;
use crate::error::{AppError, Result};
use crate::fetch::decode::{history_rows, value_to_bool, value_to_i64, value_to_string};
use crate::series::{PriceSample, PriceSeries, TimestampLike, DEFAULT_VARIANT};

/// Keys the item dumps use for bookkeeping rather than items.
pub const SENTINEL_KEYS: &[&str] = &["%JAGEX_TIMESTAMP%", "%UPDATE_DETECTED%"];

#[derive(Debug, Clone)]
pub struct TrackedItem {
    pub id: u32,
    pub game: Game,
    pub name: String,
    pub is_members: bool,
    pub store_value: Option<i64>,
    pub high_alch: Option<i64>,
    pub low_alch: Option<i64>,
    /// Samples of the default variant.
    pub history: PriceSeries,
    /// Tagged samples such as `5m` timeseries, one series per tag.
    pub variants: BTreeMap<String, PriceSeries>,
}

impl PartialEq for TrackedItem {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.game == other.game
    }
}

impl Eq for TrackedItem {}

impl TrackedItem {
    pub fn new(id: u32, game: Game) -> Self {
        Self {
            id,
            game,
            name: String::new(),
            is_members: false,
            store_value: None,
            high_alch: None,
            low_alch: None,
            history: PriceSeries::new(),
            variants: BTreeMap::new(),
        }
    }

    /// Series holding samples tagged `variant`.
    pub fn series(&self, variant: &str) -> Option<&PriceSeries> {
        if variant == DEFAULT_VARIANT {
            Some(&self.history)
        } else {
            self.variants.get(variant)
        }
    }

    fn series_mut(&mut self, source: Option<&str>) -> &mut PriceSeries {
        match source {
            None | Some(DEFAULT_VARIANT) => &mut self.history,
            Some(tag) => self.variants.entry(tag.to_string()).or_default(),
        }
    }

    /// Overwrite every metadata field from a dump entry. Missing fields are cleared.
    fn apply_metadata(&mut self, entry: &Map<String, Value>) {
        self.name = entry.get("name").map(value_to_string).unwrap_or_default();
        self.is_members = entry.get("members").map(value_to_bool).unwrap_or(false);
        self.store_value = entry.get("value").and_then(value_to_i64);
        self.high_alch = entry.get("highalch").and_then(value_to_i64);
        self.low_alch = entry.get("lowalch").and_then(value_to_i64);
    }
}

/// On-disk shape of one item: metadata plus price rows grouped by variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub id: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub members: bool,
    #[serde(default)]
    pub value: Option<i64>,
    #[serde(default)]
    pub highalch: Option<i64>,
    #[serde(default)]
    pub lowalch: Option<i64>,
    #[serde(default)]
    pub price: BTreeMap<String, Vec<Value>>,
}

#[derive(Debug, Clone)]
pub struct ItemCatalog {
    game: Game,
    items: BTreeMap<u32, TrackedItem>,
}

impl ItemCatalog {
    pub fn new(game: Game) -> Self {
        Self {
            game,
            items: BTreeMap::new(),
        }
    }

    pub fn game(&self) -> Game {
        self.game
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: u32) -> Option<&TrackedItem> {
        self.items.get(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.items.keys().copied()
    }

    pub fn items(&self) -> impl Iterator<Item = &TrackedItem> {
        self.items.values()
    }

    /// Upsert every item in a metadata dump. Items missing from the dump are kept.
    /// Returns the number of entries applied.
    pub fn sync_metadata(&mut self, feed: &Value) -> Result<usize> {
        let entries = feed
            .as_object()
            .ok_or_else(|| AppError::message(format!("Item dump for {} is not a JSON object", self.game)))?;

        let mut applied = 0;
        for (key, entry) in entries {
            if SENTINEL_KEYS.contains(&key.as_str()) {
                continue;
            }
            let Ok(id) = key.trim().parse::<u32>() else {
                log::debug!("Skipping non-numeric item key `{}` in {} dump", key, self.game);
                continue;
            };
            let Some(fields) = entry.as_object() else {
                log::debug!("Skipping item {} in {} dump: entry is not an object", id, self.game);
                continue;
            };

            let game = self.game;
            self.items
                .entry(id)
                .or_insert_with(|| TrackedItem::new(id, game))
                .apply_metadata(fields);
            applied += 1;
        }
        Ok(applied)
    }

    /// Fold a history payload into the item's series under the default variant.
    pub fn ingest_price_json(&mut self, id: u32, payload: &Value) -> Result<usize> {
        self.ingest_price_json_as(id, payload, None)
    }

    /// Fold `[timestamp, price, volume?]` rows into the item's series, tagging each with `source`.
    /// Returns the number of rows stored; malformed rows are skipped.
    pub fn ingest_price_json_as(
        &mut self,
        id: u32,
        payload: &Value,
        source: Option<&str>,
    ) -> Result<usize> {
        let game = self.game;
        if !self.items.contains_key(&id) {
            return Err(AppError::UnknownItem {
                game: game.to_string(),
                id,
            });
        }

        let rows = match payload {
            Value::Array(rows) => rows,
            Value::Object(_) => history_rows(payload, id)
                .and_then(Value::as_array)
                .ok_or_else(|| {
                    AppError::message(format!("Price payload for {game} item {id} has no rows"))
                })?,
            _ => {
                return Err(AppError::message(format!(
                    "Price payload for {game} item {id} is not a list of rows"
                )))
            }
        };

        // Resolve every row first so a bad timestamp leaves the series untouched.
        let mut staged = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(cells) = row.as_array() else {
                log::warn!("Skipping {game} item {id} price row {row}: not an array");
                continue;
            };
            let Some(price) = cells.get(1).and_then(value_to_i64) else {
                log::warn!("Skipping {game} item {id} price row {row}: missing price");
                continue;
            };
            let timestamp = cells
                .first()
                .and_then(TimestampLike::from_json)
                .ok_or_else(|| AppError::invalid_timestamp(row.to_string()))?
                .resolve()?;

            staged.push(PriceSample {
                timestamp,
                price,
                volume: cells.get(2).and_then(value_to_i64),
                source: source.map(str::to_string),
            });
        }

        let stored = staged.len();
        if let Some(item) = self.items.get_mut(&id) {
            let series = item.series_mut(source);
            for sample in staged {
                series.insert(sample);
            }
        }
        Ok(stored)
    }

    /// Persisted records, ascending by id.
    pub fn records(&self) -> Vec<ItemRecord> {
        self.items
            .values()
            .map(|item| ItemRecord {
                id: item.id,
                name: item.name.clone(),
                members: item.is_members,
                value: item.store_value,
                highalch: item.high_alch,
                lowalch: item.low_alch,
                price: price_rows(item),
            })
            .collect()
    }

    /// Rebuild a catalog from persisted records; price rows go back through ingestion.
    pub fn from_records<I>(game: Game, records: I) -> Result<Self>
    where
        I: IntoIterator<Item = ItemRecord>,
    {
        let mut catalog = ItemCatalog::new(game);
        for record in records {
            let id = record.id;
            catalog.items.insert(
                id,
                TrackedItem {
                    id,
                    game,
                    name: record.name,
                    is_members: record.members,
                    store_value: record.value,
                    high_alch: record.highalch,
                    low_alch: record.lowalch,
                    history: PriceSeries::new(),
                    variants: BTreeMap::new(),
                },
            );

            for (variant, rows) in record.price {
                let source = (variant != DEFAULT_VARIANT).then_some(variant.as_str());
                catalog.ingest_price_json_as(id, &Value::Array(rows), source)?;
            }
        }
        Ok(catalog)
    }
}

/// Rows of every series of `item`, grouped by variant, newest first.
fn price_rows(item: &TrackedItem) -> BTreeMap<String, Vec<Value>> {
    let mut grouped: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for series in std::iter::once(&item.history).chain(item.variants.values()) {
        for (variant, samples) in series.variants() {
            grouped
                .entry(variant)
                .or_default()
                .extend(samples.iter().map(PriceSample::to_row));
        }
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn osrs_catalog() -> ItemCatalog {
        let mut catalog = ItemCatalog::new(Game::Osrs);
        catalog
            .sync_metadata(&json!({
                "%JAGEX_TIMESTAMP%": 1700000000,
                "4151": {"id": 4151, "name": "Abyssal whip", "members": true, "value": 120001, "highalch": 72000, "lowalch": 48000},
            }))
            .unwrap();
        catalog
    }

    #[test]
    fn sync_upserts_and_never_deletes() {
        let mut catalog = ItemCatalog::new(Game::Osrs);
        let first = catalog
            .sync_metadata(&json!({
                "%JAGEX_TIMESTAMP%": 1700000000,
                "%UPDATE_DETECTED%": true,
                "1": {"id": 1, "name": "A", "members": false},
                "2": {"id": 2, "name": "B", "members": true},
            }))
            .unwrap();
        assert_eq!(first, 2);
        assert_eq!(catalog.len(), 2);

        catalog.ingest_price_json(1, &json!([[1_700_000_000_000i64, 10]])).unwrap();

        catalog
            .sync_metadata(&json!({"1": {"id": 1, "name": "A2", "members": true}}))
            .unwrap();

        assert_eq!(catalog.ids().collect::<Vec<_>>(), vec![1, 2]);
        let updated = catalog.get(1).unwrap();
        assert_eq!(updated.name, "A2");
        assert!(updated.is_members);
        assert_eq!(updated.history.len(), 1, "history survives a metadata sync");
        assert_eq!(catalog.get(2).unwrap().name, "B");
    }

    #[test]
    fn sync_skips_non_numeric_keys() {
        let mut catalog = ItemCatalog::new(Game::Rs);
        let applied = catalog
            .sync_metadata(&json!({"abc": {"name": "x"}, "7": {"name": "Seven"}, "8": "nope"}))
            .unwrap();
        assert_eq!(applied, 1);
        assert_eq!(catalog.ids().collect::<Vec<_>>(), vec![7]);
        assert!(catalog.sync_metadata(&json!([1, 2])).is_err());
    }

    #[test]
    fn ingest_reads_rows_and_skips_malformed_ones() {
        let mut catalog = osrs_catalog();
        let stored = catalog
            .ingest_price_json(
                4151,
                &json!({"4151": [
                    [1_700_000_000_000i64, 1_500_000, 12],
                    [1_700_086_400_000i64, "1500100"],
                    "garbage",
                    [1_700_172_800_000i64, null],
                ]}),
            )
            .unwrap();

        assert_eq!(stored, 2);
        let item = catalog.get(4151).unwrap();
        assert_eq!(item.history.len(), 2);
        assert_eq!(item.history.latest().unwrap().price, 1_500_100);
        assert_eq!(item.history.latest().unwrap().volume, None);
    }

    #[test]
    fn ingest_rejects_unknown_items_and_bad_timestamps() {
        let mut catalog = osrs_catalog();

        let err = catalog.ingest_price_json(1, &json!([])).expect_err("unknown item");
        assert!(matches!(err, AppError::UnknownItem { id: 1, .. }));

        let err = catalog
            .ingest_price_json(4151, &json!([["yesterday-ish", 10]]))
            .expect_err("bad timestamp");
        assert!(matches!(err, AppError::InvalidTimestamp(_)));
    }

    #[test]
    fn bad_timestamp_leaves_history_untouched() {
        let mut catalog = osrs_catalog();
        catalog
            .ingest_price_json(4151, &json!([[1_690_000_000_000i64, 90]]))
            .unwrap();

        let err = catalog
            .ingest_price_json(
                4151,
                &json!([[1_700_000_000_000i64, 100], ["garbage-ts", 110]]),
            )
            .expect_err("bad timestamp");
        assert!(matches!(err, AppError::InvalidTimestamp(_)));

        let item = catalog.get(4151).unwrap();
        assert_eq!(item.history.len(), 1);
        assert_eq!(item.history.latest().unwrap().price, 90);
    }

    #[test]
    fn tagged_rows_keep_their_own_series() {
        let mut catalog = osrs_catalog();
        catalog
            .ingest_price_json(4151, &json!([[1_700_000_000_000i64, 100]]))
            .unwrap();
        catalog
            .ingest_price_json_as(4151, &json!([[1_700_000_000i64, 105, 7]]), Some("5m"))
            .unwrap();

        let item = catalog.get(4151).unwrap();
        assert_eq!(item.history.latest().unwrap().price, 100);
        assert_eq!(item.series("5m").unwrap().latest().unwrap().price, 105);
        assert!(item.series("1h").is_none());

        let records = catalog.records();
        assert_eq!(records[0].price["all"], vec![json!([1_700_000_000_000i64, 100])]);
        assert_eq!(records[0].price["5m"], vec![json!([1_700_000_000_000i64, 105, 7])]);
    }

    #[test]
    fn equality_is_by_id_and_game() {
        let mut renamed = TrackedItem::new(4151, Game::Osrs);
        renamed.name = "Whip".to_string();
        assert_eq!(renamed, TrackedItem::new(4151, Game::Osrs));
        assert_ne!(renamed, TrackedItem::new(4151, Game::Rs));
    }

    #[test]
    fn records_round_trip_through_ingestion() {
        let mut catalog = osrs_catalog();
        catalog
            .ingest_price_json(4151, &json!([[1_700_000_000_000i64, 100, 5]]))
            .unwrap();
        catalog
            .ingest_price_json_as(4151, &json!([[1_700_086_400_000i64, 110]]), Some("last90d"))
            .unwrap();

        let records = catalog.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].price["all"], vec![json!([1_700_000_000_000i64, 100, 5])]);
        assert_eq!(records[0].price["last90d"], vec![json!([1_700_086_400_000i64, 110])]);

        let restored = ItemCatalog::from_records(Game::Osrs, records.clone()).unwrap();
        let item = restored.get(4151).unwrap();
        assert_eq!(item.name, "Abyssal whip");
        assert_eq!(item.high_alch, Some(72000));
        assert_eq!(item.history, catalog.get(4151).unwrap().history);
        assert_eq!(item.variants, catalog.get(4151).unwrap().variants);
        assert_eq!(restored.records(), records);
    }
}
