use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::catalog::{ItemCatalog, ItemRecord};
use crate::config::Game;
use crate::error::{AppError, Context, Result};
use crate::fetch::decode::value_to_string;

pub const LAST_UPDATED_FILE: &str = "LAST_UPDATED";
pub const CATALOG_JSON_FILE: &str = "data.json";
pub const CATALOG_TSV_FILE: &str = "data.tsv";
pub const LAST_UPDATED_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
/// Longest text a spreadsheet cell accepts, minus some slack for quoting.
pub const MAX_CELL_LEN: usize = 31_990;

const METADATA_HEADERS: [&str; 6] = ["id", "name", "members", "value", "highalch", "lowalch"];

/// Marker value used before a game has ever been updated locally.
pub fn default_last_update() -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(2001, 1, 7)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Facade over one game's data directory: update marker plus catalog snapshots.
pub struct Records {
    game: Game,
    game_dir: PathBuf,
}

impl Records {
    pub fn for_game<P: AsRef<Path>>(data_dir: P, game: Game) -> Self {
        Self::with_dir(data_dir.as_ref().join(game.code()), game)
    }

    pub fn with_dir<P: Into<PathBuf>>(game_dir: P, game: Game) -> Self {
        Self {
            game,
            game_dir: game_dir.into(),
        }
    }

    pub fn game(&self) -> Game {
        self.game
    }

    pub fn game_dir(&self) -> &Path {
        &self.game_dir
    }

    pub fn marker_path(&self) -> PathBuf {
        self.game_dir.join(LAST_UPDATED_FILE)
    }

    pub fn json_path(&self) -> PathBuf {
        self.game_dir.join(CATALOG_JSON_FILE)
    }

    pub fn tsv_path(&self) -> PathBuf {
        self.game_dir.join(CATALOG_TSV_FILE)
    }

    /// Ensure the game directory exists before any persistence happens.
    pub fn prepare(&self) -> Result<()> {
        fs::create_dir_all(&self.game_dir).with_context(|| {
            format!(
                "Failed to create data directory {}",
                self.game_dir.display()
            )
        })?;
        Ok(())
    }

    /// Last successful local update. A missing or unreadable marker yields the default.
    pub fn read_last_update(&self) -> DateTime<Utc> {
        let path = self.marker_path();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return default_last_update(),
            Err(err) => {
                log::warn!("Failed to read {}: {}", path.display(), err);
                return default_last_update();
            }
        };

        match NaiveDateTime::parse_from_str(raw.trim(), LAST_UPDATED_FORMAT) {
            Ok(naive) => naive.and_utc(),
            Err(err) => {
                log::warn!(
                    "Ignoring unreadable update marker {} ({:?}): {}",
                    path.display(),
                    raw.trim(),
                    err
                );
                default_last_update()
            }
        }
    }

    pub fn write_last_update(&self, timestamp: DateTime<Utc>) -> Result<()> {
        self.prepare()?;
        let path = self.marker_path();
        fs::write(&path, timestamp.format(LAST_UPDATED_FORMAT).to_string())
            .with_context(|| format!("Failed to write update marker {}", path.display()))?;
        Ok(())
    }

    /// Load the persisted catalog, or an empty one when nothing has been saved yet.
    pub fn load_catalog(&self) -> Result<ItemCatalog> {
        let path = self.json_path();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(ItemCatalog::new(self.game))
            }
            Err(err) => {
                return Err(AppError::message(format!(
                    "Failed to read catalog {}: {}",
                    path.display(),
                    err
                )))
            }
        };

        let records: BTreeMap<u32, ItemRecord> = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse catalog {}", path.display()))?;
        ItemCatalog::from_records(self.game, records.into_values())
    }

    pub fn save_catalog(&self, catalog: &ItemCatalog) -> Result<PathBuf> {
        self.prepare()?;
        let records: BTreeMap<u32, ItemRecord> = catalog
            .records()
            .into_iter()
            .map(|record| (record.id, record))
            .collect();

        let path = self.json_path();
        let body = serde_json::to_string(&records).context("Failed to serialise catalog")?;
        fs::write(&path, body)
            .with_context(|| format!("Failed to write catalog {}", path.display()))?;
        Ok(path)
    }

    /// Flat spreadsheet export: metadata columns then `<variant>#<n>` price chunk columns.
    pub fn save_tsv(&self, catalog: &ItemCatalog) -> Result<PathBuf> {
        self.prepare()?;
        let records = catalog.records();

        let mut chunked: Vec<BTreeMap<String, Vec<String>>> = Vec::with_capacity(records.len());
        let mut widths: BTreeMap<String, usize> = BTreeMap::new();
        for record in &records {
            let mut cells = BTreeMap::new();
            for (variant, rows) in &record.price {
                let lines: Vec<String> = rows.iter().map(price_row_line).collect();
                let chunks = chunk_lines(&lines, MAX_CELL_LEN);
                let width = widths.entry(variant.clone()).or_insert(0);
                *width = (*width).max(chunks.len());
                cells.insert(variant.clone(), chunks);
            }
            chunked.push(cells);
        }

        let path = self.tsv_path();
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_path(&path)
            .with_context(|| format!("Failed to create TSV writer for {}", path.display()))?;

        let mut header: Vec<String> = METADATA_HEADERS.iter().map(|h| h.to_string()).collect();
        for (variant, width) in &widths {
            header.extend((0..*width).map(|idx| format!("{variant}#{idx}")));
        }
        writer.write_record(&header)?;

        for (record, cells) in records.iter().zip(&chunked) {
            let mut line = vec![
                record.id.to_string(),
                record.name.clone(),
                record.members.to_string(),
                optional_cell(record.value),
                optional_cell(record.highalch),
                optional_cell(record.lowalch),
            ];
            for (variant, width) in &widths {
                let chunks = cells.get(variant).map(Vec::as_slice).unwrap_or_default();
                line.extend(chunks.iter().cloned());
                line.extend(std::iter::repeat(String::new()).take(width - chunks.len()));
            }
            writer.write_record(&line)?;
        }

        writer.flush()?;
        Ok(path)
    }
}

fn optional_cell(value: Option<i64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// `[ts, price, vol]` as one tab-separated line; embedded separators become spaces.
fn price_row_line(row: &serde_json::Value) -> String {
    let cells: Vec<String> = match row.as_array() {
        Some(cells) => cells.iter().map(value_to_string).collect(),
        None => vec![value_to_string(row)],
    };
    cells
        .iter()
        .map(|cell| cell.replace(['\t', '\n'], " "))
        .collect::<Vec<_>>()
        .join("\t")
}

/// Greedily pack newline-joined lines into strings no longer than `max_len`.
/// A single line longer than `max_len` gets a chunk of its own.
fn chunk_lines(lines: &[String], max_len: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for line in lines {
        let needed = if current.is_empty() {
            line.len()
        } else {
            current.len() + 1 + line.len()
        };
        if needed > max_len && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use tempfile::tempdir;

    fn sample_catalog() -> ItemCatalog {
        let mut catalog = ItemCatalog::new(Game::Osrs);
        catalog
            .sync_metadata(&json!({
                "4151": {"name": "Abyssal whip", "members": true, "value": 120001, "highalch": 72000, "lowalch": 48000},
                "2": {"name": "Cannonball", "members": true},
            }))
            .unwrap();
        catalog
            .ingest_price_json(
                4151,
                &json!([[1_700_000_000_000i64, 1_500_000, 12], [1_700_086_400_000i64, 1_510_000]]),
            )
            .unwrap();
        catalog
    }

    #[test]
    fn marker_defaults_and_round_trips() {
        let dir = tempdir().unwrap();
        let records = Records::for_game(dir.path(), Game::Rs);

        assert_eq!(records.read_last_update(), default_last_update());
        assert_eq!(
            default_last_update(),
            Utc.with_ymd_and_hms(2001, 1, 7, 0, 0, 0).unwrap()
        );

        let stamp = Utc.with_ymd_and_hms(2024, 3, 5, 12, 30, 15).unwrap()
            + chrono::Duration::milliseconds(250);
        records.write_last_update(stamp).unwrap();
        assert_eq!(records.read_last_update(), stamp);
        assert!(dir.path().join("rs").join(LAST_UPDATED_FILE).is_file());

        fs::write(records.marker_path(), "not a date").unwrap();
        assert_eq!(records.read_last_update(), default_last_update());
    }

    #[test]
    fn catalog_round_trips_through_json() {
        let dir = tempdir().unwrap();
        let records = Records::for_game(dir.path(), Game::Osrs);

        assert!(records.load_catalog().unwrap().is_empty());

        let catalog = sample_catalog();
        records.save_catalog(&catalog).unwrap();
        let restored = records.load_catalog().unwrap();

        assert_eq!(restored.len(), 2);
        assert_eq!(restored.records(), catalog.records());
        assert_eq!(restored.get(4151).unwrap().history.len(), 2);
    }

    #[test]
    fn tsv_has_metadata_and_variant_columns() {
        let dir = tempdir().unwrap();
        let records = Records::for_game(dir.path(), Game::Osrs);
        let path = records.save_tsv(&sample_catalog()).unwrap();

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .from_path(path)
            .unwrap();
        let headers: Vec<String> = reader.headers().unwrap().iter().map(str::to_string).collect();
        assert_eq!(
            headers,
            vec!["id", "name", "members", "value", "highalch", "lowalch", "all#0"]
        );

        let rows: Vec<csv::StringRecord> = reader.records().map(|row| row.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][1], "Cannonball");
        assert_eq!(&rows[0][3], "");
        assert_eq!(&rows[0][6], "");
        assert_eq!(&rows[1][0], "4151");
        assert_eq!(
            &rows[1][6],
            "1700086400000\t1510000\n1700000000000\t1500000\t12"
        );
    }

    #[test]
    fn chunks_respect_cell_limit() {
        let lines: Vec<String> = (0..10).map(|idx| format!("row-{idx:04}")).collect();
        let chunks = chunk_lines(&lines, 20);

        assert!(chunks.iter().all(|chunk| chunk.len() <= 20));
        assert_eq!(chunks.join("\n"), lines.join("\n"));
        assert!(chunk_lines(&[], 20).is_empty());

        let oversized = chunk_lines(&["x".repeat(30), "y".to_string()], 20);
        assert_eq!(oversized, vec!["x".repeat(30), "y".to_string()]);
    }
}
