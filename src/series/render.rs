use std::str::FromStr;

use chrono::format::{Item, StrftimeItems};

use crate::error::{AppError, Context, Result};

use super::PriceSample;

pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderFormat {
    Json,
    Csv,
    Tsv,
    Text,
}

impl FromStr for RenderFormat {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "json" => Ok(RenderFormat::Json),
            "csv" => Ok(RenderFormat::Csv),
            "tsv" => Ok(RenderFormat::Tsv),
            "text" | "repr" => Ok(RenderFormat::Text),
            other => Err(AppError::message(format!(
                "`{other}` is an unsupported render format"
            ))),
        }
    }
}

/// Delimited-output knobs. `delimiter` defaults to `,` for csv and a tab for tsv.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOptions {
    pub delimiter: Option<String>,
    pub timestamp_format: String,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            delimiter: None,
            timestamp_format: DEFAULT_TIMESTAMP_FORMAT.to_string(),
        }
    }
}

impl RenderOptions {
    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = Some(delimiter.into());
        self
    }

    pub fn with_timestamp_format(mut self, format: impl Into<String>) -> Self {
        self.timestamp_format = format.into();
        self
    }
}

impl PriceSample {
    pub fn render(&self, format: RenderFormat, options: &RenderOptions) -> Result<String> {
        match format {
            RenderFormat::Json => {
                Ok(serde_json::to_string(self).context("Failed to serialise price sample")?)
            }
            RenderFormat::Csv => self.render_delimited(options, ","),
            RenderFormat::Tsv => self.render_delimited(options, "\t"),
            RenderFormat::Text => Ok(format!("{self:?}")),
        }
    }

    fn render_delimited(&self, options: &RenderOptions, default_delimiter: &str) -> Result<String> {
        let items: Vec<Item<'_>> = StrftimeItems::new(&options.timestamp_format).collect();
        if items.iter().any(|item| matches!(item, Item::Error)) {
            return Err(AppError::message(format!(
                "Invalid timestamp format `{}`",
                options.timestamp_format
            )));
        }

        let delimiter = options.delimiter.as_deref().unwrap_or(default_delimiter);
        let timestamp = self.timestamp.format_with_items(items.into_iter()).to_string();
        let volume = self.volume.map(|volume| volume.to_string()).unwrap_or_default();

        Ok([timestamp, self.price.to_string(), volume].join(delimiter))
    }
}
