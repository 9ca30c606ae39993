use thiserror::Error;

pub use anyhow::Context;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error(transparent)]
    Chrono(#[from] chrono::ParseError),
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("item {id} is not tracked for {game}")]
    UnknownItem { game: String, id: u32 },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub fn message<T: Into<String>>(msg: T) -> Self {
        AppError::Message(msg.into())
    }

    pub fn invalid_timestamp<T: Into<String>>(raw: T) -> Self {
        AppError::InvalidTimestamp(raw.into())
    }

    pub fn invalid_config<T: Into<String>>(msg: T) -> Self {
        AppError::InvalidConfig(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_wraps_into_other() {
        let result: std::result::Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        let err: AppError = result.context("Failed to read marker").unwrap_err().into();
        assert!(matches!(err, AppError::Other(_)));
        assert_eq!(err.to_string(), "Failed to read marker");
    }

    #[test]
    fn domain_variants_describe_themselves() {
        let err = AppError::UnknownItem {
            game: "osrs".to_string(),
            id: 4151,
        };
        assert_eq!(err.to_string(), "item 4151 is not tracked for osrs");
        assert_eq!(
            AppError::invalid_timestamp("soon").to_string(),
            "invalid timestamp: soon"
        );
    }
}
