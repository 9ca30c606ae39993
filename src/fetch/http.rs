use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use reqwest::{header::ACCEPT, Client};
use serde_json::Value;

use crate::error::{Context, Result};

use super::{AttemptResult, FetchError, JsonSource};

/// `reqwest`-backed JSON source; every request is bounded by the client timeout.
#[derive(Debug, Clone)]
pub struct HttpJsonSource {
    client: Client,
    timeout: Duration,
}

impl HttpJsonSource {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .context("Failed to construct HTTP client")?;
        Ok(Self { client, timeout })
    }

    async fn get_json(&self, url: &str) -> AttemptResult {
        let response = self
            .client
            .get(url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|err| self.classify(err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response.text().await.map_err(|err| self.classify(err))?;
        match serde_json::from_str::<Value>(&body) {
            Ok(Value::Null) => Err(FetchError::Decode("empty JSON document".to_string())),
            Ok(value) => Ok(value),
            Err(err) => Err(FetchError::Decode(err.to_string())),
        }
    }

    fn classify(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else {
            FetchError::Transport(err.to_string())
        }
    }
}

impl JsonSource for HttpJsonSource {
    fn fetch_json<'a>(&'a self, url: &'a str) -> BoxFuture<'a, AttemptResult> {
        self.get_json(url).boxed()
    }
}
