// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client for the planner service: flavor lookup and the streaming
//! pressure endpoint.

use futures::StreamExt;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Attempts for unary planner calls.
const RETRIES: u32 = 3;
/// Base of the exponential retry backoff, in seconds.
const RETRY_BACKOFF_BASE: f64 = 0.3;

/// Errors while talking to the planner.
#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("planner API error: {0}")]
    Api(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Flavor descriptor returned by the planner.
#[derive(Debug, Clone, Deserialize)]
pub struct FlavorInfo {
    pub name: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub is_disabled: Option<bool>,
    #[serde(default)]
    pub minimum_pressure: Option<i64>,
}

/// Parse one line of the pressure stream. Heartbeats and malformed lines
/// yield `None` and are skipped.
pub fn parse_pressure_line(line: &str) -> Option<f64> {
    let value: serde_json::Value = serde_json::from_str(line.trim()).ok()?;
    value.get("pressure")?.as_f64()
}

/// HTTP client for the planner service.
pub struct PlannerClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl PlannerClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    /// Fetch a flavor descriptor, retrying transient failures with a short
    /// exponential backoff.
    pub async fn get_flavor(&self, name: &str) -> Result<FlavorInfo, PlannerError> {
        let url = format!("{}/api/v1/flavors/{name}", self.base_url);
        let mut last_error = PlannerError::Api("no attempts made".to_string());
        for attempt in 0..RETRIES {
            match self.fetch_flavor(&url).await {
                Ok(flavor) => return Ok(flavor),
                Err(err) => {
                    warn!(attempt, error = %err, "flavor fetch failed");
                    last_error = err;
                    if attempt + 1 < RETRIES {
                        let backoff = RETRY_BACKOFF_BASE * f64::from(1 << attempt);
                        tokio::time::sleep(Duration::from_secs_f64(backoff)).await;
                    }
                }
            }
        }
        Err(last_error)
    }

    async fn fetch_flavor(&self, url: &str) -> Result<FlavorInfo, PlannerError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(PlannerError::Api(format!(
                "flavor fetch returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|err| PlannerError::Api(format!("malformed flavor: {err}")))
    }

    /// Open the streaming pressure endpoint for a flavor.
    pub async fn stream_pressure(&self, name: &str) -> Result<PressureStream, PlannerError> {
        let url = format!(
            "{}/api/v1/flavors/{name}/pressure?stream=true",
            self.base_url
        );
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(PlannerError::Api(format!(
                "pressure stream returned {}",
                response.status()
            )));
        }
        debug!(flavor = name, "pressure stream opened");
        Ok(PressureStream {
            inner: response
                .bytes_stream()
                .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
                .boxed(),
            buffer: String::new(),
        })
    }
}

/// A line-delimited JSON stream of pressure records.
pub struct PressureStream {
    inner: futures::stream::BoxStream<'static, Result<Vec<u8>, reqwest::Error>>,
    buffer: String,
}

impl PressureStream {
    /// The next pressure value, skipping malformed lines. `None` when the
    /// stream ends.
    pub async fn next_pressure(&mut self) -> Result<Option<f64>, PlannerError> {
        loop {
            while let Some(line) = take_line(&mut self.buffer) {
                if let Some(pressure) = parse_pressure_line(&line) {
                    return Ok(Some(pressure));
                }
                debug!(line = %line, "skipping malformed stream line");
            }
            match self.inner.next().await {
                Some(Ok(chunk)) => self.buffer.push_str(&String::from_utf8_lossy(&chunk)),
                Some(Err(err)) => return Err(err.into()),
                None => {
                    // Flush a final unterminated line before ending.
                    let rest = std::mem::take(&mut self.buffer);
                    if let Some(pressure) = parse_pressure_line(&rest) {
                        return Ok(Some(pressure));
                    }
                    return Ok(None);
                }
            }
        }
    }
}

/// Pop the first complete line off the buffer.
pub(crate) fn take_line(buffer: &mut String) -> Option<String> {
    let position = buffer.find('\n')?;
    let line = buffer[..position].to_string();
    buffer.drain(..=position);
    Some(line)
}

#[cfg(test)]
#[path = "planner_tests.rs"]
mod tests;
