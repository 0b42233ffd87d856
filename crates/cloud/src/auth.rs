// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Keystone v3 password authentication with token caching.
//!
//! Transient failures are retried here, at connection acquisition, and
//! nowhere else: mutating compute calls are never blanket-retried.

use crate::error::CloudError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rfm_core::OpenStackCredentials;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

/// Attempts for acquiring a keystone token.
const AUTH_RETRIES: u32 = 3;
/// Linear backoff between auth attempts.
const AUTH_RETRY_DELAY: Duration = Duration::from_secs(2);
/// Tokens are refreshed this long before their advertised expiry.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// An authenticated session: token plus resolved service endpoints.
#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub compute_url: String,
    pub network_url: String,
}

#[derive(Debug, Clone)]
struct CachedToken {
    session: Session,
    expires_at: Option<DateTime<Utc>>,
}

/// Keystone client holding one cached token for the configured project.
pub struct KeystoneAuth {
    http: reqwest::Client,
    credentials: OpenStackCredentials,
    cached: Mutex<Option<CachedToken>>,
}

impl KeystoneAuth {
    pub fn new(http: reqwest::Client, credentials: OpenStackCredentials) -> Self {
        Self {
            http,
            credentials,
            cached: Mutex::new(None),
        }
    }

    /// Return a valid session, authenticating if the cache is cold or the
    /// token is close to expiry.
    pub async fn session(&self) -> Result<Session, CloudError> {
        if let Some(cached) = self.cached.lock().clone() {
            let fresh = cached
                .expires_at
                .map(|at| at - Utc::now() > chrono::Duration::seconds(EXPIRY_MARGIN_SECS))
                .unwrap_or(true);
            if fresh {
                return Ok(cached.session);
            }
        }

        let mut last_error = CloudError::Auth("no attempts made".to_string());
        for attempt in 1..=AUTH_RETRIES {
            match self.authenticate().await {
                Ok(cached) => {
                    let session = cached.session.clone();
                    *self.cached.lock() = Some(cached);
                    return Ok(session);
                }
                Err(err) => {
                    warn!(attempt, error = %err, "keystone authentication attempt failed");
                    last_error = err;
                    if attempt < AUTH_RETRIES {
                        tokio::time::sleep(AUTH_RETRY_DELAY * attempt).await;
                    }
                }
            }
        }
        Err(last_error)
    }

    /// Drop the cached token so the next call re-authenticates.
    pub fn invalidate(&self) {
        *self.cached.lock() = None;
    }

    async fn authenticate(&self) -> Result<CachedToken, CloudError> {
        let credentials = &self.credentials;
        let url = format!("{}/auth/tokens", credentials.auth_url.trim_end_matches('/'));
        let body = json!({
            "auth": {
                "identity": {
                    "methods": ["password"],
                    "password": {
                        "user": {
                            "name": credentials.username,
                            "domain": {"name": credentials.user_domain_name},
                            "password": credentials.password,
                        }
                    }
                },
                "scope": {
                    "project": {
                        "name": credentials.project_name,
                        "domain": {"name": credentials.project_domain_name},
                    }
                }
            }
        });

        let response = self.http.post(&url).json(&body).send().await?;
        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(CloudError::Auth(format!(
                "keystone rejected credentials ({status})"
            )));
        }
        if !status.is_success() {
            return Err(CloudError::Api(format!(
                "keystone returned {status} for token request"
            )));
        }

        let token = response
            .headers()
            .get("X-Subject-Token")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| CloudError::Auth("keystone response missing token".to_string()))?;
        let document: Value = response.json().await?;

        let (compute_url, network_url) =
            parse_catalog(&document, &credentials.region_name).ok_or_else(|| {
                CloudError::Auth(format!(
                    "no public compute/network endpoints for region {}",
                    credentials.region_name
                ))
            })?;
        let expires_at = document["token"]["expires_at"]
            .as_str()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|at| at.with_timezone(&Utc));

        debug!(compute = %compute_url, network = %network_url, "keystone session established");
        Ok(CachedToken {
            session: Session {
                token,
                compute_url,
                network_url,
            },
            expires_at,
        })
    }
}

/// Pull the public compute and network endpoint URLs for a region out of a
/// keystone token document.
pub(crate) fn parse_catalog(document: &Value, region: &str) -> Option<(String, String)> {
    let catalog = document["token"]["catalog"].as_array()?;
    let find = |service_type: &str| -> Option<String> {
        catalog
            .iter()
            .filter(|entry| entry["type"].as_str() == Some(service_type))
            .flat_map(|entry| {
                entry["endpoints"]
                    .as_array()
                    .map(|endpoints| endpoints.iter())
                    .into_iter()
                    .flatten()
            })
            .find(|endpoint| {
                endpoint["interface"].as_str() == Some("public")
                    && (endpoint["region"].as_str() == Some(region)
                        || endpoint["region_id"].as_str() == Some(region))
            })
            .and_then(|endpoint| endpoint["url"].as_str())
            .map(|url| url.trim_end_matches('/').to_string())
    };
    Some((find("compute")?, find("network")?))
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
