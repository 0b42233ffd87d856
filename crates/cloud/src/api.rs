// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Raw OpenStack compute and network REST calls.
//!
//! One thin method per API operation; resource semantics (rollback,
//! duplicate resolution, worker pools) live a layer up in [`crate::openstack`].

use crate::auth::{KeystoneAuth, Session};
use crate::error::CloudError;
use crate::security_group::SecurityRule;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Highest compute microversion this code has been exercised against. When
/// the cloud advertises more, we stay at the ceiling.
pub const COMPUTE_API_CEILING: &str = "2.79";

/// Pick the compute microversion to use: the cloud's advertised maximum,
/// capped at [`COMPUTE_API_CEILING`]. Comparison is numeric on
/// major.minor, not lexicographic.
pub fn negotiate_microversion(advertised: Option<&str>, ceiling: &str) -> String {
    let Some(ceiling_version) = parse_version(ceiling) else {
        return ceiling.to_string();
    };
    match advertised.and_then(parse_version) {
        Some(version) if version > ceiling_version => ceiling.to_string(),
        Some(_) => advertised.unwrap_or(ceiling).to_string(),
        None => ceiling.to_string(),
    }
}

fn parse_version(raw: &str) -> Option<(u32, u32)> {
    let mut parts = raw.trim().splitn(2, '.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().unwrap_or("0").parse().ok()?;
    Some((major, minor))
}

/// A server as returned by `GET /servers/detail`.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerRecord {
    pub id: String,
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub created: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub image: Value,
    #[serde(default)]
    pub flavor: Value,
    #[serde(default)]
    pub addresses: Value,
    #[serde(default)]
    pub key_name: Option<String>,
}

impl ServerRecord {
    /// Creation time; servers with unparseable timestamps sort oldest.
    pub fn created_at(&self) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(&self.created)
            .map(|at| at.with_timezone(&Utc))
            .or_else(|_| {
                chrono::NaiveDateTime::parse_from_str(&self.created, "%Y-%m-%dT%H:%M:%SZ")
                    .map(|naive| Utc.from_utc_datetime(&naive))
            })
            .unwrap_or_else(|_| Utc.timestamp_opt(0, 0).single().unwrap_or_else(Utc::now))
    }

    /// Image reference: either the embedded id or a bare string.
    pub fn image_ref(&self) -> String {
        self.image["id"]
            .as_str()
            .or_else(|| self.image.as_str())
            .unwrap_or_default()
            .to_string()
    }

    /// Flavor reference: id, or the embedded original name on newer
    /// microversions.
    pub fn flavor_ref(&self) -> String {
        self.flavor["id"]
            .as_str()
            .or_else(|| self.flavor["original_name"].as_str())
            .or_else(|| self.flavor.as_str())
            .unwrap_or_default()
            .to_string()
    }

    /// All addresses across networks, in catalog order.
    pub fn address_list(&self) -> Vec<String> {
        let Some(networks) = self.addresses.as_object() else {
            return Vec::new();
        };
        networks
            .values()
            .flat_map(|entries| entries.as_array().map(|list| list.iter()).into_iter().flatten())
            .filter_map(|entry| entry["addr"].as_str())
            .map(str::to_string)
            .collect()
    }
}

/// A keypair as returned by `GET /os-keypairs`.
#[derive(Debug, Clone)]
pub struct KeypairRecord {
    pub name: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// Thin client over one project's compute and network endpoints.
pub struct OpenStackApi {
    http: reqwest::Client,
    auth: KeystoneAuth,
    microversion: Mutex<Option<String>>,
}

impl OpenStackApi {
    pub fn new(http: reqwest::Client, auth: KeystoneAuth) -> Self {
        Self {
            http,
            auth,
            microversion: Mutex::new(None),
        }
    }

    async fn session(&self) -> Result<Session, CloudError> {
        self.auth.session().await
    }

    /// The negotiated compute microversion, resolved once per process.
    pub async fn microversion(&self) -> Result<String, CloudError> {
        if let Some(version) = self.microversion.lock().clone() {
            return Ok(version);
        }
        let session = self.session().await?;
        let advertised = match self
            .http
            .get(&session.compute_url)
            .header("X-Auth-Token", &session.token)
            .send()
            .await
        {
            Ok(response) => response
                .json::<Value>()
                .await
                .ok()
                .and_then(|doc| doc["version"]["version"].as_str().map(str::to_string))
                .filter(|raw| !raw.is_empty()),
            Err(err) => {
                warn!(error = %err, "unable to fetch compute version document");
                None
            }
        };
        let version = negotiate_microversion(advertised.as_deref(), COMPUTE_API_CEILING);
        debug!(advertised = ?advertised, negotiated = %version, "compute microversion");
        *self.microversion.lock() = Some(version.clone());
        Ok(version)
    }

    async fn compute_request(
        &self,
        method: reqwest::Method,
        path: &str,
    ) -> Result<reqwest::RequestBuilder, CloudError> {
        let session = self.session().await?;
        let version = self.microversion().await?;
        Ok(self
            .http
            .request(method, format!("{}{}", session.compute_url, path))
            .header("X-Auth-Token", &session.token)
            .header("OpenStack-API-Version", format!("compute {version}")))
    }

    async fn network_request(
        &self,
        method: reqwest::Method,
        path: &str,
    ) -> Result<reqwest::RequestBuilder, CloudError> {
        let session = self.session().await?;
        Ok(self
            .http
            .request(method, format!("{}{}", session.network_url, path))
            .header("X-Auth-Token", &session.token))
    }

    /// List all servers in the project, with details.
    pub async fn list_servers(&self) -> Result<Vec<ServerRecord>, CloudError> {
        let response = self
            .compute_request(reqwest::Method::GET, "/servers/detail")
            .await?
            .send()
            .await?;
        let response = check(response, "list servers").await?;
        let document: Value = response.json().await?;
        let servers = serde_json::from_value(document["servers"].clone())
            .map_err(|err| CloudError::Api(format!("malformed server list: {err}")))?;
        Ok(servers)
    }

    /// Create a server and return its id. The caller polls for readiness.
    pub async fn create_server(&self, body: Value) -> Result<String, CloudError> {
        let response = self
            .compute_request(reqwest::Method::POST, "/servers")
            .await?
            .json(&body)
            .send()
            .await?;
        let response = check(response, "create server").await?;
        let document: Value = response.json().await?;
        document["server"]["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| CloudError::Api("create server response missing id".to_string()))
    }

    pub async fn get_server(&self, id: &str) -> Result<ServerRecord, CloudError> {
        let response = self
            .compute_request(reqwest::Method::GET, &format!("/servers/{id}"))
            .await?
            .send()
            .await?;
        let response = check(response, "get server").await?;
        let document: Value = response.json().await?;
        serde_json::from_value(document["server"].clone())
            .map_err(|err| CloudError::Api(format!("malformed server record: {err}")))
    }

    /// Delete a server. Returns false if it was already gone.
    pub async fn delete_server(&self, id: &str) -> Result<bool, CloudError> {
        let response = self
            .compute_request(reqwest::Method::DELETE, &format!("/servers/{id}"))
            .await?
            .send()
            .await?;
        if response.status().as_u16() == 404 {
            return Ok(false);
        }
        check(response, "delete server").await?;
        Ok(true)
    }

    /// Create a keypair and return the generated private key.
    pub async fn create_keypair(&self, name: &str) -> Result<String, CloudError> {
        let response = self
            .compute_request(reqwest::Method::POST, "/os-keypairs")
            .await?
            .json(&json!({"keypair": {"name": name}}))
            .send()
            .await?;
        let response = check(response, "create keypair").await?;
        let document: Value = response.json().await?;
        document["keypair"]["private_key"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| CloudError::Api("keypair response missing private key".to_string()))
    }

    /// Delete a keypair. Returns false if it was already gone.
    pub async fn delete_keypair(&self, name: &str) -> Result<bool, CloudError> {
        let response = self
            .compute_request(reqwest::Method::DELETE, &format!("/os-keypairs/{name}"))
            .await?
            .send()
            .await?;
        if response.status().as_u16() == 404 {
            return Ok(false);
        }
        check(response, "delete keypair").await?;
        Ok(true)
    }

    pub async fn list_keypairs(&self) -> Result<Vec<KeypairRecord>, CloudError> {
        let response = self
            .compute_request(reqwest::Method::GET, "/os-keypairs")
            .await?
            .send()
            .await?;
        let response = check(response, "list keypairs").await?;
        let document: Value = response.json().await?;
        let Some(entries) = document["keypairs"].as_array() else {
            return Ok(Vec::new());
        };
        Ok(entries
            .iter()
            .filter_map(|entry| {
                let keypair = &entry["keypair"];
                let name = keypair["name"].as_str()?.to_string();
                let created_at = keypair["created_at"]
                    .as_str()
                    .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                    .map(|at| at.with_timezone(&Utc));
                Some(KeypairRecord { name, created_at })
            })
            .collect())
    }

    /// Resolve a network name to its id.
    pub async fn find_network_id(&self, name: &str) -> Result<Option<String>, CloudError> {
        let response = self
            .network_request(reqwest::Method::GET, &format!("/v2.0/networks?name={name}"))
            .await?
            .send()
            .await?;
        let response = check(response, "list networks").await?;
        let document: Value = response.json().await?;
        Ok(document["networks"]
            .as_array()
            .and_then(|networks| networks.first())
            .and_then(|network| network["id"].as_str())
            .map(str::to_string))
    }

    /// Find a security group by name, returning its id and current rules.
    pub async fn find_security_group(
        &self,
        name: &str,
    ) -> Result<Option<(String, Vec<SecurityRule>)>, CloudError> {
        let response = self
            .network_request(
                reqwest::Method::GET,
                &format!("/v2.0/security-groups?name={name}"),
            )
            .await?
            .send()
            .await?;
        let response = check(response, "list security groups").await?;
        let document: Value = response.json().await?;
        let Some(group) = document["security_groups"]
            .as_array()
            .and_then(|groups| groups.first())
        else {
            return Ok(None);
        };
        let id = group["id"]
            .as_str()
            .ok_or_else(|| CloudError::Api("security group missing id".to_string()))?
            .to_string();
        let rules = group["security_group_rules"]
            .as_array()
            .map(|rules| {
                rules
                    .iter()
                    .filter_map(|rule| serde_json::from_value(rule.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();
        Ok(Some((id, rules)))
    }

    pub async fn create_security_group(
        &self,
        name: &str,
        description: &str,
    ) -> Result<String, CloudError> {
        let response = self
            .network_request(reqwest::Method::POST, "/v2.0/security-groups")
            .await?
            .json(&json!({"security_group": {"name": name, "description": description}}))
            .send()
            .await?;
        let response = check(response, "create security group").await?;
        let document: Value = response.json().await?;
        document["security_group"]["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| CloudError::Api("security group response missing id".to_string()))
    }

    pub async fn create_security_group_rule(
        &self,
        group_id: &str,
        rule: &SecurityRule,
    ) -> Result<(), CloudError> {
        let mut body = serde_json::to_value(rule)
            .map_err(|err| CloudError::Api(format!("unserializable rule: {err}")))?;
        body["security_group_id"] = json!(group_id);
        let response = self
            .network_request(reqwest::Method::POST, "/v2.0/security-group-rules")
            .await?
            .json(&json!({"security_group_rule": body}))
            .send()
            .await?;
        check(response, "create security group rule").await?;
        Ok(())
    }
}

/// Map a response's status onto the cloud error taxonomy.
async fn check(response: reqwest::Response, what: &str) -> Result<reqwest::Response, CloudError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    match status.as_u16() {
        401 | 403 => Err(CloudError::Auth(format!("{what}: {status}"))),
        404 => Err(CloudError::NotFound(format!("{what}: {status}"))),
        _ => Err(CloudError::Api(format!("{what}: {status}: {body}"))),
    }
}

#[cfg(test)]
#[path = "api_tests.rs"]
mod tests;
