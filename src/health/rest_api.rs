//! Management REST API client used by the remote availability probe.
//!
//! # Responsibilities
//! - List databases with their endpoints (`GET /v1/bdbs?fields=uid,endpoints`)
//! - Query a database's availability, optionally lag-aware
//! - Match a configured database host to a database uid
//!
//! # Design Decisions
//! - The password is held as bytes, zeroed on drop, never as a `String`
//! - The Basic-auth header is rebuilt per request and marked sensitive;
//!   intermediate buffers are cleared after encoding
//! - Only HTTP 200 counts as available

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::header::{HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::StatusCode;
use serde::Deserialize;
use url::Url;

use crate::config::SecretBytes;
use crate::health::probe::ProbeError;

/// Database uid; the API may send it as a number or a string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
enum RawUid {
    Number(u64),
    Text(String),
}

impl RawUid {
    fn into_string(self) -> String {
        match self {
            RawUid::Number(n) => n.to_string(),
            RawUid::Text(s) => s,
        }
    }
}

/// One endpoint of a database as reported by the API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BdbEndpoint {
    #[serde(default)]
    pub dns_name: Option<String>,
    #[serde(default)]
    pub addr: Vec<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct RawBdb {
    uid: Option<RawUid>,
    #[serde(default)]
    endpoints: Vec<BdbEndpoint>,
}

/// A database and its endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BdbInfo {
    pub uid: String,
    pub endpoints: Vec<BdbEndpoint>,
}

impl BdbInfo {
    /// Parse a `/v1/bdbs` body. Entries without a uid are skipped.
    pub fn parse_list(body: &str) -> Result<Vec<BdbInfo>, ProbeError> {
        let raw: Vec<RawBdb> = serde_json::from_str(body)
            .map_err(|e| ProbeError::UnexpectedReply(format!("invalid bdbs payload: {e}")))?;
        Ok(raw
            .into_iter()
            .filter_map(|b| {
                b.uid.map(|uid| BdbInfo {
                    uid: uid.into_string(),
                    endpoints: b.endpoints,
                })
            })
            .collect())
    }

    /// Find the database serving `db_host`: match on `dns_name`, then on
    /// `addr`, then fall back to the only database if there is exactly one.
    pub fn find_matching<'a>(bdbs: &'a [BdbInfo], db_host: &str) -> Option<&'a BdbInfo> {
        let matched = bdbs.iter().find(|bdb| {
            bdb.endpoints.iter().any(|ep| {
                ep.dns_name.as_deref() == Some(db_host) || ep.addr.iter().any(|a| a == db_host)
            })
        });
        match matched {
            Some(bdb) => Some(bdb),
            None if bdbs.len() == 1 => bdbs.first(),
            None => None,
        }
    }
}

/// Thin client over the management API.
#[derive(Debug)]
pub struct RestApiClient {
    client: reqwest::Client,
    base: Url,
    username: String,
    password: SecretBytes,
}

impl RestApiClient {
    pub fn new(
        base: Url,
        username: String,
        password: SecretBytes,
        timeout: Duration,
        accept_invalid_certs: bool,
    ) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()?;
        Ok(Self {
            client,
            base,
            username,
            password,
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn auth_header(&self) -> Result<HeaderValue, ProbeError> {
        let user = self.username.as_bytes();
        let pass = self.password.expose();
        let mut combined = Vec::with_capacity(user.len() + 1 + pass.len());
        combined.extend_from_slice(user);
        combined.push(b':');
        combined.extend_from_slice(pass);

        let mut encoded = String::with_capacity(6 + combined.len() * 4 / 3 + 4);
        encoded.push_str("Basic ");
        STANDARD.encode_string(&combined, &mut encoded);
        combined.fill(0);

        let header = HeaderValue::from_str(&encoded);
        let mut bytes = encoded.into_bytes();
        bytes.fill(0);

        let mut header =
            header.map_err(|_| ProbeError::Config("credentials are not a valid header".into()))?;
        header.set_sensitive(true);
        Ok(header)
    }

    fn url(&self, path: &str) -> Result<Url, ProbeError> {
        self.base
            .join(path)
            .map_err(|e| ProbeError::Config(format!("invalid API url: {e}")))
    }

    pub async fn get_bdbs(&self) -> Result<Vec<BdbInfo>, ProbeError> {
        let mut url = self.url("/v1/bdbs")?;
        url.query_pairs_mut().append_pair("fields", "uid,endpoints");
        let response = self
            .client
            .get(url.clone())
            .header(AUTHORIZATION, self.auth_header()?)
            .header(ACCEPT, "application/json")
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if status != StatusCode::OK {
            return Err(ProbeError::UnexpectedReply(format!(
                "status {status} from {url}: {body}"
            )));
        }
        BdbInfo::parse_list(&body)
    }

    pub async fn check_availability(
        &self,
        uid: &str,
        extended_lag_check: bool,
        lag_tolerance: Option<Duration>,
    ) -> Result<bool, ProbeError> {
        let mut url = self.url(&format!("/v1/bdbs/{uid}/availability"))?;
        if extended_lag_check {
            let mut query = url.query_pairs_mut();
            query.append_pair("extend_check", "lag");
            if let Some(tolerance) = lag_tolerance {
                query.append_pair(
                    "availability_lag_tolerance_ms",
                    &tolerance.as_millis().to_string(),
                );
            }
        }
        let response = self
            .client
            .get(url.clone())
            .header(AUTHORIZATION, self.auth_header()?)
            .header(ACCEPT, "application/json")
            .send()
            .await?;
        let status = response.status();
        if status == StatusCode::OK {
            return Ok(true);
        }
        let body = response.text().await.unwrap_or_default();
        tracing::warn!(uid, %status, body = %body, url = %url, "Availability check failed");
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BDBS: &str = r#"[
        {"uid": 1, "endpoints": [{"dns_name": "redis-1.example.com", "addr": ["10.0.0.1"], "port": 12000}]},
        {"uid": "2", "endpoints": [{"addr": ["10.0.0.2", "10.0.0.3"]}]},
        {"name": "no-uid"}
    ]"#;

    #[test]
    fn test_parse_list_skips_entries_without_uid() {
        let bdbs = BdbInfo::parse_list(BDBS).unwrap();
        assert_eq!(bdbs.len(), 2);
        assert_eq!(bdbs[0].uid, "1");
        assert_eq!(bdbs[1].uid, "2");
        assert_eq!(bdbs[0].endpoints[0].port, Some(12000));
    }

    #[test]
    fn test_find_matching_by_dns_name_and_addr() {
        let bdbs = BdbInfo::parse_list(BDBS).unwrap();
        assert_eq!(BdbInfo::find_matching(&bdbs, "redis-1.example.com").unwrap().uid, "1");
        assert_eq!(BdbInfo::find_matching(&bdbs, "10.0.0.3").unwrap().uid, "2");
        assert!(BdbInfo::find_matching(&bdbs, "10.9.9.9").is_none());
    }

    #[test]
    fn test_single_database_is_the_fallback() {
        let bdbs = BdbInfo::parse_list(r#"[{"uid": 7, "endpoints": []}]"#).unwrap();
        assert_eq!(BdbInfo::find_matching(&bdbs, "anything").unwrap().uid, "7");
    }

    #[test]
    fn test_auth_header_is_basic_and_sensitive() {
        let client = RestApiClient::new(
            Url::parse("https://localhost:9443").unwrap(),
            "admin".into(),
            SecretBytes::from("s3cret"),
            Duration::from_secs(1),
            false,
        )
        .unwrap();
        let header = client.auth_header().unwrap();
        assert!(header.is_sensitive());
        assert_eq!(header.to_str().unwrap(), format!("Basic {}", STANDARD.encode("admin:s3cret")));
        assert_eq!(format!("{:?}", client.password), "SecretBytes(***)");
    }
}
