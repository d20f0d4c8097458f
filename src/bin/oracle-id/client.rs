//! Oracle Identity API Client
//!
//! Read-only access to the membership endpoints of a running server.

use anyhow::{anyhow, Context, Result};
use oracle_identity::MembershipProof;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Response of `GET /merkle/root`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootResponse {
    pub root: Option<String>,
    pub leaf_count: usize,
}

/// Error body returned by the server
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    code: String,
}

pub struct OracleClient {
    client: Client,
    base_url: String,
}

impl OracleClient {
    pub fn new(server_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: server_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub async fn get_root(&self) -> Result<RootResponse> {
        let resp = self.client.get(self.url("merkle/root")).send().await?;
        let status = resp.status();
        if status.is_success() {
            Ok(resp.json().await?)
        } else {
            Err(anyhow!("Failed to fetch root ({}): {}", status, error_text(resp).await))
        }
    }

    pub async fn get_proof(&self, wallet: &str, issue_number: u64) -> Result<MembershipProof> {
        let url = self.url(&format!("merkle/proof/{}/{}", wallet, issue_number));
        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        if status.is_success() {
            Ok(resp.json().await?)
        } else {
            Err(anyhow!("Failed to fetch proof ({}): {}", status, error_text(resp).await))
        }
    }
}

async fn error_text(resp: reqwest::Response) -> String {
    let text = resp.text().await.unwrap_or_else(|_| "Unknown error".into());
    match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => format!("{} [{}]", body.error, body.code),
        Err(_) => text,
    }
}
