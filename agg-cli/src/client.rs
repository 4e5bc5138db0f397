//! Thin HTTP client for the operator subcommands (`run`, `stop`, `status`),
//! grounded on the same request/response shapes `agg-api::rest` serves.

use anyhow::{bail, Result};
use std::time::Duration;
use uuid::Uuid;

pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("http client always builds");
        Self { base_url, http }
    }

    pub async fn run_once(&self, config_id: Uuid) -> Result<String> {
        let url = format!("{}/configs/{}/run", self.base_url, config_id);
        let response = self.http.post(&url).json(&serde_json::json!({})).send().await?;
        self.job_id_from_response(response).await
    }

    pub async fn stop(&self, job_id: Uuid) -> Result<()> {
        let url = format!("{}/job/{}/stop", self.base_url, job_id);
        let response = self.http.post(&url).send().await?;
        if !response.status().is_success() {
            bail!("stop failed: {}", response.text().await.unwrap_or_default());
        }
        Ok(())
    }

    pub async fn status(&self, job_id: Uuid) -> Result<serde_json::Value> {
        let url = format!("{}/job/{}", self.base_url, job_id);
        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            bail!("status failed: {}", response.text().await.unwrap_or_default());
        }
        Ok(response.json().await?)
    }

    async fn job_id_from_response(&self, response: reqwest::Response) -> Result<String> {
        if !response.status().is_success() {
            bail!("run request failed: {}", response.text().await.unwrap_or_default());
        }
        let body: serde_json::Value = response.json().await?;
        body.get("job_id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("response carried no job_id"))
    }
}
