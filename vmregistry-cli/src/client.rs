use anyhow::{anyhow, Context, Result};
use shared::protocol::LIST_VMS_PATH;
use shared::types::{ErrorReply, ListVmReply};

pub struct Client {
    http: reqwest::Client,
    base_url: String,
}

impl Client {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Issue `List` and return the reply, or the server's error as a hard failure
    pub async fn list(&self) -> Result<ListVmReply> {
        let url = format!("{}{}", self.base_url, LIST_VMS_PATH);
        tracing::debug!("GET {}", url);

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to reach vmregistryd at {}", self.base_url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(error_from_body(status, &body));
        }

        response
            .json::<ListVmReply>()
            .await
            .context("Failed to decode List reply")
    }
}

fn error_from_body(status: reqwest::StatusCode, body: &str) -> anyhow::Error {
    match serde_json::from_str::<ErrorReply>(body) {
        Ok(err) => anyhow!("{} ({}): {}", err.code, status, err.message),
        Err(_) => anyhow!("server returned {}: {}", status, body.trim()),
    }
}
