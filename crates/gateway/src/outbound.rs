//! Outbound messaging transport client.
//!
//! Sends replies back through the channel gateway:
//! `POST {base}/message/sendText/{instance}` with `{number, text}`;
//! 200 and 201 both count as delivered.

use mg_domain::error::{Error, Result};

pub struct OutboundMessenger {
    base_url: String,
    client: reqwest::Client,
}

impl OutboundMessenger {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Send a text reply. `phone` carries no transport suffix.
    pub async fn send_text(&self, instance: &str, phone: &str, text: &str) -> Result<()> {
        if self.base_url.is_empty() {
            tracing::warn!("outbound transport not configured, dropping reply");
            return Ok(());
        }

        let url = format!("{}/message/sendText/{}", self.base_url, instance);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "number": phone,
                "text": text,
            }))
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        match response.status().as_u16() {
            200 | 201 => Ok(()),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(Error::Http(format!("sendText returned {status}: {body}")))
            }
        }
    }
}
