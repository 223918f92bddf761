use anyhow::Result;
use async_trait::async_trait;
use ecowatt_types::FlushPayload;
use std::time::Duration;
use tracing::debug;

/// Downstream collaborator that receives flushed records.
///
/// Best-effort boundary: the flusher logs and swallows errors, never
/// retries, and never calls this under the buffer lock.
#[async_trait]
pub trait FlushSink: Send + Sync {
    async fn push(&self, payload: &FlushPayload) -> Result<()>;

    fn name(&self) -> &str;
}

/// Sink that POSTs the flush payload as JSON to an aggregator endpoint.
pub struct HttpSink {
    client: reqwest::Client,
    url: String,
}

impl HttpSink {
    pub fn new(url: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl FlushSink for HttpSink {
    async fn push(&self, payload: &FlushPayload) -> Result<()> {
        let resp = self.client.post(&self.url).json(payload).send().await?;
        let status = resp.status();

        debug!(
            device_id = %payload.device_id,
            status = %status,
            "Flush pushed to aggregator"
        );

        if !status.is_success() {
            anyhow::bail!("aggregator returned {}", status);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Sink that drops everything; used when no aggregator is configured.
pub struct NullSink;

#[async_trait]
impl FlushSink for NullSink {
    async fn push(&self, _payload: &FlushPayload) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "null"
    }
}
