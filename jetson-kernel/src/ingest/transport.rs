use crate::error::TransportError;
use crate::models::NodeReport;
use std::future::Future;
use std::time::Duration;
use tracing::trace;

/// Source of node reports for pull-mode workers.
pub trait Transport: Send + Sync + 'static {
    fn fetch(&self, address: &str) -> impl Future<Output = Result<NodeReport, TransportError>> + Send;
}

/// Polls the node agent at `http://{address}/api/sample`.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        Ok(Self { client, timeout })
    }

    pub fn sample_url(address: &str) -> String {
        let address = address.trim_end_matches('/');
        if address.starts_with("http://") || address.starts_with("https://") {
            format!("{address}/api/sample")
        } else {
            format!("http://{address}/api/sample")
        }
    }
}

impl Transport for HttpTransport {
    async fn fetch(&self, address: &str) -> Result<NodeReport, TransportError> {
        let url = Self::sample_url(address);
        trace!(%url, "polling node");

        let response = self.client.get(&url).send().await.map_err(|e| self.classify(e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        let body = response.bytes().await.map_err(|e| self.classify(e))?;
        serde_json::from_slice(&body).map_err(|e| TransportError::Decode(e.to_string()))
    }
}

impl HttpTransport {
    fn classify(&self, e: reqwest::Error) -> TransportError {
        match TransportError::from(e) {
            TransportError::Timeout(_) => TransportError::Timeout(self.timeout),
            other => other,
        }
    }
}
