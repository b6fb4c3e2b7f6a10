//! # HTTP Processor
//!
//! Calls the encoding service's batched endpoint:
//!
//! ```text
//! POST {base_url}/{endpoint}
//! {"items": [{"key": "uploads/a.jpg"}, ...]}
//!
//! 200 OK
//! ["encoded/a.bin", ...]
//! ```

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use super::{check_output_len, Processor, ProcessorError};
use crate::config::ProcessorConfig;
use crate::messaging::ItemDescriptor;

/// Longest error body kept from a non-success response
const MAX_ERROR_BODY: usize = 512;

#[derive(Serialize)]
struct EncodeRequest<'a> {
    items: &'a [ItemDescriptor],
}

/// HTTP client for the encoding service
pub struct HttpProcessor {
    client: Client,
    url: String,
    config: ProcessorConfig,
}

impl std::fmt::Debug for HttpProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProcessor")
            .field("url", &self.url)
            .field("timeout_ms", &self.config.timeout_ms)
            .finish()
    }
}

impl HttpProcessor {
    pub fn new(config: ProcessorConfig) -> Result<Self, ProcessorError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(format!("queue-dispatch/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProcessorError::Request(format!("failed to build HTTP client: {e}")))?;

        let url = config.endpoint_url();
        debug!(url = %url, timeout_ms = config.timeout_ms, "Created HttpProcessor");

        Ok(Self {
            client,
            url,
            config,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn map_send_error(&self, err: reqwest::Error) -> ProcessorError {
        if err.is_timeout() {
            ProcessorError::Timeout {
                timeout_ms: self.config.timeout_ms,
            }
        } else {
            ProcessorError::Request(err.to_string())
        }
    }
}

#[async_trait]
impl Processor for HttpProcessor {
    async fn encode(&self, items: Vec<ItemDescriptor>) -> Result<Vec<String>, ProcessorError> {
        let response = self
            .client
            .post(&self.url)
            .json(&EncodeRequest { items: &items })
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                body = crate::logging::body_preview(body.as_bytes(), MAX_ERROR_BODY);
            }
            return Err(ProcessorError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let outputs: Vec<String> = response
            .json()
            .await
            .map_err(|e| ProcessorError::InvalidResponse(e.to_string()))?;
        check_output_len(items.len(), &outputs)?;

        Ok(outputs)
    }

    fn name(&self) -> &str {
        "http"
    }
}
