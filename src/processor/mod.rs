//! # Processor
//!
//! Seam to the downstream encoding service. The dispatcher only relies on the
//! contract below; [`HttpProcessor`] is the production implementation.

use async_trait::async_trait;
use thiserror::Error;

use crate::messaging::ItemDescriptor;

pub mod http;

pub use http::HttpProcessor;

/// Downstream processor failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessorError {
    #[error("Processor request failed: {0}")]
    Request(String),

    #[error("Processor returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid processor response: {0}")]
    InvalidResponse(String),

    #[error("Processor returned {actual} outputs for {expected} items")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Processor call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Processing failed: {0}")]
    Failed(String),
}

impl ProcessorError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Encodes batches of item descriptors
///
/// `encode` returns exactly one output identifier per input descriptor, in
/// order, or fails for the whole batch.
#[async_trait]
pub trait Processor: Send + Sync + 'static {
    async fn encode(&self, items: Vec<ItemDescriptor>) -> Result<Vec<String>, ProcessorError>;

    /// Name used in logs
    fn name(&self) -> &str;
}

/// Check that a processor answered once per item
pub(crate) fn check_output_len(expected: usize, outputs: &[String]) -> Result<(), ProcessorError> {
    if outputs.len() == expected {
        Ok(())
    } else {
        Err(ProcessorError::LengthMismatch {
            expected,
            actual: outputs.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_output_len() {
        assert!(check_output_len(1, &["out/a".to_string()]).is_ok());
        assert_eq!(
            check_output_len(2, &["out/a".to_string()]),
            Err(ProcessorError::LengthMismatch {
                expected: 2,
                actual: 1
            })
        );
    }

    #[test]
    fn test_error_display() {
        let err = ProcessorError::Status {
            status: 500,
            body: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "Processor returned 500: boom");
        assert_eq!(
            ProcessorError::Timeout { timeout_ms: 10 }.to_string(),
            "Processor call timed out after 10ms"
        );
    }
}
