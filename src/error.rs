//! # Service Errors
//!
//! Errors that end the service, and the process exit status each outcome maps to.
//! Per-message failures never reach this level; they are absorbed by the
//! dispatcher and turned into a reject.

use std::process::ExitCode;

use thiserror::Error;

use crate::config::ConfigError;
use crate::messaging::BrokerError;

/// Fatal service error
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),
}

impl ServiceError {
    /// Exit status the process should terminate with for this error
    pub fn exit_status(&self) -> ExitStatus {
        ExitStatus::Fatal
    }
}

/// Result type alias for service setup and run operations
pub type ServiceResult<T> = Result<T, ServiceError>;

/// How the process ends
///
/// A signal-triggered shutdown that drained in-flight work exits `0`. Anything
/// the consumer loop could not recover from exits `1` so a supervisor restarts it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Clean,
    Fatal,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Clean => 0,
            ExitStatus::Fatal => 1,
        }
    }
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        match status {
            ExitStatus::Clean => ExitCode::SUCCESS,
            ExitStatus::Fatal => ExitCode::FAILURE,
        }
    }
}
