//! Configuration Loader
//!
//! Layers built-in defaults, an optional TOML file, and environment variables
//! (later sources win) into a validated [`DispatchConfig`].
//!
//! Recognised environment variables:
//!
//! | Variable | Key |
//! |----------|-----|
//! | `RABBITMQ_URL` | `broker.url` |
//! | `RABBITMQ_QUEUE_NAME` | `broker.queue_name` |
//! | `REBBITMQ_QUEUE_NAME` | `broker.queue_name` (legacy spelling, lower precedence) |
//! | `RABBITMQ_PREFETCH_COUNT` | `broker.prefetch_count` |
//! | `SCHEDULE_CONCURRENCY` | `admission.schedule_concurrency` |
//! | `PROCESSOR_URL` | `processor.base_url` |
//! | `PROCESSOR_TIMEOUT_MS` | `processor.timeout_ms` |
//! | `QUEUE_DISPATCH_CONFIG` | path of the TOML file |

use std::path::{Path, PathBuf};

use ::config::{Config, File, FileFormat};
use tracing::{debug, info};

use super::{ConfigResult, DispatchConfig};

/// Environment variable naming the optional TOML configuration file
pub const CONFIG_PATH_ENV: &str = "QUEUE_DISPATCH_CONFIG";

/// Load configuration from the process environment
pub fn load_from_env() -> ConfigResult<DispatchConfig> {
    let path = std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from);
    load(path.as_deref())
}

/// Load configuration from an optional file plus the process environment
pub fn load(path: Option<&Path>) -> ConfigResult<DispatchConfig> {
    load_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration with an explicit environment lookup
///
/// Tests pass a closure over a map instead of mutating the process environment.
pub fn load_with_env<F>(path: Option<&Path>, env: F) -> ConfigResult<DispatchConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut builder = Config::builder().add_source(Config::try_from(&DispatchConfig::default())?);

    if let Some(path) = path {
        debug!(path = %path.display(), "Loading configuration file");
        builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
    }

    let queue_name = env("RABBITMQ_QUEUE_NAME").or_else(|| env("REBBITMQ_QUEUE_NAME"));

    let config: DispatchConfig = builder
        .set_override_option("broker.url", env("RABBITMQ_URL"))?
        .set_override_option("broker.queue_name", queue_name)?
        .set_override_option("broker.prefetch_count", env("RABBITMQ_PREFETCH_COUNT"))?
        .set_override_option("admission.schedule_concurrency", env("SCHEDULE_CONCURRENCY"))?
        .set_override_option("processor.base_url", env("PROCESSOR_URL"))?
        .set_override_option("processor.timeout_ms", env("PROCESSOR_TIMEOUT_MS"))?
        .build()?
        .try_deserialize()?;

    config.validate()?;

    info!(
        broker_url = %config.broker.url_redacted(),
        queue = %config.broker.queue_name,
        schedule_concurrency = config.admission.schedule_concurrency,
        processor_url = %config.processor.endpoint_url(),
        "Configuration loaded"
    );

    Ok(config)
}
