//! # Resilience Module
//!
//! Retry policy used when (re)establishing the broker connection.
//!
//! ```rust
//! use queue_dispatch::config::ReconnectConfig;
//! use queue_dispatch::resilience::ReconnectPolicy;
//! use std::time::Duration;
//!
//! let policy = ReconnectPolicy::from(&ReconnectConfig {
//!     max_attempts: 3,
//!     initial_delay_ms: 100,
//!     max_delay_ms: 250,
//! });
//!
//! assert_eq!(policy.delay_for(0), Duration::from_millis(100));
//! assert_eq!(policy.delay_for(1), Duration::from_millis(200));
//! assert_eq!(policy.delay_for(2), Duration::from_millis(250));
//! ```

pub mod backoff;

pub use backoff::ReconnectPolicy;
