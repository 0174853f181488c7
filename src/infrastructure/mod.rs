//! Infrastructure layer module
//!
//! Process-wide concerns wired at startup:
//! - Configuration management (figment)
//! - Logging (tracing-subscriber, tracing-appender)

pub mod config;
pub mod logging;
