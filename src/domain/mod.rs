//! Domain layer for the labexec execution engine
//!
//! This module contains core models, error types and port traits.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{ContractError, DomainError, DomainResult};
