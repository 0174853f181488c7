//! Application layer: wiring of adapters and services.

pub mod engine;

pub use engine::Engine;
