//! Infrastructure adapters for external systems.

pub mod backends;
pub mod http;
pub mod memory;
pub mod process;
pub mod sqlite;

pub use backends::{AdapterDirectory, BackendRegistry, HttpBridge};
pub use http::ReqwestHttpFetcher;
pub use memory::InMemoryRecordStore;
pub use process::TokioProcessRunner;
pub use sqlite::SqliteRecordStore;
