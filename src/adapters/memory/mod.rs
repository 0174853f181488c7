//! In-memory adapters.

pub mod record_store;

pub use record_store::{InMemoryRecordStore, WriteJournalEntry};
