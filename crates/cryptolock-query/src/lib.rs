//! cryptolock-query
//!
//! Read-only views over locks and their criteria. Mutations live in
//! cryptolock-state's `LockEngine`; nothing here writes to the database.

pub mod query;

pub use query::{LockQuery, LockSummary};
