//! The async job + cache layer (spec.md §4.7): fingerprinted dedup/cache,
//! a `pending → running → completed|failed` state machine persisted in the
//! operational store, a fixed worker pool, and NDJSON streaming for the
//! batch/stream endpoint.

pub mod coordinator;
pub mod stream;
pub mod worker;

pub use coordinator::JobCoordinator;
