//! Cache layer: memoized projections in front of the event log.
//!
//! [`ReadThroughCache`] memoizes one projection per scope. [`Repository`]
//! bundles one cache per entity kind with the log they read through and is
//! the only write path: [`Repository::store`] appends an event and then
//! updates every cache that reads it.

pub mod read_through;
pub mod repository;

pub use read_through::ReadThroughCache;
pub use repository::Repository;
