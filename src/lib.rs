//! # lunch-roller
//!
//! Event-sourced engine behind a shared "where do we eat today" lottery.
//!
//! Every state change is an immutable [`domain::Event`] appended to an
//! [`persistence::EventLog`]. Places, rolls, boosts and rooms are never
//! stored directly: they are replayed from the log by the projections in
//! [`projection`] and memoized per room by the read-through caches in
//! [`cache`]. The [`service::Roller`] enforces the weekly quota, draws
//! places with a weighted lottery and fans out post-commit notifications.
//!
//! ## Architecture
//!
//! ```text
//! Caller (HTTP, chat bot, websocket; not part of this crate)
//!     │
//!     ├── Roller (service/)
//!     │     ├── History: weekly points, weights
//!     │     ├── Lottery: weighted pick
//!     │     └── Notifier → handlers, broadcast
//!     │
//!     ├── Repository + ReadThroughCache (cache/)
//!     ├── Projections (projection/)
//!     │
//!     └── EventLog: in-memory or PostgreSQL (persistence/)
//! ```
//!
//! User records come from a [`directory::UserDirectory`] and are only used
//! to decorate views.

pub mod cache;
pub mod config;
pub mod directory;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod projection;
pub mod service;

pub use config::EngineConfig;
pub use error::{BackendError, LunchError};
pub use service::Roller;
