//! Service layer: quota rules, the lottery, notifications and the
//! [`Roller`] that composes them over the cached projections.

pub mod history;
pub mod lottery;
pub mod notifier;
pub mod roller;

pub use history::{History, Rules};
pub use lottery::{Lottery, chances};
pub use notifier::{Handler, Notifier, NotifierStats};
pub use roller::Roller;
