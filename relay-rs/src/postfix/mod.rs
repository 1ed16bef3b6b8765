//! Postfix management: configuration writing and log/queue monitoring.

pub mod monitor;
pub mod writer;

pub use monitor::{DeliveryRecord, DeliveryStatus, Monitor, QueueEntry};
pub use writer::{ConfigSnapshot, PostfixWriter};
