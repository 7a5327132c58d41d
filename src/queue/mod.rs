//! Durable work queue built on object storage.
//!
//! At-least-once delivery with a per-message delivery-attempt counter and a
//! deliberate no-retry policy at the broker layer: a message that is not
//! acknowledged before its visibility deadline is moved to the dead-letter
//! queue once its allowed deliveries (one, by default) are exhausted, never
//! redelivered. Claiming a message is an `ETag` compare-and-swap, so at most
//! one consumer holds a given message during its visibility window.

pub mod config;
pub mod error;
pub mod ops;
pub mod sweep;

pub use config::QueueConfig;
pub use error::QueueError;
pub use ops::{Delivery, Receipt, WorkQueue};
pub use sweep::{expiry_disposition, ExpiryDisposition, SweepReport};
