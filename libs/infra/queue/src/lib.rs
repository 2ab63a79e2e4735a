pub mod client;
pub mod errors;
pub mod lease;

pub use client::{deliver, DeliveryResult};
pub use errors::QueueError;
pub use lease::{JobOutcome, JobRunner};
