//! Network policy shared by the peer roles.

pub mod retry;

pub use retry::{Backoff, RetryConfig};
