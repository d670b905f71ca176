// Test code patterns:
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Common Pot shared building blocks
//!
//! Configuration, time source, database access and the domain enums used by
//! both the billing engine and the worker.

pub mod clock;
pub mod config;
pub mod db;
pub mod types;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{Config, ConfigError};
pub use db::{create_pool, run_migrations};
pub use types::{Frequency, PaymentType, UnknownVariant};
