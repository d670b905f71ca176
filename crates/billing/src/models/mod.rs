//! Strongly typed ledger entities

pub mod account;
pub mod payment;
pub mod pot_usage;
pub mod token;

pub use account::{validate_email, Account, Address, FREE_ACCOUNT_EXPIRATION};
pub use payment::{Payment, PaymentStatus};
pub use pot_usage::PotUsage;
pub use token::Token;
