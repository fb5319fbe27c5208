//! Subscription lifecycle, proration and usage metering engine.

pub mod config;
pub mod dtos;
pub mod error;
pub mod handlers;
pub mod models;
pub mod services;
pub mod startup;

pub use error::{BillingError, ErrorKind};
pub use startup::AppState;
