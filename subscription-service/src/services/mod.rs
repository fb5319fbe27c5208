//! Business logic for subscription-service.

pub mod catalog;
pub mod engine;
pub mod expiry;
pub mod lifecycle;
pub mod metrics;
pub mod payments;
pub mod proration;
pub mod store;
pub mod usage;

pub use catalog::PlanCatalog;
pub use engine::SubscriptionEngine;
pub use expiry::ExpiryResolver;
pub use metrics::{get_metrics, init_metrics};
pub use payments::{ConfirmOutcome, PaymentGate};
pub use proration::{ProrationCalculator, ProrationQuote};
pub use store::{InMemoryStore, PgStore, SubscriptionStore};
pub use usage::{Remaining, UsageDecision, UsageMeter, UsageSnapshot};
