//! Domain models for subscription-service.

mod payment;
mod plan;
mod subscription;
mod usage;

pub use payment::{PaymentClaim, PaymentOutcome, ProcessedPayment};
pub use plan::{BillingCycle, FeatureLimit, Plan, PlanId, Quota, ResetPeriod};
pub use subscription::{
    Subscription, SubscriptionEvent, SubscriptionState, SubscriptionStatus, TransitionKind,
};
pub use usage::{PeriodKey, UsageConsumption, UsageKey, UsageRecord};
