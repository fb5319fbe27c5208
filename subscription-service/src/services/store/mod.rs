//! Persistent record store behind the engine.
//!
//! Backends provide single-writer-per-user mutation of the subscription row
//! and atomic primitives for the payment ledger and usage counters. All
//! business rules stay in the engine; a backend only guarantees atomicity.

mod memory;
mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

use crate::error::BillingError;
use crate::models::{
    PaymentClaim, ProcessedPayment, Subscription, SubscriptionEvent, UsageConsumption, UsageKey,
    UsageRecord,
};
use crate::services::metrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Outcome of a mutation: the row to persist and the transitions that led
/// to it. An empty `events` list means nothing changed and nothing is written.
#[derive(Debug, Clone)]
pub struct Applied {
    pub subscription: Subscription,
    pub events: Vec<SubscriptionEvent>,
}

impl Applied {
    pub fn unchanged(subscription: Subscription) -> Self {
        Self {
            subscription,
            events: Vec::new(),
        }
    }

    pub fn changed(&self) -> bool {
        !self.events.is_empty()
    }

    /// Chain a further mutation, keeping the events of both.
    pub fn and_then<F>(self, next: F) -> Result<Applied, BillingError>
    where
        F: FnOnce(Subscription) -> Result<Applied, BillingError>,
    {
        let mut events = self.events;
        let applied = next(self.subscription)?;
        events.extend(applied.events);
        Ok(Applied {
            subscription: applied.subscription,
            events,
        })
    }
}

fn record_transitions(events: &[SubscriptionEvent]) {
    for event in events {
        metrics::record_transition(event.kind.as_str());
    }
}

/// Synchronous mutation run while the user's row is held exclusively.
pub type Mutation = Box<dyn FnOnce(Subscription) -> Result<Applied, BillingError> + Send>;

/// Result of [`SubscriptionStore::apply_payment`].
#[derive(Debug)]
pub enum PaymentApplication {
    /// Session claimed and the mutation persisted.
    Applied(Subscription),
    /// Session was already in the ledger; nothing was touched.
    Replayed {
        payment: ProcessedPayment,
        subscription: Subscription,
    },
    /// Session claimed but the mutation was rejected; the claim is kept with
    /// outcome `ReconciliationRequired`.
    Unapplied {
        payment: ProcessedPayment,
        reason: BillingError,
    },
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Return the user's row, creating the free row (and its `created`
    /// event) when none exists. The flag is true when this call created it.
    async fn ensure_subscription(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(Subscription, bool), BillingError>;

    async fn get_subscription(&self, user_id: &str) -> Result<Option<Subscription>, BillingError>;

    /// Run `mutation` over the current row with no other writer for this user
    /// in between, persisting the result and its events together.
    async fn modify_subscription(
        &self,
        user_id: &str,
        mutation: Mutation,
    ) -> Result<Subscription, BillingError>;

    /// Claim `claim.session_id` in the ledger and run `mutation` in the same
    /// exclusive section. A session already present is never re-run.
    ///
    /// Returns `BillingError::Conflict` if another writer inserted the same
    /// session concurrently; nothing is persisted in that case.
    async fn apply_payment(
        &self,
        claim: PaymentClaim,
        mutation: Mutation,
    ) -> Result<PaymentApplication, BillingError>;

    async fn get_payment(&self, session_id: &str)
        -> Result<Option<ProcessedPayment>, BillingError>;

    /// Increment the counter for `key` only if it is below `limit`, as one
    /// atomic step.
    async fn consume_usage(
        &self,
        key: &UsageKey,
        limit: u32,
    ) -> Result<UsageConsumption, BillingError>;

    /// The counter for `key`, or `None` if nothing was consumed in that period.
    async fn get_usage(&self, key: &UsageKey) -> Result<Option<UsageRecord>, BillingError>;

    /// Transition history in the order it was written.
    async fn list_events(&self, user_id: &str) -> Result<Vec<SubscriptionEvent>, BillingError>;

    async fn health_check(&self) -> Result<(), BillingError>;
}
