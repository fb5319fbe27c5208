//! In-process store backed by concurrent maps.
//!
//! Per-user exclusivity comes from holding the user's map entry for the
//! whole mutation. Lock order is always user entry, then ledger entry.

use super::{record_transitions, Applied, Mutation, PaymentApplication, SubscriptionStore};
use crate::error::BillingError;
use crate::models::{
    PaymentClaim, PaymentOutcome, ProcessedPayment, Subscription, SubscriptionEvent,
    UsageConsumption, UsageKey, UsageRecord,
};
use crate::services::lifecycle;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, instrument};

struct UserRecords {
    subscription: Subscription,
    events: Vec<SubscriptionEvent>,
}

impl UserRecords {
    fn persist(&mut self, applied: &Applied) -> Result<(), BillingError> {
        if applied.changed() {
            applied.subscription.check_invariants()?;
            self.subscription = applied.subscription.clone();
            self.events.extend(applied.events.iter().cloned());
            record_transitions(&applied.events);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    users: DashMap<String, UserRecords>,
    payments: DashMap<String, ProcessedPayment>,
    usage: DashMap<UsageKey, u64>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubscriptionStore for InMemoryStore {
    #[instrument(skip(self))]
    async fn ensure_subscription(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(Subscription, bool), BillingError> {
        match self.users.entry(user_id.to_string()) {
            Entry::Occupied(existing) => Ok((existing.get().subscription.clone(), false)),
            Entry::Vacant(slot) => {
                let created = lifecycle::new_free_subscription(user_id, now);
                record_transitions(&created.events);
                debug!(user_id = %user_id, "Created free subscription");
                let subscription = created.subscription.clone();
                slot.insert(UserRecords {
                    subscription: created.subscription,
                    events: created.events,
                });
                Ok((subscription, true))
            }
        }
    }

    async fn get_subscription(&self, user_id: &str) -> Result<Option<Subscription>, BillingError> {
        Ok(self.users.get(user_id).map(|r| r.subscription.clone()))
    }

    #[instrument(skip(self, mutation))]
    async fn modify_subscription(
        &self,
        user_id: &str,
        mutation: Mutation,
    ) -> Result<Subscription, BillingError> {
        let mut records = self
            .users
            .get_mut(user_id)
            .ok_or_else(|| BillingError::SubscriptionNotFound(user_id.to_string()))?;

        let applied = mutation(records.subscription.clone())?;
        records.persist(&applied)?;
        Ok(applied.subscription)
    }

    #[instrument(skip(self, claim, mutation), fields(session_id = %claim.session_id))]
    async fn apply_payment(
        &self,
        claim: PaymentClaim,
        mutation: Mutation,
    ) -> Result<PaymentApplication, BillingError> {
        let mut records = self
            .users
            .get_mut(&claim.user_id)
            .ok_or_else(|| BillingError::SubscriptionNotFound(claim.user_id.clone()))?;

        let slot = match self.payments.entry(claim.session_id.clone()) {
            Entry::Occupied(existing) => {
                return Ok(PaymentApplication::Replayed {
                    payment: existing.get().clone(),
                    subscription: records.subscription.clone(),
                });
            }
            Entry::Vacant(slot) => slot,
        };

        match mutation(records.subscription.clone()) {
            Ok(applied) => {
                records.persist(&applied)?;
                slot.insert(claim.into_record(PaymentOutcome::Applied, None));
                Ok(PaymentApplication::Applied(applied.subscription))
            }
            Err(e) if e.is_transient() => Err(e),
            Err(reason) => {
                let payment = claim.into_record(
                    PaymentOutcome::ReconciliationRequired,
                    Some(reason.to_string()),
                );
                slot.insert(payment.clone());
                Ok(PaymentApplication::Unapplied { payment, reason })
            }
        }
    }

    async fn get_payment(
        &self,
        session_id: &str,
    ) -> Result<Option<ProcessedPayment>, BillingError> {
        Ok(self.payments.get(session_id).map(|p| p.clone()))
    }

    async fn consume_usage(
        &self,
        key: &UsageKey,
        limit: u32,
    ) -> Result<UsageConsumption, BillingError> {
        if limit == 0 {
            let count = self.usage.get(key).map(|c| *c).unwrap_or(0);
            return Ok(UsageConsumption::Exhausted { count });
        }
        let mut count = self.usage.entry(key.clone()).or_insert(0);
        if *count < u64::from(limit) {
            *count += 1;
            Ok(UsageConsumption::Admitted { count: *count })
        } else {
            Ok(UsageConsumption::Exhausted { count: *count })
        }
    }

    async fn get_usage(&self, key: &UsageKey) -> Result<Option<UsageRecord>, BillingError> {
        Ok(self.usage.get(key).map(|c| UsageRecord::new(key, *c)))
    }

    async fn list_events(&self, user_id: &str) -> Result<Vec<SubscriptionEvent>, BillingError> {
        Ok(self
            .users
            .get(user_id)
            .map(|r| r.events.clone())
            .unwrap_or_default())
    }

    async fn health_check(&self) -> Result<(), BillingError> {
        Ok(())
    }
}
