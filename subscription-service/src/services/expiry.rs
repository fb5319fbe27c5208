//! Lazy expiry on read.

use crate::error::BillingError;
use crate::models::Subscription;
use crate::services::lifecycle;
use crate::services::store::SubscriptionStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, instrument};

/// Gatekeeper for every read of "the current plan". Demotes a lapsed paid
/// row before anything else looks at it.
#[derive(Clone)]
pub struct ExpiryResolver {
    store: Arc<dyn SubscriptionStore>,
}

impl ExpiryResolver {
    pub fn new(store: Arc<dyn SubscriptionStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self))]
    pub async fn resolve(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Subscription, BillingError> {
        let current = self
            .store
            .get_subscription(user_id)
            .await?
            .ok_or_else(|| BillingError::SubscriptionNotFound(user_id.to_string()))?;

        if !lifecycle::is_expiry_due(&current, now) {
            return Ok(current);
        }

        // Re-evaluated under the user's lock; a concurrent payment may have
        // already moved the row on.
        let resolved = self
            .store
            .modify_subscription(
                user_id,
                Box::new(move |latest| Ok(lifecycle::expire_if_due(latest, now))),
            )
            .await?;

        info!(
            user_id = %user_id,
            plan_id = %resolved.plan_id,
            "Resolved lapsed subscription"
        );
        Ok(resolved)
    }
}

/// What [`ExpiryResolver::resolve`] would return, without writing anything.
pub fn resolved_view(current: &Subscription, now: DateTime<Utc>) -> Subscription {
    lifecycle::expire_if_due(current.clone(), now).subscription
}
