//! Entry point tying the engine components together.

use crate::error::BillingError;
use crate::models::{BillingCycle, PlanId, Subscription, SubscriptionEvent};
use crate::services::catalog::PlanCatalog;
use crate::services::expiry::ExpiryResolver;
use crate::services::lifecycle;
use crate::services::metrics;
use crate::services::payments::{ConfirmOutcome, PaymentGate};
use crate::services::proration::{ProrationCalculator, ProrationQuote};
use crate::services::store::SubscriptionStore;
use crate::services::usage::{UsageDecision, UsageMeter, UsageSnapshot};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, instrument};

/// Every operation takes `now` explicitly so callers control the clock.
#[derive(Clone)]
pub struct SubscriptionEngine {
    store: Arc<dyn SubscriptionStore>,
    catalog: Arc<PlanCatalog>,
    resolver: ExpiryResolver,
    proration: ProrationCalculator,
    usage: UsageMeter,
    payments: PaymentGate,
}

fn observe<T>(result: Result<T, BillingError>) -> Result<T, BillingError> {
    if let Err(e) = &result {
        metrics::record_error(e.code());
    }
    result
}

impl SubscriptionEngine {
    pub fn new(store: Arc<dyn SubscriptionStore>, catalog: PlanCatalog) -> Self {
        let catalog = Arc::new(catalog);
        let resolver = ExpiryResolver::new(Arc::clone(&store));
        Self {
            proration: ProrationCalculator::new(Arc::clone(&store), Arc::clone(&catalog)),
            usage: UsageMeter::new(Arc::clone(&store), Arc::clone(&catalog), resolver.clone()),
            payments: PaymentGate::new(Arc::clone(&store), Arc::clone(&catalog), resolver.clone()),
            resolver,
            catalog,
            store,
        }
    }

    pub fn catalog(&self) -> &PlanCatalog {
        &self.catalog
    }

    /// Signup: create the free row if the user has none. The flag reports
    /// whether this call created it.
    #[instrument(skip(self))]
    pub async fn ensure_subscription(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(Subscription, bool), BillingError> {
        lifecycle::validate_user_id(user_id)?;
        observe(self.store.ensure_subscription(user_id, now).await)
    }

    #[instrument(skip(self))]
    pub async fn get_subscription(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Subscription, BillingError> {
        lifecycle::validate_user_id(user_id)?;
        observe(self.resolver.resolve(user_id, now).await)
    }

    #[instrument(skip(self))]
    pub async fn history(&self, user_id: &str) -> Result<Vec<SubscriptionEvent>, BillingError> {
        lifecycle::validate_user_id(user_id)?;
        let events = observe(self.store.list_events(user_id).await)?;
        if events.is_empty() && self.store.get_subscription(user_id).await?.is_none() {
            return observe(Err(BillingError::SubscriptionNotFound(user_id.to_string())));
        }
        Ok(events)
    }

    #[instrument(skip(self))]
    pub async fn quote(
        &self,
        user_id: &str,
        plan_id: PlanId,
        cycle: BillingCycle,
        now: DateTime<Utc>,
    ) -> Result<ProrationQuote, BillingError> {
        lifecycle::validate_user_id(user_id)?;
        observe(self.proration.quote(user_id, plan_id, cycle, now).await)
    }

    #[instrument(skip(self))]
    pub async fn confirm_payment(
        &self,
        user_id: &str,
        session_id: &str,
        plan_id: PlanId,
        cycle: BillingCycle,
        now: DateTime<Utc>,
    ) -> Result<ConfirmOutcome, BillingError> {
        lifecycle::validate_user_id(user_id)?;
        observe(
            self.payments
                .confirm(user_id, session_id, plan_id, cycle, now)
                .await,
        )
    }

    /// Always leaves the user on free.
    #[instrument(skip(self))]
    pub async fn cancel(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Subscription, BillingError> {
        lifecycle::validate_user_id(user_id)?;
        let result = self
            .store
            .modify_subscription(
                user_id,
                Box::new(move |current| {
                    // An already-lapsed row is recorded as expired, not cancelled.
                    lifecycle::expire_if_due(current, now)
                        .and_then(|resolved| Ok(lifecycle::cancel(resolved, now)))
                }),
            )
            .await;
        let subscription = observe(result)?;
        info!(user_id = %user_id, status = %subscription.status, "Subscription cancelled");
        Ok(subscription)
    }

    #[instrument(skip(self))]
    pub async fn check_usage(
        &self,
        user_id: &str,
        feature: &str,
        now: DateTime<Utc>,
    ) -> Result<UsageDecision, BillingError> {
        lifecycle::validate_user_id(user_id)?;
        observe(self.usage.check_and_consume(user_id, feature, now).await)
    }

    #[instrument(skip(self))]
    pub async fn usage_snapshot(
        &self,
        user_id: &str,
        feature: &str,
        now: DateTime<Utc>,
    ) -> Result<UsageSnapshot, BillingError> {
        lifecycle::validate_user_id(user_id)?;
        observe(self.usage.snapshot(user_id, feature, now).await)
    }

    pub async fn health_check(&self) -> Result<(), BillingError> {
        self.store.health_check().await
    }
}
