//! Exactly-once application of confirmed external payments.

use crate::error::BillingError;
use crate::models::{
    BillingCycle, PaymentClaim, PaymentOutcome, PlanId, ProcessedPayment, Subscription,
};
use crate::services::catalog::PlanCatalog;
use crate::services::expiry::ExpiryResolver;
use crate::services::lifecycle;
use crate::services::metrics;
use crate::services::store::{Mutation, PaymentApplication, SubscriptionStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Result of a confirmation. `replayed` is set when the session had already
/// been processed and nothing was changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmOutcome {
    pub subscription: Subscription,
    pub replayed: bool,
}

#[derive(Clone)]
pub struct PaymentGate {
    store: Arc<dyn SubscriptionStore>,
    catalog: Arc<PlanCatalog>,
    resolver: ExpiryResolver,
}

impl PaymentGate {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        catalog: Arc<PlanCatalog>,
        resolver: ExpiryResolver,
    ) -> Self {
        Self {
            store,
            catalog,
            resolver,
        }
    }

    /// Apply the payment identified by `session_id` at most once.
    ///
    /// A lost race is retried once with a fresh read. A payment that was
    /// claimed but could not move the subscription surfaces as
    /// `ReconciliationRequired`, on this call and on every replay.
    #[instrument(skip(self))]
    pub async fn confirm(
        &self,
        user_id: &str,
        session_id: &str,
        plan_id: PlanId,
        cycle: BillingCycle,
        now: DateTime<Utc>,
    ) -> Result<ConfirmOutcome, BillingError> {
        lifecycle::validate_session_id(session_id)?;
        if plan_id.is_free() {
            return Err(BillingError::NotPurchasable(plan_id));
        }

        let result = match self.attempt(user_id, session_id, plan_id, cycle, now).await {
            Err(BillingError::Conflict(detail)) => {
                warn!(
                    user_id = %user_id,
                    detail = %detail,
                    "Payment claim conflicted, retrying once"
                );
                match self.attempt(user_id, session_id, plan_id, cycle, now).await {
                    Err(BillingError::Conflict(detail)) => {
                        error!(
                            user_id = %user_id,
                            session_id = %session_id,
                            plan_id = %plan_id,
                            detail = %detail,
                            "Payment claim still conflicting after retry; manual reconciliation required"
                        );
                        Err(BillingError::ReconciliationRequired {
                            session_id: session_id.to_string(),
                            user_id: user_id.to_string(),
                            reason: format!("claim conflicted twice: {}", detail),
                        })
                    }
                    other => other,
                }
            }
            other => other,
        };

        metrics::record_payment_confirmation(match &result {
            Ok(outcome) if outcome.replayed => "replayed",
            Ok(_) => "applied",
            Err(BillingError::ReconciliationRequired { .. }) => "reconciliation_required",
            Err(_) => "rejected",
        });
        result
    }

    async fn attempt(
        &self,
        user_id: &str,
        session_id: &str,
        plan_id: PlanId,
        cycle: BillingCycle,
        now: DateTime<Utc>,
    ) -> Result<ConfirmOutcome, BillingError> {
        // Fast path for replays; avoids taking the user's lock.
        if let Some(payment) = self.store.get_payment(session_id).await? {
            return self.replay(user_id, payment, now).await;
        }

        let claim = PaymentClaim {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            plan_id,
            billing_cycle: cycle,
            claimed_at: now,
        };
        let catalog = Arc::clone(&self.catalog);
        let session = session_id.to_string();
        let mutation: Mutation = Box::new(move |current| {
            lifecycle::expire_if_due(current, now).and_then(|resolved| {
                lifecycle::subscribe(resolved, plan_id, cycle, &catalog, &session, now)
            })
        });

        match self.store.apply_payment(claim, mutation).await? {
            PaymentApplication::Applied(subscription) => {
                info!(
                    user_id = %user_id,
                    plan_id = %subscription.plan_id,
                    billing_cycle = %subscription.billing_cycle,
                    "Payment applied"
                );
                Ok(ConfirmOutcome {
                    subscription,
                    replayed: false,
                })
            }
            PaymentApplication::Replayed { payment, .. } => {
                self.replay(user_id, payment, now).await
            }
            PaymentApplication::Unapplied { payment, reason } => {
                error!(
                    user_id = %payment.user_id,
                    session_id = %payment.session_id,
                    plan_id = %payment.plan_id,
                    billing_cycle = %payment.billing_cycle,
                    reason = %reason,
                    code = reason.code(),
                    "Payment claimed but not applied; manual reconciliation required"
                );
                Err(BillingError::ReconciliationRequired {
                    session_id: payment.session_id,
                    user_id: payment.user_id,
                    reason: reason.to_string(),
                })
            }
        }
    }

    async fn replay(
        &self,
        user_id: &str,
        payment: ProcessedPayment,
        now: DateTime<Utc>,
    ) -> Result<ConfirmOutcome, BillingError> {
        if payment.user_id != user_id {
            error!(
                session_id = %payment.session_id,
                owner = %payment.user_id,
                requested_by = %user_id,
                "Payment session replayed for a different user"
            );
            return Err(BillingError::ReconciliationRequired {
                session_id: payment.session_id,
                user_id: user_id.to_string(),
                reason: format!("session belongs to user '{}'", payment.user_id),
            });
        }

        match payment.outcome {
            PaymentOutcome::Applied => {
                let subscription = self.resolver.resolve(user_id, now).await?;
                info!(
                    user_id = %user_id,
                    session_id = %payment.session_id,
                    "Payment already processed"
                );
                Ok(ConfirmOutcome {
                    subscription,
                    replayed: true,
                })
            }
            PaymentOutcome::ReconciliationRequired => Err(BillingError::ReconciliationRequired {
                session_id: payment.session_id,
                user_id: payment.user_id,
                reason: payment
                    .detail
                    .unwrap_or_else(|| "payment was not applied".to_string()),
            }),
        }
    }
}
