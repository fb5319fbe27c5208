//! Proration quotes for mid-cycle plan changes.
//!
//! Credit is the unused part of the current window at the current plan's
//! per-month rate over a fixed 30-day month.

use crate::error::BillingError;
use crate::models::{BillingCycle, Plan, PlanId, Subscription, SubscriptionState};
use crate::services::catalog::PlanCatalog;
use crate::services::expiry::resolved_view;
use crate::services::lifecycle;
use crate::services::metrics;
use crate::services::store::SubscriptionStore;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, instrument};

const PRORATION_DAYS_PER_MONTH: u32 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProrationQuote {
    pub full_amount: Decimal,
    pub unused_credit: Decimal,
    pub prorated_amount: Decimal,
    pub days_remaining: u32,
    pub is_prorated: bool,
}

/// Whole days left in a window, rounding any part-day up.
pub fn days_remaining(end_date: DateTime<Utc>, now: DateTime<Utc>) -> u32 {
    let left = end_date - now;
    if left <= Duration::zero() {
        return 0;
    }
    let whole = left.num_days();
    let days = if left > Duration::days(whole) {
        whole + 1
    } else {
        whole
    };
    u32::try_from(days).unwrap_or(u32::MAX)
}

/// Price a move from `current` onto `target`/`cycle`.
///
/// `current` must already be expiry-resolved and `current_plan` must be its
/// plan.
pub fn compute_quote(
    current: &Subscription,
    current_plan: &Plan,
    target: &Plan,
    cycle: BillingCycle,
    now: DateTime<Utc>,
) -> ProrationQuote {
    let full_amount = target.price_for_cycle(cycle);

    let SubscriptionState::ActivePaid {
        billing_cycle: current_cycle,
        end_date,
        ..
    } = current.state(now)
    else {
        return ProrationQuote {
            full_amount,
            unused_credit: Decimal::ZERO,
            prorated_amount: full_amount,
            days_remaining: 0,
            is_prorated: false,
        };
    };

    let days = days_remaining(end_date, now);
    if current_plan.rank >= target.rank {
        return ProrationQuote {
            full_amount,
            unused_credit: Decimal::ZERO,
            prorated_amount: full_amount,
            days_remaining: days,
            is_prorated: false,
        };
    }

    let raw_credit = current_plan.monthly_rate(current_cycle) * Decimal::from(days)
        / Decimal::from(PRORATION_DAYS_PER_MONTH);
    let unused_credit = raw_credit
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
        .min(full_amount);
    let prorated_amount = (full_amount - unused_credit).max(Decimal::ZERO);

    ProrationQuote {
        full_amount,
        unused_credit,
        prorated_amount,
        days_remaining: days,
        is_prorated: unused_credit > Decimal::ZERO,
    }
}

/// Read-only quoting against the stored subscription.
#[derive(Clone)]
pub struct ProrationCalculator {
    store: Arc<dyn SubscriptionStore>,
    catalog: Arc<PlanCatalog>,
}

impl ProrationCalculator {
    pub fn new(store: Arc<dyn SubscriptionStore>, catalog: Arc<PlanCatalog>) -> Self {
        Self { store, catalog }
    }

    /// Never writes: a lapsed row is priced as free without being demoted.
    #[instrument(skip(self))]
    pub async fn quote(
        &self,
        user_id: &str,
        plan_id: PlanId,
        cycle: BillingCycle,
        now: DateTime<Utc>,
    ) -> Result<ProrationQuote, BillingError> {
        let stored = self
            .store
            .get_subscription(user_id)
            .await?
            .ok_or_else(|| BillingError::SubscriptionNotFound(user_id.to_string()))?;
        let current = resolved_view(&stored, now);

        lifecycle::check_transition(&current, plan_id, cycle, &self.catalog, now)?;

        let current_plan = self.catalog.get_plan(current.plan_id)?;
        let target = self.catalog.get_plan(plan_id)?;
        let quote = compute_quote(&current, current_plan, target, cycle, now);

        metrics::record_quote(quote.is_prorated);
        debug!(
            user_id = %user_id,
            plan_id = %plan_id,
            full_amount = %quote.full_amount,
            unused_credit = %quote.unused_credit,
            "Issued proration quote"
        );
        Ok(quote)
    }
}
