//! Subscription state machine.
//!
//! Pure transitions over a [`Subscription`] row. Each returns the next row
//! together with the events to append; the store decides how to make that
//! atomic.

use crate::error::BillingError;
use crate::models::{
    BillingCycle, PlanId, Subscription, SubscriptionEvent, SubscriptionState, SubscriptionStatus,
    TransitionKind,
};
use crate::services::catalog::PlanCatalog;
use crate::services::store::Applied;
use chrono::{DateTime, Months, Utc};

const MAX_USER_ID_LEN: usize = 128;
const MAX_SESSION_ID_LEN: usize = 255;

pub fn validate_user_id(user_id: &str) -> Result<(), BillingError> {
    let reason = if user_id.is_empty() {
        "must not be empty"
    } else if user_id.len() > MAX_USER_ID_LEN {
        "is too long"
    } else if user_id.chars().any(|c| c.is_whitespace() || c.is_control()) {
        "must not contain whitespace"
    } else {
        return Ok(());
    };
    Err(BillingError::InvalidUserId {
        id: user_id.to_string(),
        reason: reason.to_string(),
    })
}

pub fn validate_session_id(session_id: &str) -> Result<(), BillingError> {
    let reason = if session_id.is_empty() {
        "must not be empty"
    } else if session_id.len() > MAX_SESSION_ID_LEN {
        "is too long"
    } else if session_id.chars().any(|c| c.is_whitespace() || c.is_control()) {
        "must not contain whitespace"
    } else {
        return Ok(());
    };
    Err(BillingError::InvalidSessionId {
        id: session_id.to_string(),
        reason: reason.to_string(),
    })
}

/// The row every user starts with at signup.
pub fn new_free_subscription(user_id: &str, now: DateTime<Utc>) -> Applied {
    let subscription = Subscription {
        user_id: user_id.to_string(),
        plan_id: PlanId::Free,
        billing_cycle: BillingCycle::Monthly,
        status: SubscriptionStatus::Active,
        start_date: now,
        end_date: None,
        last_payment_session_id: None,
    };
    let created =
        SubscriptionEvent::for_transition(TransitionKind::Created, None, &subscription, now);
    Applied {
        subscription,
        events: vec![created],
    }
}

/// Demote a lapsed paid row to free. Anything else is returned unchanged.
///
/// The free period is taken to begin when the paid window ended.
pub fn expire_if_due(current: Subscription, now: DateTime<Utc>) -> Applied {
    if current.state(now) != SubscriptionState::Expired {
        return Applied::unchanged(current);
    }

    let start_date = current
        .end_date
        .map_or(now, |end| end.max(current.start_date));
    let next = Subscription {
        plan_id: PlanId::Free,
        status: SubscriptionStatus::Expired,
        start_date,
        end_date: None,
        ..current.clone()
    };
    let event =
        SubscriptionEvent::for_transition(TransitionKind::Expired, Some(&current), &next, now);
    Applied {
        subscription: next,
        events: vec![event],
    }
}

/// Whether a read at `now` would demote this row.
pub fn is_expiry_due(current: &Subscription, now: DateTime<Utc>) -> bool {
    current.state(now) == SubscriptionState::Expired
}

/// Decide which transition moving to `plan_id`/`cycle` would be, or why it
/// is not allowed. `current` must already be expiry-resolved.
pub fn check_transition(
    current: &Subscription,
    plan_id: PlanId,
    cycle: BillingCycle,
    catalog: &PlanCatalog,
    now: DateTime<Utc>,
) -> Result<TransitionKind, BillingError> {
    let state = current.state(now);

    if plan_id.is_free() {
        return match state {
            SubscriptionState::ActivePaid { plan_id: held, .. } => {
                Err(BillingError::PlanDowngradeBlocked {
                    current: held,
                    requested: plan_id,
                })
            }
            _ => Err(BillingError::AlreadyOnPlan {
                plan_id: PlanId::Free,
                billing_cycle: current.billing_cycle,
            }),
        };
    }

    let SubscriptionState::ActivePaid {
        plan_id: current_plan,
        billing_cycle: current_cycle,
        ..
    } = state
    else {
        return Ok(TransitionKind::Subscribed);
    };

    let current_rank = catalog.rank(current_plan)?;
    let target_rank = catalog.rank(plan_id)?;

    if target_rank > current_rank {
        Ok(TransitionKind::Upgraded)
    } else if target_rank < current_rank {
        Err(BillingError::PlanDowngradeBlocked {
            current: current_plan,
            requested: plan_id,
        })
    } else if cycle != current_cycle {
        Ok(TransitionKind::CycleChanged)
    } else {
        Err(BillingError::AlreadyOnPlan {
            plan_id,
            billing_cycle: cycle,
        })
    }
}

/// Move onto a paid plan for one full `cycle` starting now.
pub fn subscribe(
    current: Subscription,
    plan_id: PlanId,
    cycle: BillingCycle,
    catalog: &PlanCatalog,
    payment_session_id: &str,
    now: DateTime<Utc>,
) -> Result<Applied, BillingError> {
    let kind = check_transition(&current, plan_id, cycle, catalog, now)?;

    let start_date = now.max(current.start_date);
    let end_date = start_date
        .checked_add_months(Months::new(cycle.months()))
        .ok_or_else(|| {
            BillingError::Internal(format!(
                "{} window starting {} is out of range",
                cycle, start_date
            ))
        })?;

    let next = Subscription {
        user_id: current.user_id.clone(),
        plan_id,
        billing_cycle: cycle,
        status: SubscriptionStatus::Active,
        start_date,
        end_date: Some(end_date),
        last_payment_session_id: Some(payment_session_id.to_string()),
    };
    let event = SubscriptionEvent::for_transition(kind, Some(&current), &next, now);
    Ok(Applied {
        subscription: next,
        events: vec![event],
    })
}

/// Drop straight back to free. A row already on free is left as is.
pub fn cancel(current: Subscription, now: DateTime<Utc>) -> Applied {
    if current.plan_id.is_free() {
        return Applied::unchanged(current);
    }

    let next = Subscription {
        plan_id: PlanId::Free,
        status: SubscriptionStatus::Cancelled,
        start_date: now.max(current.start_date),
        end_date: None,
        ..current.clone()
    };
    let event =
        SubscriptionEvent::for_transition(TransitionKind::Cancelled, Some(&current), &next, now);
    Applied {
        subscription: next,
        events: vec![event],
    }
}
