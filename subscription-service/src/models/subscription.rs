//! Subscription model.

use crate::error::BillingError;
use crate::models::{BillingCycle, PlanId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Stored subscription status.
///
/// A free row carries `Expired` or `Cancelled` when it was reached through
/// that path; paid rows are always `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Expired,
    Cancelled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Expired => "expired",
            SubscriptionStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SubscriptionStatus::Active),
            "expired" => Ok(SubscriptionStatus::Expired),
            "cancelled" => Ok(SubscriptionStatus::Cancelled),
            other => Err(BillingError::Internal(format!(
                "unknown subscription status '{}'",
                other
            ))),
        }
    }
}

/// The one subscription row a user holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub user_id: String,
    pub plan_id: PlanId,
    pub billing_cycle: BillingCycle,
    pub status: SubscriptionStatus,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub last_payment_session_id: Option<String>,
}

/// State-machine view of a subscription at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Free,
    ActivePaid {
        plan_id: PlanId,
        billing_cycle: BillingCycle,
        end_date: DateTime<Utc>,
    },
    /// Paid window has lapsed but the row has not been demoted yet.
    Expired,
    /// Cancellation observed on a paid row before demotion.
    Cancelled,
}

impl Subscription {
    pub fn state(&self, now: DateTime<Utc>) -> SubscriptionState {
        if self.plan_id.is_free() {
            return SubscriptionState::Free;
        }
        match (self.status, self.end_date) {
            (SubscriptionStatus::Cancelled, _) => SubscriptionState::Cancelled,
            (SubscriptionStatus::Expired, _) | (_, None) => SubscriptionState::Expired,
            (SubscriptionStatus::Active, Some(end)) if end < now => SubscriptionState::Expired,
            (SubscriptionStatus::Active, Some(end)) => SubscriptionState::ActivePaid {
                plan_id: self.plan_id,
                billing_cycle: self.billing_cycle,
                end_date: end,
            },
        }
    }

    /// Check the row-level invariants every persisted subscription must hold.
    pub fn check_invariants(&self) -> Result<(), BillingError> {
        if let Some(end) = self.end_date {
            if end < self.start_date {
                return Err(BillingError::Internal(format!(
                    "subscription for '{}' ends before it starts",
                    self.user_id
                )));
            }
        }
        if !self.plan_id.is_free() && self.end_date.is_none() {
            return Err(BillingError::Internal(format!(
                "paid subscription for '{}' has no end date",
                self.user_id
            )));
        }
        if self.plan_id.is_free() && self.end_date.is_some() {
            return Err(BillingError::Internal(format!(
                "free subscription for '{}' carries an end date",
                self.user_id
            )));
        }
        Ok(())
    }
}

/// Kind of recorded state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    Created,
    Subscribed,
    Upgraded,
    CycleChanged,
    Cancelled,
    Expired,
}

impl TransitionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionKind::Created => "created",
            TransitionKind::Subscribed => "subscribed",
            TransitionKind::Upgraded => "upgraded",
            TransitionKind::CycleChanged => "cycle_changed",
            TransitionKind::Cancelled => "cancelled",
            TransitionKind::Expired => "expired",
        }
    }
}

impl FromStr for TransitionKind {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(TransitionKind::Created),
            "subscribed" => Ok(TransitionKind::Subscribed),
            "upgraded" => Ok(TransitionKind::Upgraded),
            "cycle_changed" => Ok(TransitionKind::CycleChanged),
            "cancelled" => Ok(TransitionKind::Cancelled),
            "expired" => Ok(TransitionKind::Expired),
            other => Err(BillingError::Internal(format!(
                "unknown transition kind '{}'",
                other
            ))),
        }
    }
}

/// Append-only history entry written alongside every state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionEvent {
    pub user_id: String,
    pub kind: TransitionKind,
    pub from_plan: Option<PlanId>,
    pub to_plan: PlanId,
    pub billing_cycle: BillingCycle,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub payment_session_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl SubscriptionEvent {
    pub fn for_transition(
        kind: TransitionKind,
        from: Option<&Subscription>,
        to: &Subscription,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: to.user_id.clone(),
            kind,
            from_plan: from.map(|s| s.plan_id),
            to_plan: to.plan_id,
            billing_cycle: to.billing_cycle,
            start_date: to.start_date,
            end_date: to.end_date,
            payment_session_id: match kind {
                TransitionKind::Subscribed
                | TransitionKind::Upgraded
                | TransitionKind::CycleChanged => to.last_payment_session_id.clone(),
                _ => None,
            },
            occurred_at,
        }
    }
}
