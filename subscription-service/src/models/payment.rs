//! Processed payment ledger model.

use crate::error::BillingError;
use crate::models::{BillingCycle, PlanId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// What happened after a session was claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentOutcome {
    Applied,
    ReconciliationRequired,
}

impl PaymentOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentOutcome::Applied => "applied",
            PaymentOutcome::ReconciliationRequired => "reconciliation_required",
        }
    }
}

impl FromStr for PaymentOutcome {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "applied" => Ok(PaymentOutcome::Applied),
            "reconciliation_required" => Ok(PaymentOutcome::ReconciliationRequired),
            other => Err(BillingError::Internal(format!(
                "unknown payment outcome '{}'",
                other
            ))),
        }
    }
}

/// Idempotency ledger row, unique on `session_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedPayment {
    pub session_id: String,
    pub user_id: String,
    pub plan_id: PlanId,
    pub billing_cycle: BillingCycle,
    pub applied_at: DateTime<Utc>,
    pub outcome: PaymentOutcome,
    /// Why the transition failed, for `ReconciliationRequired` rows.
    pub detail: Option<String>,
}

/// Input for claiming a payment session.
#[derive(Debug, Clone)]
pub struct PaymentClaim {
    pub session_id: String,
    pub user_id: String,
    pub plan_id: PlanId,
    pub billing_cycle: BillingCycle,
    pub claimed_at: DateTime<Utc>,
}

impl PaymentClaim {
    pub fn into_record(self, outcome: PaymentOutcome, detail: Option<String>) -> ProcessedPayment {
        ProcessedPayment {
            session_id: self.session_id,
            user_id: self.user_id,
            plan_id: self.plan_id,
            billing_cycle: self.billing_cycle,
            applied_at: self.claimed_at,
            outcome,
            detail,
        }
    }
}
