//! Request and response bodies for the HTTP API.

use crate::error::BillingError;
use crate::models::{BillingCycle, Plan, PlanId, Subscription, SubscriptionEvent};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Plan and cycle as sent by clients. Parsed after validation so unknown
/// values surface as `UnknownPlan` / `InvalidBillingCycle`.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRequest {
    #[validate(length(min = 1, max = 32))]
    pub plan_id: String,
    #[validate(length(min = 1, max = 32))]
    pub billing_cycle: String,
}

impl QuoteRequest {
    pub fn target(&self) -> Result<(PlanId, BillingCycle), BillingError> {
        parse_target(&self.plan_id, &self.billing_cycle)
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmPaymentRequest {
    #[validate(length(min = 1, max = 255))]
    pub session_id: String,
    #[validate(length(min = 1, max = 32))]
    pub plan_id: String,
    #[validate(length(min = 1, max = 32))]
    pub billing_cycle: String,
}

impl ConfirmPaymentRequest {
    pub fn target(&self) -> Result<(PlanId, BillingCycle), BillingError> {
        parse_target(&self.plan_id, &self.billing_cycle)
    }
}

fn parse_target(
    plan_id: &str,
    billing_cycle: &str,
) -> Result<(PlanId, BillingCycle), BillingError> {
    Ok((plan_id.parse()?, billing_cycle.parse()?))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlansResponse {
    pub version: String,
    pub currency: String,
    pub plans: Vec<Plan>,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionEnvelope {
    pub subscription: Subscription,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub user_id: String,
    pub events: Vec<SubscriptionEvent>,
}
