//! Plan-aware usage metering.

use crate::error::BillingError;
use crate::models::{
    FeatureLimit, PeriodKey, PlanId, Quota, ResetPeriod, UsageConsumption, UsageKey,
};
use crate::services::catalog::PlanCatalog;
use crate::services::expiry::ExpiryResolver;
use crate::services::metrics;
use crate::services::store::SubscriptionStore;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Uses left in the current period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remaining {
    Unlimited,
    Count(u64),
}

impl Serialize for Remaining {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Remaining::Unlimited => serializer.serialize_str("unlimited"),
            Remaining::Count(n) => serializer.serialize_u64(*n),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageDecision {
    pub allowed: bool,
    pub remaining: Remaining,
    pub feature: String,
    pub plan_id: PlanId,
    #[serde(skip)]
    limit: FeatureLimit,
}

impl UsageDecision {
    /// Turn a denial into the error a caller gating a feature should return.
    pub fn ensure_allowed(self) -> Result<Self, BillingError> {
        if self.allowed {
            return Ok(self);
        }
        match self.limit.quota {
            Quota::Limited(limit) => Err(BillingError::QuotaExceeded {
                feature: self.feature,
                limit,
                period: self.limit.reset_period,
            }),
            Quota::Disabled | Quota::Unlimited => Err(BillingError::FeatureUnavailable {
                feature: self.feature,
                plan_id: self.plan_id,
            }),
        }
    }

    fn label(&self) -> &'static str {
        match (self.allowed, self.limit.quota) {
            (true, Quota::Unlimited) => "unlimited",
            (true, _) => "allowed",
            (false, Quota::Disabled) => "unavailable",
            (false, _) => "quota_exceeded",
        }
    }
}

/// Current counter state for a feature, read without consuming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    pub feature: String,
    pub plan_id: PlanId,
    pub used: u64,
    pub quota: Quota,
    pub remaining: Remaining,
    pub period_key: PeriodKey,
    pub reset_period: ResetPeriod,
}

#[derive(Clone)]
pub struct UsageMeter {
    store: Arc<dyn SubscriptionStore>,
    catalog: Arc<PlanCatalog>,
    resolver: ExpiryResolver,
}

impl UsageMeter {
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

    async fn limit_for(
        &self,
        user_id: &str,
        feature: &str,
        now: DateTime<Utc>,
    ) -> Result<(PlanId, FeatureLimit), BillingError> {
        let subscription = self.resolver.resolve(user_id, now).await?;
        let plan = self.catalog.get_plan(subscription.plan_id)?;
        let limit = plan
            .limit(feature)
            .copied()
            .ok_or_else(|| BillingError::UnknownFeature {
                feature: feature.to_string(),
                plan_id: plan.id,
            })?;
        Ok((plan.id, limit))
    }

    /// Admit one use of `feature` if the user's plan still allows it.
    /// Unlimited features are never counted; denials never write.
    #[instrument(skip(self))]
    pub async fn check_and_consume(
        &self,
        user_id: &str,
        feature: &str,
        now: DateTime<Utc>,
    ) -> Result<UsageDecision, BillingError> {
        let (plan_id, limit) = self.limit_for(user_id, feature, now).await?;

        let (allowed, remaining) = match limit.quota {
            Quota::Unlimited => (true, Remaining::Unlimited),
            Quota::Disabled => (false, Remaining::Count(0)),
            Quota::Limited(cap) => {
                let key = UsageKey {
                    user_id: user_id.to_string(),
                    feature: feature.to_string(),
                    period_key: PeriodKey::for_period(limit.reset_period, now),
                };
                match self.store.consume_usage(&key, cap).await? {
                    UsageConsumption::Admitted { count } => (
                        true,
                        Remaining::Count(u64::from(cap).saturating_sub(count)),
                    ),
                    UsageConsumption::Exhausted { .. } => (false, Remaining::Count(0)),
                }
            }
        };

        let decision = UsageDecision {
            allowed,
            remaining,
            feature: feature.to_string(),
            plan_id,
            limit,
        };
        metrics::record_usage_check(feature, decision.label());
        debug!(
            user_id = %user_id,
            feature = %feature,
            allowed = decision.allowed,
            "Usage checked"
        );
        Ok(decision)
    }

    #[instrument(skip(self))]
    pub async fn snapshot(
        &self,
        user_id: &str,
        feature: &str,
        now: DateTime<Utc>,
    ) -> Result<UsageSnapshot, BillingError> {
        let (plan_id, limit) = self.limit_for(user_id, feature, now).await?;
        let key = UsageKey {
            user_id: user_id.to_string(),
            feature: feature.to_string(),
            period_key: PeriodKey::for_period(limit.reset_period, now),
        };
        let used = self
            .store
            .get_usage(&key)
            .await?
            .map(|record| record.count)
            .unwrap_or(0);
        let remaining = match limit.quota {
            Quota::Unlimited => Remaining::Unlimited,
            Quota::Disabled => Remaining::Count(0),
            Quota::Limited(cap) => Remaining::Count(u64::from(cap).saturating_sub(used)),
        };

        Ok(UsageSnapshot {
            feature: key.feature,
            plan_id,
            used,
            quota: limit.quota,
            remaining,
            period_key: key.period_key,
            reset_period: limit.reset_period,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decision(allowed: bool, quota: Quota) -> UsageDecision {
        UsageDecision {
            allowed,
            remaining: Remaining::Count(0),
            feature: "document_analysis".to_string(),
            plan_id: PlanId::Free,
            limit: FeatureLimit::new(quota, ResetPeriod::Daily),
        }
    }

    #[test]
    fn remaining_serializes_as_number_or_unlimited() {
        assert_eq!(
            serde_json::to_value(Remaining::Unlimited).unwrap(),
            serde_json::json!("unlimited")
        );
        assert_eq!(
            serde_json::to_value(Remaining::Count(7)).unwrap(),
            serde_json::json!(7)
        );
    }

    #[test]
    fn exhausted_quota_becomes_quota_exceeded() {
        let err = decision(false, Quota::Limited(3))
            .ensure_allowed()
            .unwrap_err();
        assert!(matches!(
            err,
            BillingError::QuotaExceeded {
                limit: 3,
                period: ResetPeriod::Daily,
                ..
            }
        ));
    }

    #[test]
    fn disabled_feature_becomes_unavailable() {
        let err = decision(false, Quota::Disabled).ensure_allowed().unwrap_err();
        assert!(matches!(err, BillingError::FeatureUnavailable { .. }));
        assert!(decision(true, Quota::Limited(3)).ensure_allowed().is_ok());
    }

    #[test]
    fn decision_json_omits_limit() {
        let json = serde_json::to_value(decision(true, Quota::Unlimited)).unwrap();
        assert_eq!(json["allowed"], true);
        assert!(json.get("limit").is_none());
        assert_eq!(json["planId"], "free");
    }
}
