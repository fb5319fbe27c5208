//! Read-only plan catalog.

use crate::error::BillingError;
use crate::models::{FeatureLimit, Plan, PlanId, Quota, ResetPeriod};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashSet};

pub const STANDARD_CATALOG_VERSION: &str = "2025-06";

/// Versioned, validated set of plan tiers ordered by ascending rank.
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    version: String,
    currency: String,
    plans: Vec<Plan>,
}

impl PlanCatalog {
    /// Build a catalog, rejecting anything that would break rank ordering or
    /// price sanity.
    pub fn new(
        version: impl Into<String>,
        currency: impl Into<String>,
        mut plans: Vec<Plan>,
    ) -> Result<Self, BillingError> {
        let mut seen = HashSet::new();
        for plan in &plans {
            if !seen.insert(plan.id) {
                return Err(BillingError::InvalidCatalog(format!(
                    "plan '{}' is defined more than once",
                    plan.id
                )));
            }
            if plan.monthly_price < Decimal::ZERO || plan.annual_price < Decimal::ZERO {
                return Err(BillingError::InvalidCatalog(format!(
                    "plan '{}' has a negative price",
                    plan.id
                )));
            }
            if plan.id.is_free()
                && (plan.monthly_price != Decimal::ZERO || plan.annual_price != Decimal::ZERO)
            {
                return Err(BillingError::InvalidCatalog(
                    "free plan must not carry a price".to_string(),
                ));
            }
        }
        if let Some(missing) = PlanId::ALL.iter().find(|id| !seen.contains(id)) {
            return Err(BillingError::InvalidCatalog(format!(
                "plan '{}' is missing",
                missing
            )));
        }

        plans.sort_by_key(|p| p.rank);
        // Ranks must be strictly increasing and agree with free < mid < top.
        for pair in plans.windows(2) {
            if pair[0].rank == pair[1].rank || pair[0].id > pair[1].id {
                return Err(BillingError::InvalidCatalog(format!(
                    "ranks of '{}' and '{}' do not order free < mid < top",
                    pair[0].id, pair[1].id
                )));
            }
        }

        Ok(Self {
            version: version.into(),
            currency: currency.into(),
            plans,
        })
    }

    /// The catalog the product ships with.
    pub fn standard() -> Self {
        let plans = vec![
            plan(
                PlanId::Free,
                "Free",
                Decimal::ZERO,
                Decimal::ZERO,
                0,
                [
                    Quota::Limited(3),
                    Quota::Limited(10),
                    Quota::Disabled,
                    Quota::Disabled,
                    Quota::Limited(5),
                ],
            ),
            plan(
                PlanId::Mid,
                "Professional",
                Decimal::from(699),
                Decimal::from(499),
                1,
                [
                    Quota::Limited(50),
                    Quota::Limited(200),
                    Quota::Limited(20),
                    Quota::Limited(10),
                    Quota::Limited(100),
                ],
            ),
            plan(
                PlanId::Top,
                "Enterprise",
                Decimal::from(2999),
                Decimal::from(2499),
                2,
                [
                    Quota::Unlimited,
                    Quota::Unlimited,
                    Quota::Unlimited,
                    Quota::Limited(100),
                    Quota::Unlimited,
                ],
            ),
        ];
        Self {
            version: STANDARD_CATALOG_VERSION.to_string(),
            currency: "INR".to_string(),
            plans,
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn get_plan(&self, plan_id: PlanId) -> Result<&Plan, BillingError> {
        self.plans
            .iter()
            .find(|p| p.id == plan_id)
            .ok_or_else(|| BillingError::UnknownPlan(plan_id.to_string()))
    }

    pub fn rank(&self, plan_id: PlanId) -> Result<u8, BillingError> {
        self.get_plan(plan_id).map(|p| p.rank)
    }

    /// Plans in ascending rank.
    pub fn list_plans(&self) -> &[Plan] {
        &self.plans
    }
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

/// Feature names metered by the standard catalog, in the order of the quota
/// arrays passed to [`plan`].
pub const STANDARD_FEATURES: [(&str, ResetPeriod); 5] = [
    ("document_analysis", ResetPeriod::Daily),
    ("clause_explanation", ResetPeriod::Daily),
    ("contract_comparison", ResetPeriod::Monthly),
    ("risk_report_export", ResetPeriod::Monthly),
    ("document_chat", ResetPeriod::Daily),
];

fn plan(
    id: PlanId,
    display_name: &str,
    monthly_price: Decimal,
    annual_price: Decimal,
    rank: u8,
    quotas: [Quota; 5],
) -> Plan {
    let limits: BTreeMap<String, FeatureLimit> = STANDARD_FEATURES
        .iter()
        .zip(quotas)
        .map(|((feature, reset_period), quota)| {
            (feature.to_string(), FeatureLimit::new(quota, *reset_period))
        })
        .collect();

    Plan {
        id,
        display_name: display_name.to_string(),
        monthly_price,
        annual_price,
        rank,
        limits,
    }
}
