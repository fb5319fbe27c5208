//! Plan tier model.

use crate::error::BillingError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Closed set of plan tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanId {
    Free,
    Mid,
    Top,
}

impl PlanId {
    pub const ALL: [PlanId; 3] = [PlanId::Free, PlanId::Mid, PlanId::Top];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanId::Free => "free",
            PlanId::Mid => "mid",
            PlanId::Top => "top",
        }
    }

    pub fn is_free(&self) -> bool {
        matches!(self, PlanId::Free)
    }
}

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanId {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(PlanId::Free),
            "mid" => Ok(PlanId::Mid),
            "top" => Ok(PlanId::Top),
            other => Err(BillingError::UnknownPlan(other.to_string())),
        }
    }
}

/// Payment cadence, independent of the tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingCycle {
    Monthly,
    Annual,
}

impl BillingCycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingCycle::Monthly => "monthly",
            BillingCycle::Annual => "annual",
        }
    }

    /// Calendar months covered by one paid period.
    pub fn months(&self) -> u32 {
        match self {
            BillingCycle::Monthly => 1,
            BillingCycle::Annual => 12,
        }
    }
}

impl fmt::Display for BillingCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BillingCycle {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "monthly" => Ok(BillingCycle::Monthly),
            "annual" => Ok(BillingCycle::Annual),
            other => Err(BillingError::InvalidBillingCycle(other.to_string())),
        }
    }
}

/// Window after which a feature counter restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetPeriod {
    Daily,
    Monthly,
}

impl ResetPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResetPeriod::Daily => "daily",
            ResetPeriod::Monthly => "monthly",
        }
    }
}

impl fmt::Display for ResetPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResetPeriod::Daily => "day",
            ResetPeriod::Monthly => "month",
        })
    }
}

/// Feature quota. Serialized as `-1` (unlimited), `0` (disabled) or the cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum Quota {
    Unlimited,
    Disabled,
    Limited(u32),
}

impl TryFrom<i64> for Quota {
    type Error = BillingError;

    fn try_from(raw: i64) -> Result<Self, Self::Error> {
        match raw {
            -1 => Ok(Quota::Unlimited),
            0 => Ok(Quota::Disabled),
            n if n > 0 => u32::try_from(n)
                .map(Quota::Limited)
                .map_err(|_| BillingError::InvalidCatalog(format!("quota {} is too large", n))),
            n => Err(BillingError::InvalidCatalog(format!(
                "quota {} is not -1, 0 or positive",
                n
            ))),
        }
    }
}

impl From<Quota> for i64 {
    fn from(quota: Quota) -> Self {
        match quota {
            Quota::Unlimited => -1,
            Quota::Disabled => 0,
            Quota::Limited(n) => i64::from(n),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureLimit {
    pub quota: Quota,
    pub reset_period: ResetPeriod,
}

impl FeatureLimit {
    pub fn new(quota: Quota, reset_period: ResetPeriod) -> Self {
        Self {
            quota,
            reset_period,
        }
    }
}

/// Catalog-defined plan tier. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: PlanId,
    pub display_name: String,
    /// Price of one month on the monthly cycle.
    pub monthly_price: Decimal,
    /// Per-month rate when billed annually.
    pub annual_price: Decimal,
    pub rank: u8,
    pub limits: BTreeMap<String, FeatureLimit>,
}

impl Plan {
    /// Per-month rate for the given cycle.
    pub fn monthly_rate(&self, cycle: BillingCycle) -> Decimal {
        match cycle {
            BillingCycle::Monthly => self.monthly_price,
            BillingCycle::Annual => self.annual_price,
        }
    }

    /// Amount charged up front for one full period of `cycle`.
    pub fn price_for_cycle(&self, cycle: BillingCycle) -> Decimal {
        self.monthly_rate(cycle) * Decimal::from(cycle.months())
    }

    pub fn limit(&self, feature: &str) -> Option<&FeatureLimit> {
        self.limits.get(feature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn plan_ids_round_trip_through_strings() {
        for id in PlanId::ALL {
            assert_eq!(id.as_str().parse::<PlanId>().unwrap(), id);
        }
        assert!(matches!(
            "enterprise".parse::<PlanId>(),
            Err(BillingError::UnknownPlan(_))
        ));
    }

    #[test]
    fn malformed_cycle_is_rejected() {
        assert!(matches!(
            "weekly".parse::<BillingCycle>(),
            Err(BillingError::InvalidBillingCycle(_))
        ));
    }

    #[test]
    fn quota_raw_values() {
        assert_eq!(Quota::try_from(-1).unwrap(), Quota::Unlimited);
        assert_eq!(Quota::try_from(0).unwrap(), Quota::Disabled);
        assert_eq!(Quota::try_from(25).unwrap(), Quota::Limited(25));
        assert!(Quota::try_from(-2).is_err());
        assert_eq!(i64::from(Quota::Unlimited), -1);
    }

    #[test]
    fn annual_price_is_monthly_rate_times_twelve() {
        let plan = Plan {
            id: PlanId::Mid,
            display_name: "Mid".to_string(),
            monthly_price: dec!(699),
            annual_price: dec!(499),
            rank: 1,
            limits: BTreeMap::new(),
        };
        assert_eq!(plan.price_for_cycle(BillingCycle::Monthly), dec!(699));
        assert_eq!(plan.price_for_cycle(BillingCycle::Annual), dec!(5988));
        assert_eq!(plan.monthly_rate(BillingCycle::Annual), dec!(499));
    }
}
