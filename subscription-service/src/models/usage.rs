//! Usage metering model.

use crate::models::ResetPeriod;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Time bucket a counter belongs to: `2025-06-01` (daily) or `2025-06`
/// (monthly), always in UTC.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeriodKey(String);

impl PeriodKey {
    pub fn for_period(reset_period: ResetPeriod, now: DateTime<Utc>) -> Self {
        let key = match reset_period {
            ResetPeriod::Daily => now.format("%Y-%m-%d"),
            ResetPeriod::Monthly => now.format("%Y-%m"),
        };
        Self(key.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of one counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UsageKey {
    pub user_id: String,
    pub feature: String,
    pub period_key: PeriodKey,
}

/// At most one record exists per [`UsageKey`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub user_id: String,
    pub feature: String,
    pub period_key: PeriodKey,
    pub count: u64,
}

impl UsageRecord {
    pub fn new(key: &UsageKey, count: u64) -> Self {
        Self {
            user_id: key.user_id.clone(),
            feature: key.feature.clone(),
            period_key: key.period_key.clone(),
            count,
        }
    }
}

/// Result of a conditional increment against a cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageConsumption {
    /// Slot taken; `count` includes this use.
    Admitted { count: u64 },
    /// Cap already reached; nothing was written.
    Exhausted { count: u64 },
}
