//! Subscription engine error types.
//!
//! Every rejected operation surfaces one of these variants; none of them is
//! produced after a partial write except `ReconciliationRequired`, which is
//! raised when a payment has been claimed but could not be applied.

use crate::models::{BillingCycle, PlanId, ResetPeriod};
use service_core::error::AppError;
use thiserror::Error;

/// Coarse classification of an error, used for HTTP mapping, metrics and
/// retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or unknown input. No state was read or changed.
    Validation,
    /// The request is well-formed but not allowed in the current state.
    Policy,
    /// Lost a race against another writer for the same user.
    Concurrency,
    /// Needs an operator. Must be logged.
    Fatal,
    /// The store could not be reached; the caller may retry.
    Transient,
}

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Unknown plan: {0}")]
    UnknownPlan(String),

    #[error("Invalid billing cycle: {0}")]
    InvalidBillingCycle(String),

    #[error("Unknown feature '{feature}' for plan '{plan_id}'")]
    UnknownFeature { feature: String, plan_id: PlanId },

    #[error("Invalid user id '{id}': {reason}")]
    InvalidUserId { id: String, reason: String },

    #[error("Invalid payment session id '{id}': {reason}")]
    InvalidSessionId { id: String, reason: String },

    #[error("Plan '{0}' cannot be purchased")]
    NotPurchasable(PlanId),

    #[error("Already on plan '{plan_id}' with {billing_cycle} billing")]
    AlreadyOnPlan {
        plan_id: PlanId,
        billing_cycle: BillingCycle,
    },

    #[error(
        "Cannot switch from '{current}' to lower plan '{requested}' while subscribed; cancel the current plan first"
    )]
    PlanDowngradeBlocked { current: PlanId, requested: PlanId },

    #[error("No subscription found for user '{0}'")]
    SubscriptionNotFound(String),

    #[error("Quota exceeded for feature '{feature}': {limit} per {period}")]
    QuotaExceeded {
        feature: String,
        limit: u32,
        period: ResetPeriod,
    },

    #[error("Feature '{feature}' is not available on plan '{plan_id}'")]
    FeatureUnavailable { feature: String, plan_id: PlanId },

    #[error("Concurrent modification detected for user '{0}'")]
    Conflict(String),

    #[error(
        "Payment session '{session_id}' for user '{user_id}' requires manual reconciliation: {reason}"
    )]
    ReconciliationRequired {
        session_id: String,
        user_id: String,
        reason: String,
    },

    #[error("Invalid plan catalog: {0}")]
    InvalidCatalog(String),

    #[error("Storage unavailable: {0}")]
    Storage(#[source] anyhow::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BillingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownPlan(_)
            | Self::InvalidBillingCycle(_)
            | Self::UnknownFeature { .. }
            | Self::InvalidUserId { .. }
            | Self::InvalidSessionId { .. }
            | Self::NotPurchasable(_)
            | Self::SubscriptionNotFound(_) => ErrorKind::Validation,
            Self::AlreadyOnPlan { .. }
            | Self::PlanDowngradeBlocked { .. }
            | Self::QuotaExceeded { .. }
            | Self::FeatureUnavailable { .. } => ErrorKind::Policy,
            Self::Conflict(_) => ErrorKind::Concurrency,
            Self::ReconciliationRequired { .. } | Self::InvalidCatalog(_) | Self::Internal(_) => {
                ErrorKind::Fatal
            }
            Self::Storage(_) => ErrorKind::Transient,
        }
    }

    /// Stable identifier for logs and metric labels.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownPlan(_) => "unknown_plan",
            Self::InvalidBillingCycle(_) => "invalid_billing_cycle",
            Self::UnknownFeature { .. } => "unknown_feature",
            Self::InvalidUserId { .. } => "invalid_user_id",
            Self::InvalidSessionId { .. } => "invalid_session_id",
            Self::NotPurchasable(_) => "not_purchasable",
            Self::AlreadyOnPlan { .. } => "already_on_plan",
            Self::PlanDowngradeBlocked { .. } => "plan_downgrade_blocked",
            Self::SubscriptionNotFound(_) => "subscription_not_found",
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::FeatureUnavailable { .. } => "feature_unavailable",
            Self::Conflict(_) => "conflict",
            Self::ReconciliationRequired { .. } => "reconciliation_required",
            Self::InvalidCatalog(_) => "invalid_catalog",
            Self::Storage(_) => "storage_unavailable",
            Self::Internal(_) => "internal",
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Storage(anyhow::Error::new(err))
    }
}

impl From<BillingError> for AppError {
    fn from(err: BillingError) -> Self {
        match err {
            e @ BillingError::SubscriptionNotFound(_) => AppError::NotFound(anyhow::Error::new(e)),
            e @ BillingError::QuotaExceeded { .. } => {
                AppError::TooManyRequests(e.to_string(), None)
            }
            e @ BillingError::Storage(_) => AppError::ServiceUnavailable(e.to_string()),
            e => match e.kind() {
                ErrorKind::Validation => AppError::BadRequest(anyhow::Error::new(e)),
                ErrorKind::Policy | ErrorKind::Concurrency => {
                    AppError::Conflict(anyhow::Error::new(e))
                }
                ErrorKind::Fatal | ErrorKind::Transient => {
                    AppError::InternalError(anyhow::Error::new(e))
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn policy_errors_render_as_conflict() {
        let err = BillingError::PlanDowngradeBlocked {
            current: PlanId::Top,
            requested: PlanId::Mid,
        };
        assert_eq!(err.kind(), ErrorKind::Policy);
        assert_eq!(AppError::from(err).status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn validation_errors_render_as_bad_request() {
        let err = BillingError::UnknownPlan("platinum".to_string());
        assert_eq!(err.code(), "unknown_plan");
        assert_eq!(AppError::from(err).status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn storage_errors_are_transient_and_unavailable() {
        let err = BillingError::Storage(anyhow::anyhow!("connection refused"));
        assert!(err.is_transient());
        assert_eq!(
            AppError::from(err).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn reconciliation_is_fatal() {
        let err = BillingError::ReconciliationRequired {
            session_id: "cs_1".to_string(),
            user_id: "u1".to_string(),
            reason: "already on plan".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::Fatal);
        assert_eq!(
            AppError::from(err).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn unavailable_feature_renders_as_conflict() {
        let err = BillingError::FeatureUnavailable {
            feature: "contract_comparison".to_string(),
            plan_id: PlanId::Free,
        };
        assert_eq!(err.kind(), ErrorKind::Policy);
        assert_eq!(AppError::from(err).status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn quota_errors_render_as_too_many_requests() {
        let err = BillingError::QuotaExceeded {
            feature: "document_analysis".to_string(),
            limit: 3,
            period: ResetPeriod::Daily,
        };
        assert_eq!(
            AppError::from(err).status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }
}
