//! Test helper module for subscription-service integration tests.
//!
//! Builds engines over the in-memory store, plus a wrapper store that can be
//! told to lose races or go offline.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use subscription_service::models::{
    BillingCycle, PaymentClaim, PlanId, ProcessedPayment, Subscription, SubscriptionEvent,
    UsageConsumption, UsageKey, UsageRecord,
};
use subscription_service::services::store::{Mutation, PaymentApplication};
use subscription_service::services::{
    init_metrics, InMemoryStore, PlanCatalog, SubscriptionEngine, SubscriptionStore,
};
use subscription_service::BillingError;
use uuid::Uuid;

/// Fixed reference instant so period keys and windows are predictable.
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap()
}

pub fn unique_user() -> String {
    format!("user-{}", Uuid::new_v4())
}

pub fn unique_session() -> String {
    format!("cs_test_{}", Uuid::new_v4().simple())
}

pub struct TestEngine {
    pub engine: SubscriptionEngine,
    pub store: Arc<InMemoryStore>,
}

pub fn memory_engine() -> TestEngine {
    init_metrics();
    let store = Arc::new(InMemoryStore::new());
    let engine = SubscriptionEngine::new(store.clone(), PlanCatalog::standard());
    TestEngine { engine, store }
}

pub fn flaky_engine() -> (SubscriptionEngine, Arc<FlakyStore>) {
    init_metrics();
    let store = Arc::new(FlakyStore::new());
    let engine = SubscriptionEngine::new(store.clone(), PlanCatalog::standard());
    (engine, store)
}

/// Sign a user up and optionally move them onto a paid plan at `at`.
pub async fn user_on_plan(
    engine: &SubscriptionEngine,
    plan_id: PlanId,
    cycle: BillingCycle,
    at: DateTime<Utc>,
) -> (String, Subscription) {
    let user_id = unique_user();
    let (free, _) = engine.ensure_subscription(&user_id, at).await.unwrap();
    if plan_id.is_free() {
        return (user_id, free);
    }
    let outcome = engine
        .confirm_payment(&user_id, &unique_session(), plan_id, cycle, at)
        .await
        .unwrap();
    (user_id, outcome.subscription)
}

/// In-memory store that can inject claim conflicts and outages.
#[derive(Default)]
pub struct FlakyStore {
    inner: InMemoryStore,
    pending_conflicts: AtomicU32,
    offline: AtomicBool,
    apply_calls: AtomicU32,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` payment applications lose the claim race.
    pub fn conflict_next(&self, n: u32) {
        self.pending_conflicts.store(n, Ordering::SeqCst);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn apply_calls(&self) -> u32 {
        self.apply_calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), BillingError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(BillingError::Storage(anyhow::anyhow!("store offline")));
        }
        Ok(())
    }
}

#[async_trait]
impl SubscriptionStore for FlakyStore {
    async fn ensure_subscription(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(Subscription, bool), BillingError> {
        self.check()?;
        self.inner.ensure_subscription(user_id, now).await
    }

    async fn get_subscription(&self, user_id: &str) -> Result<Option<Subscription>, BillingError> {
        self.check()?;
        self.inner.get_subscription(user_id).await
    }

    async fn modify_subscription(
        &self,
        user_id: &str,
        mutation: Mutation,
    ) -> Result<Subscription, BillingError> {
        self.check()?;
        self.inner.modify_subscription(user_id, mutation).await
    }

    async fn apply_payment(
        &self,
        claim: PaymentClaim,
        mutation: Mutation,
    ) -> Result<PaymentApplication, BillingError> {
        self.check()?;
        self.apply_calls.fetch_add(1, Ordering::SeqCst);
        let lost_race = self
            .pending_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if lost_race {
            return Err(BillingError::Conflict(claim.user_id));
        }
        self.inner.apply_payment(claim, mutation).await
    }

    async fn get_payment(
        &self,
        session_id: &str,
    ) -> Result<Option<ProcessedPayment>, BillingError> {
        self.check()?;
        self.inner.get_payment(session_id).await
    }

    async fn consume_usage(
        &self,
        key: &UsageKey,
        limit: u32,
    ) -> Result<UsageConsumption, BillingError> {
        self.check()?;
        self.inner.consume_usage(key, limit).await
    }

    async fn get_usage(&self, key: &UsageKey) -> Result<Option<UsageRecord>, BillingError> {
        self.check()?;
        self.inner.get_usage(key).await
    }

    async fn list_events(&self, user_id: &str) -> Result<Vec<SubscriptionEvent>, BillingError> {
        self.check()?;
        self.inner.list_events(user_id).await
    }

    async fn health_check(&self) -> Result<(), BillingError> {
        self.check()
    }
}
