//! PostgreSQL store.
//!
//! Per-user exclusivity is a `SELECT ... FOR UPDATE` on the subscription row
//! held for the whole transaction. Usage counters rely on a conditional
//! upsert instead of a row lock.

use super::{record_transitions, Applied, Mutation, PaymentApplication, SubscriptionStore};
use crate::error::BillingError;
use crate::models::{
    PaymentClaim, PaymentOutcome, ProcessedPayment, Subscription, SubscriptionEvent,
    UsageConsumption, UsageKey, UsageRecord,
};
use crate::services::lifecycle;
use crate::services::metrics::STORE_OPERATION_DURATION;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use tracing::{info, instrument, warn};

const SUBSCRIPTION_COLUMNS: &str =
    "user_id, plan_id, billing_cycle, status, start_date, end_date, last_payment_session_id";

const PAYMENT_COLUMNS: &str =
    "session_id, user_id, plan_id, billing_cycle, applied_at, outcome, detail";

#[derive(sqlx::FromRow)]
struct SubscriptionRow {
    user_id: String,
    plan_id: String,
    billing_cycle: String,
    status: String,
    start_date: DateTime<Utc>,
    end_date: Option<DateTime<Utc>>,
    last_payment_session_id: Option<String>,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = BillingError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        Ok(Subscription {
            user_id: row.user_id,
            plan_id: row.plan_id.parse()?,
            billing_cycle: row.billing_cycle.parse()?,
            status: row.status.parse()?,
            start_date: row.start_date,
            end_date: row.end_date,
            last_payment_session_id: row.last_payment_session_id,
        })
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    user_id: String,
    kind: String,
    from_plan: Option<String>,
    to_plan: String,
    billing_cycle: String,
    start_date: DateTime<Utc>,
    end_date: Option<DateTime<Utc>>,
    payment_session_id: Option<String>,
    occurred_at: DateTime<Utc>,
}

impl TryFrom<EventRow> for SubscriptionEvent {
    type Error = BillingError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        Ok(SubscriptionEvent {
            user_id: row.user_id,
            kind: row.kind.parse()?,
            from_plan: row.from_plan.map(|p| p.parse()).transpose()?,
            to_plan: row.to_plan.parse()?,
            billing_cycle: row.billing_cycle.parse()?,
            start_date: row.start_date,
            end_date: row.end_date,
            payment_session_id: row.payment_session_id,
            occurred_at: row.occurred_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    session_id: String,
    user_id: String,
    plan_id: String,
    billing_cycle: String,
    applied_at: DateTime<Utc>,
    outcome: String,
    detail: Option<String>,
}

impl TryFrom<PaymentRow> for ProcessedPayment {
    type Error = BillingError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(ProcessedPayment {
            session_id: row.session_id,
            user_id: row.user_id,
            plan_id: row.plan_id.parse()?,
            billing_cycle: row.billing_cycle.parse()?,
            applied_at: row.applied_at,
            outcome: row.outcome.parse()?,
            detail: row.detail,
        })
    }
}

/// Connection pool wrapper implementing [`SubscriptionStore`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new connection pool.
    #[instrument(skip(database_url), fields(service = "subscription-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(5))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn lock_subscription(
        tx: &mut Transaction<'_, Postgres>,
        user_id: &str,
    ) -> Result<Subscription, BillingError> {
        let row = sqlx::query_as::<_, SubscriptionRow>(&format!(
            "SELECT {} FROM subscriptions WHERE user_id = $1 FOR UPDATE",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| BillingError::SubscriptionNotFound(user_id.to_string()))?;

        row.try_into()
    }

    /// Write the mutated row and its events. No-op when nothing changed.
    async fn persist(
        tx: &mut Transaction<'_, Postgres>,
        applied: &Applied,
    ) -> Result<(), BillingError> {
        if !applied.changed() {
            return Ok(());
        }
        let sub = &applied.subscription;
        sub.check_invariants()?;

        sqlx::query(
            r#"
            UPDATE subscriptions
            SET plan_id = $2, billing_cycle = $3, status = $4, start_date = $5, end_date = $6,
                last_payment_session_id = $7, updated_utc = NOW()
            WHERE user_id = $1
            "#,
        )
        .bind(&sub.user_id)
        .bind(sub.plan_id.as_str())
        .bind(sub.billing_cycle.as_str())
        .bind(sub.status.as_str())
        .bind(sub.start_date)
        .bind(sub.end_date)
        .bind(&sub.last_payment_session_id)
        .execute(&mut **tx)
        .await?;

        Self::insert_events(tx, &applied.events).await
    }

    async fn insert_events(
        tx: &mut Transaction<'_, Postgres>,
        events: &[SubscriptionEvent],
    ) -> Result<(), BillingError> {
        for event in events {
            sqlx::query(
                r#"
                INSERT INTO subscription_events
                    (user_id, kind, from_plan, to_plan, billing_cycle,
                     start_date, end_date, payment_session_id, occurred_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(&event.user_id)
            .bind(event.kind.as_str())
            .bind(event.from_plan.map(|p| p.as_str()))
            .bind(event.to_plan.as_str())
            .bind(event.billing_cycle.as_str())
            .bind(event.start_date)
            .bind(event.end_date)
            .bind(&event.payment_session_id)
            .bind(event.occurred_at)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    async fn insert_payment(
        tx: &mut Transaction<'_, Postgres>,
        payment: &ProcessedPayment,
    ) -> Result<(), BillingError> {
        sqlx::query(&format!(
            "INSERT INTO processed_payments ({}) VALUES ($1, $2, $3, $4, $5, $6, $7)",
            PAYMENT_COLUMNS
        ))
        .bind(&payment.session_id)
        .bind(&payment.user_id)
        .bind(payment.plan_id.as_str())
        .bind(payment.billing_cycle.as_str())
        .bind(payment.applied_at)
        .bind(payment.outcome.as_str())
        .bind(&payment.detail)
        .execute(&mut **tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                BillingError::Conflict(payment.user_id.clone())
            }
            other => BillingError::from(other),
        })?;
        Ok(())
    }

    async fn find_payment(
        executor: impl sqlx::PgExecutor<'_>,
        session_id: &str,
    ) -> Result<Option<ProcessedPayment>, BillingError> {
        sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {} FROM processed_payments WHERE session_id = $1",
            PAYMENT_COLUMNS
        ))
        .bind(session_id)
        .fetch_optional(executor)
        .await?
        .map(ProcessedPayment::try_from)
        .transpose()
    }
}

#[async_trait]
impl SubscriptionStore for PgStore {
    #[instrument(skip(self))]
    async fn ensure_subscription(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(Subscription, bool), BillingError> {
        let timer = STORE_OPERATION_DURATION
            .with_label_values(&["ensure_subscription"])
            .start_timer();

        let created = lifecycle::new_free_subscription(user_id, now);
        let sub = &created.subscription;

        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query_as::<_, SubscriptionRow>(&format!(
            r#"
            INSERT INTO subscriptions ({cols})
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (user_id) DO NOTHING
            RETURNING {cols}
            "#,
            cols = SUBSCRIPTION_COLUMNS
        ))
        .bind(&sub.user_id)
        .bind(sub.plan_id.as_str())
        .bind(sub.billing_cycle.as_str())
        .bind(sub.status.as_str())
        .bind(sub.start_date)
        .bind(sub.end_date)
        .bind(&sub.last_payment_session_id)
        .fetch_optional(&mut *tx)
        .await?;

        let was_created = inserted.is_some();
        let row = match inserted {
            Some(row) => {
                Self::insert_events(&mut tx, &created.events).await?;
                row
            }
            None => {
                sqlx::query_as::<_, SubscriptionRow>(&format!(
                    "SELECT {} FROM subscriptions WHERE user_id = $1",
                    SUBSCRIPTION_COLUMNS
                ))
                .bind(user_id)
                .fetch_one(&mut *tx)
                .await?
            }
        };
        tx.commit().await?;
        if was_created {
            record_transitions(&created.events);
        }

        timer.observe_duration();
        Ok((Subscription::try_from(row)?, was_created))
    }

    #[instrument(skip(self))]
    async fn get_subscription(&self, user_id: &str) -> Result<Option<Subscription>, BillingError> {
        let timer = STORE_OPERATION_DURATION
            .with_label_values(&["get_subscription"])
            .start_timer();

        let row = sqlx::query_as::<_, SubscriptionRow>(&format!(
            "SELECT {} FROM subscriptions WHERE user_id = $1",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();
        row.map(Subscription::try_from).transpose()
    }

    #[instrument(skip(self, mutation))]
    async fn modify_subscription(
        &self,
        user_id: &str,
        mutation: Mutation,
    ) -> Result<Subscription, BillingError> {
        let timer = STORE_OPERATION_DURATION
            .with_label_values(&["modify_subscription"])
            .start_timer();

        let mut tx = self.pool.begin().await?;
        let current = Self::lock_subscription(&mut tx, user_id).await?;
        // Dropping the transaction on error rolls it back.
        let applied = mutation(current)?;
        Self::persist(&mut tx, &applied).await?;
        tx.commit().await?;
        record_transitions(&applied.events);

        timer.observe_duration();
        Ok(applied.subscription)
    }

    #[instrument(
        skip(self, claim, mutation),
        fields(session_id = %claim.session_id, user_id = %claim.user_id)
    )]
    async fn apply_payment(
        &self,
        claim: PaymentClaim,
        mutation: Mutation,
    ) -> Result<PaymentApplication, BillingError> {
        let timer = STORE_OPERATION_DURATION
            .with_label_values(&["apply_payment"])
            .start_timer();

        let mut tx = self.pool.begin().await?;
        let current = Self::lock_subscription(&mut tx, &claim.user_id).await?;

        if let Some(payment) = Self::find_payment(&mut *tx, &claim.session_id).await? {
            tx.commit().await?;
            timer.observe_duration();
            return Ok(PaymentApplication::Replayed {
                payment,
                subscription: current,
            });
        }

        let mut events = Vec::new();
        let application = match mutation(current) {
            Ok(applied) => {
                Self::persist(&mut tx, &applied).await?;
                Self::insert_payment(&mut tx, &claim.into_record(PaymentOutcome::Applied, None))
                    .await?;
                events = applied.events;
                PaymentApplication::Applied(applied.subscription)
            }
            Err(e) if e.is_transient() => return Err(e),
            Err(reason) => {
                let payment = claim.into_record(
                    PaymentOutcome::ReconciliationRequired,
                    Some(reason.to_string()),
                );
                Self::insert_payment(&mut tx, &payment).await?;
                warn!(reason = %reason, "Payment claimed without a transition");
                PaymentApplication::Unapplied { payment, reason }
            }
        };
        tx.commit().await?;
        record_transitions(&events);

        timer.observe_duration();
        Ok(application)
    }

    #[instrument(skip(self))]
    async fn get_payment(
        &self,
        session_id: &str,
    ) -> Result<Option<ProcessedPayment>, BillingError> {
        let timer = STORE_OPERATION_DURATION
            .with_label_values(&["get_payment"])
            .start_timer();
        let payment = Self::find_payment(&self.pool, session_id).await?;
        timer.observe_duration();
        Ok(payment)
    }

    #[instrument(skip(self), fields(user_id = %key.user_id, feature = %key.feature))]
    async fn consume_usage(
        &self,
        key: &UsageKey,
        limit: u32,
    ) -> Result<UsageConsumption, BillingError> {
        let timer = STORE_OPERATION_DURATION
            .with_label_values(&["consume_usage"])
            .start_timer();

        // The WHERE on the update arm makes check-and-increment one statement.
        let admitted = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO usage_records (user_id, feature, period_key, count)
            SELECT $1, $2, $3, 1 WHERE $4 > 0
            ON CONFLICT (user_id, feature, period_key)
            DO UPDATE SET count = usage_records.count + 1, updated_utc = NOW()
            WHERE usage_records.count < $4
            RETURNING count
            "#,
        )
        .bind(&key.user_id)
        .bind(&key.feature)
        .bind(key.period_key.as_str())
        .bind(i64::from(limit))
        .fetch_optional(&self.pool)
        .await?;

        let consumption = match admitted {
            Some(count) => UsageConsumption::Admitted {
                count: count.max(0) as u64,
            },
            None => UsageConsumption::Exhausted {
                count: self.get_usage(key).await?.map(|r| r.count).unwrap_or(0),
            },
        };

        timer.observe_duration();
        Ok(consumption)
    }

    #[instrument(skip(self), fields(user_id = %key.user_id, feature = %key.feature))]
    async fn get_usage(&self, key: &UsageKey) -> Result<Option<UsageRecord>, BillingError> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT count FROM usage_records
            WHERE user_id = $1 AND feature = $2 AND period_key = $3
            "#,
        )
        .bind(&key.user_id)
        .bind(&key.feature)
        .bind(key.period_key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(count.map(|c| UsageRecord::new(key, c.max(0) as u64)))
    }

    #[instrument(skip(self))]
    async fn list_events(&self, user_id: &str) -> Result<Vec<SubscriptionEvent>, BillingError> {
        let timer = STORE_OPERATION_DURATION
            .with_label_values(&["list_events"])
            .start_timer();

        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT user_id, kind, from_plan, to_plan, billing_cycle,
                   start_date, end_date, payment_session_id, occurred_at
            FROM subscription_events
            WHERE user_id = $1
            ORDER BY event_id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        timer.observe_duration();
        rows.into_iter().map(SubscriptionEvent::try_from).collect()
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), BillingError> {
        let timer = STORE_OPERATION_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1").execute(&self.pool).await?;

        timer.observe_duration();
        Ok(())
    }
}
