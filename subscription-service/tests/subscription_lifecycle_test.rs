//! Subscription state machine integration tests for subscription-service.

mod common;

use chrono::{Duration, TimeZone, Utc};
use common::{memory_engine, now, unique_session, unique_user, user_on_plan};
use subscription_service::models::{BillingCycle, PlanId, SubscriptionStatus, TransitionKind};
use subscription_service::services::SubscriptionStore;
use subscription_service::BillingError;

#[tokio::test]
async fn signup_creates_exactly_one_free_row() {
    let app = memory_engine();
    let user_id = unique_user();

    let (first, created) = app.engine.ensure_subscription(&user_id, now()).await.unwrap();
    assert!(created);
    assert_eq!(first.plan_id, PlanId::Free);
    assert!(first.end_date.is_none());

    let later = now() + Duration::days(3);
    let (second, created) = app.engine.ensure_subscription(&user_id, later).await.unwrap();
    assert!(!created);
    assert_eq!(second, first);

    let history = app.engine.history(&user_id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].kind, TransitionKind::Created);
}

#[tokio::test]
async fn unknown_user_is_not_found() {
    let app = memory_engine();
    let err = app
        .engine
        .get_subscription(&unique_user(), now())
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::SubscriptionNotFound(_)));

    let err = app.engine.cancel(&unique_user(), now()).await.unwrap_err();
    assert!(matches!(err, BillingError::SubscriptionNotFound(_)));
}

#[tokio::test]
async fn malformed_user_id_is_rejected() {
    let app = memory_engine();
    let err = app
        .engine
        .ensure_subscription("", now())
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::InvalidUserId { .. }));
}

#[tokio::test]
async fn upgrade_then_cycle_change() {
    let app = memory_engine();
    let (user_id, mid) = user_on_plan(&app.engine, PlanId::Mid, BillingCycle::Monthly, now()).await;
    assert_eq!(mid.status, SubscriptionStatus::Active);
    assert_eq!(
        mid.end_date,
        Some(Utc.with_ymd_and_hms(2025, 7, 1, 10, 0, 0).unwrap())
    );

    let later = now() + Duration::days(10);
    let top = app
        .engine
        .confirm_payment(&user_id, &unique_session(), PlanId::Top, BillingCycle::Monthly, later)
        .await
        .unwrap()
        .subscription;
    assert_eq!(top.plan_id, PlanId::Top);
    assert_eq!(top.start_date, later);

    let annual = app
        .engine
        .confirm_payment(&user_id, &unique_session(), PlanId::Top, BillingCycle::Annual, later)
        .await
        .unwrap()
        .subscription;
    assert_eq!(annual.billing_cycle, BillingCycle::Annual);
    assert_eq!(
        annual.end_date,
        Some(Utc.with_ymd_and_hms(2026, 6, 11, 10, 0, 0).unwrap())
    );

    let kinds: Vec<TransitionKind> = app
        .engine
        .history(&user_id)
        .await
        .unwrap()
        .iter()
        .map(|e| e.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            TransitionKind::Created,
            TransitionKind::Subscribed,
            TransitionKind::Upgraded,
            TransitionKind::CycleChanged,
        ]
    );
}

#[tokio::test]
async fn windows_never_move_backwards() {
    let app = memory_engine();
    let (user_id, mid) = user_on_plan(&app.engine, PlanId::Mid, BillingCycle::Monthly, now()).await;

    let history_before = app.engine.history(&user_id).await.unwrap();
    let top = app
        .engine
        .confirm_payment(
            &user_id,
            &unique_session(),
            PlanId::Top,
            BillingCycle::Monthly,
            now() + Duration::hours(1),
        )
        .await
        .unwrap()
        .subscription;
    assert!(top.start_date >= mid.start_date);
    assert!(top.end_date >= mid.end_date);

    let history = app.engine.history(&user_id).await.unwrap();
    assert_eq!(history.len(), history_before.len() + 1);
    for pair in history.windows(2) {
        assert!(pair[1].start_date >= pair[0].start_date);
    }
}

#[tokio::test]
async fn downgrade_is_blocked_while_active() {
    let app = memory_engine();
    let (user_id, _) = user_on_plan(&app.engine, PlanId::Top, BillingCycle::Monthly, now()).await;

    let err = app
        .engine
        .quote(&user_id, PlanId::Mid, BillingCycle::Monthly, now())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BillingError::PlanDowngradeBlocked {
            current: PlanId::Top,
            requested: PlanId::Mid
        }
    ));
}

#[tokio::test]
async fn cancel_then_resubscribe_lower_plan() {
    let app = memory_engine();
    let (user_id, _) = user_on_plan(&app.engine, PlanId::Top, BillingCycle::Annual, now()).await;

    let cancelled = app.engine.cancel(&user_id, now() + Duration::days(1)).await.unwrap();
    assert_eq!(cancelled.plan_id, PlanId::Free);
    assert_eq!(cancelled.status, SubscriptionStatus::Cancelled);
    assert!(cancelled.end_date.is_none());

    let mid = app
        .engine
        .confirm_payment(
            &user_id,
            &unique_session(),
            PlanId::Mid,
            BillingCycle::Monthly,
            now() + Duration::days(1),
        )
        .await
        .unwrap()
        .subscription;
    assert_eq!(mid.plan_id, PlanId::Mid);
}

#[tokio::test]
async fn cancel_on_free_is_a_no_op() {
    let app = memory_engine();
    let (user_id, free) =
        user_on_plan(&app.engine, PlanId::Free, BillingCycle::Monthly, now()).await;

    let after = app.engine.cancel(&user_id, now()).await.unwrap();
    assert_eq!(after, free);
    assert_eq!(app.engine.history(&user_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn lapsed_plan_reads_as_free_from_then_on() {
    let app = memory_engine();
    let (user_id, mid) = user_on_plan(&app.engine, PlanId::Mid, BillingCycle::Monthly, now()).await;
    let end = mid.end_date.unwrap();

    // Still paid at the exact end instant.
    let at_end = app.engine.get_subscription(&user_id, end).await.unwrap();
    assert_eq!(at_end.plan_id, PlanId::Mid);

    let after = end + Duration::seconds(1);
    let first = app.engine.get_subscription(&user_id, after).await.unwrap();
    assert_eq!(first.plan_id, PlanId::Free);
    assert_eq!(first.status, SubscriptionStatus::Expired);
    assert!(first.end_date.is_none());

    let second = app
        .engine
        .get_subscription(&user_id, after + Duration::days(1))
        .await
        .unwrap();
    assert_eq!(second, first);

    let stored = app.store.get_subscription(&user_id).await.unwrap().unwrap();
    assert_eq!(stored.plan_id, PlanId::Free);

    let expired_events = app
        .engine
        .history(&user_id)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.kind == TransitionKind::Expired)
        .count();
    assert_eq!(expired_events, 1);
}

#[tokio::test]
async fn cancel_after_lapse_records_expiry() {
    let app = memory_engine();
    let (user_id, mid) = user_on_plan(&app.engine, PlanId::Mid, BillingCycle::Monthly, now()).await;
    let after = mid.end_date.unwrap() + Duration::days(2);

    let result = app.engine.cancel(&user_id, after).await.unwrap();
    assert_eq!(result.plan_id, PlanId::Free);
    assert_eq!(result.status, SubscriptionStatus::Expired);

    let last = app.engine.history(&user_id).await.unwrap().pop().unwrap();
    assert_eq!(last.kind, TransitionKind::Expired);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reads_expire_once() {
    let app = memory_engine();
    let (user_id, mid) = user_on_plan(&app.engine, PlanId::Mid, BillingCycle::Monthly, now()).await;
    let after = mid.end_date.unwrap() + Duration::minutes(5);

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let engine = app.engine.clone();
            let user_id = user_id.clone();
            tokio::spawn(async move { engine.get_subscription(&user_id, after).await })
        })
        .collect();

    for result in futures::future::join_all(tasks).await {
        assert_eq!(result.unwrap().unwrap().plan_id, PlanId::Free);
    }

    let expired_events = app
        .engine
        .history(&user_id)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.kind == TransitionKind::Expired)
        .count();
    assert_eq!(expired_events, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn confirm_racing_lazy_expiry_applies_after_demotion() {
    let app = memory_engine();
    let (user_id, mid) = user_on_plan(&app.engine, PlanId::Mid, BillingCycle::Monthly, now()).await;
    let after = mid.end_date.unwrap() + Duration::minutes(1);
    let session = unique_session();

    let reads: Vec<_> = (0..15)
        .map(|_| {
            let engine = app.engine.clone();
            let user_id = user_id.clone();
            tokio::spawn(async move { engine.get_subscription(&user_id, after).await })
        })
        .collect();
    let confirm = {
        let engine = app.engine.clone();
        let user_id = user_id.clone();
        let session = session.clone();
        tokio::spawn(async move {
            engine
                .confirm_payment(&user_id, &session, PlanId::Top, BillingCycle::Monthly, after)
                .await
        })
    };

    for result in futures::future::join_all(reads).await {
        let seen = result.unwrap().unwrap();
        assert!(matches!(seen.plan_id, PlanId::Free | PlanId::Top));
    }
    let outcome = confirm.await.unwrap().unwrap();
    assert!(!outcome.replayed);
    assert_eq!(outcome.subscription.plan_id, PlanId::Top);

    let current = app.engine.get_subscription(&user_id, after).await.unwrap();
    assert_eq!(current.plan_id, PlanId::Top);
    assert_eq!(current.start_date, after);

    let kinds: Vec<TransitionKind> = app
        .engine
        .history(&user_id)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            TransitionKind::Created,
            TransitionKind::Subscribed,
            TransitionKind::Expired,
            TransitionKind::Subscribed,
        ]
    );
}
