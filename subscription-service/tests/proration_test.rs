//! Proration quote integration tests for subscription-service.

mod common;

use chrono::Duration;
use common::{memory_engine, now, unique_user, user_on_plan};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use subscription_service::models::{BillingCycle, PlanId};
use subscription_service::services::SubscriptionStore;
use subscription_service::BillingError;

#[tokio::test]
async fn free_user_quote_for_mid_monthly() {
    let app = memory_engine();
    let (user_id, _) = user_on_plan(&app.engine, PlanId::Free, BillingCycle::Monthly, now()).await;

    let quote = app
        .engine
        .quote(&user_id, PlanId::Mid, BillingCycle::Monthly, now())
        .await
        .unwrap();
    assert_eq!(quote.full_amount, dec!(699));
    assert_eq!(quote.unused_credit, Decimal::ZERO);
    assert_eq!(quote.prorated_amount, dec!(699));
    assert!(!quote.is_prorated);
}

#[tokio::test]
async fn mid_annual_with_100_days_left_upgrading_to_top_annual() {
    let app = memory_engine();
    let (user_id, mid) = user_on_plan(&app.engine, PlanId::Mid, BillingCycle::Annual, now()).await;
    let at = mid.end_date.unwrap() - Duration::days(100);

    let quote = app
        .engine
        .quote(&user_id, PlanId::Top, BillingCycle::Annual, at)
        .await
        .unwrap();
    assert_eq!(quote.days_remaining, 100);
    assert_eq!(quote.unused_credit, dec!(1663.33));
    assert_eq!(quote.full_amount, dec!(29988));
    assert_eq!(quote.prorated_amount, quote.full_amount - quote.unused_credit);
    assert!(quote.is_prorated);
}

#[tokio::test]
async fn quoting_is_pure() {
    let app = memory_engine();
    let (user_id, _) = user_on_plan(&app.engine, PlanId::Mid, BillingCycle::Monthly, now()).await;
    let at = now() + Duration::days(12);
    let history_before = app.engine.history(&user_id).await.unwrap();
    let stored_before = app.store.get_subscription(&user_id).await.unwrap();

    let first = app
        .engine
        .quote(&user_id, PlanId::Top, BillingCycle::Monthly, at)
        .await
        .unwrap();
    let second = app
        .engine
        .quote(&user_id, PlanId::Top, BillingCycle::Monthly, at)
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(app.engine.history(&user_id).await.unwrap(), history_before);
    assert_eq!(
        app.store.get_subscription(&user_id).await.unwrap(),
        stored_before
    );
}

#[tokio::test]
async fn quote_on_lapsed_plan_prices_as_free_without_demoting() {
    let app = memory_engine();
    let (user_id, mid) = user_on_plan(&app.engine, PlanId::Mid, BillingCycle::Monthly, now()).await;
    let after = mid.end_date.unwrap() + Duration::days(1);

    // Lower tier is allowed again because the paid window has lapsed.
    let quote = app
        .engine
        .quote(&user_id, PlanId::Mid, BillingCycle::Monthly, after)
        .await
        .unwrap();
    assert_eq!(quote.prorated_amount, dec!(699));
    assert!(!quote.is_prorated);

    let stored = app.store.get_subscription(&user_id).await.unwrap().unwrap();
    assert_eq!(stored.plan_id, PlanId::Mid);
}

#[tokio::test]
async fn amounts_hold_their_bounds() {
    let app = memory_engine();
    for (plan, cycle) in [
        (PlanId::Mid, BillingCycle::Monthly),
        (PlanId::Mid, BillingCycle::Annual),
    ] {
        let (user_id, sub) = user_on_plan(&app.engine, plan, cycle, now()).await;
        let end = sub.end_date.unwrap();
        for days_before_end in [0_i64, 1, 15, 29, 30, 200, 364] {
            let at = end - Duration::days(days_before_end);
            if at < now() {
                continue;
            }
            for target_cycle in [BillingCycle::Monthly, BillingCycle::Annual] {
                let quote = app
                    .engine
                    .quote(&user_id, PlanId::Top, target_cycle, at)
                    .await
                    .unwrap();
                assert!(quote.unused_credit >= Decimal::ZERO);
                assert!(quote.unused_credit <= quote.full_amount);
                assert_eq!(
                    quote.prorated_amount,
                    (quote.full_amount - quote.unused_credit).max(Decimal::ZERO)
                );
            }
        }
    }
}

#[tokio::test]
async fn same_plan_and_cycle_is_already_on_plan() {
    let app = memory_engine();
    let (user_id, _) = user_on_plan(&app.engine, PlanId::Mid, BillingCycle::Monthly, now()).await;

    let err = app
        .engine
        .quote(&user_id, PlanId::Mid, BillingCycle::Monthly, now())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BillingError::AlreadyOnPlan {
            plan_id: PlanId::Mid,
            billing_cycle: BillingCycle::Monthly
        }
    ));
}

#[tokio::test]
async fn free_target_on_free_is_already_on_plan() {
    let app = memory_engine();
    let (user_id, _) = user_on_plan(&app.engine, PlanId::Free, BillingCycle::Monthly, now()).await;

    let err = app
        .engine
        .quote(&user_id, PlanId::Free, BillingCycle::Monthly, now())
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::AlreadyOnPlan { .. }));
}

#[tokio::test]
async fn quote_for_unknown_user_is_not_found() {
    let app = memory_engine();
    let err = app
        .engine
        .quote(&unique_user(), PlanId::Mid, BillingCycle::Monthly, now())
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::SubscriptionNotFound(_)));
}
