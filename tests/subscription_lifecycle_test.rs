//! EMI mandate lifecycle driven through signed webhook deliveries.

mod common;

use chrono::{TimeZone, Utc};
use common::{spawn_services, TestApp};
use fee_service::models::{
    NotificationKind, PlanType, Subscription, SubscriptionStatus,
};
use fee_service::services::store::FeeStore;
use fee_service::services::subscriptions::{CreateSubscriptionCommand, WebhookOutcome};
use rust_decimal_macros::dec;
use serde_json::json;
use uuid::Uuid;

fn charged_body(gateway_subscription_id: &str, gateway_payment_id: &str, paise: u64) -> String {
    json!({
        "event": "subscription.charged",
        "payload": {
            "subscription": { "entity": {
                "id": gateway_subscription_id,
                "status": "active",
            } },
            "payment": { "entity": {
                "id": gateway_payment_id,
                "amount": paise,
                "status": "captured",
            } },
        }
    })
    .to_string()
}

fn lifecycle_body(event: &str, gateway_subscription_id: &str) -> String {
    json!({
        "event": event,
        "payload": {
            "subscription": { "entity": {
                "id": gateway_subscription_id,
                "status": event.trim_start_matches("subscription."),
            } },
        }
    })
    .to_string()
}

async fn deliver(app: &TestApp, body: &str, event_id: &str) -> WebhookOutcome {
    let signature = app.gateway.sign_webhook(body);
    app.state
        .subscriptions
        .on_webhook_event(Some(&signature), Some(event_id), body)
        .await
        .unwrap()
}

/// Mandate for 3 x 1000 monthly starting 2024-01-01, authenticated and
/// activated.
async fn active_emi(app: &TestApp) -> Subscription {
    let (student, ledger) = app.seed_student_with_ledger().await;
    let sub = app
        .state
        .subscriptions
        .create(CreateSubscriptionCommand {
            student_id: student.id,
            ledger_id: ledger.id,
            plan_type: PlanType::Monthly,
            total_amount: dec!(3000),
            installment_amount: dec!(1000),
            total_installments: 3,
            start_date: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        })
        .await
        .unwrap();

    let gateway_id = sub.gateway_subscription_id.clone().unwrap();
    let signature = app
        .gateway
        .sign_subscription_checkout("pay_auth_1", &gateway_id);
    app.state
        .subscriptions
        .verify_checkout(sub.id, "pay_auth_1", &signature)
        .await
        .unwrap();

    let outcome = deliver(
        app,
        &lifecycle_body("subscription.activated", &gateway_id),
        "evt_activated",
    )
    .await;
    assert_eq!(outcome, WebhookOutcome::Processed);

    app.state.subscriptions.get(sub.id).await.unwrap()
}

#[tokio::test]
async fn monthly_plan_charges_through_to_completion() {
    let app = spawn_services();
    let sub = active_emi(&app).await;
    assert_eq!(sub.status, SubscriptionStatus::Active);
    let gateway_id = sub.gateway_subscription_id.clone().unwrap();

    let outcome = deliver(
        &app,
        &charged_body(&gateway_id, "pay_emi_1", 100_000),
        "evt_charge_1",
    )
    .await;
    assert_eq!(outcome, WebhookOutcome::Processed);

    let after_first = app.state.subscriptions.get(sub.id).await.unwrap();
    assert_eq!(after_first.completed_installments, 1);
    assert_eq!(after_first.status, SubscriptionStatus::Active);
    assert_eq!(
        after_first.next_charge_at,
        Some(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap())
    );
    assert_eq!(after_first.installments[0].amount, dec!(1000));

    deliver(
        &app,
        &charged_body(&gateway_id, "pay_emi_2", 100_000),
        "evt_charge_2",
    )
    .await;
    deliver(
        &app,
        &charged_body(&gateway_id, "pay_emi_3", 100_000),
        "evt_charge_3",
    )
    .await;

    let done = app.state.subscriptions.get(sub.id).await.unwrap();
    assert_eq!(done.completed_installments, 3);
    assert_eq!(done.status, SubscriptionStatus::Completed);
    assert_eq!(done.next_charge_at, None);

    // Each installment landed on the ledger as a verified payment.
    let payments = app
        .state
        .payments
        .list_for_ledger(sub.ledger_id)
        .await
        .unwrap();
    assert_eq!(payments.len(), 3);
    let ledger = app.state.ledgers.get(sub.ledger_id).await.unwrap();
    assert_eq!(ledger.total_paid, dec!(3000));
}

#[tokio::test]
async fn replayed_charge_events_never_double_book() {
    let app = spawn_services();
    let sub = active_emi(&app).await;
    let gateway_id = sub.gateway_subscription_id.clone().unwrap();

    let body = charged_body(&gateway_id, "pay_emi_1", 100_000);
    assert_eq!(
        deliver(&app, &body, "evt_charge_1").await,
        WebhookOutcome::Processed
    );

    // Same event id.
    assert_eq!(
        deliver(&app, &body, "evt_charge_1").await,
        WebhookOutcome::Duplicate
    );
    // Fresh event id, same gateway payment.
    assert_eq!(
        deliver(&app, &body, "evt_charge_1_redelivery").await,
        WebhookOutcome::Duplicate
    );

    let after = app.state.subscriptions.get(sub.id).await.unwrap();
    assert_eq!(after.completed_installments, 1);
    let payments = app
        .state
        .payments
        .list_for_ledger(sub.ledger_id)
        .await
        .unwrap();
    assert_eq!(payments.len(), 1);
}

#[tokio::test]
async fn exhausted_retries_halt_the_mandate_and_a_charge_revives_it() {
    let app = spawn_services();
    let sub = active_emi(&app).await;
    let gateway_id = sub.gateway_subscription_id.clone().unwrap();

    for _ in 0..3 {
        app.state
            .subscriptions
            .on_charge_failure(&gateway_id, "card declined")
            .await
            .unwrap();
    }

    let halted = app.state.subscriptions.get(sub.id).await.unwrap();
    assert_eq!(halted.status, SubscriptionStatus::Halted);
    assert_eq!(halted.failed_attempts.last().unwrap().retry_count, 3);

    // Halted mandates are off the charge schedule.
    let due = app
        .state
        .subscriptions
        .due_for_charge(Utc::now() + chrono::Duration::days(365))
        .await
        .unwrap();
    assert!(!due.iter().any(|s| s.id == sub.id));

    let notifications = app
        .store
        .list_notifications_for_recipient(sub.student_id)
        .await
        .unwrap();
    assert!(notifications
        .iter()
        .any(|n| n.kind == NotificationKind::SubscriptionStatusChange));

    // The gateway eventually collects; the charge reactivates the mandate.
    let outcome = deliver(
        &app,
        &charged_body(&gateway_id, "pay_recovered", 100_000),
        "evt_recovered",
    )
    .await;
    assert_eq!(outcome, WebhookOutcome::Processed);

    let revived = app.state.subscriptions.get(sub.id).await.unwrap();
    assert_eq!(revived.status, SubscriptionStatus::Active);
    assert_eq!(revived.completed_installments, 1);
}

#[tokio::test]
async fn cancel_is_terminal_and_tells_the_gateway() {
    let app = spawn_services();
    let sub = active_emi(&app).await;
    let gateway_id = sub.gateway_subscription_id.clone().unwrap();

    let cancelled = app
        .state
        .subscriptions
        .cancel(sub.id, "bursar".to_string(), "student withdrew".to_string())
        .await
        .unwrap();
    assert_eq!(cancelled.status, SubscriptionStatus::Cancelled);
    assert_eq!(cancelled.next_charge_at, None);
    assert_eq!(app.gateway.cancelled_subscriptions(), vec![gateway_id.clone()]);

    // Late lifecycle events against a terminal mandate are acknowledged
    // without effect.
    let outcome = deliver(
        &app,
        &lifecycle_body("subscription.paused", &gateway_id),
        "evt_late_pause",
    )
    .await;
    assert_eq!(outcome, WebhookOutcome::Ignored);

    let still = app.state.subscriptions.get(sub.id).await.unwrap();
    assert_eq!(still.status, SubscriptionStatus::Cancelled);
}

#[tokio::test]
async fn unknown_subscription_events_are_acknowledged_not_errored() {
    let app = spawn_services();
    let body = lifecycle_body("subscription.activated", &format!("sub_{}", Uuid::new_v4()));
    let outcome = deliver(&app, &body, "evt_unknown_sub").await;
    assert_eq!(outcome, WebhookOutcome::Ignored);
}
