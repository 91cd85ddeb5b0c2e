mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};

use common::{FakeBilling, FakeReceipts, VALID_RECEIPT};
use confirmed_web::jobs::receipt_refresher::refresh_receipts;
use confirmed_web::models::{NewUser, PlanType, ReceiptType, Subscription};
use confirmed_web::repository::{MemoryStore, Store};
use confirmed_web::services::SubscriptionService;

fn lapsed(receipt_id: &str, user_id: uuid::Uuid, data: &str) -> Subscription {
    let now = Utc::now();
    Subscription {
        receipt_id: receipt_id.to_string(),
        user_id,
        receipt_type: ReceiptType::Ios,
        plan_type: PlanType::IosMonthly,
        expiration_date: now - Duration::days(2),
        cancellation_date: None,
        in_trial: false,
        failed_last_check: false,
        receipt_data: Some(data.to_string()),
        created_at: now - Duration::days(32),
        updated_at: now - Duration::days(2),
    }
}

#[tokio::test]
async fn renewals_are_picked_up_and_failures_flagged() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let user = store
        .create_user(NewUser {
            referral_code: "refresh1".to_string(),
            do_not_email_code: "d".repeat(16),
            ..NewUser::default()
        })
        .await
        .unwrap();

    store
        .upsert_subscription(&lapsed("renewed", user.id, VALID_RECEIPT))
        .await
        .unwrap();
    store
        .upsert_subscription(&lapsed("revoked", user.id, "cmV2b2tlZA=="))
        .await
        .unwrap();

    let service = SubscriptionService::new(
        store.clone(),
        Arc::new(FakeBilling::default()),
        Arc::new(FakeReceipts),
    );
    let stats = refresh_receipts(&service).await.unwrap();

    assert_eq!(stats.total_checked, 2);
    assert_eq!(stats.renewed, 1);
    assert_eq!(stats.failures, 1);

    let renewed = store.find_subscription("renewed").await.unwrap().unwrap();
    assert!(renewed.expiration_date > Utc::now());
    assert!(!renewed.failed_last_check);

    let revoked = store.find_subscription("revoked").await.unwrap().unwrap();
    assert!(revoked.failed_last_check);
    assert!(revoked.expiration_date < Utc::now());
}
