//! Referrals and their status workflow.
//!
//! Paying a referral writes the referral and its payout payment in one
//! transaction, so a referral is `PAID` exactly when its payment exists.

use aws_sdk_dynamodb::types::AttributeValue;
use uuid::Uuid;

use crate::error::{on_duplicate, ApiError, ApiResult, StoreError};
use crate::keys::referral_key;
use crate::payments::new_payment_ops;
use crate::store::{from_item, scan_all, to_item, Condition, Filter, ItemStore, WriteOp};
use crate::types::{
    non_negative, now_timestamp, required, CreateReferralInput, Payment, PaymentStatus, Referral,
    ReferralStatus, UpdateReferralStatusInput,
};

const REFERRAL_NAMESPACE: Uuid = Uuid::from_u128(0x6d1c_5a0e_93b4_4f5e_8a57_0c2f_41d9_b3a1);
const PAYOUT_NAMESPACE: Uuid = Uuid::from_u128(0x2b7e_f4c9_1d86_4a03_b5e2_97c0_6f18_d4e5);

/// Referral id for a creation retried under the same idempotency key.
pub fn idempotent_referral_id(user_id: &str, idempotency_key: &str) -> String {
    let name = format!("{}:{}", user_id, idempotency_key);
    Uuid::new_v5(&REFERRAL_NAMESPACE, name.as_bytes()).to_string()
}

/// Id of the payment recorded when a referral is paid.
pub fn payout_payment_id(referral_id: &str) -> String {
    Uuid::new_v5(&PAYOUT_NAMESPACE, referral_id.as_bytes()).to_string()
}

fn status_value(status: ReferralStatus) -> AttributeValue {
    AttributeValue::S(status.as_str().to_string())
}

/// All referrals submitted by a user, oldest first.
pub async fn list_referrals(
    store: &dyn ItemStore,
    table: &str,
    user_id: &str,
    page_size: i32,
) -> ApiResult<Vec<Referral>> {
    let filter = Filter::eq("userId", AttributeValue::S(user_id.to_string()));
    let mut referrals = scan_all(store, table, Some(&filter), page_size)
        .await?
        .into_iter()
        .map(from_item)
        .collect::<ApiResult<Vec<Referral>>>()?;
    referrals.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    Ok(referrals)
}

pub async fn get_referral(store: &dyn ItemStore, table: &str, referral_id: &str) -> ApiResult<Referral> {
    let item = store
        .get_item(table, &referral_key(referral_id))
        .await?
        .ok_or_else(|| ApiError::not_found("Referral", referral_id))?;
    from_item(item)
}

/// Creates a referral in `IN_PROGRESS`. With an idempotency key, a retry
/// returns the referral stored by the first attempt.
pub async fn create_referral(
    store: &dyn ItemStore,
    table: &str,
    user_id: &str,
    input: CreateReferralInput,
) -> ApiResult<Referral> {
    let company_id = required("companyId", input.company_id)?;
    let client_name = required("clientName", input.client_name)?;
    let amount = input
        .amount
        .map(|a| non_negative("amount", a))
        .transpose()?;
    let idempotency_key = input
        .idempotency_key
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty());

    let id = match &idempotency_key {
        Some(key) => idempotent_referral_id(user_id, key),
        None => Uuid::new_v4().to_string(),
    };
    let now = now_timestamp();
    let referral = Referral {
        id,
        user_id: user_id.to_string(),
        company_id,
        client_name,
        status: ReferralStatus::InProgress,
        amount,
        created_at: now.clone(),
        updated_at: now,
    };

    let key = referral_key(&referral.id);
    match store
        .put_item(table, &to_item(&key, &referral)?, &Condition::NotExists)
        .await
    {
        Ok(()) => {
            tracing::info!(referral_id = %referral.id, user_id, "referral created");
            Ok(referral)
        }
        Err(StoreError::ConditionFailed(_)) if idempotency_key.is_some() => {
            tracing::info!(referral_id = %referral.id, "idempotent replay of referral creation");
            get_referral(store, table, &referral.id).await
        }
        Err(err) => Err(on_duplicate(err, "Referral", &referral.id)),
    }
}

/// Moves a referral to a new status.
///
/// The write is conditioned on the status that was read, so concurrent
/// transitions surface as conflicts. Moving to `PAID` also records the
/// payout payment in the same transaction.
pub async fn update_referral_status(
    store: &dyn ItemStore,
    referrals_table: &str,
    payments_table: &str,
    input: UpdateReferralStatusInput,
) -> ApiResult<Referral> {
    let current = get_referral(store, referrals_table, &input.id).await?;

    if current.status == ReferralStatus::Paid {
        if input.status == ReferralStatus::Paid {
            return Ok(current);
        }
        return Err(ApiError::Conflict(format!(
            "referral {} is already paid",
            current.id
        )));
    }
    if current.status == input.status && input.amount.is_none() {
        return Ok(current);
    }

    let amount = input
        .amount
        .map(|a| non_negative("amount", a))
        .transpose()?
        .or(current.amount);
    let now = now_timestamp();
    let key = referral_key(&current.id);
    let condition = Condition::attribute_equals("status", status_value(current.status));

    let mut set = vec![
        ("status".to_string(), status_value(input.status)),
        ("updatedAt".to_string(), AttributeValue::S(now.clone())),
    ];
    if let Some(amount) = amount {
        set.push(("amount".to_string(), AttributeValue::N(amount.to_string())));
    }

    if input.status != ReferralStatus::Paid {
        let item = store
            .update_item(referrals_table, &key, &set, &condition)
            .await
            .map_err(|e| concurrent_change(e, &current.id))?;
        tracing::info!(
            referral_id = %current.id,
            from = current.status.as_str(),
            to = input.status.as_str(),
            "referral status updated"
        );
        return from_item(item);
    }

    let amount =
        amount.ok_or_else(|| ApiError::validation("amount is required to pay a referral"))?;
    let payment = Payment {
        id: payout_payment_id(&current.id),
        referral_id: current.id.clone(),
        user_id: current.user_id.clone(),
        amount,
        date: now.clone(),
        status: PaymentStatus::Paid,
    };
    let mut ops = vec![WriteOp::Update {
        table: referrals_table.to_string(),
        key,
        set,
        condition,
    }];
    ops.extend(new_payment_ops(payments_table, &payment)?);
    store
        .transact_write(&ops)
        .await
        .map_err(|e| concurrent_change(e, &current.id))?;
    tracing::info!(
        referral_id = %current.id,
        payment_id = %payment.id,
        amount,
        "referral paid"
    );

    Ok(Referral {
        status: ReferralStatus::Paid,
        amount: Some(amount),
        updated_at: now,
        ..current
    })
}

fn concurrent_change(err: StoreError, referral_id: &str) -> ApiError {
    match err {
        StoreError::ConditionFailed(_) => ApiError::Conflict(format!(
            "referral {} was changed concurrently; re-read and retry",
            referral_id
        )),
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::{get_payment, list_user_payments};
    use crate::store::MemoryStore;

    const REFERRALS: &str = "ReferralsTable";
    const PAYMENTS: &str = "PaymentsTable";

    fn input(client: &str, key: Option<&str>) -> CreateReferralInput {
        CreateReferralInput {
            company_id: Some("anco-insurance".to_string()),
            client_name: Some(client.to_string()),
            amount: Some(500.0),
            idempotency_key: key.map(str::to_string),
        }
    }

    fn status(id: &str, status: ReferralStatus) -> UpdateReferralStatusInput {
        UpdateReferralStatusInput {
            id: id.to_string(),
            status,
            amount: None,
        }
    }

    #[tokio::test]
    async fn test_create_then_list_includes_it_once() {
        let store = MemoryStore::new();
        let created = create_referral(&store, REFERRALS, "u-1", input("Jane Doe", None))
            .await
            .unwrap();
        assert_eq!(created.status, ReferralStatus::InProgress);

        create_referral(&store, REFERRALS, "u-2", input("Other", None))
            .await
            .unwrap();

        let mine = list_referrals(&store, REFERRALS, "u-1", 50).await.unwrap();
        assert_eq!(mine, vec![created]);
    }

    #[tokio::test]
    async fn test_idempotent_retry_returns_original() {
        let store = MemoryStore::new();
        let first = create_referral(&store, REFERRALS, "u-1", input("Jane", Some("form-42")))
            .await
            .unwrap();
        let retry = create_referral(&store, REFERRALS, "u-1", input("Jane", Some("form-42")))
            .await
            .unwrap();
        assert_eq!(retry, first);
        assert_eq!(list_referrals(&store, REFERRALS, "u-1", 50).await.unwrap().len(), 1);

        // The same key from another user is a different referral.
        let other = create_referral(&store, REFERRALS, "u-2", input("Jane", Some("form-42")))
            .await
            .unwrap();
        assert_ne!(other.id, first.id);
    }

    #[tokio::test]
    async fn test_missing_fields_are_rejected() {
        let store = MemoryStore::new();
        let err = create_referral(&store, REFERRALS, "u-1", CreateReferralInput::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_status_transition_and_missing_referral() {
        let store = MemoryStore::new();
        let referral = create_referral(&store, REFERRALS, "u-1", input("Jane", None))
            .await
            .unwrap();

        let reviewed = update_referral_status(
            &store,
            REFERRALS,
            PAYMENTS,
            status(&referral.id, ReferralStatus::InReview),
        )
        .await
        .unwrap();
        assert_eq!(reviewed.status, ReferralStatus::InReview);
        assert_eq!(
            get_referral(&store, REFERRALS, &referral.id).await.unwrap().status,
            ReferralStatus::InReview
        );

        let err = update_referral_status(&store, REFERRALS, PAYMENTS, status("missing", ReferralStatus::Approved))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_paying_records_payment_atomically() {
        let store = MemoryStore::new();
        let referral = create_referral(&store, REFERRALS, "u-1", input("Jane", None))
            .await
            .unwrap();

        let paid = update_referral_status(
            &store,
            REFERRALS,
            PAYMENTS,
            status(&referral.id, ReferralStatus::Paid),
        )
        .await
        .unwrap();
        assert_eq!(paid.status, ReferralStatus::Paid);
        assert_eq!(get_referral(&store, REFERRALS, &referral.id).await.unwrap(), paid);

        let payment = get_payment(&store, PAYMENTS, &payout_payment_id(&referral.id))
            .await
            .unwrap();
        assert_eq!(payment.referral_id, referral.id);
        assert_eq!(payment.user_id, "u-1");
        assert_eq!(payment.amount, 500.0);
        assert_eq!(payment.status, PaymentStatus::Paid);

        // Paying again is a no-op and records nothing new.
        let again = update_referral_status(
            &store,
            REFERRALS,
            PAYMENTS,
            status(&referral.id, ReferralStatus::Paid),
        )
        .await
        .unwrap();
        assert_eq!(again, paid);
        assert_eq!(list_user_payments(&store, PAYMENTS, "u-1", 50).await.unwrap().len(), 1);

        let err = update_referral_status(
            &store,
            REFERRALS,
            PAYMENTS,
            status(&referral.id, ReferralStatus::Rejected),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "CONFLICT");
    }

    #[tokio::test]
    async fn test_cancelled_payout_writes_nothing() {
        let store = MemoryStore::new();
        let referral = create_referral(&store, REFERRALS, "u-1", input("Jane", None))
            .await
            .unwrap();

        // A payment already occupies the payout key.
        use crate::keys::payment_key;
        let blocker = Payment {
            id: payout_payment_id(&referral.id),
            referral_id: referral.id.clone(),
            user_id: "u-1".to_string(),
            amount: 1.0,
            date: "2026-01-01".to_string(),
            status: PaymentStatus::Pending,
        };
        store
            .put_item(
                PAYMENTS,
                &to_item(&payment_key(&blocker.id, "u-1"), &blocker).unwrap(),
                &Condition::None,
            )
            .await
            .unwrap();

        let err = update_referral_status(
            &store,
            REFERRALS,
            PAYMENTS,
            status(&referral.id, ReferralStatus::Paid),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "CONFLICT");
        assert_eq!(
            get_referral(&store, REFERRALS, &referral.id).await.unwrap().status,
            ReferralStatus::InProgress
        );
    }

    #[tokio::test]
    async fn test_paying_without_amount_is_rejected() {
        let store = MemoryStore::new();
        let mut no_amount = input("Jane", None);
        no_amount.amount = None;
        let referral = create_referral(&store, REFERRALS, "u-1", no_amount).await.unwrap();

        let err = update_referral_status(
            &store,
            REFERRALS,
            PAYMENTS,
            status(&referral.id, ReferralStatus::Paid),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");

        let paid = update_referral_status(
            &store,
            REFERRALS,
            PAYMENTS,
            UpdateReferralStatusInput {
                id: referral.id.clone(),
                status: ReferralStatus::Paid,
                amount: Some(120.0),
            },
        )
        .await
        .unwrap();
        assert_eq!(paid.amount, Some(120.0));
    }
}
