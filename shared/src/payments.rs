//! Payment records. Each payment lives in its own partition
//! (`PAYMENT#<id>`), sorted by the user it belongs to. The same partition
//! holds a `PAYMENT_ID` item that reserves the id, written in the same
//! transaction as the payment.

use aws_sdk_dynamodb::types::AttributeValue;

use crate::error::{on_duplicate, on_missing, ApiError, ApiResult};
use crate::keys::{payment_id_key, payment_key, payment_pk, SK, USER_PREFIX};
use crate::pagination::{scan_page, PageResult};
use crate::store::{
    from_item, scan_all, to_item, Condition, Filter, ItemStore, PageRequest, WriteOp,
};
use crate::types::{non_negative, now_timestamp, payment_date, required, Payment, PaymentInput};

fn sort_by_date(payments: &mut [Payment]) {
    payments.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));
}

/// Every payment owned by a user, oldest first.
pub async fn list_user_payments(
    store: &dyn ItemStore,
    table: &str,
    user_id: &str,
    page_size: i32,
) -> ApiResult<Vec<Payment>> {
    let filter = Filter::eq("userId", AttributeValue::S(user_id.to_string()));
    let mut payments = scan_all(store, table, Some(&filter), page_size)
        .await?
        .into_iter()
        .map(from_item)
        .collect::<ApiResult<Vec<Payment>>>()?;
    sort_by_date(&mut payments);
    Ok(payments)
}

pub async fn list_payments(
    store: &dyn ItemStore,
    table: &str,
    request: &PageRequest,
) -> ApiResult<PageResult<Payment>> {
    let payments_only = Filter::begins_with(SK, USER_PREFIX);
    let mut page = scan_page::<Payment>(store, table, Some(&payments_only), request).await?;
    sort_by_date(&mut page.items);
    Ok(page)
}

pub async fn create_payment(
    store: &dyn ItemStore,
    table: &str,
    input: PaymentInput,
) -> ApiResult<Payment> {
    let user_id = required("userId", input.user_id)?;
    let amount = non_negative(
        "amount",
        input
            .amount
            .ok_or_else(|| ApiError::validation("amount is required"))?,
    )?;
    let id = input
        .id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let date = match input.date {
        Some(date) => payment_date(date)?,
        None => now_timestamp(),
    };

    let payment = Payment {
        id,
        referral_id: input.referral_id.unwrap_or_default(),
        user_id,
        amount,
        date,
        status: input.status.unwrap_or_default(),
    };
    store
        .transact_write(&new_payment_ops(table, &payment)?)
        .await
        .map_err(|e| on_duplicate(e, "Payment", &payment.id))?;
    tracing::info!(payment_id = %payment.id, user_id = %payment.user_id, "payment created");
    Ok(payment)
}

/// Writes that create a payment and reserve its id for every user.
pub(crate) fn new_payment_ops(table: &str, payment: &Payment) -> ApiResult<Vec<WriteOp>> {
    Ok(vec![
        WriteOp::Put {
            table: table.to_string(),
            item: payment_id_key(&payment.id).to_item(),
            condition: Condition::NotExists,
        },
        WriteOp::Put {
            table: table.to_string(),
            item: to_item(&payment_key(&payment.id, &payment.user_id), payment)?,
            condition: Condition::NotExists,
        },
    ])
}

/// Looks the payment up inside its own partition.
async fn find_payment(
    store: &dyn ItemStore,
    table: &str,
    payment_id: &str,
) -> ApiResult<Option<Payment>> {
    let page = store
        .query(
            table,
            &payment_pk(payment_id),
            Some(USER_PREFIX),
            &PageRequest::first(1),
        )
        .await?;
    page.items.into_iter().next().map(from_item).transpose()
}

pub async fn get_payment(
    store: &dyn ItemStore,
    table: &str,
    payment_id: &str,
) -> ApiResult<Payment> {
    find_payment(store, table, payment_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Payment", payment_id))
}

/// Updates amount, date, status or referral. The owning user cannot change.
pub async fn update_payment(
    store: &dyn ItemStore,
    table: &str,
    payment_id: &str,
    input: PaymentInput,
) -> ApiResult<Payment> {
    let mut payment = get_payment(store, table, payment_id).await?;

    if let Some(user_id) = input.user_id.as_deref() {
        if user_id != payment.user_id {
            return Err(ApiError::validation("userId cannot be changed"));
        }
    }
    if let Some(amount) = input.amount {
        payment.amount = non_negative("amount", amount)?;
    }
    if let Some(date) = input.date {
        payment.date = payment_date(date)?;
    }
    if let Some(status) = input.status {
        payment.status = status;
    }
    if let Some(referral_id) = input.referral_id {
        payment.referral_id = referral_id;
    }

    let key = payment_key(&payment.id, &payment.user_id);
    store
        .put_item(table, &to_item(&key, &payment)?, &Condition::Exists)
        .await
        .map_err(|e| on_missing(e, "Payment", payment_id))?;
    Ok(payment)
}
