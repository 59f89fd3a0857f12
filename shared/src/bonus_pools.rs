//! Bonus pools and their allocation report.
//!
//! Pools share the lead-data table with envelopes and are told apart by
//! their `BONUSPOOL#` partition prefix.

use std::collections::BTreeMap;

use aws_sdk_dynamodb::types::AttributeValue;
use chrono::NaiveDate;

use crate::error::{on_duplicate, ApiError, ApiResult, StoreError};
use crate::keys::{bonus_pool_key, BONUS_POOL_PREFIX, PK};
use crate::pagination::{scan_page, PageResult};
use crate::store::{from_item, scan_all, to_item, Condition, Filter, ItemStore, PageRequest};
use crate::types::{
    non_negative, now_timestamp, required, BonusPool, BonusPoolInput, BonusPoolStatus,
    PaymentStatus, PoolAllocation, PoolReport, Payment,
};

fn parse_date(field: &str, value: &str) -> ApiResult<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| ApiError::validation(format!("{} must be a YYYY-MM-DD date", field)))
}

fn validate(pool: &BonusPool) -> ApiResult<()> {
    let start = parse_date("periodStart", &pool.period_start)?;
    let end = parse_date("periodEnd", &pool.period_end)?;
    if start > end {
        return Err(ApiError::validation("periodStart must not be after periodEnd"));
    }
    non_negative("totalAmount", pool.total_amount)?;
    Ok(())
}

fn status_value(status: BonusPoolStatus) -> AttributeValue {
    let raw = match status {
        BonusPoolStatus::Open => "OPEN",
        BonusPoolStatus::Closed => "CLOSED",
        BonusPoolStatus::Distributed => "DISTRIBUTED",
    };
    AttributeValue::S(raw.to_string())
}

pub async fn list_pools(
    store: &dyn ItemStore,
    table: &str,
    request: &PageRequest,
) -> ApiResult<PageResult<BonusPool>> {
    let filter = Filter::begins_with(PK, BONUS_POOL_PREFIX);
    let mut page = scan_page::<BonusPool>(store, table, Some(&filter), request).await?;
    page.items.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    Ok(page)
}

pub async fn create_pool(
    store: &dyn ItemStore,
    table: &str,
    input: BonusPoolInput,
) -> ApiResult<BonusPool> {
    let now = now_timestamp();
    let pool = BonusPool {
        id: input
            .id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        name: required("name", input.name)?,
        period_start: required("periodStart", input.period_start)?,
        period_end: required("periodEnd", input.period_end)?,
        total_amount: input
            .total_amount
            .ok_or_else(|| ApiError::validation("totalAmount is required"))?,
        status: input.status.unwrap_or_default(),
        participants: input.participants.unwrap_or_default(),
        created_at: now.clone(),
        updated_at: now,
    };
    validate(&pool)?;

    let key = bonus_pool_key(&pool.id);
    store
        .put_item(table, &to_item(&key, &pool)?, &Condition::NotExists)
        .await
        .map_err(|e| on_duplicate(e, "BonusPool", &pool.id))?;
    tracing::info!(pool_id = %pool.id, total = pool.total_amount, "bonus pool created");
    Ok(pool)
}

pub async fn get_pool(store: &dyn ItemStore, table: &str, pool_id: &str) -> ApiResult<BonusPool> {
    let item = store
        .get_item(table, &bonus_pool_key(pool_id))
        .await?
        .ok_or_else(|| ApiError::not_found("BonusPool", pool_id))?;
    from_item(item)
}

/// Applies the fields present in `input`. Distributed pools are frozen.
pub async fn update_pool(
    store: &dyn ItemStore,
    table: &str,
    pool_id: &str,
    input: BonusPoolInput,
) -> ApiResult<BonusPool> {
    let current = get_pool(store, table, pool_id).await?;
    if current.status == BonusPoolStatus::Distributed {
        return Err(ApiError::Conflict(format!(
            "bonus pool {} has already been distributed",
            pool_id
        )));
    }

    let mut pool = current.clone();
    if let Some(name) = input.name {
        pool.name = required("name", Some(name))?;
    }
    if let Some(start) = input.period_start {
        pool.period_start = start.trim().to_string();
    }
    if let Some(end) = input.period_end {
        pool.period_end = end.trim().to_string();
    }
    if let Some(total) = input.total_amount {
        pool.total_amount = total;
    }
    if let Some(status) = input.status {
        pool.status = status;
    }
    if let Some(participants) = input.participants {
        pool.participants = participants;
    }
    pool.updated_at = now_timestamp();
    validate(&pool)?;

    let condition = Condition::attribute_equals("status", status_value(current.status));
    store
        .put_item(table, &to_item(&bonus_pool_key(pool_id), &pool)?, &condition)
        .await
        .map_err(|e| match e {
            StoreError::ConditionFailed(_) => ApiError::Conflict(format!(
                "bonus pool {} was changed concurrently",
                pool_id
            )),
            other => other.into(),
        })?;
    Ok(pool)
}

/// Splits `total_amount` across users in proportion to their earnings.
///
/// Works in whole cents; the rounding remainder lands on the largest share
/// so the allocations add up to the pool exactly.
pub fn allocate(total_amount: f64, earnings: &BTreeMap<String, f64>) -> Vec<PoolAllocation> {
    let qualifying_total: f64 = earnings.values().sum();
    if qualifying_total <= 0.0 {
        return Vec::new();
    }

    let total_cents = (total_amount * 100.0).round() as i64;
    let mut shares: Vec<(String, f64, i64)> = earnings
        .iter()
        .filter(|(_, amount)| **amount > 0.0)
        .map(|(user, amount)| {
            let cents = (total_cents as f64 * amount / qualifying_total).round() as i64;
            (user.clone(), *amount, cents)
        })
        .collect();

    let by_amount = |a: &(String, f64, i64), b: &(String, f64, i64)| {
        b.2.cmp(&a.2).then_with(|| a.0.cmp(&b.0))
    };
    shares.sort_by(by_amount);
    let remainder = total_cents - shares.iter().map(|s| s.2).sum::<i64>();
    if let Some(largest) = shares.first_mut() {
        largest.2 += remainder;
    }
    shares.sort_by(by_amount);

    shares
        .into_iter()
        .map(|(user_id, qualifying, cents)| PoolAllocation {
            user_id,
            qualifying_earnings: (qualifying * 100.0).round() / 100.0,
            amount: cents as f64 / 100.0,
        })
        .collect()
}

/// Qualifying paid earnings per user within the pool period.
fn qualifying_earnings(pool: &BonusPool, payments: &[Payment]) -> BTreeMap<String, f64> {
    let mut earnings = BTreeMap::new();
    for payment in payments {
        if payment.status != PaymentStatus::Paid {
            continue;
        }
        let Some(day) = payment.date.get(..10) else { continue };
        if day < pool.period_start.as_str() || day > pool.period_end.as_str() {
            continue;
        }
        if !pool.participants.is_empty() && !pool.participants.contains(&payment.user_id) {
            continue;
        }
        *earnings.entry(payment.user_id.clone()).or_insert(0.0) += payment.amount;
    }
    earnings
}

pub async fn pool_report(
    store: &dyn ItemStore,
    pools_table: &str,
    payments_table: &str,
    pool_id: &str,
    page_size: i32,
) -> ApiResult<PoolReport> {
    let pool = get_pool(store, pools_table, pool_id).await?;
    let filter = Filter::eq("status", AttributeValue::S(PaymentStatus::Paid.as_str().to_string()));
    let payments = scan_all(store, payments_table, Some(&filter), page_size)
        .await?
        .into_iter()
        .map(from_item)
        .collect::<ApiResult<Vec<Payment>>>()?;

    let earnings = qualifying_earnings(&pool, &payments);
    let qualifying_total = (earnings.values().sum::<f64>() * 100.0).round() / 100.0;
    let allocations = allocate(pool.total_amount, &earnings);
    tracing::info!(
        pool_id,
        recipients = allocations.len(),
        qualifying_total,
        "bonus pool report computed"
    );

    Ok(PoolReport {
        pool_id: pool.id,
        period_start: pool.period_start,
        period_end: pool.period_end,
        total_amount: pool.total_amount,
        qualifying_total,
        allocations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::create_payment;
    use crate::store::MemoryStore;
    use crate::types::PaymentInput;

    const POOLS: &str = "LeadDataTable";
    const PAYMENTS: &str = "PaymentsTable";

    fn input(id: &str, total: f64) -> BonusPoolInput {
        BonusPoolInput {
            id: Some(id.to_string()),
            name: Some("Q1 pool".to_string()),
            period_start: Some("2026-01-01".to_string()),
            period_end: Some("2026-03-31".to_string()),
            total_amount: Some(total),
            status: None,
            participants: None,
        }
    }

    async fn pay(store: &MemoryStore, user: &str, amount: f64, date: &str) {
        create_payment(
            store,
            PAYMENTS,
            PaymentInput {
                user_id: Some(user.to_string()),
                amount: Some(amount),
                date: Some(date.to_string()),
                status: Some(PaymentStatus::Paid),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    }

    #[test]
    fn test_allocation_sums_exactly() {
        let earnings = BTreeMap::from([
            ("a".to_string(), 1.0),
            ("b".to_string(), 1.0),
            ("c".to_string(), 1.0),
        ]);
        let allocations = allocate(100.0, &earnings);
        let total: i64 = allocations
            .iter()
            .map(|a| (a.amount * 100.0).round() as i64)
            .sum();
        assert_eq!(total, 10_000);
        assert_eq!(allocations[0].user_id, "a");
        assert_eq!(allocations[0].amount, 33.34);
        assert_eq!(allocations[1].amount, 33.33);

        assert!(allocate(100.0, &BTreeMap::new()).is_empty());
    }

    #[test]
    fn test_allocation_is_proportional() {
        let earnings = BTreeMap::from([("a".to_string(), 100.0), ("b".to_string(), 300.0)]);
        let allocations = allocate(1000.0, &earnings);
        assert_eq!(allocations[0].user_id, "b");
        assert_eq!(allocations[0].amount, 750.0);
        assert_eq!(allocations[1].amount, 250.0);
    }

    #[tokio::test]
    async fn test_create_validation() {
        let store = MemoryStore::new();
        let mut backwards = input("q1", 100.0);
        backwards.period_end = Some("2025-12-31".to_string());
        let err = create_pool(&store, POOLS, backwards).await.unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");

        let mut bad_date = input("q1", 100.0);
        bad_date.period_start = Some("01/01/2026".to_string());
        assert!(create_pool(&store, POOLS, bad_date).await.is_err());

        assert!(create_pool(&store, POOLS, input("q1", -5.0)).await.is_err());

        let pool = create_pool(&store, POOLS, input("q1", 100.0)).await.unwrap();
        assert_eq!(pool.status, BonusPoolStatus::Open);
        let err = create_pool(&store, POOLS, input("q1", 100.0)).await.unwrap_err();
        assert_eq!(err.code(), "CONFLICT");
    }

    #[tokio::test]
    async fn test_list_skips_envelopes() {
        use crate::auth::Caller;
        use crate::envelopes::create_envelope;
        use crate::types::CreateEnvelopeInput;

        let store = MemoryStore::new();
        create_pool(&store, POOLS, input("q1", 100.0)).await.unwrap();
        create_envelope(
            &store,
            POOLS,
            &Caller::Service,
            CreateEnvelopeInput {
                signer_name: Some("Jane".into()),
                signer_email: Some("jane@example.com".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let page = list_pools(&store, POOLS, &PageRequest::first(50)).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, "q1");
    }

    #[tokio::test]
    async fn test_distributed_pool_is_frozen() {
        let store = MemoryStore::new();
        create_pool(&store, POOLS, input("q1", 100.0)).await.unwrap();

        let updated = update_pool(
            &store,
            POOLS,
            "q1",
            BonusPoolInput {
                total_amount: Some(250.0),
                status: Some(BonusPoolStatus::Distributed),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(updated.total_amount, 250.0);
        assert_eq!(updated.name, "Q1 pool");

        let err = update_pool(
            &store,
            POOLS,
            "q1",
            BonusPoolInput {
                name: Some("renamed".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "CONFLICT");
        assert_eq!(get_pool(&store, POOLS, "q1").await.unwrap().name, "Q1 pool");
    }

    #[tokio::test]
    async fn test_report() {
        let store = MemoryStore::new();
        create_pool(&store, POOLS, input("q1", 1000.0)).await.unwrap();

        pay(&store, "u-1", 100.0, "2026-01-15T10:00:00Z").await;
        pay(&store, "u-2", 300.0, "2026-03-31T23:59:59Z").await;
        // Outside the period.
        pay(&store, "u-3", 500.0, "2026-04-01T00:00:00Z").await;

        let report = pool_report(&store, POOLS, PAYMENTS, "q1", 50).await.unwrap();
        assert_eq!(report.qualifying_total, 400.0);
        assert_eq!(report.allocations.len(), 2);
        assert_eq!(report.allocations[0].user_id, "u-2");
        assert_eq!(report.allocations[0].amount, 750.0);
        assert_eq!(report.allocations[1].amount, 250.0);

        update_pool(
            &store,
            POOLS,
            "q1",
            BonusPoolInput {
                participants: Some(vec!["u-1".to_string()]),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let report = pool_report(&store, POOLS, PAYMENTS, "q1", 50).await.unwrap();
        assert_eq!(report.allocations.len(), 1);
        assert_eq!(report.allocations[0].amount, 1000.0);
    }

    #[tokio::test]
    async fn test_report_without_earnings() {
        let store = MemoryStore::new();
        create_pool(&store, POOLS, input("q1", 1000.0)).await.unwrap();
        let report = pool_report(&store, POOLS, PAYMENTS, "q1", 50).await.unwrap();
        assert!(report.allocations.is_empty());
        assert_eq!(report.qualifying_total, 0.0);
    }
}
