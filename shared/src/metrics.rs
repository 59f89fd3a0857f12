//! Dashboard aggregates, computed on demand from a user's referrals and payments.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Datelike, Utc};

use crate::error::{ApiError, ApiResult};
use crate::payments::list_user_payments;
use crate::referrals::list_referrals;
use crate::store::ItemStore;
use crate::types::{DashboardMetrics, MonthlyEarning, Payment, PaymentStatus, Referral, ReferralStatus};

pub const DEFAULT_MONTHS: u32 = 6;
pub const MAX_MONTHS: u32 = 36;

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn compute_dashboard(referrals: &[Referral], payments: &[Payment]) -> DashboardMetrics {
    let total_earnings: f64 = payments
        .iter()
        .filter(|p| p.status == PaymentStatus::Paid)
        .map(|p| p.amount)
        .sum();
    let total = referrals.len() as u32;
    let pending = referrals.iter().filter(|r| r.status.is_pending()).count() as u32;
    let paid = referrals
        .iter()
        .filter(|r| r.status == ReferralStatus::Paid)
        .count() as u32;
    let success_rate = if total == 0 {
        0.0
    } else {
        f64::from(paid) / f64::from(total) * 100.0
    };

    DashboardMetrics {
        total_earnings: round_cents(total_earnings),
        pending_commissions: pending,
        total_referrals: total,
        success_rate,
    }
}

/// The `count` months ending at `now`, oldest first, as `YYYY-MM`.
fn month_window(count: u32, now: DateTime<Utc>) -> Vec<String> {
    let current = now.year() * 12 + now.month0() as i32;
    (0..count as i32)
        .rev()
        .map(|back| {
            let index = current - back;
            format!("{:04}-{:02}", index.div_euclid(12), index.rem_euclid(12) + 1)
        })
        .collect()
}

fn month_of(timestamp: &str) -> Option<&str> {
    timestamp.get(..7)
}

pub fn validate_months(months: Option<i64>) -> ApiResult<u32> {
    match months {
        None => Ok(DEFAULT_MONTHS),
        Some(m) if (1..=i64::from(MAX_MONTHS)).contains(&m) => Ok(m as u32),
        Some(_) => Err(ApiError::validation(format!(
            "months must be between 1 and {}",
            MAX_MONTHS
        ))),
    }
}

/// Earnings per month: paid payments by payment date, plus paid referrals
/// with no recorded payment by creation date.
pub fn compute_earnings_by_month(
    referrals: &[Referral],
    payments: &[Payment],
    months: u32,
    now: DateTime<Utc>,
) -> Vec<MonthlyEarning> {
    let mut totals: BTreeMap<String, f64> = month_window(months, now)
        .into_iter()
        .map(|m| (m, 0.0))
        .collect();

    let paid_payments: Vec<&Payment> = payments
        .iter()
        .filter(|p| p.status == PaymentStatus::Paid)
        .collect();
    let referenced: HashSet<&str> = paid_payments
        .iter()
        .map(|p| p.referral_id.as_str())
        .filter(|id| !id.is_empty())
        .collect();

    for payment in &paid_payments {
        if let Some(total) = month_of(&payment.date).and_then(|m| totals.get_mut(m)) {
            *total += payment.amount;
        }
    }
    for referral in referrals {
        if referral.status != ReferralStatus::Paid || referenced.contains(referral.id.as_str()) {
            continue;
        }
        let Some(amount) = referral.amount else { continue };
        if let Some(total) = month_of(&referral.created_at).and_then(|m| totals.get_mut(m)) {
            *total += amount;
        }
    }

    totals
        .into_iter()
        .map(|(month, earnings)| MonthlyEarning {
            month,
            earnings: round_cents(earnings.max(0.0)),
        })
        .collect()
}

pub async fn dashboard_metrics(
    store: &dyn ItemStore,
    referrals_table: &str,
    payments_table: &str,
    user_id: &str,
    page_size: i32,
) -> ApiResult<DashboardMetrics> {
    let referrals = list_referrals(store, referrals_table, user_id, page_size).await?;
    let payments = list_user_payments(store, payments_table, user_id, page_size).await?;
    Ok(compute_dashboard(&referrals, &payments))
}

pub async fn earnings_by_month(
    store: &dyn ItemStore,
    referrals_table: &str,
    payments_table: &str,
    user_id: &str,
    months: u32,
    page_size: i32,
) -> ApiResult<Vec<MonthlyEarning>> {
    let referrals = list_referrals(store, referrals_table, user_id, page_size).await?;
    let payments = list_user_payments(store, payments_table, user_id, page_size).await?;
    Ok(compute_earnings_by_month(&referrals, &payments, months, Utc::now()))
}
