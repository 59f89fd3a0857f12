use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};

/// RFC 3339 UTC timestamp with second precision, as stored on every record.
pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Trimmed value of a required string field.
pub(crate) fn required(field: &str, value: Option<String>) -> ApiResult<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::validation(format!("{} is required", field)))
}

pub(crate) fn email(value: Option<String>) -> ApiResult<String> {
    let email = required("email", value)?;
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(ApiError::validation("email is invalid")),
    }
}

pub(crate) fn non_negative(field: &str, value: f64) -> ApiResult<f64> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(ApiError::validation(format!(
            "{} must be a non-negative number",
            field
        )))
    }
}

/// Accepts an RFC 3339 timestamp (normalized to UTC) or a `YYYY-MM-DD` date.
pub(crate) fn payment_date(value: String) -> ApiResult<String> {
    let value = required("date", Some(value))?;
    if let Ok(ts) = chrono::DateTime::parse_from_rfc3339(&value) {
        return Ok(ts
            .with_timezone(&chrono::Utc)
            .to_rfc3339_opts(chrono::SecondsFormat::Secs, true));
    }
    chrono::NaiveDate::parse_from_str(&value, "%Y-%m-%d")
        .map(|_| value)
        .map_err(|_| {
            ApiError::validation("date must be an RFC 3339 timestamp or a YYYY-MM-DD date")
        })
}

// ========== USER PROFILE ==========
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(rename = "uplineEVC", default, skip_serializing_if = "Option::is_none")]
    pub upline_evc: Option<String>,
    #[serde(rename = "uplineSMD", default, skip_serializing_if = "Option::is_none")]
    pub upline_smd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bank_info_document: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tax_document: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Body of `PUT /users/{userId}`: the full profile minus server-managed fields.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProfileInput {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub company: Option<String>,
    #[serde(rename = "uplineEVC")]
    pub upline_evc: Option<String>,
    #[serde(rename = "uplineSMD")]
    pub upline_smd: Option<String>,
    pub bank_info_document: Option<String>,
    pub tax_document: Option<String>,
}

/// Projection of a profile returned to team leads.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LeadUser {
    pub id: String,
    pub name: String,
    pub email: String,
}

// ========== PAYMENT ==========
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "Pending",
            PaymentStatus::Paid => "Paid",
            PaymentStatus::Failed => "Failed",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: String,
    #[serde(default)]
    pub referral_id: String,
    pub user_id: String,
    pub amount: f64,
    pub date: String,
    pub status: PaymentStatus,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInput {
    pub id: Option<String>,
    pub referral_id: Option<String>,
    pub user_id: Option<String>,
    pub amount: Option<f64>,
    pub date: Option<String>,
    pub status: Option<PaymentStatus>,
}

// ========== PARTNER ==========
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Compensation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_percentage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smd_percentage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evc_percentage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bonus_pool_percentage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mrn_percentage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contractor_percentage: Option<f64>,
}

impl Compensation {
    fn percentages(&self) -> [(&'static str, Option<f64>); 6] {
        [
            ("agentPercentage", self.agent_percentage),
            ("smdPercentage", self.smd_percentage),
            ("evcPercentage", self.evc_percentage),
            ("bonusPoolPercentage", self.bonus_pool_percentage),
            ("mrnPercentage", self.mrn_percentage),
            ("contractorPercentage", self.contractor_percentage),
        ]
    }

    /// Every share must be a percentage and the shares may not exceed the whole.
    pub fn validate(&self) -> ApiResult<()> {
        let mut total = 0.0;
        for (field, value) in self.percentages() {
            if let Some(value) = value {
                if !(0.0..=100.0).contains(&value) {
                    return Err(ApiError::validation(format!(
                        "compensation.{} must be between 0 and 100",
                        field
                    )));
                }
                total += value;
            }
        }
        if total > 100.0 + f64::EPSILON {
            return Err(ApiError::validation(
                "compensation percentages add up to more than 100",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct CommissionInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Partner {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compensation: Option<Compensation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commission_info: Option<CommissionInfo>,
    #[serde(default)]
    pub training_links: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PartnerInput {
    /// Slug chosen by the caller on create; ignored on update.
    pub id: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub compensation: Option<Compensation>,
    pub commission_info: Option<CommissionInfo>,
    #[serde(default)]
    pub training_links: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

// ========== CUSTOMER ==========
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: String,
    pub name: String,
    pub email: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct CustomerInput {
    pub id: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
}

// ========== REFERRAL ==========
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferralStatus {
    InProgress,
    InReview,
    Approved,
    Rejected,
    Paid,
}

impl ReferralStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReferralStatus::InProgress => "IN_PROGRESS",
            ReferralStatus::InReview => "IN_REVIEW",
            ReferralStatus::Approved => "APPROVED",
            ReferralStatus::Rejected => "REJECTED",
            ReferralStatus::Paid => "PAID",
        }
    }

    /// Counted as a pending commission on the dashboard.
    pub fn is_pending(self) -> bool {
        matches!(self, ReferralStatus::InProgress | ReferralStatus::InReview)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Referral {
    pub id: String,
    pub user_id: String,
    pub company_id: String,
    pub client_name: String,
    pub status: ReferralStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateReferralInput {
    pub company_id: Option<String>,
    pub client_name: Option<String>,
    pub amount: Option<f64>,
    /// Retries carrying the same key resolve to the same referral.
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateReferralStatusInput {
    pub id: String,
    pub status: ReferralStatus,
    /// Commission recorded when the referral is paid; defaults to the referral amount.
    pub amount: Option<f64>,
}

// ========== DASHBOARD ==========
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DashboardMetrics {
    pub total_earnings: f64,
    pub pending_commissions: u32,
    pub total_referrals: u32,
    pub success_rate: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MonthlyEarning {
    /// `YYYY-MM`
    pub month: String,
    pub earnings: f64,
}

// ========== ENVELOPE ==========
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeStatus {
    Created,
    Sent,
    Delivered,
    Completed,
    Declined,
    Voided,
}

impl EnvelopeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EnvelopeStatus::Created => "created",
            EnvelopeStatus::Sent => "sent",
            EnvelopeStatus::Delivered => "delivered",
            EnvelopeStatus::Completed => "completed",
            EnvelopeStatus::Declined => "declined",
            EnvelopeStatus::Voided => "voided",
        }
    }

    /// Accepts bare statuses and Connect event names such as `envelope-completed`.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim().to_ascii_lowercase();
        match raw.strip_prefix("envelope-").unwrap_or(&raw) {
            "created" => Some(EnvelopeStatus::Created),
            "sent" => Some(EnvelopeStatus::Sent),
            "delivered" => Some(EnvelopeStatus::Delivered),
            "completed" => Some(EnvelopeStatus::Completed),
            "declined" => Some(EnvelopeStatus::Declined),
            "voided" => Some(EnvelopeStatus::Voided),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EnvelopeStatus::Completed | EnvelopeStatus::Declined | EnvelopeStatus::Voided
        )
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub signer_name: String,
    pub signer_email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_name: Option<String>,
    pub status: EnvelopeStatus,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateEnvelopeInput {
    pub envelope_id: Option<String>,
    pub signer_name: Option<String>,
    pub signer_email: Option<String>,
    pub template_id: Option<String>,
    pub document_name: Option<String>,
    /// Only honored for service callers; user callers always own their envelopes.
    pub user_id: Option<String>,
}

// ========== BONUS POOL ==========
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BonusPoolStatus {
    #[default]
    Open,
    Closed,
    Distributed,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BonusPool {
    pub id: String,
    pub name: String,
    /// `YYYY-MM-DD`, inclusive
    pub period_start: String,
    /// `YYYY-MM-DD`, inclusive
    pub period_end: String,
    pub total_amount: f64,
    pub status: BonusPoolStatus,
    /// Empty means every user with qualifying earnings.
    #[serde(default)]
    pub participants: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct BonusPoolInput {
    pub id: Option<String>,
    pub name: Option<String>,
    pub period_start: Option<String>,
    pub period_end: Option<String>,
    pub total_amount: Option<f64>,
    pub status: Option<BonusPoolStatus>,
    pub participants: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PoolAllocation {
    pub user_id: String,
    pub qualifying_earnings: f64,
    pub amount: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PoolReport {
    pub pool_id: String,
    pub period_start: String,
    pub period_end: String,
    pub total_amount: f64,
    pub qualifying_total: f64,
    pub allocations: Vec<PoolAllocation>,
}
