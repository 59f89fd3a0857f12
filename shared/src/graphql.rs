//! AppSync direct Lambda resolvers for the user-facing GraphQL API.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::{parse_groups, Access, Caller, Group};
use crate::config::Table;
use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::payments::list_user_payments;
use crate::referrals::{create_referral, get_referral, list_referrals, update_referral_status};
use crate::types::{CreateReferralInput, UpdateReferralStatusInput};
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldInfo {
    pub field_name: String,
    #[serde(default)]
    pub parent_type_name: Option<String>,
}

/// Cognito, IAM or (for API keys) absent identity.
#[derive(Debug, Deserialize, Default)]
pub struct Identity {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub groups: Option<Vec<String>>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub claims: Option<Value>,
    /// Set by AppSync for IAM-signed requests.
    #[serde(default, rename = "userArn")]
    pub user_arn: Option<String>,
}

impl Identity {
    pub fn caller(&self) -> Caller {
        let Some(sub) = self.sub.as_deref().filter(|s| !s.is_empty()) else {
            return match self.user_arn.as_deref() {
                Some(arn) if !arn.is_empty() => Caller::Service,
                _ => Caller::Anonymous,
            };
        };
        let groups = match &self.groups {
            Some(groups) => groups.iter().filter_map(|g| Group::parse(g)).collect(),
            None => self
                .claims
                .as_ref()
                .and_then(|c| c.get("cognito:groups"))
                .map(|g| match g {
                    Value::String(raw) => parse_groups(raw),
                    other => parse_groups(&other.to_string()),
                })
                .unwrap_or_default(),
        };
        Caller::user(sub, groups)
    }
}

#[derive(Debug, Deserialize)]
pub struct AppSyncEvent {
    pub info: FieldInfo,
    #[serde(default)]
    pub arguments: Value,
    #[serde(default)]
    pub identity: Option<Identity>,
}

impl AppSyncEvent {
    pub fn caller(&self) -> Caller {
        self.identity
            .as_ref()
            .map(Identity::caller)
            .unwrap_or(Caller::Anonymous)
    }
}

/// Error returned to AppSync as `errorType` / `errorMessage`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolverError {
    pub error_type: &'static str,
    pub error_message: String,
}

impl std::fmt::Display for ResolverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error_type, self.error_message)
    }
}

impl std::error::Error for ResolverError {}

impl From<ApiError> for ResolverError {
    fn from(err: ApiError) -> Self {
        Self {
            error_type: err.code(),
            error_message: err.to_string(),
        }
    }
}

impl From<ResolverError> for lambda_runtime::Diagnostic {
    fn from(err: ResolverError) -> Self {
        lambda_runtime::Diagnostic {
            error_type: err.error_type.to_string(),
            error_message: err.error_message,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Referrals,
    Referral,
    Payments,
    DashboardMetrics,
    EarningsByMonth,
    CreateReferral,
    UpdateReferralStatus,
}

/// Field name to resolver, built once per cold start.
pub struct ResolverTable {
    fields: HashMap<&'static str, Field>,
}

impl Default for ResolverTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ResolverTable {
    pub fn new() -> Self {
        let fields = HashMap::from([
            ("referrals", Field::Referrals),
            ("referral", Field::Referral),
            ("payments", Field::Payments),
            ("dashboardMetrics", Field::DashboardMetrics),
            ("earningsByMonth", Field::EarningsByMonth),
            ("createReferral", Field::CreateReferral),
            ("updateReferralStatus", Field::UpdateReferralStatus),
        ]);
        Self { fields }
    }

    pub fn lookup(&self, field_name: &str) -> ApiResult<Field> {
        self.fields
            .get(field_name)
            .copied()
            .ok_or_else(|| ApiError::validation(format!("unknown field: {}", field_name)))
    }

    pub async fn resolve(&self, state: &AppState, event: AppSyncEvent) -> Result<Value, ResolverError> {
        let field = self.lookup(&event.info.field_name)?;
        let caller = event.caller();
        tracing::info!(field = %event.info.field_name, user = ?caller.user_id(), "resolving field");
        Ok(resolve_field(state, field, &caller, &event.arguments).await?)
    }
}

fn string_arg<'a>(args: &'a Value, name: &str) -> Option<&'a str> {
    args.get(name)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn input_arg<T: DeserializeOwned>(args: &Value) -> ApiResult<T> {
    let input = args
        .get("input")
        .cloned()
        .ok_or_else(|| ApiError::validation("input is required"))?;
    serde_json::from_value(input).map_err(|e| ApiError::validation(format!("invalid input: {}", e)))
}

/// The user a per-user field acts on: the caller, or `userId` for services
/// and staff looking at someone else.
fn acting_user(caller: &Caller, args: &Value) -> ApiResult<String> {
    caller.require_identity()?;
    let requested = string_arg(args, "userId");
    match (caller.user_id(), requested) {
        (Some(me), None) => Ok(me.to_string()),
        (Some(_), Some(other)) => {
            caller.authorize(Access::SelfOrStaff, Some(other))?;
            Ok(other.to_string())
        }
        (None, Some(other)) => Ok(other.to_string()),
        (None, None) => Err(ApiError::validation(
            "userId is required for callers without a user identity",
        )),
    }
}

async fn resolve_field(
    state: &AppState,
    field: Field,
    caller: &Caller,
    args: &Value,
) -> ApiResult<Value> {
    let store = state.store.as_ref();
    let referrals = state.table(Table::Referrals)?;
    let payments = state.table(Table::Payments)?;
    let page_size = state.config.page_size;

    let value = match field {
        Field::Referrals => {
            let user = acting_user(caller, args)?;
            serde_json::to_value(list_referrals(store, referrals, &user, page_size).await?)?
        }
        Field::Referral => {
            let id = string_arg(args, "id").ok_or_else(|| ApiError::validation("id is required"))?;
            let referral = get_referral(store, referrals, id).await?;
            caller.ensure_owner_or_staff(Some(&referral.user_id))?;
            serde_json::to_value(referral)?
        }
        Field::Payments => {
            let user = acting_user(caller, args)?;
            serde_json::to_value(list_user_payments(store, payments, &user, page_size).await?)?
        }
        Field::DashboardMetrics => {
            let user = acting_user(caller, args)?;
            serde_json::to_value(
                metrics::dashboard_metrics(store, referrals, payments, &user, page_size).await?,
            )?
        }
        Field::EarningsByMonth => {
            let user = acting_user(caller, args)?;
            let months = match args.get("months") {
                None | Some(Value::Null) => None,
                Some(v) => Some(
                    v.as_i64()
                        .ok_or_else(|| ApiError::validation("months must be an integer"))?,
                ),
            };
            let months = metrics::validate_months(months)?;
            serde_json::to_value(
                metrics::earnings_by_month(store, referrals, payments, &user, months, page_size)
                    .await?,
            )?
        }
        Field::CreateReferral => {
            let user = acting_user(caller, args)?;
            let input: CreateReferralInput = input_arg(args)?;
            serde_json::to_value(create_referral(store, referrals, &user, input).await?)?
        }
        Field::UpdateReferralStatus => {
            caller.authorize(Access::Staff, None)?;
            let input: UpdateReferralStatusInput = input_arg(args)?;
            serde_json::to_value(update_referral_status(store, referrals, payments, input).await?)?
        }
    };
    Ok(value)
}
