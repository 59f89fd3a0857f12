//! Cold-start configuration.
//!
//! Each Lambda builds one [`Config`] at startup, naming the tables it needs,
//! and hands it to the access layer inside [`AppState`](crate::AppState).
//! Nothing below this module reads the environment.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::ConfigError;
use crate::store::RetryPolicy;

pub const DEFAULT_PAGE_SIZE: i32 = 50;
pub const MAX_PAGE_SIZE: i32 = 100;

/// The tables of the stack, keyed by the environment variable that names them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Table {
    UserProfile,
    Payments,
    Partners,
    Customers,
    Referrals,
    LeadData,
}

impl Table {
    pub const fn env_var(self) -> &'static str {
        match self {
            Table::UserProfile => "USER_PROFILE_TABLE",
            Table::Payments => "PAYMENTS_TABLE",
            Table::Partners => "PARTNERS_TABLE",
            Table::Customers => "CUSTOMERS_TABLE",
            Table::Referrals => "REFERRALS_TABLE",
            Table::LeadData => "LEAD_DATA_TABLE",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    tables: BTreeMap<Table, String>,
    pub retry: RetryPolicy,
    /// When set, REST callers must present exactly this `x-api-key`.
    pub rest_api_key: Option<String>,
    /// Shared secret for DocuSign Connect HMAC signatures.
    pub docusign_hmac_secret: Option<String>,
    /// Issuer URL of the Cognito user pool whose bearer tokens are accepted.
    pub cognito_issuer: Option<String>,
    /// App client the bearer tokens must be issued to, when set.
    pub cognito_client_id: Option<String>,
    pub page_size: i32,
}

impl Config {
    /// Reads the process environment. Fails if any of `required` is unset or empty.
    pub fn from_env(required: &[Table]) -> Result<Self, ConfigError> {
        Self::from_lookup(required, |key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(required: &[Table], lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut tables = BTreeMap::new();
        for table in required {
            let name = get(table.env_var()).ok_or(ConfigError::Missing(table.env_var()))?;
            tables.insert(*table, name);
        }

        let defaults = RetryPolicy::default();
        let max_attempts = parse_var(&get, "STORE_MAX_ATTEMPTS")?.unwrap_or(defaults.max_attempts);
        if max_attempts == 0 {
            return Err(ConfigError::Invalid {
                var: "STORE_MAX_ATTEMPTS",
                reason: "must be at least 1".to_string(),
            });
        }
        let base_delay = parse_var(&get, "STORE_RETRY_BASE_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.base_delay);
        let max_delay = parse_var(&get, "STORE_RETRY_MAX_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.max_delay);

        let page_size = parse_var::<i32, _>(&get, "DEFAULT_PAGE_SIZE")?.unwrap_or(DEFAULT_PAGE_SIZE);
        if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(ConfigError::Invalid {
                var: "DEFAULT_PAGE_SIZE",
                reason: format!("must be between 1 and {}", MAX_PAGE_SIZE),
            });
        }

        let cognito_issuer = match get("COGNITO_USER_POOL_ID") {
            Some(pool) => {
                let region = get("COGNITO_REGION")
                    .or_else(|| get("AWS_REGION"))
                    .ok_or(ConfigError::Missing("AWS_REGION"))?;
                Some(format!(
                    "https://cognito-idp.{}.amazonaws.com/{}",
                    region.trim(),
                    pool.trim()
                ))
            }
            None => None,
        };

        Ok(Self {
            tables,
            retry: RetryPolicy {
                max_attempts,
                base_delay,
                max_delay,
            },
            rest_api_key: get("REST_API_KEY"),
            docusign_hmac_secret: get("DOCUSIGN_HMAC_SECRET"),
            cognito_issuer,
            cognito_client_id: get("COGNITO_CLIENT_ID"),
            page_size,
        })
    }

    /// Name of a table this handler was configured with.
    pub fn table(&self, table: Table) -> Result<&str, ConfigError> {
        self.tables
            .get(&table)
            .map(String::as_str)
            .ok_or(ConfigError::Missing(table.env_var()))
    }
}

fn parse_var<T, G>(get: &G, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    get(var)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
                var,
                reason: e.to_string(),
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_required_tables_are_loaded() {
        let config = Config::from_lookup(
            &[Table::UserProfile, Table::Payments],
            lookup(&[
                ("USER_PROFILE_TABLE", "UserProfileTable-abc"),
                ("PAYMENTS_TABLE", "PaymentsTable-def"),
            ]),
        )
        .unwrap();

        assert_eq!(config.table(Table::UserProfile).unwrap(), "UserProfileTable-abc");
        assert_eq!(config.table(Table::Payments).unwrap(), "PaymentsTable-def");
        assert_eq!(
            config.table(Table::Referrals),
            Err(ConfigError::Missing("REFERRALS_TABLE"))
        );
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
        assert!(config.rest_api_key.is_none());
        assert!(config.cognito_issuer.is_none());
    }

    #[test]
    fn test_user_pool_issuer() {
        let config = Config::from_lookup(
            &[],
            lookup(&[
                ("COGNITO_USER_POOL_ID", "us-west-2_AbC123"),
                ("AWS_REGION", "us-west-2"),
                ("COGNITO_CLIENT_ID", "web-client"),
            ]),
        )
        .unwrap();
        assert_eq!(
            config.cognito_issuer.as_deref(),
            Some("https://cognito-idp.us-west-2.amazonaws.com/us-west-2_AbC123")
        );
        assert_eq!(config.cognito_client_id.as_deref(), Some("web-client"));

        let err = Config::from_lookup(&[], lookup(&[("COGNITO_USER_POOL_ID", "p")])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("AWS_REGION"));
    }

    #[test]
    fn test_missing_table_fails_fast() {
        let err = Config::from_lookup(
            &[Table::Customers],
            lookup(&[("PARTNERS_TABLE", "p")]),
        )
        .unwrap_err();
        assert_eq!(err, ConfigError::Missing("CUSTOMERS_TABLE"));
    }

    #[test]
    fn test_blank_value_counts_as_missing() {
        let err = Config::from_lookup(&[Table::Partners], lookup(&[("PARTNERS_TABLE", "  ")]))
            .unwrap_err();
        assert_eq!(err, ConfigError::Missing("PARTNERS_TABLE"));
    }

    #[test]
    fn test_retry_and_paging_overrides() {
        let config = Config::from_lookup(
            &[],
            lookup(&[
                ("STORE_MAX_ATTEMPTS", "6"),
                ("STORE_RETRY_BASE_MS", "10"),
                ("STORE_RETRY_MAX_MS", "200"),
                ("DEFAULT_PAGE_SIZE", "25"),
                ("REST_API_KEY", "secret-key"),
            ]),
        )
        .unwrap();
        assert_eq!(config.retry.max_attempts, 6);
        assert_eq!(config.retry.base_delay, Duration::from_millis(10));
        assert_eq!(config.retry.max_delay, Duration::from_millis(200));
        assert_eq!(config.page_size, 25);
        assert_eq!(config.rest_api_key.as_deref(), Some("secret-key"));
    }

    #[test]
    fn test_invalid_numbers_are_rejected() {
        let err = Config::from_lookup(&[], lookup(&[("STORE_MAX_ATTEMPTS", "lots")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "STORE_MAX_ATTEMPTS", .. }));

        let err = Config::from_lookup(&[], lookup(&[("DEFAULT_PAGE_SIZE", "1000")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "DEFAULT_PAGE_SIZE", .. }));
    }
}
