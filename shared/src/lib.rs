pub mod auth;
pub mod bonus_pools;
pub mod config;
pub mod customers;
pub mod envelopes;
pub mod error;
pub mod graphql;
pub mod http;
pub mod keys;
pub mod leads;
pub mod metrics;
pub mod pagination;
pub mod partners;
pub mod payments;
pub mod profiles;
pub mod referrals;
pub mod routes;
pub mod store;
pub mod types;

use std::sync::Arc;

use auth::TokenVerifier;
use config::{Config, Table};
use error::ConfigError;
use store::{DynamoStore, ItemStore, RetryingStore};

/// Shared application state, built once per cold start.
pub struct AppState {
    pub store: Arc<dyn ItemStore>,
    pub config: Config,
    /// Present when a Cognito user pool is configured.
    pub verifier: Option<TokenVerifier>,
}

impl AppState {
    pub fn new(store: Arc<dyn ItemStore>, config: Config) -> Arc<Self> {
        Self::with_verifier(store, config, None)
    }

    pub fn with_verifier(
        store: Arc<dyn ItemStore>,
        config: Config,
        verifier: Option<TokenVerifier>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            config,
            verifier,
        })
    }

    /// Reads the environment, loads the user pool keys and wires DynamoDB
    /// behind the retry policy.
    pub async fn from_env(required: &[Table]) -> Result<Arc<Self>, ConfigError> {
        let config = Config::from_env(required)?;
        let verifier = match config.cognito_issuer.as_deref() {
            Some(issuer) => {
                Some(TokenVerifier::fetch(issuer, config.cognito_client_id.clone()).await?)
            }
            None => None,
        };
        let dynamo = DynamoStore::from_env().await;
        let store = RetryingStore::new(dynamo, config.retry.clone());
        Ok(Self::with_verifier(Arc::new(store), config, verifier))
    }

    /// Name of a configured table.
    pub fn table(&self, table: Table) -> Result<&str, ConfigError> {
        self.config.table(table)
    }
}
