use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;

use super::{Condition, Filter, Item, ItemStore, Page, PageRequest, WriteOp};
use crate::error::StoreError;
use crate::keys::TableKey;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, doubling from `base_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone, Copy)]
enum Kind {
    Read,
    Write,
}

impl Kind {
    fn should_retry(self, err: &StoreError) -> bool {
        match self {
            Kind::Read => err.is_retryable_read(),
            // A transient write failure may have been applied; only throttles are safe.
            Kind::Write => err.is_throttle(),
        }
    }
}

/// Retries throttled and transient store calls with exponential backoff.
pub struct RetryingStore<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: ItemStore> RetryingStore<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    async fn run<T, F, Fut>(&self, op: &'static str, kind: Kind, mut call: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.policy.max_attempts && kind.should_retry(&err) => {
                    let delay = self.policy.backoff(attempt);
                    tracing::warn!(
                        op,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying store call"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl<S: ItemStore> ItemStore for RetryingStore<S> {
    async fn get_item(&self, table: &str, key: &TableKey) -> Result<Option<Item>, StoreError> {
        self.run("get_item", Kind::Read, move || self.inner.get_item(table, key))
            .await
    }

    async fn put_item(
        &self,
        table: &str,
        item: &Item,
        condition: &Condition,
    ) -> Result<(), StoreError> {
        self.run("put_item", Kind::Write, move || {
            self.inner.put_item(table, item, condition)
        })
        .await
    }

    async fn update_item(
        &self,
        table: &str,
        key: &TableKey,
        set: &[(String, AttributeValue)],
        condition: &Condition,
    ) -> Result<Item, StoreError> {
        self.run("update_item", Kind::Write, move || {
            self.inner.update_item(table, key, set, condition)
        })
        .await
    }

    async fn query(
        &self,
        table: &str,
        pk: &str,
        sk_prefix: Option<&str>,
        page: &PageRequest,
    ) -> Result<Page, StoreError> {
        self.run("query", Kind::Read, move || {
            self.inner.query(table, pk, sk_prefix, page)
        })
        .await
    }

    async fn scan(
        &self,
        table: &str,
        filter: Option<&Filter>,
        page: &PageRequest,
    ) -> Result<Page, StoreError> {
        self.run("scan", Kind::Read, move || self.inner.scan(table, filter, page))
            .await
    }

    async fn transact_write(&self, ops: &[WriteOp]) -> Result<(), StoreError> {
        self.run("transact_write", Kind::Write, move || {
            self.inner.transact_write(ops)
        })
        .await
    }
}
