//! Key-value access to the tables.
//!
//! Entity modules talk to an [`ItemStore`]; the Lambdas plug in
//! [`DynamoStore`] wrapped in [`RetryingStore`], tests use [`MemoryStore`].

mod dynamo;
mod memory;
mod retry;

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{ApiError, StoreError};
use crate::keys::{TableKey, PK, SK};

pub use dynamo::DynamoStore;
pub use memory::MemoryStore;
pub use retry::{RetryPolicy, RetryingStore};

pub type Item = HashMap<String, AttributeValue>;

/// Write precondition, evaluated atomically by the store.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    None,
    /// An item with this key already exists.
    Exists,
    /// No item with this key exists.
    NotExists,
    /// The item exists and `attribute` currently equals `value`.
    AttributeEquals {
        attribute: String,
        value: AttributeValue,
    },
}

impl Condition {
    pub fn attribute_equals(attribute: impl Into<String>, value: AttributeValue) -> Self {
        Condition::AttributeEquals {
            attribute: attribute.into(),
            value,
        }
    }

    /// Evaluates the condition against the current item, if any.
    pub fn holds(&self, current: Option<&Item>) -> bool {
        match self {
            Condition::None => true,
            Condition::Exists => current.is_some(),
            Condition::NotExists => current.is_none(),
            Condition::AttributeEquals { attribute, value } => {
                current.and_then(|item| item.get(attribute)) == Some(value)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Equals,
    /// String attribute starting with the value.
    BeginsWith,
}

/// Scan filter on a single attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub attribute: String,
    pub op: FilterOp,
    pub value: AttributeValue,
}

impl Filter {
    pub fn eq(attribute: impl Into<String>, value: AttributeValue) -> Self {
        Self {
            attribute: attribute.into(),
            op: FilterOp::Equals,
            value,
        }
    }

    pub fn begins_with(attribute: impl Into<String>, prefix: &str) -> Self {
        Self {
            attribute: attribute.into(),
            op: FilterOp::BeginsWith,
            value: AttributeValue::S(prefix.to_string()),
        }
    }

    pub fn matches(&self, item: &Item) -> bool {
        let Some(current) = item.get(&self.attribute) else {
            return false;
        };
        match self.op {
            FilterOp::Equals => current == &self.value,
            FilterOp::BeginsWith => match (current, &self.value) {
                (AttributeValue::S(current), AttributeValue::S(prefix)) => {
                    current.starts_with(prefix.as_str())
                }
                _ => false,
            },
        }
    }
}

/// One page of a query or scan.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<Item>,
    /// Key of the last evaluated item when more results may follow.
    pub last_key: Option<TableKey>,
}

#[derive(Debug, Clone, Default)]
pub struct PageRequest {
    pub limit: Option<i32>,
    pub start_key: Option<TableKey>,
}

impl PageRequest {
    pub fn first(limit: i32) -> Self {
        Self {
            limit: Some(limit),
            start_key: None,
        }
    }
}

/// A single write inside a transaction.
#[derive(Debug, Clone)]
pub enum WriteOp {
    Put {
        table: String,
        item: Item,
        condition: Condition,
    },
    Update {
        table: String,
        key: TableKey,
        set: Vec<(String, AttributeValue)>,
        condition: Condition,
    },
}

#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Strongly consistent point read.
    async fn get_item(&self, table: &str, key: &TableKey) -> Result<Option<Item>, StoreError>;

    async fn put_item(&self, table: &str, item: &Item, condition: &Condition)
        -> Result<(), StoreError>;

    /// Sets the given attributes and returns the item as it is after the update.
    async fn update_item(
        &self,
        table: &str,
        key: &TableKey,
        set: &[(String, AttributeValue)],
        condition: &Condition,
    ) -> Result<Item, StoreError>;

    /// Items of one partition, optionally restricted to a sort key prefix, in sort key order.
    async fn query(
        &self,
        table: &str,
        pk: &str,
        sk_prefix: Option<&str>,
        page: &PageRequest,
    ) -> Result<Page, StoreError>;

    /// `limit` bounds the items evaluated, not the items returned, as in DynamoDB.
    async fn scan(
        &self,
        table: &str,
        filter: Option<&Filter>,
        page: &PageRequest,
    ) -> Result<Page, StoreError>;

    /// Applies every op or none of them.
    async fn transact_write(&self, ops: &[WriteOp]) -> Result<(), StoreError>;
}

/// Serializes a record and stamps it with its key.
pub fn to_item<T: Serialize>(key: &TableKey, record: &T) -> Result<Item, ApiError> {
    let mut item: Item = serde_dynamo::aws_sdk_dynamodb_1::to_item(record)?;
    item.insert(PK.to_string(), AttributeValue::S(key.pk.clone()));
    item.insert(SK.to_string(), AttributeValue::S(key.sk.clone()));
    Ok(item)
}

/// Deserializes a record; key attributes are ignored by the record types.
pub fn from_item<T: DeserializeOwned>(item: Item) -> Result<T, ApiError> {
    Ok(serde_dynamo::aws_sdk_dynamodb_1::from_item(item)?)
}

/// Drains every page of a scan.
pub async fn scan_all(
    store: &dyn ItemStore,
    table: &str,
    filter: Option<&Filter>,
    page_size: i32,
) -> Result<Vec<Item>, StoreError> {
    let mut items = Vec::new();
    let mut request = PageRequest::first(page_size);
    loop {
        let page = store.scan(table, filter, &request).await?;
        items.extend(page.items);
        match page.last_key {
            Some(key) => request.start_key = Some(key),
            None => return Ok(items),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &str) -> AttributeValue {
        AttributeValue::S(v.to_string())
    }

    #[test]
    fn test_condition_evaluation() {
        let item: Item = HashMap::from([("status".to_string(), s("IN_REVIEW"))]);

        assert!(Condition::None.holds(None));
        assert!(Condition::Exists.holds(Some(&item)));
        assert!(!Condition::Exists.holds(None));
        assert!(Condition::NotExists.holds(None));
        assert!(!Condition::NotExists.holds(Some(&item)));
        assert!(Condition::attribute_equals("status", s("IN_REVIEW")).holds(Some(&item)));
        assert!(!Condition::attribute_equals("status", s("PAID")).holds(Some(&item)));
        assert!(!Condition::attribute_equals("status", s("IN_REVIEW")).holds(None));
    }

    #[test]
    fn test_filter_matches_exact_value() {
        let item: Item = HashMap::from([("userId".to_string(), s("u-1"))]);
        assert!(Filter::eq("userId", s("u-1")).matches(&item));
        assert!(!Filter::eq("userId", s("u-2")).matches(&item));
        assert!(!Filter::eq("missing", s("u-1")).matches(&item));
    }

    #[test]
    fn test_filter_prefix() {
        let item: Item = HashMap::from([("PK".to_string(), s("BONUSPOOL#q1"))]);
        assert!(Filter::begins_with("PK", "BONUSPOOL#").matches(&item));
        assert!(!Filter::begins_with("PK", "ENVELOPE#").matches(&item));
    }

    #[test]
    fn test_to_item_stamps_keys() {
        #[derive(Serialize, serde::Deserialize, PartialEq, Debug)]
        #[serde(rename_all = "camelCase")]
        struct Record {
            id: String,
            client_name: String,
        }

        let key = TableKey::new("REFERRAL#r1", "METADATA#r1");
        let record = Record {
            id: "r1".into(),
            client_name: "Acme".into(),
        };
        let item = to_item(&key, &record).unwrap();
        assert_eq!(item.get("PK"), Some(&s("REFERRAL#r1")));
        assert_eq!(item.get("SK"), Some(&s("METADATA#r1")));
        assert_eq!(item.get("clientName"), Some(&s("Acme")));

        let back: Record = from_item(item).unwrap();
        assert_eq!(back, record);
    }
}
