use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use tokio::sync::RwLock;

use super::{Condition, Filter, Item, ItemStore, Page, PageRequest, WriteOp};
use crate::error::StoreError;
use crate::keys::TableKey;

type Table = BTreeMap<TableKey, Item>;

/// In-process [`ItemStore`] with DynamoDB's ordering and condition semantics.
///
/// Items are kept sorted by `(PK, SK)`, so queries come back in sort key
/// order and scans in a stable order for paging.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<HashMap<String, Table>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of items in a table, for assertions.
    pub async fn item_count(&self, table: &str) -> usize {
        self.tables
            .read()
            .await
            .get(table)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }
}

fn key_of(item: &Item) -> Result<TableKey, StoreError> {
    TableKey::from_item(item)
        .ok_or_else(|| StoreError::Permanent("item is missing its PK/SK attributes".to_string()))
}

fn condition_failed(table: &str, key: &TableKey) -> StoreError {
    StoreError::ConditionFailed(format!("{} {}/{}", table, key.pk, key.sk))
}

fn apply_update(current: Option<&Item>, key: &TableKey, set: &[(String, AttributeValue)]) -> Item {
    let mut item = current.cloned().unwrap_or_else(|| key.to_item());
    for (attribute, value) in set {
        item.insert(attribute.clone(), value.clone());
    }
    item
}

/// Walks `candidates` after `start_key`, evaluating at most `limit` items.
fn paginate<'a, I>(candidates: I, page: &PageRequest, filter: Option<&Filter>) -> Page
where
    I: Iterator<Item = (&'a TableKey, &'a Item)>,
{
    let limit = page.limit.filter(|l| *l > 0).map(|l| l as usize);
    let mut items = Vec::new();
    let mut evaluated = 0usize;
    let mut last_key = None;
    let mut remaining = candidates
        .filter(|(key, _)| page.start_key.as_ref().map_or(true, |start| *key > start))
        .peekable();

    while let Some((key, item)) = remaining.next() {
        evaluated += 1;
        if filter.map_or(true, |f| f.matches(item)) {
            items.push(item.clone());
        }
        if limit == Some(evaluated) {
            if remaining.peek().is_some() {
                last_key = Some(key.clone());
            }
            break;
        }
    }
    Page { items, last_key }
}

#[async_trait]
impl ItemStore for MemoryStore {
    async fn get_item(&self, table: &str, key: &TableKey) -> Result<Option<Item>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.get(table).and_then(|t| t.get(key)).cloned())
    }

    async fn put_item(
        &self,
        table: &str,
        item: &Item,
        condition: &Condition,
    ) -> Result<(), StoreError> {
        let key = key_of(item)?;
        let mut tables = self.tables.write().await;
        let entries = tables.entry(table.to_string()).or_default();
        if !condition.holds(entries.get(&key)) {
            return Err(condition_failed(table, &key));
        }
        entries.insert(key, item.clone());
        Ok(())
    }

    async fn update_item(
        &self,
        table: &str,
        key: &TableKey,
        set: &[(String, AttributeValue)],
        condition: &Condition,
    ) -> Result<Item, StoreError> {
        let mut tables = self.tables.write().await;
        let entries = tables.entry(table.to_string()).or_default();
        let current = entries.get(key);
        if !condition.holds(current) {
            return Err(condition_failed(table, key));
        }
        let updated = apply_update(current, key, set);
        entries.insert(key.clone(), updated.clone());
        Ok(updated)
    }

    async fn query(
        &self,
        table: &str,
        pk: &str,
        sk_prefix: Option<&str>,
        page: &PageRequest,
    ) -> Result<Page, StoreError> {
        let tables = self.tables.read().await;
        let Some(entries) = tables.get(table) else {
            return Ok(Page::default());
        };
        let in_partition = entries.iter().filter(|(key, _)| {
            key.pk == pk && sk_prefix.map_or(true, |prefix| key.sk.starts_with(prefix))
        });
        Ok(paginate(in_partition, page, None))
    }

    async fn scan(
        &self,
        table: &str,
        filter: Option<&Filter>,
        page: &PageRequest,
    ) -> Result<Page, StoreError> {
        let tables = self.tables.read().await;
        let Some(entries) = tables.get(table) else {
            return Ok(Page::default());
        };
        Ok(paginate(entries.iter(), page, filter))
    }

    async fn transact_write(&self, ops: &[WriteOp]) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;

        // Every condition is checked before anything is written.
        let mut reasons = Vec::with_capacity(ops.len());
        for op in ops {
            let (table, key, condition) = match op {
                WriteOp::Put {
                    table,
                    item,
                    condition,
                } => (table, key_of(item)?, condition),
                WriteOp::Update {
                    table,
                    key,
                    condition,
                    ..
                } => (table, key.clone(), condition),
            };
            let current = tables.get(table.as_str()).and_then(|t| t.get(&key));
            reasons.push(if condition.holds(current) {
                "None"
            } else {
                "ConditionalCheckFailed"
            });
        }
        if reasons.contains(&"ConditionalCheckFailed") {
            return Err(StoreError::ConditionFailed(format!(
                "transaction cancelled: {:?}",
                reasons
            )));
        }

        for op in ops {
            match op {
                WriteOp::Put { table, item, .. } => {
                    let key = key_of(item)?;
                    tables
                        .entry(table.clone())
                        .or_default()
                        .insert(key, item.clone());
                }
                WriteOp::Update { table, key, set, .. } => {
                    let entries = tables.entry(table.clone()).or_default();
                    let updated = apply_update(entries.get(key), key, set);
                    entries.insert(key.clone(), updated);
                }
            }
        }
        Ok(())
    }
}
