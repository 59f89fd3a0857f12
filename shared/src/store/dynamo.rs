use std::collections::HashMap;
use std::fmt::Debug;

use async_trait::async_trait;
use aws_sdk_dynamodb::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_dynamodb::operation::transact_write_items::TransactWriteItemsError;
use aws_sdk_dynamodb::types::{
    AttributeValue, Put, ReturnValue, TransactWriteItem, Update,
};
use aws_sdk_dynamodb::Client as DynamoClient;

use super::{Condition, Filter, FilterOp, Item, ItemStore, Page, PageRequest, WriteOp};
use crate::error::StoreError;
use crate::keys::{TableKey, PK};

/// [`ItemStore`] backed by the AWS SDK client.
#[derive(Clone)]
pub struct DynamoStore {
    client: DynamoClient,
}

impl DynamoStore {
    pub fn new(client: DynamoClient) -> Self {
        Self { client }
    }

    /// Builds the client from the default AWS credential/region chain.
    pub async fn from_env() -> Self {
        let config = aws_config::load_from_env().await;
        Self::new(DynamoClient::new(&config))
    }
}

/// Expression fragments for a [`Condition`].
#[derive(Default)]
struct ConditionParts {
    expression: Option<String>,
    names: HashMap<String, String>,
    values: HashMap<String, AttributeValue>,
}

fn condition_parts(condition: &Condition) -> ConditionParts {
    match condition {
        Condition::None => ConditionParts::default(),
        Condition::Exists => ConditionParts {
            expression: Some(format!("attribute_exists({PK})")),
            ..Default::default()
        },
        Condition::NotExists => ConditionParts {
            expression: Some(format!("attribute_not_exists({PK})")),
            ..Default::default()
        },
        Condition::AttributeEquals { attribute, value } => ConditionParts {
            expression: Some(format!("attribute_exists({PK}) AND #cond = :cond")),
            names: HashMap::from([("#cond".to_string(), attribute.clone())]),
            values: HashMap::from([(":cond".to_string(), value.clone())]),
        },
    }
}

/// `SET #a0 = :v0, #a1 = :v1` plus its placeholders.
fn update_parts(
    set: &[(String, AttributeValue)],
) -> (String, HashMap<String, String>, HashMap<String, AttributeValue>) {
    let mut clauses = Vec::with_capacity(set.len());
    let mut names = HashMap::new();
    let mut values = HashMap::new();
    for (i, (attribute, value)) in set.iter().enumerate() {
        clauses.push(format!("#a{i} = :v{i}"));
        names.insert(format!("#a{i}"), attribute.clone());
        values.insert(format!(":v{i}"), value.clone());
    }
    (format!("SET {}", clauses.join(", ")), names, values)
}

fn non_empty<K, V>(map: HashMap<K, V>) -> Option<HashMap<K, V>> {
    if map.is_empty() {
        None
    } else {
        Some(map)
    }
}

/// Sorts an SDK error into retry classes using the service error code.
fn classify<E, R>(err: SdkError<E, R>) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: Debug,
{
    let message = DisplayErrorContext(&err).to_string();
    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            StoreError::Transient(message)
        }
        _ => match err.code() {
            Some(
                "ProvisionedThroughputExceededException"
                | "ThrottlingException"
                | "RequestLimitExceeded",
            ) => StoreError::Throttled(message),
            Some("InternalServerError" | "ServiceUnavailable" | "TransactionConflictException") => {
                StoreError::Transient(message)
            }
            Some("ConditionalCheckFailedException") => StoreError::ConditionFailed(message),
            _ => StoreError::Permanent(message),
        },
    }
}

fn classify_transaction<R: Debug>(err: SdkError<TransactWriteItemsError, R>) -> StoreError {
    if let Some(TransactWriteItemsError::TransactionCanceledException(cancelled)) =
        err.as_service_error()
    {
        let reasons: Vec<&str> = cancelled
            .cancellation_reasons()
            .iter()
            .filter_map(|r| r.code())
            .collect();
        tracing::warn!(?reasons, "transaction cancelled");
        if reasons.contains(&"ConditionalCheckFailed") {
            return StoreError::ConditionFailed(format!("transaction cancelled: {:?}", reasons));
        }
        if reasons
            .iter()
            .any(|r| matches!(*r, "ThrottlingError" | "ProvisionedThroughputExceeded"))
        {
            return StoreError::Throttled(format!("transaction cancelled: {:?}", reasons));
        }
        return StoreError::Transient(format!("transaction cancelled: {:?}", reasons));
    }
    classify(err)
}

fn to_transact_item(op: &WriteOp) -> Result<TransactWriteItem, StoreError> {
    let built = match op {
        WriteOp::Put {
            table,
            item,
            condition,
        } => {
            let parts = condition_parts(condition);
            let put = Put::builder()
                .table_name(table)
                .set_item(Some(item.clone()))
                .set_condition_expression(parts.expression)
                .set_expression_attribute_names(non_empty(parts.names))
                .set_expression_attribute_values(non_empty(parts.values))
                .build()
                .map_err(|e| StoreError::Permanent(format!("invalid put: {}", e)))?;
            TransactWriteItem::builder().put(put).build()
        }
        WriteOp::Update {
            table,
            key,
            set,
            condition,
        } => {
            let parts = condition_parts(condition);
            let (expression, mut names, mut values) = update_parts(set);
            names.extend(parts.names);
            values.extend(parts.values);
            let update = Update::builder()
                .table_name(table)
                .set_key(Some(key.to_item()))
                .update_expression(expression)
                .set_condition_expression(parts.expression)
                .set_expression_attribute_names(non_empty(names))
                .set_expression_attribute_values(non_empty(values))
                .build()
                .map_err(|e| StoreError::Permanent(format!("invalid update: {}", e)))?;
            TransactWriteItem::builder().update(update).build()
        }
    };
    Ok(built)
}

#[async_trait]
impl ItemStore for DynamoStore {
    async fn get_item(&self, table: &str, key: &TableKey) -> Result<Option<Item>, StoreError> {
        let result = self
            .client
            .get_item()
            .table_name(table)
            .set_key(Some(key.to_item()))
            .consistent_read(true)
            .send()
            .await
            .map_err(classify)?;
        Ok(result.item)
    }

    async fn put_item(
        &self,
        table: &str,
        item: &Item,
        condition: &Condition,
    ) -> Result<(), StoreError> {
        let parts = condition_parts(condition);
        self.client
            .put_item()
            .table_name(table)
            .set_item(Some(item.clone()))
            .set_condition_expression(parts.expression)
            .set_expression_attribute_names(non_empty(parts.names))
            .set_expression_attribute_values(non_empty(parts.values))
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn update_item(
        &self,
        table: &str,
        key: &TableKey,
        set: &[(String, AttributeValue)],
        condition: &Condition,
    ) -> Result<Item, StoreError> {
        let parts = condition_parts(condition);
        let (expression, mut names, mut values) = update_parts(set);
        names.extend(parts.names);
        values.extend(parts.values);

        let result = self
            .client
            .update_item()
            .table_name(table)
            .set_key(Some(key.to_item()))
            .update_expression(expression)
            .set_condition_expression(parts.expression)
            .set_expression_attribute_names(non_empty(names))
            .set_expression_attribute_values(non_empty(values))
            .return_values(ReturnValue::AllNew)
            .send()
            .await
            .map_err(classify)?;
        Ok(result.attributes.unwrap_or_default())
    }

    async fn query(
        &self,
        table: &str,
        pk: &str,
        sk_prefix: Option<&str>,
        page: &PageRequest,
    ) -> Result<Page, StoreError> {
        let mut builder = self
            .client
            .query()
            .table_name(table)
            .consistent_read(true)
            .expression_attribute_values(":pk", AttributeValue::S(pk.to_string()))
            .set_limit(page.limit)
            .set_exclusive_start_key(page.start_key.as_ref().map(TableKey::to_item));

        builder = match sk_prefix {
            Some(prefix) => builder
                .key_condition_expression("PK = :pk AND begins_with(SK, :sk_prefix)")
                .expression_attribute_values(":sk_prefix", AttributeValue::S(prefix.to_string())),
            None => builder.key_condition_expression("PK = :pk"),
        };

        let result = builder.send().await.map_err(classify)?;
        Ok(Page {
            items: result.items.unwrap_or_default(),
            last_key: result
                .last_evaluated_key
                .as_ref()
                .and_then(TableKey::from_item),
        })
    }

    async fn scan(
        &self,
        table: &str,
        filter: Option<&Filter>,
        page: &PageRequest,
    ) -> Result<Page, StoreError> {
        let mut builder = self
            .client
            .scan()
            .table_name(table)
            .consistent_read(true)
            .set_limit(page.limit)
            .set_exclusive_start_key(page.start_key.as_ref().map(TableKey::to_item));

        if let Some(filter) = filter {
            let expression = match filter.op {
                FilterOp::Equals => "#f = :f",
                FilterOp::BeginsWith => "begins_with(#f, :f)",
            };
            builder = builder
                .filter_expression(expression)
                .expression_attribute_names("#f", filter.attribute.clone())
                .expression_attribute_values(":f", filter.value.clone());
        }

        let result = builder.send().await.map_err(classify)?;
        Ok(Page {
            items: result.items.unwrap_or_default(),
            last_key: result
                .last_evaluated_key
                .as_ref()
                .and_then(TableKey::from_item),
        })
    }

    async fn transact_write(&self, ops: &[WriteOp]) -> Result<(), StoreError> {
        let items = ops
            .iter()
            .map(to_transact_item)
            .collect::<Result<Vec<_>, _>>()?;

        self.client
            .transact_write_items()
            .set_transact_items(Some(items))
            .send()
            .await
            .map_err(classify_transaction)?;
        Ok(())
    }
}
