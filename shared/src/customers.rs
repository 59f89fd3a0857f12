use crate::error::{on_duplicate, on_missing, ApiError, ApiResult};
use crate::keys::customer_key;
use crate::pagination::{scan_page, PageResult};
use crate::store::{from_item, to_item, Condition, ItemStore, PageRequest};
use crate::types::{email, now_timestamp, required, Customer, CustomerInput};

pub async fn list_customers(
    store: &dyn ItemStore,
    table: &str,
    request: &PageRequest,
) -> ApiResult<PageResult<Customer>> {
    let mut page = scan_page::<Customer>(store, table, None, request).await?;
    page.items.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    Ok(page)
}

pub async fn create_customer(
    store: &dyn ItemStore,
    table: &str,
    input: CustomerInput,
) -> ApiResult<Customer> {
    let now = now_timestamp();
    let customer = Customer {
        id: input
            .id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        name: required("name", input.name)?,
        email: email(input.email)?,
        created_at: now.clone(),
        updated_at: now,
    };

    let key = customer_key(&customer.id);
    store
        .put_item(table, &to_item(&key, &customer)?, &Condition::NotExists)
        .await
        .map_err(|e| on_duplicate(e, "Customer", &customer.id))?;
    tracing::info!(customer_id = %customer.id, "customer created");
    Ok(customer)
}

pub async fn get_customer(
    store: &dyn ItemStore,
    table: &str,
    customer_id: &str,
) -> ApiResult<Customer> {
    let item = store
        .get_item(table, &customer_key(customer_id))
        .await?
        .ok_or_else(|| ApiError::not_found("Customer", customer_id))?;
    from_item(item)
}

pub async fn put_customer(
    store: &dyn ItemStore,
    table: &str,
    customer_id: &str,
    input: CustomerInput,
) -> ApiResult<Customer> {
    let existing = get_customer(store, table, customer_id).await?;
    let customer = Customer {
        id: existing.id,
        name: required("name", input.name)?,
        email: email(input.email)?,
        created_at: existing.created_at,
        updated_at: now_timestamp(),
    };

    let key = customer_key(customer_id);
    store
        .put_item(table, &to_item(&key, &customer)?, &Condition::Exists)
        .await
        .map_err(|e| on_missing(e, "Customer", customer_id))?;
    Ok(customer)
}
