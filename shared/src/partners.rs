use crate::error::{on_duplicate, on_missing, ApiError, ApiResult};
use crate::keys::partner_key;
use crate::pagination::{scan_page, PageResult};
use crate::store::{from_item, to_item, Condition, ItemStore, PageRequest};
use crate::types::{email, now_timestamp, required, Partner, PartnerInput};

/// Slugs become part of the key; keep them to URL-safe characters.
fn validate_slug(id: &str) -> ApiResult<()> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ApiError::validation(
            "id may only contain letters, digits, '-' and '_'",
        ))
    }
}

fn build(id: String, input: PartnerInput, created_at: String, now: String) -> ApiResult<Partner> {
    if let Some(compensation) = &input.compensation {
        compensation.validate()?;
    }
    Ok(Partner {
        id,
        name: required("name", input.name)?,
        email: email(input.email)?,
        website: input.website,
        description: input.description,
        status: input.status,
        compensation: input.compensation,
        commission_info: input.commission_info,
        training_links: input.training_links,
        tags: input.tags,
        created_at,
        updated_at: now,
    })
}

pub async fn list_partners(
    store: &dyn ItemStore,
    table: &str,
    request: &PageRequest,
) -> ApiResult<PageResult<Partner>> {
    let mut page = scan_page::<Partner>(store, table, None, request).await?;
    page.items.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    Ok(page)
}

pub async fn create_partner(
    store: &dyn ItemStore,
    table: &str,
    mut input: PartnerInput,
) -> ApiResult<Partner> {
    let id = match input.id.take().map(|id| id.trim().to_string()) {
        Some(id) => {
            validate_slug(&id)?;
            id
        }
        None => uuid::Uuid::new_v4().to_string(),
    };
    let now = now_timestamp();
    let partner = build(id, input, now.clone(), now)?;

    let key = partner_key(&partner.id);
    store
        .put_item(table, &to_item(&key, &partner)?, &Condition::NotExists)
        .await
        .map_err(|e| on_duplicate(e, "Partner", &partner.id))?;
    tracing::info!(partner_id = %partner.id, "partner created");
    Ok(partner)
}

pub async fn get_partner(store: &dyn ItemStore, table: &str, partner_id: &str) -> ApiResult<Partner> {
    let item = store
        .get_item(table, &partner_key(partner_id))
        .await?
        .ok_or_else(|| ApiError::not_found("Partner", partner_id))?;
    from_item(item)
}

/// Replaces an existing partner; the id comes from the path.
pub async fn put_partner(
    store: &dyn ItemStore,
    table: &str,
    partner_id: &str,
    input: PartnerInput,
) -> ApiResult<Partner> {
    let existing = get_partner(store, table, partner_id).await?;
    let partner = build(
        partner_id.to_string(),
        input,
        existing.created_at,
        now_timestamp(),
    )?;

    let key = partner_key(partner_id);
    store
        .put_item(table, &to_item(&key, &partner)?, &Condition::Exists)
        .await
        .map_err(|e| on_missing(e, "Partner", partner_id))?;
    Ok(partner)
}
