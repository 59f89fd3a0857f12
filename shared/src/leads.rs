use crate::error::ApiResult;
use crate::pagination::{scan_page, PageResult};
use crate::store::{ItemStore, PageRequest};
use crate::types::{LeadUser, UserProfile};

/// Profiles projected to `id`, `name` and `email`.
pub async fn list_lead_users(
    store: &dyn ItemStore,
    table: &str,
    request: &PageRequest,
) -> ApiResult<PageResult<LeadUser>> {
    let mut page = scan_page::<UserProfile>(store, table, None, request).await?;
    page.items.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    Ok(PageResult {
        items: page
            .items
            .into_iter()
            .map(|p| LeadUser {
                id: p.id,
                name: p.name,
                email: p.email,
            })
            .collect(),
        next_token: page.next_token,
    })
}
