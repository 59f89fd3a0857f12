use crate::error::{ApiError, ApiResult};
use crate::keys::user_profile_key;
use crate::store::{from_item, to_item, Condition, ItemStore};
use crate::types::{email, now_timestamp, required, ProfileInput, UserProfile};

pub async fn get_profile(
    store: &dyn ItemStore,
    table: &str,
    user_id: &str,
) -> ApiResult<UserProfile> {
    let item = store
        .get_item(table, &user_profile_key(user_id))
        .await?
        .ok_or_else(|| ApiError::not_found("UserProfile", user_id))?;
    from_item(item)
}

/// Replaces the whole profile. `createdAt` survives from the stored record.
pub async fn put_profile(
    store: &dyn ItemStore,
    table: &str,
    user_id: &str,
    input: ProfileInput,
) -> ApiResult<UserProfile> {
    let name = required("name", input.name)?;
    let email = email(input.email)?;

    let key = user_profile_key(user_id);
    let now = now_timestamp();
    let created_at = match store.get_item(table, &key).await? {
        Some(item) => from_item::<UserProfile>(item)?.created_at,
        None => now.clone(),
    };

    let profile = UserProfile {
        id: user_id.to_string(),
        name,
        email,
        phone: input.phone,
        address: input.address,
        company: input.company,
        upline_evc: input.upline_evc,
        upline_smd: input.upline_smd,
        bank_info_document: input.bank_info_document,
        tax_document: input.tax_document,
        created_at,
        updated_at: now,
    };

    store
        .put_item(table, &to_item(&key, &profile)?, &Condition::None)
        .await?;
    tracing::info!(user_id, "profile saved");
    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    const TABLE: &str = "UserProfileTable";

    fn input(name: &str, email: &str) -> ProfileInput {
        ProfileInput {
            name: Some(name.to_string()),
            email: Some(email.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_put_then_get_returns_updated_record() {
        let store = MemoryStore::new();
        let created = put_profile(&store, TABLE, "u-1", input("Ana", "ana@example.com"))
            .await
            .unwrap();

        let mut change = input("Ana Maria", "ana@example.com");
        change.company = Some("Miliare".to_string());
        let updated = put_profile(&store, TABLE, "u-1", change).await.unwrap();
        assert_eq!(updated.created_at, created.created_at);

        let fetched = get_profile(&store, TABLE, "u-1").await.unwrap();
        assert_eq!(fetched, updated);
        assert_eq!(fetched.company.as_deref(), Some("Miliare"));
    }

    #[tokio::test]
    async fn test_item_carries_profile_key() {
        let store = MemoryStore::new();
        put_profile(&store, TABLE, "u-7", input("Bo", "bo@example.com"))
            .await
            .unwrap();
        let item = store
            .get_item(TABLE, &user_profile_key("u-7"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item["PK"].as_s().unwrap(), "USER#u-7");
        assert_eq!(item["SK"].as_s().unwrap(), "PROFILE#u-7");
    }

    #[tokio::test]
    async fn test_missing_profile_is_not_found() {
        let store = MemoryStore::new();
        let err = get_profile(&store, TABLE, "ghost").await.unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_name_and_email_are_required() {
        let store = MemoryStore::new();
        let err = put_profile(&store, TABLE, "u-1", ProfileInput::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");

        let err = put_profile(&store, TABLE, "u-1", input("Ana", "not-an-email"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert_eq!(store.item_count(TABLE).await, 0);
    }
}
