//! `limit` / `nextToken` handling for REST list endpoints.
//!
//! The token is the base64url (unpadded) JSON form of the last evaluated
//! key. Callers treat it as opaque.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::MAX_PAGE_SIZE;
use crate::error::{ApiError, ApiResult};
use crate::keys::TableKey;
use crate::store::{from_item, Filter, ItemStore, PageRequest};

pub const NEXT_TOKEN_HEADER: &str = "x-next-token";

#[derive(Serialize, Deserialize)]
struct Cursor {
    #[serde(rename = "PK")]
    pk: String,
    #[serde(rename = "SK")]
    sk: String,
}

pub fn encode_token(key: &TableKey) -> ApiResult<String> {
    let json = serde_json::to_vec(&Cursor {
        pk: key.pk.clone(),
        sk: key.sk.clone(),
    })?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

pub fn decode_token(token: &str) -> ApiResult<TableKey> {
    let invalid = || ApiError::validation("nextToken is invalid");
    let bytes = URL_SAFE_NO_PAD
        .decode(token.trim())
        .map_err(|_| invalid())?;
    let cursor: Cursor = serde_json::from_slice(&bytes).map_err(|_| invalid())?;
    Ok(TableKey::new(cursor.pk, cursor.sk))
}

/// Builds the store page request from raw query parameters.
pub fn page_request(
    limit: Option<&str>,
    next_token: Option<&str>,
    default_limit: i32,
) -> ApiResult<PageRequest> {
    let limit = match limit {
        None => default_limit,
        Some(raw) => raw
            .trim()
            .parse::<i32>()
            .ok()
            .filter(|l| (1..=MAX_PAGE_SIZE).contains(l))
            .ok_or_else(|| {
                ApiError::validation(format!("limit must be between 1 and {}", MAX_PAGE_SIZE))
            })?,
    };
    let start_key = next_token
        .filter(|t| !t.is_empty())
        .map(decode_token)
        .transpose()?;
    Ok(PageRequest {
        limit: Some(limit),
        start_key,
    })
}

/// One page of typed records plus the token for the next one.
#[derive(Debug, Clone, PartialEq)]
pub struct PageResult<T> {
    pub items: Vec<T>,
    pub next_token: Option<String>,
}

impl<T> PageResult<T> {
    pub fn new(items: Vec<T>, last_key: Option<&TableKey>) -> ApiResult<Self> {
        Ok(Self {
            items,
            next_token: last_key.map(encode_token).transpose()?,
        })
    }
}

/// One scan page decoded into records.
pub async fn scan_page<T: DeserializeOwned>(
    store: &dyn ItemStore,
    table: &str,
    filter: Option<&Filter>,
    request: &PageRequest,
) -> ApiResult<PageResult<T>> {
    let page = store.scan(table, filter, request).await?;
    let items = page
        .items
        .into_iter()
        .map(from_item)
        .collect::<ApiResult<Vec<T>>>()?;
    PageResult::new(items, page.last_key.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_is_url_safe_and_decodes() {
        let key = TableKey::new("PARTNER#a+b/c", "PROFILE#a+b/c");
        let token = encode_token(&key).unwrap();
        assert!(!token.contains('+') && !token.contains('/') && !token.contains('='));
        assert_eq!(decode_token(&token).unwrap(), key);
    }

    #[test]
    fn test_garbage_token_is_validation_error() {
        let err = decode_token("not a token!").unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        let err = decode_token(&URL_SAFE_NO_PAD.encode(b"{}")).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_limit_defaults_and_bounds() {
        let request = page_request(None, None, 50).unwrap();
        assert_eq!(request.limit, Some(50));
        assert!(request.start_key.is_none());

        assert_eq!(page_request(Some("10"), None, 50).unwrap().limit, Some(10));
        assert!(page_request(Some("0"), None, 50).is_err());
        assert!(page_request(Some("101"), None, 50).is_err());
        assert!(page_request(Some("ten"), None, 50).is_err());
    }

    #[test]
    fn test_empty_token_means_first_page() {
        let request = page_request(None, Some(""), 50).unwrap();
        assert!(request.start_key.is_none());
    }
}
