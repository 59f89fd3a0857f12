//! DocuSign envelope tracking and the Connect status callback.

use aws_sdk_dynamodb::types::AttributeValue;
use base64::{engine::general_purpose, Engine as _};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use crate::auth::Caller;
use crate::error::{on_duplicate, ApiError, ApiResult, StoreError};
use crate::keys::envelope_key;
use crate::store::{from_item, to_item, Condition, ItemStore};
use crate::types::{email, now_timestamp, required, CreateEnvelopeInput, Envelope, EnvelopeStatus};

pub const SIGNATURE_HEADER: &str = "x-docusign-signature-1";

type HmacSha256 = Hmac<Sha256>;

pub async fn create_envelope(
    store: &dyn ItemStore,
    table: &str,
    caller: &Caller,
    input: CreateEnvelopeInput,
) -> ApiResult<Envelope> {
    caller.require_identity()?;
    let owner = match caller.user_id() {
        Some(id) => Some(id.to_string()),
        None => input.user_id.filter(|id| !id.trim().is_empty()),
    };
    let signer_name = required("signerName", input.signer_name)?;
    let signer_email = email(input.signer_email)
        .map_err(|_| ApiError::validation("signerEmail is required and must be an email address"))?;

    let now = now_timestamp();
    let envelope = Envelope {
        id: input
            .envelope_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        user_id: owner,
        signer_name,
        signer_email,
        template_id: input.template_id,
        document_name: input.document_name,
        status: EnvelopeStatus::Created,
        created_at: now.clone(),
        updated_at: now,
        completed_at: None,
    };

    let key = envelope_key(&envelope.id);
    store
        .put_item(table, &to_item(&key, &envelope)?, &Condition::NotExists)
        .await
        .map_err(|e| on_duplicate(e, "Envelope", &envelope.id))?;
    tracing::info!(envelope_id = %envelope.id, "envelope created");
    Ok(envelope)
}

pub async fn get_envelope(store: &dyn ItemStore, table: &str, envelope_id: &str) -> ApiResult<Envelope> {
    let item = store
        .get_item(table, &envelope_key(envelope_id))
        .await?
        .ok_or_else(|| ApiError::not_found("Envelope", envelope_id))?;
    from_item(item)
}

/// Checks `x-docusign-signature-1` against base64(HMAC-SHA256(secret, body)).
pub fn verify_signature(secret: &str, body: &[u8], signature: Option<&str>) -> ApiResult<()> {
    let invalid = || ApiError::Unauthorized("invalid callback signature".to_string());

    let signature = signature.map(str::trim).filter(|s| !s.is_empty()).ok_or_else(invalid)?;
    let expected = general_purpose::STANDARD
        .decode(signature)
        .map_err(|_| invalid())?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    mac.update(body);
    mac.verify_slice(&expected).map_err(|_| invalid())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectData {
    envelope_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CallbackPayload {
    Connect {
        event: String,
        data: ConnectData,
    },
    #[serde(rename_all = "camelCase")]
    Flat {
        envelope_id: String,
        status: String,
    },
}

impl CallbackPayload {
    fn parse(body: &[u8]) -> ApiResult<(String, EnvelopeStatus)> {
        let payload: CallbackPayload = serde_json::from_slice(body)
            .map_err(|e| ApiError::validation(format!("invalid callback payload: {}", e)))?;
        let (envelope_id, raw_status) = match payload {
            CallbackPayload::Connect { event, data } => (data.envelope_id, event),
            CallbackPayload::Flat { envelope_id, status } => (envelope_id, status),
        };
        let status = EnvelopeStatus::parse(&raw_status).ok_or_else(|| {
            ApiError::validation(format!("unsupported envelope event: {}", raw_status))
        })?;
        Ok((envelope_id, status))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallbackOutcome {
    Applied(Envelope),
    /// Late, duplicate or post-terminal event; the stored envelope is unchanged.
    Ignored(Envelope),
}

impl CallbackOutcome {
    pub fn envelope(&self) -> &Envelope {
        match self {
            CallbackOutcome::Applied(e) | CallbackOutcome::Ignored(e) => e,
        }
    }
}

/// Applies a status event. Statuses only move forward and terminal ones are final.
pub async fn apply_callback(
    store: &dyn ItemStore,
    table: &str,
    body: &[u8],
) -> ApiResult<CallbackOutcome> {
    let (envelope_id, next) = CallbackPayload::parse(body)?;
    let current = get_envelope(store, table, &envelope_id).await?;

    if current.status.is_terminal() || next <= current.status {
        tracing::info!(
            envelope_id = %envelope_id,
            current = current.status.as_str(),
            event = next.as_str(),
            "ignoring stale envelope event"
        );
        return Ok(CallbackOutcome::Ignored(current));
    }

    let now = now_timestamp();
    let mut set = vec![
        ("status".to_string(), AttributeValue::S(next.as_str().to_string())),
        ("updatedAt".to_string(), AttributeValue::S(now.clone())),
    ];
    if next == EnvelopeStatus::Completed {
        set.push(("completedAt".to_string(), AttributeValue::S(now)));
    }
    let condition = Condition::attribute_equals(
        "status",
        AttributeValue::S(current.status.as_str().to_string()),
    );

    match store
        .update_item(table, &envelope_key(&envelope_id), &set, &condition)
        .await
    {
        Ok(item) => {
            tracing::info!(
                envelope_id = %envelope_id,
                from = current.status.as_str(),
                to = next.as_str(),
                "envelope status updated"
            );
            Ok(CallbackOutcome::Applied(from_item(item)?))
        }
        // Another event moved the envelope first.
        Err(StoreError::ConditionFailed(_)) => Ok(CallbackOutcome::Ignored(
            get_envelope(store, table, &envelope_id).await?,
        )),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Group;
    use crate::store::MemoryStore;
    use serde_json::json;

    const TABLE: &str = "LeadDataTable";

    fn input(id: &str) -> CreateEnvelopeInput {
        CreateEnvelopeInput {
            envelope_id: Some(id.to_string()),
            signer_name: Some("Jane Doe".to_string()),
            signer_email: Some("jane@example.com".to_string()),
            template_id: Some("tmpl-1".to_string()),
            document_name: Some("Agent agreement".to_string()),
            user_id: Some("u-spoofed".to_string()),
        }
    }

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        general_purpose::STANDARD.encode(mac.finalize().into_bytes())
    }

    #[tokio::test]
    async fn test_user_caller_owns_envelope() {
        let store = MemoryStore::new();
        let caller = Caller::user("u-1", vec![]);
        let envelope = create_envelope(&store, TABLE, &caller, input("env-1")).await.unwrap();
        assert_eq!(envelope.user_id.as_deref(), Some("u-1"));
        assert_eq!(envelope.status, EnvelopeStatus::Created);
        assert_eq!(get_envelope(&store, TABLE, "env-1").await.unwrap(), envelope);

        let service = create_envelope(&store, TABLE, &Caller::Service, input("env-2"))
            .await
            .unwrap();
        assert_eq!(service.user_id.as_deref(), Some("u-spoofed"));

        let err = create_envelope(&store, TABLE, &caller, input("env-1")).await.unwrap_err();
        assert_eq!(err.code(), "CONFLICT");

        let err = create_envelope(&store, TABLE, &Caller::Anonymous, input("env-3"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "UNAUTHORIZED");
        assert!(get_envelope(&store, TABLE, "env-3").await.is_err());
    }

    #[tokio::test]
    async fn test_owner_or_staff_read() {
        let store = MemoryStore::new();
        let envelope = create_envelope(&store, TABLE, &Caller::user("u-1", vec![]), input("env-1"))
            .await
            .unwrap();
        let owner = envelope.user_id.as_deref();
        assert!(Caller::user("u-1", vec![]).ensure_owner_or_staff(owner).is_ok());
        assert!(Caller::user("u-2", vec![Group::Lead]).ensure_owner_or_staff(owner).is_ok());
        assert!(Caller::user("u-2", vec![]).ensure_owner_or_staff(owner).is_err());
    }

    #[test]
    fn test_signature() {
        let body = br#"{"envelopeId":"env-1","status":"sent"}"#;
        let good = sign("s3cret", body);
        assert!(verify_signature("s3cret", body, Some(&good)).is_ok());

        let err = verify_signature("other", body, Some(&good)).unwrap_err();
        assert_eq!(err.code(), "UNAUTHORIZED");
        assert!(verify_signature("s3cret", body, None).is_err());
        assert!(verify_signature("s3cret", body, Some("not base64!")).is_err());
    }

    #[tokio::test]
    async fn test_callback_moves_forward_only() {
        let store = MemoryStore::new();
        create_envelope(&store, TABLE, &Caller::Service, input("env-1"))
            .await
            .unwrap();

        let delivered = json!({"envelopeId": "env-1", "status": "delivered"}).to_string();
        let outcome = apply_callback(&store, TABLE, delivered.as_bytes()).await.unwrap();
        assert!(matches!(outcome, CallbackOutcome::Applied(_)));
        assert_eq!(outcome.envelope().status, EnvelopeStatus::Delivered);

        // A late "sent" does not regress the envelope.
        let sent = json!({"envelopeId": "env-1", "status": "sent"}).to_string();
        let outcome = apply_callback(&store, TABLE, sent.as_bytes()).await.unwrap();
        assert!(matches!(outcome, CallbackOutcome::Ignored(_)));
        assert_eq!(outcome.envelope().status, EnvelopeStatus::Delivered);

        let completed = json!({"event": "envelope-completed", "data": {"envelopeId": "env-1"}})
            .to_string();
        let outcome = apply_callback(&store, TABLE, completed.as_bytes()).await.unwrap();
        assert_eq!(outcome.envelope().status, EnvelopeStatus::Completed);
        assert!(outcome.envelope().completed_at.is_some());

        // Terminal states are final.
        let voided = json!({"envelopeId": "env-1", "status": "voided"}).to_string();
        let outcome = apply_callback(&store, TABLE, voided.as_bytes()).await.unwrap();
        assert!(matches!(outcome, CallbackOutcome::Ignored(_)));
        assert_eq!(
            get_envelope(&store, TABLE, "env-1").await.unwrap().status,
            EnvelopeStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_callback_errors() {
        let store = MemoryStore::new();
        let unknown = json!({"envelopeId": "nope", "status": "sent"}).to_string();
        let err = apply_callback(&store, TABLE, unknown.as_bytes()).await.unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");

        let err = apply_callback(&store, TABLE, b"not json").await.unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");

        let odd = json!({"envelopeId": "nope", "status": "exploded"}).to_string();
        let err = apply_callback(&store, TABLE, odd.as_bytes()).await.unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }
}
