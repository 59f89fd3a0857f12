//! Caller identity and group checks.
//!
//! A user identity is either Cognito claims placed in the request context by
//! an API Gateway authorizer, or a Cognito bearer token verified here against
//! the user pool's signing keys. IAM-signed requests are trusted services.
//! Anything else is anonymous and only reaches routes open to everyone.

use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use lambda_http::request::RequestContext;
use lambda_http::{Request, RequestExt};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{ApiError, ApiResult, ConfigError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Group {
    Admin,
    Lead,
    TeamLead,
}

impl Group {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "admin" => Some(Group::Admin),
            "lead" => Some(Group::Lead),
            "teamLead" => Some(Group::TeamLead),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    /// No verified identity.
    Anonymous,
    /// IAM-signed call from another part of the stack.
    Service,
    User { id: String, groups: Vec<Group> },
}

/// Static access rule attached to a route or resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Any,
    Staff,
    Admin,
    /// The `userId` path parameter is the caller, or the caller is staff.
    SelfOrStaff,
    /// The `userId` path parameter is the caller, or the caller is an admin.
    SelfOrAdmin,
}

impl Caller {
    pub fn user(id: impl Into<String>, groups: Vec<Group>) -> Self {
        Caller::User {
            id: id.into(),
            groups,
        }
    }

    /// Builds a user from a `sub` claim and a raw `cognito:groups` claim.
    /// Returns `None` when the subject is blank.
    pub fn from_claims(sub: &str, groups: Option<&str>) -> Option<Self> {
        let id = sub.trim();
        if id.is_empty() {
            return None;
        }
        Some(Caller::user(id, groups.map(parse_groups).unwrap_or_default()))
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            Caller::User { id, .. } => Some(id),
            Caller::Anonymous | Caller::Service => None,
        }
    }

    fn in_group(&self, wanted: &[Group]) -> bool {
        match self {
            Caller::Anonymous => false,
            Caller::Service => true,
            Caller::User { groups, .. } => groups.iter().any(|g| wanted.contains(g)),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.in_group(&[Group::Admin])
    }

    pub fn is_staff(&self) -> bool {
        self.in_group(&[Group::Admin, Group::Lead, Group::TeamLead])
    }

    fn is(&self, user_id: &str) -> bool {
        self.user_id() == Some(user_id)
    }

    /// Fails with 401 for anonymous callers.
    pub fn require_identity(&self) -> ApiResult<()> {
        match self {
            Caller::Anonymous => Err(ApiError::Unauthorized(
                "authentication required".to_string(),
            )),
            _ => Ok(()),
        }
    }

    pub fn authorize(&self, access: Access, path_user: Option<&str>) -> ApiResult<()> {
        if access == Access::Any {
            return Ok(());
        }
        self.require_identity()?;
        let allowed = match access {
            Access::Any => true,
            Access::Staff => self.is_staff(),
            Access::Admin => self.is_admin(),
            Access::SelfOrStaff => path_user.is_some_and(|u| self.is(u)) || self.is_staff(),
            Access::SelfOrAdmin => path_user.is_some_and(|u| self.is(u)) || self.is_admin(),
        };
        if allowed {
            Ok(())
        } else {
            Err(ApiError::forbidden("Forbidden"))
        }
    }

    /// Record-level check once the owner of a record is known.
    pub fn ensure_owner_or_staff(&self, owner: Option<&str>) -> ApiResult<()> {
        self.require_identity()?;
        if owner.is_some_and(|o| self.is(o)) || self.is_staff() {
            Ok(())
        } else {
            Err(ApiError::forbidden("Forbidden"))
        }
    }
}

/// Accepts `admin,lead`, `[admin lead]` and JSON array renderings of the claim.
pub fn parse_groups(raw: &str) -> Vec<Group> {
    raw.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(|g| g.trim().trim_matches('"'))
        .filter_map(Group::parse)
        .collect()
}

// ==== BEARER TOKENS ====

#[derive(Debug, Deserialize)]
struct CognitoClaims {
    sub: String,
    #[serde(rename = "cognito:groups", default)]
    groups: Vec<String>,
    /// Present on ID tokens.
    #[serde(default)]
    aud: Option<String>,
    /// Present on access tokens.
    #[serde(default)]
    client_id: Option<String>,
}

/// Verifies Cognito-issued RS256 tokens against the user pool's JWKS.
#[derive(Debug, Clone)]
pub struct TokenVerifier {
    issuer: String,
    client_id: Option<String>,
    keys: JwkSet,
}

impl TokenVerifier {
    pub fn new(issuer: impl Into<String>, client_id: Option<String>, keys: JwkSet) -> Self {
        Self {
            issuer: issuer.into(),
            client_id,
            keys,
        }
    }

    /// Downloads `<issuer>/.well-known/jwks.json`.
    pub async fn fetch(issuer: &str, client_id: Option<String>) -> Result<Self, ConfigError> {
        let url = format!("{}/.well-known/jwks.json", issuer.trim_end_matches('/'));
        let keys = reqwest::get(&url)
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| ConfigError::Jwks(e.to_string()))?
            .json::<JwkSet>()
            .await
            .map_err(|e| ConfigError::Jwks(e.to_string()))?;
        tracing::info!(issuer, keys = keys.keys.len(), "loaded token signing keys");
        Ok(Self::new(issuer, client_id, keys))
    }

    pub fn verify(&self, token: &str) -> ApiResult<Caller> {
        let rejected = |reason: String| {
            tracing::warn!(reason = %reason, "bearer token rejected");
            ApiError::Unauthorized("invalid bearer token".to_string())
        };

        let header = decode_header(token).map_err(|e| rejected(e.to_string()))?;
        let kid = header
            .kid
            .ok_or_else(|| rejected("token has no key id".to_string()))?;
        let jwk = self
            .keys
            .find(&kid)
            .ok_or_else(|| rejected(format!("unknown key id {}", kid)))?;
        let key = DecodingKey::from_jwk(jwk).map_err(|e| rejected(e.to_string()))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        validation.validate_aud = false;
        let claims = decode::<CognitoClaims>(token, &key, &validation)
            .map_err(|e| rejected(e.to_string()))?
            .claims;

        if let Some(expected) = self.client_id.as_deref() {
            let client = claims.client_id.as_deref().or(claims.aud.as_deref());
            if client != Some(expected) {
                return Err(rejected("token issued to another client".to_string()));
            }
        }

        let sub = claims.sub.trim();
        if sub.is_empty() {
            return Err(rejected("token has no subject".to_string()));
        }
        let groups = claims.groups.iter().filter_map(|g| Group::parse(g)).collect();
        Ok(Caller::user(sub, groups))
    }
}

fn bearer_token(event: &Request) -> Option<&str> {
    let raw = event.headers().get("Authorization")?.to_str().ok()?.trim();
    let (scheme, token) = raw.split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then_some(token.trim())
}

/// Whether API Gateway authenticated the request with a SigV4 signature.
fn iam_signed(context: &RequestContext) -> bool {
    match context {
        RequestContext::ApiGatewayV1(ctx) => ctx
            .identity
            .user_arn
            .as_deref()
            .is_some_and(|arn| !arn.is_empty()),
        RequestContext::ApiGatewayV2(ctx) => ctx
            .authorizer
            .as_ref()
            .is_some_and(|auth| auth.iam.is_some()),
        _ => false,
    }
}

/// Resolves the caller of a REST request.
///
/// Authorizer claims win, then a bearer token, then an IAM signature. A
/// bearer token that does not verify is rejected instead of falling through.
pub fn caller_from_request(event: &Request, verifier: Option<&TokenVerifier>) -> ApiResult<Caller> {
    let context = event.request_context_ref();
    let authorizer = context.and_then(|ctx| ctx.authorizer());

    let claim = |name: &str| -> Option<String> {
        let authorizer = authorizer?;
        authorizer
            .jwt
            .as_ref()
            .and_then(|jwt| jwt.claims.get(name).cloned())
            .or_else(|| {
                authorizer
                    .fields
                    .get("claims")
                    .and_then(|claims| claims.get(name))
                    .map(|value| match value {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
            })
    };

    if let Some(caller) = claim("sub")
        .and_then(|sub| Caller::from_claims(&sub, claim("cognito:groups").as_deref()))
    {
        tracing::info!(user_id = caller.user_id(), "caller from authorizer claims");
        return Ok(caller);
    }

    if let Some(token) = bearer_token(event) {
        let verifier = verifier.ok_or_else(|| {
            tracing::warn!("bearer token received but no user pool is configured");
            ApiError::Unauthorized("bearer tokens are not accepted".to_string())
        })?;
        let caller = verifier.verify(token)?;
        tracing::info!(user_id = caller.user_id(), "caller from bearer token");
        return Ok(caller);
    }

    if context.is_some_and(iam_signed) {
        return Ok(Caller::Service);
    }
    Ok(Caller::Anonymous)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use lambda_http::aws_lambda_events::apigw::ApiGatewayProxyRequestContext;
    use lambda_http::Body;
    use serde_json::json;

    const ISSUER: &str = "https://cognito-idp.us-east-1.amazonaws.com/us-east-1_test";
    const KEY_ID: &str = "test-key";
    const PRIVATE_KEY: &str = include_str!("../testdata/jwt_rsa.pem");
    const MODULUS: &str = "nwr5G01V7fLk3t678xExte1ETnRP-Ojw0wHB8n8b783i8IpT2RzH54J8sC6F6DYj77MfL87tjcCwq2oVfDizgn41kaXs1JgiW530GuZJ5M25L2w32JKe5OaA1vwEEeDVnXD1xhJGD5alvu_-GpUdtffFi4b8r_OaUGZgIttIoyP12uNrCRLUPbnM5a-Ets3jGD8JEQZJorHO4LpFg4MyhXRI7Nifnxxv1b5shRNgSCMs-10bO12_6aLBDmR5KWEannQ-f0fguHpN2zrRQ0jdarnP7lPy6i5Y5gP9fJe8fL9l2puTsAuCli4RFeeSs9XpurXRmwpP2UCVSvNWcMjysw";

    fn verifier(client_id: Option<&str>) -> TokenVerifier {
        let keys: JwkSet = serde_json::from_value(json!({
            "keys": [{"kty": "RSA", "kid": KEY_ID, "alg": "RS256", "use": "sig", "n": MODULUS, "e": "AQAB"}]
        }))
        .unwrap();
        TokenVerifier::new(ISSUER, client_id.map(str::to_string), keys)
    }

    fn token(claims: Value) -> String {
        let header = Header {
            kid: Some(KEY_ID.to_string()),
            ..Header::new(Algorithm::RS256)
        };
        let key = EncodingKey::from_rsa_pem(PRIVATE_KEY.as_bytes()).unwrap();
        encode(&header, &claims, &key).unwrap()
    }

    fn access_token(sub: &str, groups: &[&str]) -> String {
        token(json!({
            "sub": sub,
            "cognito:groups": groups,
            "iss": ISSUER,
            "client_id": "web-client",
            "token_use": "access",
            "exp": chrono::Utc::now().timestamp() + 3600,
        }))
    }

    fn bearer(token: &str) -> Request {
        lambda_http::http::Request::builder()
            .uri("/payments")
            .header("Authorization", format!("Bearer {}", token))
            .body(Body::Empty)
            .unwrap()
    }

    #[test]
    fn test_group_claim_formats() {
        assert_eq!(parse_groups("admin"), vec![Group::Admin]);
        assert_eq!(parse_groups("[admin lead]"), vec![Group::Admin, Group::Lead]);
        assert_eq!(parse_groups("admin,teamLead"), vec![Group::Admin, Group::TeamLead]);
        assert_eq!(
            parse_groups(r#"["lead", "teamLead"]"#),
            vec![Group::Lead, Group::TeamLead]
        );
        assert!(parse_groups("[agents]").is_empty());
        assert!(parse_groups("").is_empty());
    }

    #[test]
    fn test_blank_subject_is_not_a_user() {
        assert_eq!(Caller::from_claims("  ", Some("admin")), None);
        assert_eq!(
            Caller::from_claims("u-1", Some("lead")),
            Some(Caller::user("u-1", vec![Group::Lead]))
        );
    }

    #[test]
    fn test_service_passes_every_rule() {
        let service = Caller::Service;
        for access in [
            Access::Any,
            Access::Staff,
            Access::Admin,
            Access::SelfOrStaff,
            Access::SelfOrAdmin,
        ] {
            assert!(service.authorize(access, Some("someone")).is_ok());
        }
    }

    #[test]
    fn test_anonymous_only_reaches_open_routes() {
        let anonymous = Caller::Anonymous;
        assert!(anonymous.authorize(Access::Any, None).is_ok());
        for access in [Access::Staff, Access::Admin, Access::SelfOrStaff, Access::SelfOrAdmin] {
            let err = anonymous.authorize(access, Some("someone")).unwrap_err();
            assert_eq!(err.code(), "UNAUTHORIZED");
        }
        assert_eq!(
            anonymous.ensure_owner_or_staff(Some("u-1")).unwrap_err().code(),
            "UNAUTHORIZED"
        );
    }

    #[test]
    fn test_self_and_group_rules() {
        let agent = Caller::user("u-1", vec![]);
        assert!(agent.authorize(Access::SelfOrStaff, Some("u-1")).is_ok());
        assert!(agent.authorize(Access::SelfOrStaff, Some("u-2")).is_err());
        assert!(agent.authorize(Access::Staff, None).is_err());
        assert!(agent.authorize(Access::Any, None).is_ok());

        let lead = Caller::user("u-9", vec![Group::Lead]);
        assert!(lead.authorize(Access::SelfOrStaff, Some("u-1")).is_ok());
        assert!(lead.authorize(Access::SelfOrAdmin, Some("u-1")).is_err());
        assert!(lead.authorize(Access::Admin, None).is_err());

        let admin = Caller::user("u-0", vec![Group::Admin]);
        assert!(admin.authorize(Access::SelfOrAdmin, Some("u-1")).is_ok());
        let err = agent.authorize(Access::Admin, None).unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");
    }

    #[test]
    fn test_owner_check() {
        let agent = Caller::user("u-1", vec![]);
        assert!(agent.ensure_owner_or_staff(Some("u-1")).is_ok());
        assert!(agent.ensure_owner_or_staff(Some("u-2")).is_err());
        assert!(agent.ensure_owner_or_staff(None).is_err());
        assert!(Caller::user("t", vec![Group::TeamLead])
            .ensure_owner_or_staff(Some("u-2"))
            .is_ok());
    }

    #[test]
    fn test_authorizer_claims() {
        let mut ctx = ApiGatewayProxyRequestContext::default();
        ctx.authorizer.fields.insert(
            "claims".to_string(),
            json!({"sub": "u-1", "cognito:groups": "lead"}),
        );
        let request = lambda_http::http::Request::builder()
            .uri("/users/u-1")
            .body(Body::Empty)
            .unwrap()
            .with_request_context(RequestContext::ApiGatewayV1(ctx));
        assert_eq!(
            caller_from_request(&request, None).unwrap(),
            Caller::user("u-1", vec![Group::Lead])
        );
    }

    #[test]
    fn test_identity_headers_are_not_trusted() {
        let request = lambda_http::http::Request::builder()
            .uri("/users/someone-else/payments")
            .header("X-User-Id", "agent")
            .header("X-User-Groups", "admin")
            .body(Body::Empty)
            .unwrap();
        assert_eq!(caller_from_request(&request, None).unwrap(), Caller::Anonymous);
    }

    #[test]
    fn test_iam_signed_request_is_service() {
        let mut ctx = ApiGatewayProxyRequestContext::default();
        ctx.identity.user_arn = Some("arn:aws:sts::123456789012:assumed-role/ops/lambda".to_string());
        let request = lambda_http::http::Request::builder()
            .uri("/payments")
            .body(Body::Empty)
            .unwrap()
            .with_request_context(RequestContext::ApiGatewayV1(ctx));
        assert_eq!(caller_from_request(&request, None).unwrap(), Caller::Service);
    }

    #[test]
    fn test_verified_bearer_token() {
        let verifier = verifier(Some("web-client"));
        let caller = caller_from_request(&bearer(&access_token("u-7", &["admin", "agents"])), Some(&verifier))
            .unwrap();
        assert_eq!(caller, Caller::user("u-7", vec![Group::Admin]));
    }

    #[test]
    fn test_bearer_without_user_pool_is_rejected() {
        let err = caller_from_request(&bearer(&access_token("u-7", &["admin"])), None).unwrap_err();
        assert_eq!(err.code(), "UNAUTHORIZED");

        let err = caller_from_request(&bearer("not-a-jwt"), Some(&verifier(None))).unwrap_err();
        assert_eq!(err.code(), "UNAUTHORIZED");
    }

    #[test]
    fn test_bearer_checks_issuer_client_and_expiry() {
        let verifier = verifier(Some("web-client"));
        let expired = token(json!({
            "sub": "u-7", "iss": ISSUER, "client_id": "web-client",
            "exp": chrono::Utc::now().timestamp() - 3600,
        }));
        assert!(verifier.verify(&expired).is_err());

        let foreign = token(json!({
            "sub": "u-7", "iss": "https://issuer.example.com", "client_id": "web-client",
            "exp": chrono::Utc::now().timestamp() + 3600,
        }));
        assert!(verifier.verify(&foreign).is_err());

        let other_client = token(json!({
            "sub": "u-7", "iss": ISSUER, "aud": "mobile-client",
            "exp": chrono::Utc::now().timestamp() + 3600,
        }));
        assert!(verifier.verify(&other_client).is_err());

        let id_token = token(json!({
            "sub": "u-7", "iss": ISSUER, "aud": "web-client",
            "exp": chrono::Utc::now().timestamp() + 3600,
        }));
        assert_eq!(verifier.verify(&id_token).unwrap(), Caller::user("u-7", vec![]));
    }
}
