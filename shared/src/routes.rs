//! The REST routing table.
//!
//! Every resource served through API Gateway is listed here with the Lambda
//! that serves it, whether it sits behind the API key, and who may call it.

use std::collections::HashMap;

use lambda_http::Request;

use crate::auth::Access;
use crate::config::Config;
use crate::error::{ApiError, ApiResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handler {
    Profile,
    Partner,
    Customer,
    Lead,
    Ops,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    GetUser,
    PutUser,
    ListUserPayments,
    ListPayments,
    CreatePayment,
    GetPayment,
    UpdatePayment,
    ListPartners,
    CreatePartner,
    GetPartner,
    PutPartner,
    ListCustomers,
    CreateCustomer,
    GetCustomer,
    PutCustomer,
    ListLeadUsers,
    CreateEnvelope,
    GetEnvelope,
    DocusignCallback,
    ListBonusPools,
    CreateBonusPool,
    GetBonusPool,
    UpdateBonusPool,
    BonusPoolReport,
}

#[derive(Debug)]
pub struct Route {
    pub resource: &'static str,
    pub method: &'static str,
    pub endpoint: Endpoint,
    pub handler: Handler,
    pub api_key_required: bool,
    pub access: Access,
}

const fn route(
    resource: &'static str,
    method: &'static str,
    endpoint: Endpoint,
    handler: Handler,
    access: Access,
) -> Route {
    Route {
        resource,
        method,
        endpoint,
        handler,
        api_key_required: true,
        access,
    }
}

pub static ROUTES: &[Route] = &[
    // --- PROFILE ---
    route("/users/{userId}", "GET", Endpoint::GetUser, Handler::Profile, Access::SelfOrStaff),
    route("/users/{userId}", "PUT", Endpoint::PutUser, Handler::Profile, Access::SelfOrAdmin),
    route("/users/{userId}/payments", "GET", Endpoint::ListUserPayments, Handler::Profile, Access::SelfOrStaff),
    route("/payments", "GET", Endpoint::ListPayments, Handler::Profile, Access::Staff),
    route("/payments", "POST", Endpoint::CreatePayment, Handler::Profile, Access::Admin),
    // Ownership is checked once the payment is loaded.
    route("/payments/{paymentId}", "GET", Endpoint::GetPayment, Handler::Profile, Access::Any),
    route("/payments/{paymentId}", "PUT", Endpoint::UpdatePayment, Handler::Profile, Access::Admin),
    // --- PARTNER ---
    route("/partners", "GET", Endpoint::ListPartners, Handler::Partner, Access::Any),
    route("/partners", "POST", Endpoint::CreatePartner, Handler::Partner, Access::Admin),
    route("/partners/{partnerId}", "GET", Endpoint::GetPartner, Handler::Partner, Access::Any),
    route("/partners/{partnerId}", "PUT", Endpoint::PutPartner, Handler::Partner, Access::Admin),
    // --- CUSTOMER ---
    route("/customers", "GET", Endpoint::ListCustomers, Handler::Customer, Access::Staff),
    route("/customers", "POST", Endpoint::CreateCustomer, Handler::Customer, Access::Admin),
    route("/customers/{customerId}", "GET", Endpoint::GetCustomer, Handler::Customer, Access::Staff),
    route("/customers/{customerId}", "PUT", Endpoint::PutCustomer, Handler::Customer, Access::Admin),
    // --- LEAD ---
    route("/lead/users", "GET", Endpoint::ListLeadUsers, Handler::Lead, Access::Staff),
    // --- OPS ---
    route("/docusign/envelopes", "POST", Endpoint::CreateEnvelope, Handler::Ops, Access::Any),
    route("/docusign/envelopes/{envelopeId}", "GET", Endpoint::GetEnvelope, Handler::Ops, Access::Any),
    Route {
        resource: "/docusign/callback",
        method: "POST",
        endpoint: Endpoint::DocusignCallback,
        handler: Handler::Ops,
        api_key_required: false,
        access: Access::Any,
    },
    route("/bonus-pools", "GET", Endpoint::ListBonusPools, Handler::Ops, Access::Staff),
    route("/bonus-pools", "POST", Endpoint::CreateBonusPool, Handler::Ops, Access::Admin),
    route("/bonus-pools/{poolId}", "GET", Endpoint::GetBonusPool, Handler::Ops, Access::Staff),
    route("/bonus-pools/{poolId}", "PUT", Endpoint::UpdateBonusPool, Handler::Ops, Access::Admin),
    route("/bonus-pools/{poolId}/report", "GET", Endpoint::BonusPoolReport, Handler::Ops, Access::Staff),
];

#[derive(Debug)]
pub enum RouteMatch {
    Found {
        route: &'static Route,
        params: HashMap<&'static str, String>,
    },
    MethodNotAllowed,
    NotFound,
}

/// Matches a path against a `/a/{b}/c` template, capturing the braces.
fn match_resource(resource: &'static str, path: &str) -> Option<HashMap<&'static str, String>> {
    let template: Vec<&'static str> = resource.split('/').filter(|s| !s.is_empty()).collect();
    let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if template.len() != parts.len() {
        return None;
    }

    let mut params = HashMap::new();
    for (segment, part) in template.into_iter().zip(parts) {
        match segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            Some(name) => {
                params.insert(name, part.to_string());
            }
            None if segment == part => {}
            None => return None,
        }
    }
    Some(params)
}

/// Finds the route this handler serves for `method` and `path`.
pub fn match_route(handler: Handler, method: &str, path: &str) -> RouteMatch {
    let mut path_known = false;
    for route in ROUTES.iter().filter(|r| r.handler == handler) {
        if let Some(params) = match_resource(route.resource, path) {
            if route.method.eq_ignore_ascii_case(method) {
                return RouteMatch::Found { route, params };
            }
            path_known = true;
        }
    }
    if path_known {
        RouteMatch::MethodNotAllowed
    } else {
        RouteMatch::NotFound
    }
}

/// Rejects key-protected requests without a (matching) `x-api-key`.
pub fn check_api_key(route: &Route, event: &Request, config: &Config) -> ApiResult<()> {
    if !route.api_key_required {
        return Ok(());
    }
    let presented = event
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty());
    match (presented, config.rest_api_key.as_deref()) {
        (None, _) => Err(ApiError::forbidden("Forbidden")),
        (Some(key), Some(expected)) if key != expected => Err(ApiError::forbidden("Forbidden")),
        _ => Ok(()),
    }
}
