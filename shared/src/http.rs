//! Response helpers shared by the REST Lambdas.

use std::collections::HashMap;

use lambda_http::http::StatusCode;
use lambda_http::{Body, Error, Request, RequestExt, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::auth::{caller_from_request, Caller};
use crate::error::{ApiError, ApiResult};
use crate::pagination::{self, PageResult, NEXT_TOKEN_HEADER};
use crate::routes::{check_api_key, match_route, Endpoint, Handler, RouteMatch};
use crate::store::PageRequest;
use crate::AppState;

pub const ALLOW_METHODS: &str = "GET,POST,PUT,OPTIONS";
pub const ALLOW_HEADERS: &str = "Content-Type,X-Api-Key,Authorization";

pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> ApiResult<Response<Body>> {
    let resp = Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(serde_json::to_string(body)?.into())?;
    Ok(resp)
}

/// A list page; the next-page token travels in a response header.
pub fn page_response<T: Serialize>(page: PageResult<T>) -> ApiResult<Response<Body>> {
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Expose-Headers", NEXT_TOKEN_HEADER);
    if let Some(token) = &page.next_token {
        builder = builder.header(NEXT_TOKEN_HEADER, token.as_str());
    }
    Ok(builder.body(serde_json::to_string(&page.items)?.into())?)
}

/// `{"error": code, "message": text}` with the status of the error.
pub fn error_response(err: &ApiError) -> Result<Response<Body>, Error> {
    let status = err.status_code();
    if status.is_server_error() {
        tracing::error!(code = err.code(), error = %err, "request failed");
    } else {
        tracing::warn!(code = err.code(), error = %err, "request rejected");
    }
    error_body(status, err.code(), &err.to_string())
}

fn error_body(status: StatusCode, code: &str, message: &str) -> Result<Response<Body>, Error> {
    let body = serde_json::json!({
        "error": code,
        "message": message,
    });
    let resp = Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(body.to_string().into())
        .map_err(Box::new)?;
    Ok(resp)
}

pub fn preflight() -> Result<Response<Body>, Error> {
    let resp = Response::builder()
        .status(StatusCode::OK)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Methods", ALLOW_METHODS)
        .header("Access-Control-Allow-Headers", ALLOW_HEADERS)
        .body(Body::Empty)
        .map_err(Box::new)?;
    Ok(resp)
}

pub fn parse_body<T: DeserializeOwned>(body: &[u8]) -> ApiResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ApiError::validation("request body is required"));
    }
    serde_json::from_slice(body).map_err(|e| ApiError::validation(format!("invalid body: {}", e)))
}

/// Reads `limit` and `nextToken` from the query string.
pub fn page_params(event: &Request, default_limit: i32) -> ApiResult<PageRequest> {
    let params = event.query_string_parameters_ref();
    let get = |name: &str| params.and_then(|p| p.first(name));
    pagination::page_request(get("limit"), get("nextToken"), default_limit)
}

/// Request path as the client sent it, without the API Gateway stage.
pub fn request_path(event: &Request) -> &str {
    match event.raw_http_path() {
        "" => event.uri().path(),
        path => path,
    }
}

/// A request that passed routing, the API key check and group authorization.
#[derive(Debug)]
pub struct Admitted {
    pub endpoint: Endpoint,
    pub params: HashMap<&'static str, String>,
    pub caller: Caller,
}

impl Admitted {
    pub fn param(&self, name: &str) -> ApiResult<&str> {
        self.params
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| ApiError::validation(format!("{} is required", name)))
    }
}

pub enum Gate {
    Admitted(Admitted),
    /// Preflight or rejection, ready to return.
    Respond(Response<Body>),
}

/// Runs the checks every REST Lambda applies before touching a table.
pub fn admit(handler: Handler, event: &Request, state: &AppState) -> Result<Gate, Error> {
    if event.method() == "OPTIONS" {
        return Ok(Gate::Respond(preflight()?));
    }

    let path = request_path(event);
    let (route, params) = match match_route(handler, event.method().as_str(), path) {
        RouteMatch::Found { route, params } => (route, params),
        RouteMatch::MethodNotAllowed => {
            tracing::warn!(method = %event.method(), path, "method not allowed");
            let resp = error_body(
                StatusCode::METHOD_NOT_ALLOWED,
                "METHOD_NOT_ALLOWED",
                &format!("{} is not allowed on {}", event.method(), path),
            )?;
            return Ok(Gate::Respond(resp));
        }
        RouteMatch::NotFound => {
            tracing::warn!(method = %event.method(), path, "no route");
            let resp = error_body(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                &format!("no route for {}", path),
            )?;
            return Ok(Gate::Respond(resp));
        }
    };

    if let Err(err) = check_api_key(route, event, &state.config) {
        return Ok(Gate::Respond(error_response(&err)?));
    }
    let caller = match caller_from_request(event, state.verifier.as_ref()) {
        Ok(caller) => caller,
        Err(err) => return Ok(Gate::Respond(error_response(&err)?)),
    };
    let path_user = params.get("userId").map(String::as_str);
    if let Err(err) = caller.authorize(route.access, path_user) {
        return Ok(Gate::Respond(error_response(&err)?));
    }

    Ok(Gate::Admitted(Admitted {
        endpoint: route.endpoint,
        params,
        caller,
    }))
}
