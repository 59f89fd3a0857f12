use lambda_http::{http::StatusCode, Body, Error, Request, Response};
use miliare_shared::config::Table;
use miliare_shared::envelopes::{self, CallbackOutcome, SIGNATURE_HEADER};
use miliare_shared::error::{ApiError, ApiResult};
use miliare_shared::http::{
    admit, error_response, json_response, page_params, page_response, parse_body, request_path,
    Admitted, Gate,
};
use miliare_shared::routes::{Endpoint, Handler};
use miliare_shared::types::{BonusPoolInput, CreateEnvelopeInput};
use miliare_shared::{bonus_pools, AppState};
use serde_json::json;
use std::sync::Arc;

/// Ops Lambda: DocuSign envelopes, the Connect callback and bonus pools.
pub(crate) async fn function_handler(
    event: Request,
    state: Arc<AppState>,
) -> Result<Response<Body>, Error> {
    tracing::info!(method = %event.method(), path = request_path(&event), "ops lambda invoked");

    let admitted = match admit(Handler::Ops, &event, &state)? {
        Gate::Admitted(admitted) => admitted,
        Gate::Respond(resp) => return Ok(resp),
    };
    match dispatch(&event, &state, &admitted).await {
        Ok(resp) => Ok(resp),
        Err(err) => error_response(&err),
    }
}

async fn dispatch(event: &Request, state: &AppState, req: &Admitted) -> ApiResult<Response<Body>> {
    let store = state.store.as_ref();
    let table = state.table(Table::LeadData)?;

    match req.endpoint {
        Endpoint::CreateEnvelope => {
            let input: CreateEnvelopeInput = parse_body(event.body())?;
            let envelope = envelopes::create_envelope(store, table, &req.caller, input).await?;
            json_response(StatusCode::CREATED, &envelope)
        }
        Endpoint::GetEnvelope => {
            let envelope = envelopes::get_envelope(store, table, req.param("envelopeId")?).await?;
            req.caller.ensure_owner_or_staff(envelope.user_id.as_deref())?;
            json_response(StatusCode::OK, &envelope)
        }
        Endpoint::DocusignCallback => {
            let body: &[u8] = event.body().as_ref();
            if let Some(secret) = state.config.docusign_hmac_secret.as_deref() {
                let signature = event
                    .headers()
                    .get(SIGNATURE_HEADER)
                    .and_then(|v| v.to_str().ok());
                envelopes::verify_signature(secret, body, signature)?;
            }
            let outcome = envelopes::apply_callback(store, table, body).await?;
            let result = match &outcome {
                CallbackOutcome::Applied(_) => "applied",
                CallbackOutcome::Ignored(_) => "ignored",
            };
            json_response(
                StatusCode::OK,
                &json!({"result": result, "envelope": outcome.envelope()}),
            )
        }
        Endpoint::ListBonusPools => {
            let page = page_params(event, state.config.page_size)?;
            page_response(bonus_pools::list_pools(store, table, &page).await?)
        }
        Endpoint::CreateBonusPool => {
            let input: BonusPoolInput = parse_body(event.body())?;
            json_response(
                StatusCode::CREATED,
                &bonus_pools::create_pool(store, table, input).await?,
            )
        }
        Endpoint::GetBonusPool => {
            let pool = bonus_pools::get_pool(store, table, req.param("poolId")?).await?;
            json_response(StatusCode::OK, &pool)
        }
        Endpoint::UpdateBonusPool => {
            let input: BonusPoolInput = parse_body(event.body())?;
            let pool = bonus_pools::update_pool(store, table, req.param("poolId")?, input).await?;
            json_response(StatusCode::OK, &pool)
        }
        Endpoint::BonusPoolReport => {
            let payments = state.table(Table::Payments)?;
            let report = bonus_pools::pool_report(
                store,
                table,
                payments,
                req.param("poolId")?,
                state.config.page_size,
            )
            .await?;
            json_response(StatusCode::OK, &report)
        }
        other => Err(ApiError::Internal(format!(
            "{:?} is not served by the ops handler",
            other
        ))),
    }
}
