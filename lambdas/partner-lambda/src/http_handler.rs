use lambda_http::{http::StatusCode, Body, Error, Request, Response};
use miliare_shared::config::Table;
use miliare_shared::error::{ApiError, ApiResult};
use miliare_shared::http::{
    admit, error_response, json_response, page_params, page_response, parse_body, request_path,
    Admitted, Gate,
};
use miliare_shared::routes::{Endpoint, Handler};
use miliare_shared::types::PartnerInput;
use miliare_shared::{partners, AppState};
use std::sync::Arc;

pub(crate) async fn function_handler(
    event: Request,
    state: Arc<AppState>,
) -> Result<Response<Body>, Error> {
    tracing::info!(method = %event.method(), path = request_path(&event), "partner lambda invoked");

    let admitted = match admit(Handler::Partner, &event, &state)? {
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
    let table = state.table(Table::Partners)?;

    match req.endpoint {
        Endpoint::ListPartners => {
            let page = page_params(event, state.config.page_size)?;
            page_response(partners::list_partners(store, table, &page).await?)
        }
        Endpoint::CreatePartner => {
            let input: PartnerInput = parse_body(event.body())?;
            json_response(StatusCode::CREATED, &partners::create_partner(store, table, input).await?)
        }
        Endpoint::GetPartner => {
            let partner = partners::get_partner(store, table, req.param("partnerId")?).await?;
            json_response(StatusCode::OK, &partner)
        }
        Endpoint::PutPartner => {
            let input: PartnerInput = parse_body(event.body())?;
            let partner = partners::put_partner(store, table, req.param("partnerId")?, input).await?;
            json_response(StatusCode::OK, &partner)
        }
        other => Err(ApiError::Internal(format!(
            "{:?} is not served by the partner handler",
            other
        ))),
    }
}
