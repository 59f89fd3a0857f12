use lambda_http::{Body, Error, Request, Response};
use miliare_shared::config::Table;
use miliare_shared::error::{ApiError, ApiResult};
use miliare_shared::http::{admit, error_response, page_params, page_response, request_path, Admitted, Gate};
use miliare_shared::routes::{Endpoint, Handler};
use miliare_shared::{leads, AppState};
use std::sync::Arc;

pub(crate) async fn function_handler(
    event: Request,
    state: Arc<AppState>,
) -> Result<Response<Body>, Error> {
    tracing::info!(method = %event.method(), path = request_path(&event), "lead lambda invoked");

    let admitted = match admit(Handler::Lead, &event, &state)? {
        Gate::Admitted(admitted) => admitted,
        Gate::Respond(resp) => return Ok(resp),
    };
    match dispatch(&event, &state, &admitted).await {
        Ok(resp) => Ok(resp),
        Err(err) => error_response(&err),
    }
}

async fn dispatch(event: &Request, state: &AppState, req: &Admitted) -> ApiResult<Response<Body>> {
    match req.endpoint {
        Endpoint::ListLeadUsers => {
            let table = state.table(Table::UserProfile)?;
            let page = page_params(event, state.config.page_size)?;
            page_response(leads::list_lead_users(state.store.as_ref(), table, &page).await?)
        }
        other => Err(ApiError::Internal(format!(
            "{:?} is not served by the lead handler",
            other
        ))),
    }
}
