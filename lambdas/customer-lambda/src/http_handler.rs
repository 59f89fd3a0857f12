use lambda_http::{http::StatusCode, Body, Error, Request, Response};
use miliare_shared::config::Table;
use miliare_shared::error::{ApiError, ApiResult};
use miliare_shared::http::{
    admit, error_response, json_response, page_params, page_response, parse_body, request_path,
    Admitted, Gate,
};
use miliare_shared::routes::{Endpoint, Handler};
use miliare_shared::types::CustomerInput;
use miliare_shared::{customers, AppState};
use std::sync::Arc;

pub(crate) async fn function_handler(
    event: Request,
    state: Arc<AppState>,
) -> Result<Response<Body>, Error> {
    tracing::info!(method = %event.method(), path = request_path(&event), "customer lambda invoked");

    let admitted = match admit(Handler::Customer, &event, &state)? {
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
    let table = state.table(Table::Customers)?;

    match req.endpoint {
        Endpoint::ListCustomers => {
            let page = page_params(event, state.config.page_size)?;
            page_response(customers::list_customers(store, table, &page).await?)
        }
        Endpoint::CreateCustomer => {
            let input: CustomerInput = parse_body(event.body())?;
            json_response(
                StatusCode::CREATED,
                &customers::create_customer(store, table, input).await?,
            )
        }
        Endpoint::GetCustomer => {
            let customer = customers::get_customer(store, table, req.param("customerId")?).await?;
            json_response(StatusCode::OK, &customer)
        }
        Endpoint::PutCustomer => {
            let input: CustomerInput = parse_body(event.body())?;
            let customer =
                customers::put_customer(store, table, req.param("customerId")?, input).await?;
            json_response(StatusCode::OK, &customer)
        }
        other => Err(ApiError::Internal(format!(
            "{:?} is not served by the customer handler",
            other
        ))),
    }
}
