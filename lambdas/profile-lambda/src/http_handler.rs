use lambda_http::{http::StatusCode, Body, Error, Request, Response};
use miliare_shared::config::Table;
use miliare_shared::error::{ApiError, ApiResult};
use miliare_shared::http::{
    admit, error_response, json_response, page_params, page_response, parse_body, request_path,
    Admitted, Gate,
};
use miliare_shared::routes::{Endpoint, Handler};
use miliare_shared::types::{PaymentInput, ProfileInput};
use miliare_shared::{payments, profiles, AppState};
use std::sync::Arc;

/// Profile Lambda: `/users/*` and `/payments/*`
pub(crate) async fn function_handler(
    event: Request,
    state: Arc<AppState>,
) -> Result<Response<Body>, Error> {
    tracing::info!(method = %event.method(), path = request_path(&event), "profile lambda invoked");

    let admitted = match admit(Handler::Profile, &event, &state)? {
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

    match req.endpoint {
        Endpoint::GetUser => {
            let table = state.table(Table::UserProfile)?;
            let profile = profiles::get_profile(store, table, req.param("userId")?).await?;
            json_response(StatusCode::OK, &profile)
        }
        Endpoint::PutUser => {
            let table = state.table(Table::UserProfile)?;
            let input: ProfileInput = parse_body(event.body())?;
            let profile = profiles::put_profile(store, table, req.param("userId")?, input).await?;
            json_response(StatusCode::OK, &profile)
        }
        Endpoint::ListUserPayments => {
            let table = state.table(Table::Payments)?;
            let payments = payments::list_user_payments(
                store,
                table,
                req.param("userId")?,
                state.config.page_size,
            )
            .await?;
            json_response(StatusCode::OK, &payments)
        }
        Endpoint::ListPayments => {
            let table = state.table(Table::Payments)?;
            let page = page_params(event, state.config.page_size)?;
            page_response(payments::list_payments(store, table, &page).await?)
        }
        Endpoint::CreatePayment => {
            let table = state.table(Table::Payments)?;
            let input: PaymentInput = parse_body(event.body())?;
            let payment = payments::create_payment(store, table, input).await?;
            json_response(StatusCode::CREATED, &payment)
        }
        Endpoint::GetPayment => {
            let table = state.table(Table::Payments)?;
            let payment = payments::get_payment(store, table, req.param("paymentId")?).await?;
            req.caller.ensure_owner_or_staff(Some(&payment.user_id))?;
            json_response(StatusCode::OK, &payment)
        }
        Endpoint::UpdatePayment => {
            let table = state.table(Table::Payments)?;
            let input: PaymentInput = parse_body(event.body())?;
            let payment =
                payments::update_payment(store, table, req.param("paymentId")?, input).await?;
            json_response(StatusCode::OK, &payment)
        }
        other => Err(ApiError::Internal(format!(
            "{:?} is not served by the profile handler",
            other
        ))),
    }
}
