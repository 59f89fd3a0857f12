use lambda_http::{run, service_fn, tracing, Error, Request};
use miliare_shared::config::Table;
use miliare_shared::AppState;
use std::sync::Arc;

mod http_handler;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing::init_default_subscriber();

    // Missing table configuration fails the cold start.
    let state = AppState::from_env(&[Table::Customers]).await?;

    run(service_fn(move |event: Request| {
        let state = Arc::clone(&state);
        async move { http_handler::function_handler(event, state).await }
    }))
    .await
}
