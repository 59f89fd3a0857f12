use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use miliare_shared::config::Table;
use miliare_shared::graphql::{AppSyncEvent, ResolverError, ResolverTable};
use miliare_shared::AppState;
use serde_json::Value;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .without_time()
        .init();

    let state = AppState::from_env(&[Table::Referrals, Table::Payments]).await?;
    let resolvers = Arc::new(ResolverTable::new());

    run(service_fn(move |event: LambdaEvent<AppSyncEvent>| {
        let state = Arc::clone(&state);
        let resolvers = Arc::clone(&resolvers);
        async move { function_handler(event, &state, &resolvers).await }
    }))
    .await
}

async fn function_handler(
    event: LambdaEvent<AppSyncEvent>,
    state: &AppState,
    resolvers: &ResolverTable,
) -> Result<Value, ResolverError> {
    let field = event.payload.info.field_name.clone();
    let result = resolvers.resolve(state, event.payload).await;
    if let Err(err) = &result {
        tracing::warn!(field = %field, error_type = err.error_type, "resolver failed");
    }
    result
}
