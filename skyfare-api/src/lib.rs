use axum::{
    http::Method,
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod checkout;
pub mod error;
pub mod metrics;
pub mod middleware;
pub mod orders;
pub mod state;
pub mod worker;

pub use error::{AppError, Envelope};
pub use state::{AppState, AuthConfig};

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderName::from_static(checkout::IDEMPOTENCY_KEY_HEADER),
        ]);

    let checkout_routes = Router::new()
        .route("/v1/cart/checkout", post(checkout::checkout))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::circuit_breaker_middleware,
        ));

    let customer_routes = Router::new()
        .merge(checkout_routes)
        .route("/v1/cart/quote", post(checkout::quote))
        .route("/v1/orders", get(orders::list_orders))
        .route("/v1/orders/{id}", get(orders::get_order))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::customer_auth_middleware,
        ));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics::metrics_handler))
        .merge(customer_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(from_fn_with_state(state.clone(), middleware::rate_limit_middleware))
        .with_state(state)
}

async fn health() -> Envelope<serde_json::Value> {
    Envelope(json!({ "status": "ok" }))
}
