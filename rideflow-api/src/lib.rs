use axum::{
    http::Method,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod drivers;
pub mod error;
pub mod hub;
pub mod state;
pub mod trips;
pub mod webhooks;
pub mod worker;
pub mod ws;

pub use state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::USER_AGENT,
        ]);

    Router::new()
        .route("/trip/preview", post(trips::preview))
        .route("/trip/start", post(trips::start))
        .route("/trip/{id}", get(trips::get_trip))
        .route("/driver/register", post(drivers::register))
        .route("/driver/unregister", post(drivers::unregister))
        .route("/webhook/stripe", post(webhooks::handle_stripe_webhook))
        .route("/ws/drivers", get(ws::drivers))
        .route("/ws/riders", get(ws::riders))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
