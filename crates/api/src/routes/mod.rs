//! API routes

mod chat;
mod dealers;
mod payments;
mod storage;
mod system;


use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};

use crate::{auth::require_auth, state::AppState};

/// Largest accepted upload body
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

pub fn create_router(state: AppState) -> Router {
    // Routes that need the current user
    let authed = Router::new()
        .route("/api/checkout-session", post(payments::create_checkout_session))
        .route(
            "/api/create-checkout-session",
            post(payments::create_checkout_session),
        )
        .route("/api/wallet", get(payments::wallet))
        .route_layer(middleware::from_fn(require_auth));

    let uploads = Router::new()
        .route("/api/storage/upload", post(storage::upload))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES));

    Router::new()
        .route("/", get(system::root))
        .route("/health", get(system::health))
        .route("/api/translations/{language}", get(system::translations))
        // Payments
        .route("/api/packages", get(payments::list_packages))
        .route("/api/webhooks/stripe", post(payments::stripe_webhook))
        .route("/payment/success", get(payments::payment_success))
        .route("/payment/cancel", get(payments::payment_cancel))
        .route(
            "/api/payments/subscriptions/{email}",
            get(payments::customer_subscriptions),
        )
        // Dealers
        .route("/api/dealers", get(dealers::list_dealers))
        .route("/api/dealers/health", get(dealers::health))
        .route("/api/dealers/{id}", get(dealers::get_dealer))
        // Chat
        .route("/api/ai-chat/send-message", post(chat::send_message))
        .route("/chat/send-message", post(chat::send_message))
        // Storage
        .route("/api/storage/health", get(storage::health))
        .merge(uploads)
        .merge(authed)
        .with_state(state)
}
