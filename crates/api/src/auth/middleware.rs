//! Authentication middleware

use axum::{extract::Request, middleware::Next, response::Response};
use serde::Serialize;

/// Authenticated user extracted from request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthUser {
    pub sub: String,
    pub email: Option<String>,
    pub name: Option<String>,
}

impl AuthUser {
    /// The fixed identity used until real authentication exists
    pub fn development() -> Self {
        Self {
            sub: "dev-user-123".to_string(),
            email: Some("dev@example.com".to_string()),
            name: Some("Development User".to_string()),
        }
    }
}

/// Middleware that attaches the current user to the request
pub async fn require_auth(mut request: Request, next: Next) -> Response {
    let auth_user = AuthUser::development();
    tracing::debug!(
        path = %request.uri().path(),
        user_id = %auth_user.sub,
        "require_auth: using development identity"
    );
    request.extensions_mut().insert(auth_user);
    next.run(request).await
}
