//! Authentication module for Lucky Chat
//!
//! Identity is a development stub: every request is attributed to one fixed user.

pub mod middleware;

pub use middleware::{require_auth, AuthUser};
