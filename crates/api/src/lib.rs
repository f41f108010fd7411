// API crate clippy configuration
#![allow(clippy::result_large_err)] // ApiError carries vendor error text
// Test code patterns:
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Lucky Chat API Library
//!
//! HTTP server components: shop and checkout routes, the Stripe webhook,
//! dealer profiles and chat, and image uploads.

pub mod auth;
pub mod chat;
pub mod config;
pub mod dealers;
pub mod error;
pub mod routes;
pub mod security;
pub mod state;
pub mod storage;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
