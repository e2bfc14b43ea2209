//! API Middleware
//!
//! Bearer token authentication for the portal API.

pub mod auth;

pub use auth::{require_auth, JwtState};
