//! Access-token validation for the portal API
//!
//! Bearer tokens are HS256 JWTs minted by the authorization server. A valid
//! token is reduced to the [`AuthContext`](vportal_proto::AuthContext) the
//! connection manager works with.

pub mod jwt;

pub use jwt::{JwtClaims, JwtError, JwtValidator};
