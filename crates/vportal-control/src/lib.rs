//! Session lifecycle engine
//!
//! Turns an authorized connect request into an active OpenVPN or WireGuard
//! session and tears sessions down again on logout or expiry.

pub mod allocator;
pub mod client_config;
pub mod error;
pub mod manager;
pub mod selection;

pub use allocator::{AddressAllocator, AllocatedAddresses};
pub use client_config::ClientConfig;
pub use error::ConnectError;
pub use manager::{
    ConnectPhase, ConnectRequest, ConnectionManager, ManagerSettings, ReconcileReport,
    DEFAULT_DISPLAY_NAME,
};
pub use selection::select_protocol;
