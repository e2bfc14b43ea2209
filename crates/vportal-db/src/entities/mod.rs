//! Database entities

pub mod vpn_session;

pub use vpn_session::Entity as VpnSession;

pub mod prelude {
    pub use super::vpn_session::Entity as VpnSession;
}
