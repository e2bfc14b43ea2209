//! VpnSession entity: one row per connected client configuration

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Protocol of the session's credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum SessionProtocol {
    #[sea_orm(string_value = "openvpn")]
    OpenVpn,

    #[sea_orm(string_value = "wireguard")]
    WireGuard,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "vpn_sessions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub user_id: String,

    pub profile_id: String,

    pub protocol: SessionProtocol,

    /// Certificate common name (OpenVPN) or public key (WireGuard)
    pub credential_id: String,

    pub ip_four: String,

    pub ip_six: String,

    pub display_name: String,

    /// Authorization grant the session was created under
    pub auth_key: String,

    pub created_at: ChronoDateTimeUtc,

    pub expires_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
