//! Create the vpn_sessions table

use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(VpnSession::Table)
                    .if_not_exists()
                    .col(uuid(VpnSession::Id).primary_key())
                    .col(string_len(VpnSession::UserId, 255).not_null())
                    .col(string_len(VpnSession::ProfileId, 64).not_null())
                    .col(string_len(VpnSession::Protocol, 16).not_null())
                    .col(string_len(VpnSession::CredentialId, 255).not_null())
                    .col(string_len(VpnSession::IpFour, 15).not_null())
                    .col(string_len(VpnSession::IpSix, 39).not_null())
                    .col(string_len(VpnSession::DisplayName, 255).not_null())
                    .col(string_len(VpnSession::AuthKey, 255).not_null())
                    .col(timestamp_with_time_zone(VpnSession::CreatedAt).not_null())
                    .col(timestamp_with_time_zone(VpnSession::ExpiresAt).not_null())
                    .to_owned(),
            )
            .await?;

        // A credential can only be connected once per profile
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_vpn_sessions_profile_credential")
                    .table(VpnSession::Table)
                    .col(VpnSession::ProfileId)
                    .col(VpnSession::CredentialId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_vpn_sessions_auth_key")
                    .table(VpnSession::Table)
                    .col(VpnSession::AuthKey)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_vpn_sessions_user_id")
                    .table(VpnSession::Table)
                    .col(VpnSession::UserId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_vpn_sessions_expires_at")
                    .table(VpnSession::Table)
                    .col(VpnSession::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(VpnSession::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum VpnSession {
    #[sea_orm(iden = "vpn_sessions")]
    Table,
    Id,
    UserId,
    ProfileId,
    Protocol,
    CredentialId,
    IpFour,
    IpSix,
    DisplayName,
    AuthKey,
    CreatedAt,
    ExpiresAt,
}
