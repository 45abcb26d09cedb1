//! Deployment configuration advertised by federation members.

use crate::error::{CatalogError, Result};
use crate::types::NfsConfig;
use crate::Catalog;
use sqlx::Row;

impl Catalog {
    /// Register (or replace) the NFS export of a federation member.
    pub async fn add_deploy_config(&self, config: &NfsConfig) -> Result<()> {
        if config.federation_member.trim().is_empty() {
            return Err(CatalogError::validation("Deploy config without federation member"));
        }

        self.timed(
            sqlx::query(
                r#"INSERT INTO deploy_config (federation_member, nfs_ip, nfs_ssh_port, nfs_port)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(federation_member) DO UPDATE SET
                    nfs_ip = excluded.nfs_ip,
                    nfs_ssh_port = excluded.nfs_ssh_port,
                    nfs_port = excluded.nfs_port"#,
            )
            .bind(&config.federation_member)
            .bind(&config.nfs_ip)
            .bind(&config.nfs_ssh_port)
            .bind(&config.nfs_port)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    pub async fn get_federation_nfs_config(&self, member: &str) -> Result<Option<NfsConfig>> {
        let row = self
            .timed(
                sqlx::query(
                    "SELECT federation_member, nfs_ip, nfs_ssh_port, nfs_port FROM deploy_config WHERE federation_member = ?",
                )
                .bind(member)
                .fetch_optional(&self.pool),
            )
            .await?;

        row.map(|row| -> Result<NfsConfig> {
            Ok(NfsConfig {
                nfs_ip: row.try_get("nfs_ip")?,
                nfs_ssh_port: row.try_get("nfs_ssh_port")?,
                nfs_port: row.try_get("nfs_port")?,
                federation_member: row.try_get("federation_member")?,
            })
        })
        .transpose()
    }
}
