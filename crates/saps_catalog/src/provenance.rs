//! Per-phase execution provenance.

use crate::error::{CatalogError, Result};
use crate::types::{PhaseMetadata, Provenance, ProvenancePhase};
use crate::Catalog;
use sqlx::Row;

impl Catalog {
    /// Record the environment a phase ran in. Only the phase's own column
    /// group is touched.
    pub async fn update_provenance(
        &self,
        phase: ProvenancePhase,
        metadata_path: &str,
        operating_system: &str,
        kernel_version: &str,
        task_id: &str,
    ) -> Result<()> {
        for (field, value) in [
            ("metadata path", metadata_path),
            ("operating system", operating_system),
            ("kernel version", kernel_version),
            ("task id", task_id),
        ] {
            if value.trim().is_empty() {
                return Err(CatalogError::invalid_argument(format!(
                    "Empty {field} for {phase} provenance"
                )));
            }
        }

        self.timed(
            sqlx::query(phase.upsert_sql())
                .bind(task_id)
                .bind(metadata_path)
                .bind(operating_system)
                .bind(kernel_version)
                .execute(&self.pool),
        )
        .await
        .map_err(|e| match e {
            CatalogError::Sqlx(sqlx::Error::Database(db)) if db.is_foreign_key_violation() => {
                CatalogError::not_found(format!("Task {task_id}"))
            }
            other => other,
        })?;
        Ok(())
    }

    pub async fn get_provenance(&self, task_id: &str) -> Result<Option<Provenance>> {
        let row = self
            .timed(
                sqlx::query("SELECT * FROM provenance WHERE task_id = ?")
                    .bind(task_id)
                    .fetch_optional(&self.pool),
            )
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let phase = |prefix: &str| -> Result<PhaseMetadata> {
            Ok(PhaseMetadata {
                metadata_path: row.try_get(format!("{prefix}_metadata").as_str())?,
                operating_system: row.try_get(format!("{prefix}_operating_system").as_str())?,
                kernel_version: row.try_get(format!("{prefix}_kernel_version").as_str())?,
            })
        };

        Ok(Some(Provenance {
            task_id: row.try_get("task_id")?,
            input: phase(ProvenancePhase::Input.as_str())?,
            preprocessing: phase(ProvenancePhase::Preprocessing.as_str())?,
            output: phase(ProvenancePhase::Output.as_str())?,
        }))
    }
}
