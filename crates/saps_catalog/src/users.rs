//! Users and the notification ward queue.

use crate::error::{CatalogError, Result};
use crate::types::{User, Ward};
use crate::Catalog;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::debug;

impl Catalog {
    // ========================================================================
    // Users
    // ========================================================================

    pub async fn add_user(&self, user: &User) -> Result<()> {
        if user.email.trim().is_empty() {
            return Err(CatalogError::validation("User with empty email"));
        }
        if user.name.trim().is_empty() {
            return Err(CatalogError::validation("User with empty name"));
        }
        if user.password_hash.is_empty() {
            return Err(CatalogError::validation("User with empty password"));
        }

        self.timed(
            sqlx::query(
                r#"INSERT INTO users (email, name, password_hash, active, notify, admin)
                VALUES (?, ?, ?, ?, ?, ?)"#,
            )
            .bind(&user.email)
            .bind(&user.name)
            .bind(&user.password_hash)
            .bind(user.active)
            .bind(user.notify)
            .bind(user.admin)
            .execute(&self.pool),
        )
        .await
        .map_err(|e| match e {
            CatalogError::Sqlx(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                CatalogError::validation(format!("User {} already exists", user.email))
            }
            other => other,
        })?;

        debug!(email = %user.email, "User added");
        Ok(())
    }

    pub async fn get_user(&self, email: &str) -> Result<Option<User>> {
        let row = self
            .timed(
                sqlx::query("SELECT email, name, password_hash, active, notify, admin FROM users WHERE email = ?")
                    .bind(email)
                    .fetch_optional(&self.pool),
            )
            .await?;

        row.as_ref().map(row_to_user).transpose()
    }

    pub async fn update_user_state(&self, email: &str, active: bool) -> Result<()> {
        let result = self
            .timed(
                sqlx::query("UPDATE users SET active = ? WHERE email = ?")
                    .bind(active)
                    .bind(email)
                    .execute(&self.pool),
            )
            .await?;

        if result.rows_affected() == 0 {
            return Err(CatalogError::not_found(format!("User {email}")));
        }
        Ok(())
    }

    /// Unknown users are not notifiable.
    pub async fn is_user_notifiable(&self, email: &str) -> Result<bool> {
        Ok(self
            .get_user(email)
            .await?
            .map(|user| user.notify)
            .unwrap_or(false))
    }

    // ========================================================================
    // Notification Wards
    // ========================================================================

    /// Register a ward. Registering the same triple twice is a no-op.
    pub async fn add_user_notification(&self, submission_id: &str, task_id: &str, user_email: &str) -> Result<()> {
        self.timed(
            sqlx::query(
                r#"INSERT INTO notify (submission_id, task_id, user_email) VALUES (?, ?, ?)
                ON CONFLICT DO NOTHING"#,
            )
            .bind(submission_id)
            .bind(task_id)
            .bind(user_email)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    pub async fn get_users_to_notify(&self) -> Result<Vec<Ward>> {
        let rows = self
            .timed(
                sqlx::query(
                    "SELECT submission_id, task_id, user_email FROM notify ORDER BY submission_id, task_id, user_email",
                )
                .fetch_all(&self.pool),
            )
            .await?;

        rows.iter()
            .map(|row| -> Result<Ward> {
                Ok(Ward {
                    submission_id: row.try_get("submission_id")?,
                    task_id: row.try_get("task_id")?,
                    user_email: row.try_get("user_email")?,
                })
            })
            .collect()
    }

    /// Exact composite-key delete. Returns whether the ward existed.
    pub async fn remove_notification(&self, ward: &Ward) -> Result<bool> {
        let result = self
            .timed(
                sqlx::query("DELETE FROM notify WHERE submission_id = ? AND task_id = ? AND user_email = ?")
                    .bind(&ward.submission_id)
                    .bind(&ward.task_id)
                    .bind(&ward.user_email)
                    .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn row_to_user(row: &SqliteRow) -> Result<User> {
    Ok(User {
        email: row.try_get("email")?,
        name: row.try_get("name")?,
        password_hash: row.try_get("password_hash")?,
        active: row.try_get("active")?,
        notify: row.try_get("notify")?,
        admin: row.try_get("admin")?,
    })
}
