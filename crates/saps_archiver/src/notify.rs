//! Delivery of "task archived" notifications.

use async_trait::async_trait;
use saps_catalog::{Task, Ward};
use tracing::info;

use crate::error::ArchiverError;

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, ward: &Ward, task: &Task) -> Result<(), ArchiverError>;
}

/// Records deliveries in the service log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn notify(&self, ward: &Ward, task: &Task) -> Result<(), ArchiverError> {
        info!(
            user = %ward.user_email,
            submission_id = %ward.submission_id,
            task_id = %task.task_id,
            region = %task.region,
            image_date = %task.image_date,
            "Task archived; user notified"
        );
        Ok(())
    }
}
