use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::database::{queries, Database};
use crate::models::{ActivityRecord, StorageStats};

/// Ordered, append-only log of classified activity.
#[derive(Clone)]
pub struct ActivityStore {
    db: Database,
}

impl ActivityStore {
    pub fn open(db_path: PathBuf) -> Result<Self> {
        Ok(Self {
            db: Database::open(db_path)?,
        })
    }

    /// Append one record. Appends are serialized on the database thread, so
    /// two captures finishing together both persist.
    pub async fn append(&self, record: ActivityRecord) -> Result<i64> {
        self.db
            .execute(move |conn| queries::insert_activity(conn, &record).context("failed to insert activity"))
            .await
    }

    pub async fn snapshot(&self) -> Result<Vec<ActivityRecord>> {
        self.db
            .execute(|conn| queries::get_activities(conn).context("failed to read activities"))
            .await
    }

    pub async fn stats(&self) -> Result<StorageStats> {
        let total_size_bytes = self
            .db
            .path()
            .metadata()
            .map(|m| m.len() as i64)
            .unwrap_or(0);

        let (activities_count, (oldest_activity, newest_activity)) = self
            .db
            .execute(|conn| Ok((queries::count_activities(conn)?, queries::activity_bounds(conn)?)))
            .await?;

        Ok(StorageStats {
            total_size_bytes,
            activities_count,
            oldest_activity,
            newest_activity,
        })
    }

    /// Write the whole sequence as JSON under `export_dir` and return the
    /// file path.
    pub async fn export(&self, export_dir: &Path) -> Result<PathBuf> {
        let activities = self.snapshot().await?;

        let export = serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "exported_at": chrono::Utc::now().to_rfc3339(),
            "activities": activities,
        });

        let export_path = export_dir.join(format!(
            "browsersec_export_{}.json",
            chrono::Utc::now().format("%Y%m%d_%H%M%S")
        ));

        tokio::fs::create_dir_all(export_dir)
            .await
            .with_context(|| format!("failed to create {}", export_dir.display()))?;
        tokio::fs::write(&export_path, serde_json::to_string_pretty(&export)?)
            .await
            .with_context(|| format!("failed to write {}", export_path.display()))?;

        Ok(export_path)
    }
}
