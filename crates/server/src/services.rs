use anyhow::Result;
use chrono::{DateTime, Utc};
use filamentdryer_sync::DryerSettings;
use sqlx::SqlitePool;

use crate::models::SettingsRow;

/// Key-value settings store backed by a single-row SQLite table.
#[derive(Clone)]
pub struct SettingsService {
    db: SqlitePool,
}

impl SettingsService {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS dryer_settings (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                body TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );",
        )
        .execute(&self.db)
        .await?;
        Ok(())
    }

    pub async fn load(&self) -> Result<Option<(DryerSettings, DateTime<Utc>)>> {
        let row = sqlx::query_as::<_, SettingsRow>(
            "SELECT body, updated_at FROM dryer_settings WHERE id = 1",
        )
        .fetch_optional(&self.db)
        .await?;

        match row {
            Some(row) => {
                let settings: DryerSettings = serde_json::from_str(&row.body)?;
                Ok(Some((settings, row.updated_at)))
            }
            None => Ok(None),
        }
    }

    /// Loads the stored settings, storing `fallback` first if there are none.
    pub async fn load_or_init(&self, fallback: DryerSettings) -> Result<(DryerSettings, DateTime<Utc>)> {
        if let Some(found) = self.load().await? {
            return Ok(found);
        }
        let updated_at = self.save(&fallback).await?;
        Ok((fallback, updated_at))
    }

    pub async fn save(&self, settings: &DryerSettings) -> Result<DateTime<Utc>> {
        let now = Utc::now();
        let body = serde_json::to_string(settings)?;
        sqlx::query(
            r#"
            INSERT INTO dryer_settings (id, body, updated_at) VALUES (1, ?, ?)
            ON CONFLICT(id) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at
            "#,
        )
        .bind(&body)
        .bind(now)
        .execute(&self.db)
        .await?;
        Ok(now)
    }

    pub async fn ping(&self) -> bool {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.db)
            .await
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn service() -> SettingsService {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let service = SettingsService::new(pool);
        service.ensure_schema().await.unwrap();
        service
    }

    #[tokio::test]
    async fn empty_store_loads_nothing() {
        let service = service().await;
        assert!(service.load().await.unwrap().is_none());
        assert!(service.ping().await);
    }

    #[tokio::test]
    async fn init_stores_fallback_once() {
        let service = service().await;
        let mut fallback = DryerSettings::default();
        fallback.preset_directory = "dryer".to_string();
        let (first, _) = service.load_or_init(fallback.clone()).await.unwrap();
        assert_eq!(first, fallback);

        let (second, _) = service.load_or_init(DryerSettings::default()).await.unwrap();
        assert_eq!(second.preset_directory, "dryer");
    }

    #[tokio::test]
    async fn save_replaces_previous_document() {
        let service = service().await;
        service.save(&DryerSettings::default()).await.unwrap();

        let updated = DryerSettings::default()
            .merged(&json!({ "presets": [{ "name": "PETG", "time": 3, "temp": 65 }] }))
            .unwrap();
        service.save(&updated).await.unwrap();

        let (loaded, _) = service.load().await.unwrap().unwrap();
        assert_eq!(loaded.presets, vec![json!({ "name": "PETG", "time": 3, "temp": 65 })]);
    }
}
