//! SQLite warehouse backend, for local runs and tests.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use rusqlite::params;

use super::{open_pool, Pool};
use crate::events::{Event, EventSink};
use crate::runlog::{truncate_details, RunLogStore, RunRecord, RunStatus, PIPELINE_NAME};

pub struct SqliteWarehouse {
    pool: Pool,
}

impl SqliteWarehouse {
    pub fn open(path: &str) -> Result<Self> {
        let pool = open_pool(path).with_context(|| format!("failed to open SQLite warehouse at {}", path))?;
        Ok(Self { pool })
    }

    pub fn get_pool(&self) -> &Pool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl RunLogStore for SqliteWarehouse {
    async fn log_run(&self, status: RunStatus, details: &str) -> Result<()> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO pipeline_runs (pipeline_name, status, details) VALUES (?1, ?2, ?3)",
            params![PIPELINE_NAME, status.as_str(), truncate_details(details)],
        )
        .context("Failed to insert run record")?;
        tx.commit()?;
        Ok(())
    }

    async fn recent_runs(&self, limit: usize) -> Result<Vec<RunRecord>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT pipeline_name, status, details, created_at FROM pipeline_runs
             ORDER BY id DESC LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut records = Vec::new();
        for r in rows {
            let (pipeline, status, details, created_at) = r?;
            let status = RunStatus::parse(&status)
                .with_context(|| format!("unknown run status '{}'", status))?;
            records.push(RunRecord {
                pipeline,
                status,
                details,
                created_at: NaiveDateTime::parse_from_str(&created_at, "%Y-%m-%d %H:%M:%S")
                    .ok()
                    .map(|dt| dt.and_utc()),
            });
        }
        Ok(records)
    }
}

#[async_trait::async_trait]
impl EventSink for SqliteWarehouse {
    async fn upsert_events(&self, events: &[Event]) -> Result<usize> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO raw_events (
                    event_id, user_id, event_type, event_ts, device_type,
                    price, currency, source_version, geo_country, campaign_id
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT (event_id) DO NOTHING",
            )?;
            for e in events {
                inserted += stmt.execute(params![
                    e.event_id,
                    e.user_id,
                    e.event_type.as_str(),
                    e.event_ts.to_rfc3339(),
                    e.device_type.as_str(),
                    e.price,
                    e.currency,
                    e.source_version,
                    e.geo_country,
                    e.campaign_id,
                ])?;
            }
        }
        tx.commit().context("Failed to commit raw events")?;
        Ok(inserted)
    }
}
