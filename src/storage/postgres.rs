//! Postgres warehouse backend (`ops.pipeline_runs`, `raw.raw_events`).
//!
//! The `postgres` client is blocking, so every operation runs on the blocking
//! pool with its own short-lived connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use postgres::{Client, NoTls};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::events::{Event, EventSink};
use crate::runlog::{truncate_details, RunLogStore, RunRecord, RunStatus, PIPELINE_NAME};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    /// Name of the env var holding the password.
    pub password_env: String,
    pub connect_timeout_secs: u64,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: "postgres".to_string(),
            port: 5432,
            database: "warehouse".to_string(),
            user: "agentic".to_string(),
            password_env: "POSTGRES_PASSWORD".to_string(),
            connect_timeout_secs: 10,
        }
    }
}

impl PostgresConfig {
    /// Client configuration, with the password read from `password_env`.
    pub fn client_config(&self) -> postgres::Config {
        let mut pg = postgres::Config::new();
        pg.host(&self.host)
            .port(self.port)
            .dbname(&self.database)
            .user(&self.user)
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs));
        if let Ok(password) = std::env::var(&self.password_env) {
            pg.password(password);
        }
        pg
    }
}

const MIGRATIONS: &str = "
    CREATE SCHEMA IF NOT EXISTS ops;
    CREATE SCHEMA IF NOT EXISTS raw;

    CREATE TABLE IF NOT EXISTS ops.pipeline_runs (
        id BIGSERIAL PRIMARY KEY,
        pipeline_name TEXT NOT NULL,
        status TEXT NOT NULL CHECK (status IN ('success', 'error')),
        details TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    );
    CREATE INDEX IF NOT EXISTS idx_pipeline_runs_created ON ops.pipeline_runs (created_at);

    CREATE TABLE IF NOT EXISTS raw.raw_events (
        event_id TEXT PRIMARY KEY,
        user_id BIGINT,
        event_type TEXT NOT NULL,
        event_ts TIMESTAMPTZ NOT NULL,
        device_type TEXT,
        price DOUBLE PRECISION,
        currency TEXT,
        source_version TEXT,
        geo_country TEXT,
        campaign_id TEXT,
        loaded_at TIMESTAMPTZ NOT NULL DEFAULT now()
    );
";

pub struct PostgresWarehouse {
    config: PostgresConfig,
    migrated: Arc<AtomicBool>,
}

impl PostgresWarehouse {
    pub fn new(config: PostgresConfig) -> Self {
        Self {
            config,
            migrated: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Open a connection (migrating on first use) and run `op` on the blocking pool.
    async fn with_client<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&mut Client) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let config = self.config.clone();
        let migrated = self.migrated.clone();
        tokio::task::spawn_blocking(move || {
            let mut client = config.client_config().connect(NoTls).with_context(|| {
                format!(
                    "failed to connect to postgres {}:{}/{}",
                    config.host, config.port, config.database
                )
            })?;
            if !migrated.load(Ordering::Acquire) {
                client
                    .batch_execute(MIGRATIONS)
                    .context("failed to migrate warehouse schema")?;
                migrated.store(true, Ordering::Release);
                debug!("Postgres warehouse schema ready");
            }
            op(&mut client)
        })
        .await
        .context("postgres task aborted")?
    }
}

#[async_trait::async_trait]
impl RunLogStore for PostgresWarehouse {
    async fn log_run(&self, status: RunStatus, details: &str) -> Result<()> {
        let details = truncate_details(details).to_string();
        self.with_client(move |client| {
            let mut tx = client.transaction()?;
            tx.execute(
                "INSERT INTO ops.pipeline_runs (pipeline_name, status, details) VALUES ($1, $2, $3)",
                &[&PIPELINE_NAME, &status.as_str(), &details],
            )
            .context("Failed to insert run record")?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn recent_runs(&self, limit: usize) -> Result<Vec<RunRecord>> {
        let limit = limit as i64;
        self.with_client(move |client| {
            let rows = client.query(
                "SELECT pipeline_name, status, details, created_at FROM ops.pipeline_runs
                 ORDER BY id DESC LIMIT $1",
                &[&limit],
            )?;
            rows.iter()
                .map(|row| {
                    let status: String = row.get(1);
                    Ok(RunRecord {
                        pipeline: row.get(0),
                        status: RunStatus::parse(&status)
                            .with_context(|| format!("unknown run status '{}'", status))?,
                        details: row.get(2),
                        created_at: Some(row.get::<_, DateTime<Utc>>(3)),
                    })
                })
                .collect()
        })
        .await
    }
}

#[async_trait::async_trait]
impl EventSink for PostgresWarehouse {
    async fn upsert_events(&self, events: &[Event]) -> Result<usize> {
        let events = events.to_vec();
        self.with_client(move |client| {
            let mut tx = client.transaction()?;
            let stmt = tx.prepare(
                "INSERT INTO raw.raw_events (
                    event_id, user_id, event_type, event_ts, device_type,
                    price, currency, source_version, geo_country, campaign_id
                 ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                 ON CONFLICT (event_id) DO NOTHING",
            )?;
            let mut inserted = 0u64;
            for e in &events {
                let event_type = e.event_type.as_str();
                let device_type = e.device_type.as_str();
                inserted += tx.execute(
                    &stmt,
                    &[
                        &e.event_id,
                        &e.user_id,
                        &event_type,
                        &e.event_ts,
                        &device_type,
                        &e.price,
                        &e.currency,
                        &e.source_version,
                        &e.geo_country,
                        &e.campaign_id,
                    ],
                )?;
            }
            tx.commit().context("Failed to commit raw events")?;
            Ok(inserted as usize)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_deployment() {
        let cfg = PostgresConfig::default();
        assert_eq!(cfg.host, "postgres");
        assert_eq!(cfg.port, 5432);
        assert_eq!(cfg.database, "warehouse");
        assert_eq!(cfg.user, "agentic");
    }

    #[test]
    fn test_client_config_reads_password_from_env() {
        let cfg = PostgresConfig {
            host: "db.internal".to_string(),
            port: 6543,
            password_env: "FRESHNESS_AGENT_TEST_PG_PASSWORD".to_string(),
            ..PostgresConfig::default()
        };
        std::env::set_var("FRESHNESS_AGENT_TEST_PG_PASSWORD", "s3cret");
        let pg = cfg.client_config();
        std::env::remove_var("FRESHNESS_AGENT_TEST_PG_PASSWORD");

        assert_eq!(pg.get_ports(), &[6543]);
        assert_eq!(pg.get_dbname(), Some("warehouse"));
        assert_eq!(pg.get_password(), Some(&b"s3cret"[..]));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_an_error() {
        let cfg = PostgresConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            connect_timeout_secs: 1,
            ..PostgresConfig::default()
        };
        let wh = PostgresWarehouse::new(cfg);
        let err = wh.log_run(RunStatus::Success, "ok").await.unwrap_err();
        assert!(format!("{err:#}").contains("failed to connect"));
    }
}
