//! Warehouse storage -- run log and raw-events zone, on Postgres or SQLite.

pub mod postgres;
pub mod schema;
pub mod sqlite;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use serde::{Deserialize, Serialize};

use crate::events::EventSink;
use crate::runlog::RunLogStore;

pub use self::postgres::{PostgresConfig, PostgresWarehouse};
pub use self::sqlite::SqliteWarehouse;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &str) -> Result<Pool> {
    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// Where the run log and raw events live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum WarehouseConfig {
    Postgres(PostgresConfig),
    Sqlite(SqliteConfig),
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        WarehouseConfig::Postgres(PostgresConfig::default())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    pub path: PathBuf,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/warehouse.db"),
        }
    }
}

/// Handles onto one warehouse backend.
#[derive(Clone)]
pub struct Warehouse {
    pub run_log: Arc<dyn RunLogStore>,
    pub events: Arc<dyn EventSink>,
}

/// Open the configured warehouse. Postgres connects lazily, per operation.
pub fn open(config: &WarehouseConfig) -> Result<Warehouse> {
    match config {
        WarehouseConfig::Postgres(cfg) => {
            let wh = Arc::new(PostgresWarehouse::new(cfg.clone()));
            Ok(Warehouse {
                run_log: wh.clone(),
                events: wh,
            })
        }
        WarehouseConfig::Sqlite(cfg) => {
            if let Some(parent) = cfg.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let wh = Arc::new(SqliteWarehouse::open(&cfg.path.to_string_lossy())?);
            Ok(Warehouse {
                run_log: wh.clone(),
                events: wh,
            })
        }
    }
}
