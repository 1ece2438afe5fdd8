use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::NaiveDate;
use duckdb::Connection;
use tokio::sync::Mutex;
use tracing::info;

use touchpoint_core::attribution::AttributionDimension;
use touchpoint_core::config::Config;
use touchpoint_core::event::{Event, User};

use crate::schema::init_sql;

/// One day of ad platform metrics for one dimension value.
#[derive(Debug, Clone)]
pub struct PerformanceRecord {
    pub project_id: String,
    pub date: NaiveDate,
    pub dimension: AttributionDimension,
    pub key: String,
    pub channel: Option<String>,
    pub impressions: i64,
    pub clicks: i64,
    pub spend: f64,
    pub custom_dimensions: serde_json::Map<String, serde_json::Value>,
}

/// A DuckDB store for attribution.
///
/// DuckDB is single-writer, so the connection sits behind `Arc<Mutex<_>>`
/// and every read and write goes through the lock.
///
/// Memory and thread limits are enforced by [`init_sql`] at open time.
pub struct DuckDbBackend {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl DuckDbBackend {
    /// Open (or create) a DuckDB database file at `path`.
    ///
    /// `memory_limit` is a DuckDB size string such as `"1GB"` or `"512MB"`.
    pub fn open(path: &str, memory_limit: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(&init_sql(memory_limit))?;
        info!(
            "DuckDB opened at {} with memory_limit={}, threads=2",
            path, memory_limit
        );
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open the database file under `config.data_dir`, creating the
    /// directory if it does not exist yet.
    pub fn open_with_config(config: &Config) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        Self::open(&config.duckdb_path(), &config.duckdb_memory_limit)
    }

    /// Open an **in-memory** DuckDB database. Data is discarded on drop.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(&init_sql("1GB"))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Insert a batch of events in a single transaction.
    ///
    /// Event names are resolved to their first registered id; unknown names
    /// are registered on the fly. No-op if `events` is empty.
    pub async fn insert_events(&self, events: &[Event]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let mut name_ids: HashMap<(String, String), String> = HashMap::new();

        for event in events {
            let cache_key = (event.project_id.clone(), event.event_name.clone());
            let event_name_id = match name_ids.get(&cache_key) {
                Some(id) => id.clone(),
                None => {
                    let existing: Option<String> = {
                        let mut stmt = tx.prepare(
                            "SELECT id FROM event_names WHERE project_id = ?1 AND name = ?2 ORDER BY id LIMIT 1",
                        )?;
                        let mut rows =
                            stmt.query(duckdb::params![event.project_id, event.event_name])?;
                        let found = match rows.next()? {
                            Some(row) => Some(row.get(0)?),
                            None => None,
                        };
                        found
                    };
                    let id = match existing {
                        Some(id) => id,
                        None => {
                            let id = uuid::Uuid::new_v4().to_string();
                            tx.execute(
                                "INSERT INTO event_names (id, project_id, name) VALUES (?1, ?2, ?3)",
                                duckdb::params![id, event.project_id, event.event_name],
                            )?;
                            id
                        }
                    };
                    name_ids.insert(cache_key, id.clone());
                    id
                }
            };

            tx.execute(
                r#"INSERT INTO events (
                    id, project_id, user_id, event_name_id,
                    properties, user_properties, occurred_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
                duckdb::params![
                    event.id,
                    event.project_id,
                    event.user_id,
                    event_name_id,
                    serde_json::to_string(&event.properties)?,
                    serde_json::to_string(&event.user_properties)?,
                    event.timestamp,
                ],
            )?;
        }

        tx.commit()?;
        info!("Inserted {} events into DuckDB", events.len());
        Ok(())
    }

    /// Register an additional id under `name` and return it.
    pub async fn register_event_name(&self, project_id: &str, name: &str) -> Result<String> {
        let conn = self.conn.lock().await;
        let id = uuid::Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO event_names (id, project_id, name) VALUES (?1, ?2, ?3)",
            duckdb::params![id, project_id, name],
        )?;
        Ok(id)
    }

    /// Insert or update users. Safe to call repeatedly with the same ids.
    pub async fn upsert_users(&self, users: &[User]) -> Result<()> {
        if users.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        for user in users {
            tx.execute(
                r#"INSERT INTO users (id, project_id, customer_user_id)
                   VALUES (?1, ?2, ?3)
                   ON CONFLICT (project_id, id) DO UPDATE SET customer_user_id = EXCLUDED.customer_user_id"#,
                duckdb::params![user.id, user.project_id, user.customer_user_id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub async fn insert_performance(&self, records: &[PerformanceRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        for record in records {
            tx.execute(
                r#"INSERT INTO marketing_performance (
                    project_id, date, dimension, key_value, channel,
                    impressions, clicks, spend, dimensions
                ) VALUES (?1, CAST(?2 AS DATE), ?3, ?4, ?5, ?6, ?7, ?8, ?9)"#,
                duckdb::params![
                    record.project_id,
                    record.date.format("%Y-%m-%d").to_string(),
                    record.dimension.as_str(),
                    record.key,
                    record.channel,
                    record.impressions,
                    record.clicks,
                    record.spend,
                    serde_json::to_string(&record.custom_dimensions)?,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Configure the ad channel and account ids for a project.
    pub async fn set_channel_accounts(
        &self,
        project_id: &str,
        channel: &str,
        account_ids: &[&str],
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO project_settings (project_id, channel, account_ids)
               VALUES (?1, ?2, ?3)
               ON CONFLICT (project_id) DO UPDATE SET
                   channel = EXCLUDED.channel,
                   account_ids = EXCLUDED.account_ids"#,
            duckdb::params![project_id, channel, account_ids.join(",")],
        )?;
        Ok(())
    }

    pub async fn insert_currency(
        &self,
        project_id: &str,
        account_id: &str,
        date: NaiveDate,
        currency: &str,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT OR REPLACE INTO channel_currency (project_id, account_id, date, currency)
               VALUES (?1, ?2, CAST(?3 AS DATE), ?4)"#,
            duckdb::params![
                project_id,
                account_id,
                date.format("%Y-%m-%d").to_string(),
                currency
            ],
        )?;
        Ok(())
    }

    /// Execute `SELECT 1` as a lightweight liveness check.
    pub async fn ping(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute_batch("SELECT 1")?;
        Ok(())
    }

    /// Acquire the DuckDB connection lock for direct queries.
    ///
    /// Intended for integration tests that need to verify stored data.
    pub async fn conn_for_test(&self) -> tokio::sync::MutexGuard<'_, Connection> {
        self.conn.lock().await
    }
}
