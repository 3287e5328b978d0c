use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Row, params};

use super::models::{
    Category, Host, LogEntry, Metric, NewHost, NewLogEntry, NewMetric, PurgeCounts, from_millis,
    to_millis,
};
use crate::monitoring::types::HostStatus;
use crate::pool::LibsqlPool;

const HOST_COLUMNS: &str = "h.id, h.destination, h.title, h.category_id, c.name, h.status, h.created_at";

/// Database trait for abstracting database operations
#[async_trait]
pub trait Database: Send + Sync {
    /// List all categories ordered by name
    async fn list_categories(&self) -> Result<Vec<Category>>;

    /// Get a category by its unique name
    async fn get_category(&self, name: &str) -> Result<Option<Category>>;

    /// Insert a category, returning its id
    async fn insert_category(&self, name: &str) -> Result<i64>;

    /// Delete a category by id
    async fn delete_category(&self, id: i64) -> Result<()>;

    /// Move every host of one category to another
    async fn reassign_hosts(&self, from_category: i64, to_category: i64) -> Result<u64>;

    /// List all hosts
    async fn list_hosts(&self) -> Result<Vec<Host>>;

    /// Get a host by destination
    async fn get_host(&self, destination: &str) -> Result<Option<Host>>;

    /// Insert a host in the `pending` state, returning its id
    async fn insert_host(&self, host: &NewHost) -> Result<i64>;

    async fn update_host_status(&self, host_id: i64, status: HostStatus) -> Result<()>;

    /// Delete hosts (and their logs and metrics) by destination
    async fn delete_hosts(&self, destinations: &[String]) -> Result<u64>;

    /// Most recent monitoring log entry of a host
    async fn latest_log(&self, host_id: i64) -> Result<Option<LogEntry>>;

    /// Most recent non-sentinel snapshot of a host
    async fn latest_route_log(&self, host_id: i64, sentinel_prefix: &str) -> Result<Option<LogEntry>>;

    /// Newest first
    async fn recent_logs(&self, host_id: i64, limit: usize) -> Result<Vec<LogEntry>>;

    async fn append_log(&self, host_id: i64, entry: &NewLogEntry) -> Result<i64>;

    async fn record_metric(&self, host_id: i64, metric: &NewMetric) -> Result<i64>;

    /// Metrics within the optional bounds, oldest first
    async fn metrics_in_range(
        &self,
        host_id: i64,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Metric>>;

    /// Remove monitoring logs and metrics older than `cutoff`
    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<PurgeCounts>;
}

/// LibSQL database implementation
pub struct DatabaseImpl {
    pool: LibsqlPool,
}

impl DatabaseImpl {
    /// Create a new database instance from a pool
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    /// Get a connection from the pool
    async fn get_conn(&self) -> Result<deadpool::managed::Object<crate::pool::LibsqlManager>> {
        Ok(self.pool.get().await?)
    }
}

fn host_from_row(row: &Row) -> Result<Host> {
    let status: String = row.get(5)?;
    Ok(Host {
        id: row.get(0)?,
        destination: row.get(1)?,
        title: row.get(2)?,
        category_id: row.get(3)?,
        category: row.get(4)?,
        status: status.parse().map_err(|e: String| anyhow!(e))?,
        created_at: from_millis(row.get(6)?),
    })
}

fn log_from_row(row: &Row) -> Result<LogEntry> {
    Ok(LogEntry {
        id: row.get(0)?,
        host_id: row.get(1)?,
        timestamp: from_millis(row.get(2)?),
        snapshot: row.get(3)?,
        is_change: row.get::<i64>(4)? != 0,
    })
}

#[async_trait]
impl Database for DatabaseImpl {
    async fn list_categories(&self) -> Result<Vec<Category>> {
        let conn = self.get_conn().await?;
        let mut rows = conn.query("SELECT id, name FROM categories ORDER BY name", ()).await?;
        let mut categories = Vec::new();

        while let Some(row) = rows.next().await? {
            categories.push(Category { id: row.get(0)?, name: row.get(1)? });
        }

        Ok(categories)
    }

    async fn get_category(&self, name: &str) -> Result<Option<Category>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query("SELECT id, name FROM categories WHERE name = ?", params![name])
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Category { id: row.get(0)?, name: row.get(1)? })),
            None => Ok(None),
        }
    }

    async fn insert_category(&self, name: &str) -> Result<i64> {
        let conn = self.get_conn().await?;
        conn.execute("INSERT INTO categories (name) VALUES (?)", params![name]).await?;
        Ok(conn.last_insert_rowid())
    }

    async fn delete_category(&self, id: i64) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute("DELETE FROM categories WHERE id = ?", params![id]).await?;
        Ok(())
    }

    async fn reassign_hosts(&self, from_category: i64, to_category: i64) -> Result<u64> {
        let conn = self.get_conn().await?;
        let moved = conn
            .execute(
                "UPDATE hosts SET category_id = ? WHERE category_id = ?",
                params![to_category, from_category],
            )
            .await?;
        Ok(moved)
    }

    async fn list_hosts(&self) -> Result<Vec<Host>> {
        let conn = self.get_conn().await?;
        let sql = format!(
            "SELECT {HOST_COLUMNS} FROM hosts h JOIN categories c ON c.id = h.category_id ORDER BY h.id"
        );
        let mut rows = conn.query(&sql, ()).await?;
        let mut hosts = Vec::new();

        while let Some(row) = rows.next().await? {
            hosts.push(host_from_row(&row)?);
        }

        Ok(hosts)
    }

    async fn get_host(&self, destination: &str) -> Result<Option<Host>> {
        let conn = self.get_conn().await?;
        let sql = format!(
            "SELECT {HOST_COLUMNS} FROM hosts h JOIN categories c ON c.id = h.category_id WHERE h.destination = ?"
        );
        let mut rows = conn.query(&sql, params![destination]).await?;

        match rows.next().await? {
            Some(row) => Ok(Some(host_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn insert_host(&self, host: &NewHost) -> Result<i64> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO hosts (destination, title, category_id, status, created_at) VALUES (?, ?, ?, ?, ?)",
            params![
                host.destination.clone(),
                host.title.clone(),
                host.category_id,
                HostStatus::Pending.to_string(),
                to_millis(Utc::now())
            ],
        )
        .await?;

        Ok(conn.last_insert_rowid())
    }

    async fn update_host_status(&self, host_id: i64, status: HostStatus) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "UPDATE hosts SET status = ? WHERE id = ?",
            params![status.to_string(), host_id],
        )
        .await?;
        Ok(())
    }

    async fn delete_hosts(&self, destinations: &[String]) -> Result<u64> {
        if destinations.is_empty() {
            return Ok(0);
        }

        let conn = self.get_conn().await?;
        let tx = conn.transaction().await?;
        let mut deleted = 0;

        // History and metrics go with the host through ON DELETE CASCADE
        for destination in destinations {
            deleted += tx
                .execute("DELETE FROM hosts WHERE destination = ?", params![destination.clone()])
                .await?;
        }

        tx.commit().await?;
        Ok(deleted)
    }

    async fn latest_log(&self, host_id: i64) -> Result<Option<LogEntry>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT id, host_id, timestamp, snapshot, is_change FROM monitoring_logs WHERE host_id = ? ORDER BY timestamp DESC, id DESC LIMIT 1",
                params![host_id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(log_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn latest_route_log(&self, host_id: i64, sentinel_prefix: &str) -> Result<Option<LogEntry>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT id, host_id, timestamp, snapshot, is_change FROM monitoring_logs WHERE host_id = ? AND substr(snapshot, 1, length(?2)) <> ?2 ORDER BY timestamp DESC, id DESC LIMIT 1",
                params![host_id, sentinel_prefix],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(log_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn recent_logs(&self, host_id: i64, limit: usize) -> Result<Vec<LogEntry>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT id, host_id, timestamp, snapshot, is_change FROM monitoring_logs WHERE host_id = ? ORDER BY timestamp DESC, id DESC LIMIT ?",
                params![host_id, limit as i64],
            )
            .await?;
        let mut logs = Vec::new();

        while let Some(row) = rows.next().await? {
            logs.push(log_from_row(&row)?);
        }

        Ok(logs)
    }

    async fn append_log(&self, host_id: i64, entry: &NewLogEntry) -> Result<i64> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO monitoring_logs (host_id, timestamp, snapshot, is_change) VALUES (?, ?, ?, ?)",
            params![
                host_id,
                to_millis(entry.timestamp),
                entry.snapshot.clone(),
                if entry.is_change { 1 } else { 0 }
            ],
        )
        .await?;

        Ok(conn.last_insert_rowid())
    }

    async fn record_metric(&self, host_id: i64, metric: &NewMetric) -> Result<i64> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO metrics (host_id, timestamp, latency, packet_loss) VALUES (?, ?, ?, ?)",
            params![host_id, to_millis(metric.timestamp), metric.latency, metric.packet_loss],
        )
        .await?;

        Ok(conn.last_insert_rowid())
    }

    async fn metrics_in_range(
        &self,
        host_id: i64,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Metric>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT id, host_id, timestamp, latency, packet_loss FROM metrics
                 WHERE host_id = ?1 AND (?2 IS NULL OR timestamp >= ?2) AND (?3 IS NULL OR timestamp <= ?3)
                 ORDER BY timestamp ASC, id ASC",
                params![host_id, start.map(to_millis), end.map(to_millis)],
            )
            .await?;
        let mut metrics = Vec::new();

        while let Some(row) = rows.next().await? {
            metrics.push(Metric {
                id: row.get(0)?,
                host_id: row.get(1)?,
                timestamp: from_millis(row.get(2)?),
                latency: row.get(3)?,
                packet_loss: row.get(4)?,
            });
        }

        Ok(metrics)
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<PurgeCounts> {
        let conn = self.get_conn().await?;
        let cutoff = to_millis(cutoff);

        let metrics = conn
            .execute("DELETE FROM metrics WHERE timestamp < ?", params![cutoff])
            .await?;
        let logs = conn
            .execute("DELETE FROM monitoring_logs WHERE timestamp < ?", params![cutoff])
            .await?;

        Ok(PurgeCounts { logs, metrics })
    }
}
