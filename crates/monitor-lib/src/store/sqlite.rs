//! SQLite-backed metric store

use super::MetricsStore;
use crate::error::StoreError;
use crate::models::{BlockIoMetric, ContainerMetric, HostMetric, MemoryMetric, NetworkMetric, Stored};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use tracing::{info, instrument};

const IN_MEMORY: &str = ":memory:";

const CREATE_CONTAINER_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS container_metrics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp INTEGER NOT NULL,
    container_id TEXT NOT NULL,
    container_name TEXT NOT NULL,
    cpu REAL NOT NULL,
    mem_percentage REAL NOT NULL,
    mem_used REAL NOT NULL,
    mem_total REAL NOT NULL,
    mem_used_unit TEXT NOT NULL,
    mem_total_unit TEXT NOT NULL,
    net_in REAL NOT NULL,
    net_out REAL NOT NULL,
    net_in_unit TEXT NOT NULL,
    net_out_unit TEXT NOT NULL,
    block_read REAL NOT NULL,
    block_write REAL NOT NULL,
    block_read_unit TEXT NOT NULL,
    block_write_unit TEXT NOT NULL
)
"#;

const CREATE_SERVER_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS server_metrics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp INTEGER NOT NULL,
    cpu REAL NOT NULL,
    cpu_model TEXT NOT NULL,
    cpu_cores INTEGER NOT NULL,
    cpu_speed REAL NOT NULL,
    os TEXT NOT NULL,
    distro TEXT NOT NULL,
    kernel TEXT NOT NULL,
    arch TEXT NOT NULL,
    mem_used REAL NOT NULL,
    mem_used_gb REAL NOT NULL,
    mem_total REAL NOT NULL,
    uptime INTEGER NOT NULL,
    disk_used REAL NOT NULL,
    total_disk REAL NOT NULL,
    network_in REAL NOT NULL,
    network_out REAL NOT NULL
)
"#;

const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_container_metrics_timestamp ON container_metrics(timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_container_metrics_name ON container_metrics(container_name, timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_server_metrics_timestamp ON server_metrics(timestamp)",
];

const CONTAINER_COLUMNS: &str = "id, timestamp, container_id, container_name, cpu, \
    mem_percentage, mem_used, mem_total, mem_used_unit, mem_total_unit, \
    net_in, net_out, net_in_unit, net_out_unit, \
    block_read, block_write, block_read_unit, block_write_unit";

const SERVER_COLUMNS: &str = "id, timestamp, cpu, cpu_model, cpu_cores, cpu_speed, \
    os, distro, kernel, arch, mem_used, mem_used_gb, mem_total, uptime, \
    disk_used, total_disk, network_in, network_out";

/// Metric store persisted in a SQLite database file
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `path` and create the tables
    ///
    /// `":memory:"` opens a private in-memory database.
    #[instrument(skip(path))]
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let db_path = path.display().to_string();
        info!(path = %db_path, "Opening metric store");

        let open_error = |e: sqlx::Error| StoreError::Open {
            path: db_path.clone(),
            reason: e.to_string(),
        };

        let pool = if path == Path::new(IN_MEMORY) {
            // Every connection to :memory: is a separate database; keep exactly one alive
            let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(open_error)?;
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await
                .map_err(open_error)?
        } else {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StoreError::Open {
                        path: db_path.clone(),
                        reason: e.to_string(),
                    })?;
            }
            let options = SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true);
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await
                .map_err(open_error)?
        };

        let store = Self { pool };
        store.create_tables().await?;

        info!(path = %db_path, "Metric store ready");
        Ok(store)
    }

    async fn create_tables(&self) -> Result<(), StoreError> {
        let statements = [CREATE_CONTAINER_TABLE, CREATE_SERVER_TABLE]
            .into_iter()
            .chain(CREATE_INDEXES.iter().copied());

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Migration(e.to_string()))?;
        }
        Ok(())
    }

    /// Close the underlying pool, waiting for in-flight queries
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn decode_timestamp(micros: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::<Utc>::from_timestamp_micros(micros).ok_or(StoreError::Timestamp(micros))
}

fn limit_param(limit: Option<usize>) -> i64 {
    // SQLite treats a negative LIMIT as unbounded
    limit.map_or(-1, |n| i64::try_from(n).unwrap_or(i64::MAX))
}

fn row_to_container(row: &SqliteRow) -> Result<Stored<ContainerMetric>, StoreError> {
    Ok(Stored {
        id: row.try_get("id")?,
        metric: ContainerMetric {
            timestamp: decode_timestamp(row.try_get("timestamp")?)?,
            container_id: row.try_get("container_id")?,
            container_name: row.try_get("container_name")?,
            cpu: row.try_get("cpu")?,
            memory: MemoryMetric {
                percentage: row.try_get("mem_percentage")?,
                used: row.try_get("mem_used")?,
                total: row.try_get("mem_total")?,
                used_unit: row.try_get("mem_used_unit")?,
                total_unit: row.try_get("mem_total_unit")?,
            },
            network: NetworkMetric {
                input: row.try_get("net_in")?,
                output: row.try_get("net_out")?,
                input_unit: row.try_get("net_in_unit")?,
                output_unit: row.try_get("net_out_unit")?,
            },
            block_io: BlockIoMetric {
                read: row.try_get("block_read")?,
                write: row.try_get("block_write")?,
                read_unit: row.try_get("block_read_unit")?,
                write_unit: row.try_get("block_write_unit")?,
            },
        },
    })
}

fn row_to_host(row: &SqliteRow) -> Result<Stored<HostMetric>, StoreError> {
    let cores: i64 = row.try_get("cpu_cores")?;
    let uptime: i64 = row.try_get("uptime")?;

    Ok(Stored {
        id: row.try_get("id")?,
        metric: HostMetric {
            timestamp: decode_timestamp(row.try_get("timestamp")?)?,
            cpu: row.try_get("cpu")?,
            cpu_model: row.try_get("cpu_model")?,
            cpu_cores: u32::try_from(cores).unwrap_or_default(),
            cpu_speed_mhz: row.try_get("cpu_speed")?,
            os: row.try_get("os")?,
            distro: row.try_get("distro")?,
            kernel: row.try_get("kernel")?,
            arch: row.try_get("arch")?,
            mem_used_percent: row.try_get("mem_used")?,
            mem_used_gb: row.try_get("mem_used_gb")?,
            mem_total_gb: row.try_get("mem_total")?,
            uptime_secs: u64::try_from(uptime).unwrap_or_default(),
            disk_used_percent: row.try_get("disk_used")?,
            disk_total_gb: row.try_get("total_disk")?,
            network_in_mb: row.try_get("network_in")?,
            network_out_mb: row.try_get("network_out")?,
        },
    })
}

#[async_trait]
impl MetricsStore for SqliteStore {
    async fn save_container_metric(&self, metric: &ContainerMetric) -> Result<i64, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO container_metrics (timestamp, container_id, container_name, cpu,
                mem_percentage, mem_used, mem_total, mem_used_unit, mem_total_unit,
                net_in, net_out, net_in_unit, net_out_unit,
                block_read, block_write, block_read_unit, block_write_unit)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(metric.timestamp.timestamp_micros())
        .bind(&metric.container_id)
        .bind(&metric.container_name)
        .bind(metric.cpu)
        .bind(metric.memory.percentage)
        .bind(metric.memory.used)
        .bind(metric.memory.total)
        .bind(&metric.memory.used_unit)
        .bind(&metric.memory.total_unit)
        .bind(metric.network.input)
        .bind(metric.network.output)
        .bind(&metric.network.input_unit)
        .bind(&metric.network.output_unit)
        .bind(metric.block_io.read)
        .bind(metric.block_io.write)
        .bind(&metric.block_io.read_unit)
        .bind(&metric.block_io.write_unit)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn save_host_metric(&self, metric: &HostMetric) -> Result<i64, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO server_metrics (timestamp, cpu, cpu_model, cpu_cores, cpu_speed,
                os, distro, kernel, arch, mem_used, mem_used_gb, mem_total, uptime,
                disk_used, total_disk, network_in, network_out)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(metric.timestamp.timestamp_micros())
        .bind(metric.cpu)
        .bind(&metric.cpu_model)
        .bind(i64::from(metric.cpu_cores))
        .bind(metric.cpu_speed_mhz)
        .bind(&metric.os)
        .bind(&metric.distro)
        .bind(&metric.kernel)
        .bind(&metric.arch)
        .bind(metric.mem_used_percent)
        .bind(metric.mem_used_gb)
        .bind(metric.mem_total_gb)
        .bind(i64::try_from(metric.uptime_secs).unwrap_or(i64::MAX))
        .bind(metric.disk_used_percent)
        .bind(metric.disk_total_gb)
        .bind(metric.network_in_mb)
        .bind(metric.network_out_mb)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn host_metrics_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Stored<HostMetric>>, StoreError> {
        let sql = format!(
            "SELECT {SERVER_COLUMNS} FROM server_metrics \
             WHERE timestamp >= ? AND timestamp <= ? ORDER BY timestamp, id"
        );
        let rows = sqlx::query(&sql)
            .bind(start.timestamp_micros())
            .bind(end.timestamp_micros())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_host).collect()
    }

    async fn container_metrics_range(
        &self,
        name_prefix: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Stored<ContainerMetric>>, StoreError> {
        let sql = format!(
            "SELECT {CONTAINER_COLUMNS} FROM container_metrics \
             WHERE substr(container_name, 1, length(?)) = ? \
             AND timestamp >= ? AND timestamp <= ? ORDER BY timestamp, id"
        );
        let rows = sqlx::query(&sql)
            .bind(name_prefix)
            .bind(name_prefix)
            .bind(start.timestamp_micros())
            .bind(end.timestamp_micros())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_container).collect()
    }

    async fn last_host_metrics(&self, n: usize) -> Result<Vec<Stored<HostMetric>>, StoreError> {
        let sql = format!(
            "SELECT * FROM (SELECT {SERVER_COLUMNS} FROM server_metrics \
             ORDER BY timestamp DESC, id DESC LIMIT ?) ORDER BY timestamp, id"
        );
        let rows = sqlx::query(&sql)
            .bind(limit_param(Some(n)))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_host).collect()
    }

    async fn container_metrics_by_name(
        &self,
        name_prefix: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Stored<ContainerMetric>>, StoreError> {
        let sql = format!(
            "SELECT * FROM (SELECT {CONTAINER_COLUMNS} FROM container_metrics \
             WHERE substr(container_name, 1, length(?)) = ? \
             ORDER BY timestamp DESC, id DESC LIMIT ?) ORDER BY timestamp, id"
        );
        let rows = sqlx::query(&sql)
            .bind(name_prefix)
            .bind(name_prefix)
            .bind(limit_param(limit))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_container).collect()
    }

    async fn prune_container_metrics(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM container_metrics WHERE timestamp < ?")
            .bind(cutoff.timestamp_micros())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn prune_host_metrics(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM server_metrics WHERE timestamp < ?")
            .bind(cutoff.timestamp_micros())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
