//! 基于 SQLite 的监控项存储

use crate::audit::AuditReport;
use crate::error::{Result, StorageError};
use crate::health::ProbeOutcome;
use crate::store::models::{CheckResult, Monitor, NewMonitor};
use crate::store::stats::MonitorStats;
use crate::store::MonitorStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const SCHEMA_SQL: &str = include_str!("schema.sql");

const MONITOR_COLUMNS: &str = "id, name, url, is_active, interval_seconds, timeout_seconds, \
    retry_count, strategy, created_at, total_checks, successful_checks, uptime_percentage, \
    avg_response_ms, last_status, last_check_at, perf_score, perf_fcp, perf_lcp, perf_cls, \
    perf_tbt, perf_seo, perf_accessible, perf_best_practices, perf_details, perf_screenshot, \
    perf_thumbnails, perf_audited_at";

const CHECK_COLUMNS: &str =
    "id, monitor_id, checked_at, is_up, status_code, response_ms, error, retry_attempts, ssl_valid";

type StorageResult<T> = std::result::Result<T, StorageError>;

/// 配置连接：WAL 日志模式、30 秒忙等待、启用外键
pub(crate) fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.busy_timeout(Duration::from_secs(30))?;
    let _mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    Ok(())
}

/// 打开数据库文件，必要时创建父目录
pub(crate) fn open_connection(path: &Path) -> StorageResult<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .map_err(|e| StorageError::Encoding(format!("创建数据目录失败: {}", e)))?;
        }
    }
    let conn = Connection::open(path)?;
    configure_connection(&conn)?;
    Ok(conn)
}

/// SQLite 存储
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// 打开（或创建）数据库文件并初始化表结构
    pub fn open(path: &Path) -> Result<Self> {
        let conn = open_connection(path)?;
        Ok(Self::init(conn, Some(path.to_path_buf()))?)
    }

    /// 创建内存数据库
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(StorageError::from)?;
        configure_connection(&conn).map_err(StorageError::from)?;
        Ok(Self::init(conn, None)?)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> StorageResult<Self> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// 数据库文件路径，内存库返回 `None`
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }

    fn create_monitor_sync(&self, monitor: &NewMonitor) -> StorageResult<Monitor> {
        let id = {
            let conn = self.lock()?;
            conn.execute(
                "INSERT INTO monitors (
                   name, url, is_active, interval_seconds, timeout_seconds, retry_count,
                   strategy, created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    monitor.name,
                    monitor.url,
                    monitor.is_active,
                    monitor.interval_seconds,
                    monitor.timeout_seconds,
                    monitor.retry_count,
                    monitor.strategy,
                    Utc::now(),
                ],
            )?;
            conn.last_insert_rowid()
        };

        self.get_monitor_sync(id)?
            .ok_or(StorageError::MonitorNotFound(id))
    }

    fn get_monitor_sync(&self, id: i64) -> StorageResult<Option<Monitor>> {
        let conn = self.lock()?;
        let monitor = conn
            .query_row(
                &format!("SELECT {MONITOR_COLUMNS} FROM monitors WHERE id = ?1"),
                params![id],
                monitor_from_row,
            )
            .optional()?;
        Ok(monitor)
    }

    fn list_monitors_sync(&self, only_active: bool) -> StorageResult<Vec<Monitor>> {
        let conn = self.lock()?;
        let sql = if only_active {
            format!("SELECT {MONITOR_COLUMNS} FROM monitors WHERE is_active = 1 ORDER BY id")
        } else {
            format!("SELECT {MONITOR_COLUMNS} FROM monitors ORDER BY id")
        };
        let mut stmt = conn.prepare(&sql)?;
        let monitors = stmt
            .query_map([], monitor_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(monitors)
    }

    fn record_check_sync(&self, monitor_id: i64, outcome: &ProbeOutcome) -> StorageResult<CheckResult> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut stats = tx
            .query_row(
                "SELECT total_checks, successful_checks, uptime_percentage, avg_response_ms,
                        last_status, last_check_at
                 FROM monitors WHERE id = ?1",
                params![monitor_id],
                stats_from_row,
            )
            .optional()?
            .ok_or(StorageError::MonitorNotFound(monitor_id))?;

        // 同一监控项的检测时间按写入顺序单调不减
        let now = Utc::now();
        let checked_at = match stats.last_check_at {
            Some(last) if last > now => last,
            _ => now,
        };
        stats.apply(outcome.is_up, Some(outcome.response_ms), checked_at);

        let response_ms = i64::try_from(outcome.response_ms).unwrap_or(i64::MAX);
        tx.execute(
            "INSERT INTO check_results (
               monitor_id, checked_at, is_up, status_code, response_ms, error,
               retry_attempts, ssl_valid
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                monitor_id,
                checked_at,
                outcome.is_up,
                outcome.status_code,
                response_ms,
                outcome.error,
                outcome.retry_attempts,
                outcome.ssl_valid,
            ],
        )?;
        let id = tx.last_insert_rowid();

        tx.execute(
            "UPDATE monitors SET
               total_checks = ?1, successful_checks = ?2, uptime_percentage = ?3,
               avg_response_ms = ?4, last_status = ?5, last_check_at = ?6
             WHERE id = ?7",
            params![
                stats.total_checks,
                stats.successful_checks,
                stats.uptime_percentage,
                stats.avg_response_ms,
                stats.last_status,
                stats.last_check_at,
                monitor_id,
            ],
        )?;
        tx.commit()?;

        Ok(CheckResult {
            id,
            monitor_id,
            checked_at,
            is_up: outcome.is_up,
            status_code: outcome.status_code,
            response_ms,
            error: outcome.error.clone(),
            retry_attempts: i64::from(outcome.retry_attempts),
            ssl_valid: outcome.ssl_valid,
        })
    }

    fn update_audit_snapshot_sync(&self, monitor_id: i64, report: &AuditReport) -> StorageResult<()> {
        let details = serde_json::to_string(&report.perf_details)
            .map_err(|e| StorageError::Encoding(e.to_string()))?;
        let thumbnails = serde_json::to_string(&report.perf_thumbnails)
            .map_err(|e| StorageError::Encoding(e.to_string()))?;

        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE monitors SET
               perf_score = ?1, perf_fcp = ?2, perf_lcp = ?3, perf_cls = ?4, perf_tbt = ?5,
               perf_seo = ?6, perf_accessible = ?7, perf_best_practices = ?8,
               perf_details = ?9, perf_screenshot = ?10, perf_thumbnails = ?11,
               perf_audited_at = ?12
             WHERE id = ?13",
            params![
                report.perf_score,
                report.perf_fcp,
                report.perf_lcp,
                report.perf_cls,
                report.perf_tbt,
                report.perf_seo,
                report.perf_accessible,
                report.perf_best_practices,
                details,
                report.perf_screenshot,
                thumbnails,
                Utc::now(),
                monitor_id,
            ],
        )?;

        if updated == 0 {
            return Err(StorageError::MonitorNotFound(monitor_id));
        }
        Ok(())
    }

    fn recent_checks_sync(&self, monitor_id: i64, limit: u32) -> StorageResult<Vec<CheckResult>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CHECK_COLUMNS} FROM check_results
             WHERE monitor_id = ?1 ORDER BY id DESC LIMIT ?2"
        ))?;
        let checks = stmt
            .query_map(params![monitor_id, limit], check_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(checks)
    }
}

#[async_trait]
impl MonitorStore for SqliteStore {
    async fn create_monitor(&self, monitor: NewMonitor) -> Result<Monitor> {
        let created = self.create_monitor_sync(&monitor)?;
        tracing::info!("已添加监控项 {} ({}): {}", created.id, created.name, created.url);
        Ok(created)
    }

    async fn get_monitor(&self, id: i64) -> Result<Option<Monitor>> {
        Ok(self.get_monitor_sync(id)?)
    }

    async fn list_monitors(&self) -> Result<Vec<Monitor>> {
        Ok(self.list_monitors_sync(false)?)
    }

    async fn list_active_monitors(&self) -> Result<Vec<Monitor>> {
        Ok(self.list_monitors_sync(true)?)
    }

    async fn record_check(&self, monitor_id: i64, outcome: &ProbeOutcome) -> Result<CheckResult> {
        Ok(self.record_check_sync(monitor_id, outcome)?)
    }

    async fn update_audit_snapshot(&self, monitor_id: i64, report: &AuditReport) -> Result<()> {
        Ok(self.update_audit_snapshot_sync(monitor_id, report)?)
    }

    async fn recent_checks(&self, monitor_id: i64, limit: u32) -> Result<Vec<CheckResult>> {
        Ok(self.recent_checks_sync(monitor_id, limit)?)
    }
}

fn json_column<T: DeserializeOwned + Default>(row: &Row<'_>, column: &str) -> rusqlite::Result<T> {
    let raw: Option<String> = row.get(column)?;
    match raw {
        None => Ok(T::default()),
        Some(text) => serde_json::from_str(&text).map_err(|e| {
            let index = row.as_ref().column_index(column).unwrap_or_default();
            rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e))
        }),
    }
}

fn stats_from_row(row: &Row<'_>) -> rusqlite::Result<MonitorStats> {
    Ok(MonitorStats {
        total_checks: row.get("total_checks")?,
        successful_checks: row.get("successful_checks")?,
        uptime_percentage: row.get("uptime_percentage")?,
        avg_response_ms: row.get("avg_response_ms")?,
        last_status: row.get("last_status")?,
        last_check_at: row.get("last_check_at")?,
    })
}

fn monitor_from_row(row: &Row<'_>) -> rusqlite::Result<Monitor> {
    let audited_at: Option<DateTime<Utc>> = row.get("perf_audited_at")?;
    let audit = match audited_at {
        Some(_) => Some(AuditReport {
            perf_score: row.get("perf_score")?,
            perf_seo: row.get("perf_seo")?,
            perf_accessible: row.get("perf_accessible")?,
            perf_best_practices: row.get("perf_best_practices")?,
            perf_fcp: row.get("perf_fcp")?,
            perf_lcp: row.get("perf_lcp")?,
            perf_cls: row.get("perf_cls")?,
            perf_tbt: row.get("perf_tbt")?,
            perf_details: json_column(row, "perf_details")?,
            perf_screenshot: row.get("perf_screenshot")?,
            perf_thumbnails: json_column(row, "perf_thumbnails")?,
        }),
        None => None,
    };

    Ok(Monitor {
        id: row.get("id")?,
        name: row.get("name")?,
        url: row.get("url")?,
        is_active: row.get("is_active")?,
        interval_seconds: row.get("interval_seconds")?,
        timeout_seconds: row.get("timeout_seconds")?,
        retry_count: row.get("retry_count")?,
        strategy: row.get("strategy")?,
        created_at: row.get("created_at")?,
        stats: stats_from_row(row)?,
        audit,
        audited_at,
    })
}

fn check_from_row(row: &Row<'_>) -> rusqlite::Result<CheckResult> {
    let status_code: Option<i64> = row.get("status_code")?;
    Ok(CheckResult {
        id: row.get("id")?,
        monitor_id: row.get("monitor_id")?,
        checked_at: row.get("checked_at")?,
        is_up: row.get("is_up")?,
        status_code: status_code.and_then(|code| u16::try_from(code).ok()),
        response_ms: row.get("response_ms")?,
        error: row.get("error")?,
        retry_attempts: row.get("retry_attempts")?,
        ssl_valid: row.get("ssl_valid")?,
    })
}
