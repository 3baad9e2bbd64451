//! 清理子模块
//!
//! ## 职责
//! - 保留期清理：删除早于截止时间且未置顶的记录
//! - 上限裁剪：总数超过上限时删除最旧的未置顶记录
//! - 批量删除 / 清空未置顶记录
//!
//! ## 错误语义
//! - 删除在事务内完成，失败时整体回滚并返回 `AppError::Persistence`
//! - 置顶记录永远不会被自动清理

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, params_from_iter, Connection};

use crate::error::AppError;
use crate::events::EngineEvent;

use super::HistoryStore;

fn collect_ids(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<Vec<i64>, AppError> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| AppError::Persistence(format!("准备查询待删条目失败: {}", e)))?;
    stmt.query_map(params, |row| row.get(0))
        .map_err(|e| AppError::Persistence(format!("查询待删条目失败: {}", e)))?
        .collect::<Result<Vec<i64>, _>>()
        .map_err(|e| AppError::Persistence(format!("读取待删条目失败: {}", e)))
}

fn delete_ids(conn: &Connection, ids: &[i64]) -> Result<(), AppError> {
    if ids.is_empty() {
        return Ok(());
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| AppError::Persistence(format!("开始删除事务失败: {}", e)))?;
    for chunk in ids.chunks(500) {
        let placeholders: Vec<&str> = chunk.iter().map(|_| "?").collect();
        let sql = format!("DELETE FROM history WHERE id IN ({})", placeholders.join(","));
        tx.execute(&sql, params_from_iter(chunk.iter()))
            .map_err(|e| AppError::Persistence(format!("批量删除失败: {}", e)))?;
    }
    tx.commit()
        .map_err(|e| AppError::Persistence(format!("提交删除事务失败: {}", e)))
}

pub(super) fn retention_sweep_locked(conn: &Connection, cutoff_ms: i64) -> Result<Vec<i64>, AppError> {
    let ids = collect_ids(
        conn,
        "SELECT id FROM history WHERE created_at < ?1 AND is_pinned = 0 ORDER BY id ASC",
        params![cutoff_ms],
    )?;
    delete_ids(conn, &ids)?;
    Ok(ids)
}

pub(super) fn enforce_max_items_locked(conn: &Connection, max_items: usize) -> Result<Vec<i64>, AppError> {
    let total: i64 = conn
        .query_row("SELECT COUNT(*) FROM history", [], |row| row.get(0))
        .map_err(|e| AppError::Persistence(format!("查询总数失败: {}", e)))?;
    let max_items = i64::try_from(max_items).unwrap_or(i64::MAX);
    let excess = total - max_items;
    if excess <= 0 {
        return Ok(Vec::new());
    }

    let ids = collect_ids(
        conn,
        "SELECT id FROM history WHERE is_pinned = 0 ORDER BY created_at ASC, id ASC LIMIT ?1",
        params![excess],
    )?;
    delete_ids(conn, &ids)?;
    Ok(ids)
}

fn delete_many_locked(conn: &Connection, ids: &[i64]) -> Result<Vec<i64>, AppError> {
    let mut existing = Vec::with_capacity(ids.len());
    for chunk in ids.chunks(500) {
        let placeholders: Vec<&str> = chunk.iter().map(|_| "?").collect();
        let sql = format!(
            "SELECT id FROM history WHERE id IN ({}) ORDER BY id ASC",
            placeholders.join(",")
        );
        existing.extend(collect_ids(conn, &sql, params_from_iter(chunk.iter()))?);
    }
    existing.dedup();
    delete_ids(conn, &existing)?;
    Ok(existing)
}

impl HistoryStore {
    /// 删除早于 `now - max_age` 的未置顶记录，返回被删除的 id
    pub fn retention_sweep(&self, max_age: Duration) -> Result<Vec<i64>, AppError> {
        self.retention_sweep_before(Utc::now() - max_age)
    }

    /// 删除早于 `cutoff` 的未置顶记录；重复执行结果相同
    pub fn retention_sweep_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<i64>, AppError> {
        let removed = self.with_conn(|conn| retention_sweep_locked(conn, cutoff.timestamp_millis()))?;
        if !removed.is_empty() {
            log::info!("🧹 保留期清理移除 {} 条记录", removed.len());
            self.events.emit(EngineEvent::RecordsRemoved(removed.clone()));
        }
        Ok(removed)
    }

    /// 总数超过 `max_items` 时删除最旧的未置顶记录
    pub fn enforce_max_items(&self, max_items: usize) -> Result<Vec<i64>, AppError> {
        if max_items == 0 {
            return Ok(Vec::new());
        }
        let removed = self.with_conn(|conn| enforce_max_items_locked(conn, max_items))?;
        if !removed.is_empty() {
            log::info!("超出记录上限 {}，移除 {} 条记录", max_items, removed.len());
            self.events.emit(EngineEvent::RecordsRemoved(removed.clone()));
        }
        Ok(removed)
    }

    /// 批量删除，返回实际存在并被删除的 id
    pub fn delete_many(&self, ids: &[i64]) -> Result<Vec<i64>, AppError> {
        let mut ids = ids.to_vec();
        ids.sort_unstable();
        ids.dedup();

        let removed = self.with_conn(|conn| delete_many_locked(conn, &ids))?;
        if !removed.is_empty() {
            self.events.emit(EngineEvent::RecordsRemoved(removed.clone()));
        }
        Ok(removed)
    }

    /// 清空所有未置顶记录
    pub fn clear_unpinned(&self) -> Result<Vec<i64>, AppError> {
        let removed = self.with_conn(|conn| {
            let ids = collect_ids(
                conn,
                "SELECT id FROM history WHERE is_pinned = 0 ORDER BY id ASC",
                [],
            )?;
            delete_ids(conn, &ids)?;
            Ok(ids)
        })?;
        if !removed.is_empty() {
            log::info!("已清空 {} 条未置顶记录", removed.len());
            self.events.emit(EngineEvent::RecordsRemoved(removed.clone()));
        }
        Ok(removed)
    }
}
