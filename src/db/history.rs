//! 历史记录读写子模块
//!
//! ## 职责
//! - 插入 / 去重提升 / 置顶切换 / 删除 / 查询 / 统计
//! - 每次成功写入后广播对应的 `EngineEvent`
//!
//! ## 输入/输出
//! - 底层函数接收 `&Connection`，便于在同一把锁内组合
//! - `HistoryStore` 方法负责加锁、组合与事件广播
//!
//! ## 错误语义
//! - SQL 失败统一映射为 `AppError::Persistence`
//! - `touch` / `toggle_pin` 针对不存在的 id 返回 `AppError::NotFound`
//! - `delete` 针对不存在的 id 返回 `Ok(false)`

use std::collections::BTreeMap;

use chrono::{DateTime, Local, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use sha2::{Digest, Sha256};

use crate::clipboard::classifier::{self, ClassifiedContent, RawPayload};
use crate::error::AppError;
use crate::events::EngineEvent;

use super::{ClipboardRecord, ContentType, HistoryQuery, HistoryStats, HistoryStore, RecordData};

pub(super) const RECORD_COLUMNS: &str =
    "id, content_type, primary_data, binary_data, preview, size_bytes, created_at, is_pinned, format";

/// 变化处理的结果：新插入或提升已有记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted(ClipboardRecord),
    Promoted(ClipboardRecord),
}

impl UpsertOutcome {
    pub fn record(&self) -> &ClipboardRecord {
        match self {
            UpsertOutcome::Inserted(record) | UpsertOutcome::Promoted(record) => record,
        }
    }

    pub fn into_record(self) -> ClipboardRecord {
        match self {
            UpsertOutcome::Inserted(record) | UpsertOutcome::Promoted(record) => record,
        }
    }

    pub fn is_inserted(&self) -> bool {
        matches!(self, UpsertOutcome::Inserted(_))
    }
}

/// 文本内容的 SHA-256（小写十六进制），作为去重索引
pub(crate) fn content_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

/// 大小写不敏感的子串匹配，查询层与视图层共用同一规则
pub fn text_matches(needle: &str, primary: Option<&str>, preview: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return true;
    }
    let needle = needle.to_lowercase();
    primary.is_some_and(|text| text.to_lowercase().contains(&needle))
        || preview.to_lowercase().contains(&needle)
}

pub(super) fn map_record(row: &Row<'_>) -> rusqlite::Result<ClipboardRecord> {
    let content_type: String = row.get(1)?;
    let primary: Option<String> = row.get(2)?;
    let binary: Option<Vec<u8>> = row.get(3)?;
    let created_at: i64 = row.get(6)?;
    let is_pinned: i64 = row.get(7)?;

    let data = match primary {
        Some(text) => RecordData::Text(text),
        None => RecordData::Binary(binary.unwrap_or_default()),
    };

    Ok(ClipboardRecord {
        id: row.get(0)?,
        content_type: ContentType::parse(&content_type),
        data,
        preview: row.get(4)?,
        size_bytes: row.get(5)?,
        created_at: DateTime::from_timestamp_millis(created_at).unwrap_or_default(),
        is_pinned: is_pinned != 0,
        format: row.get(8)?,
    })
}

pub(super) fn get_record(conn: &Connection, id: i64) -> Result<Option<ClipboardRecord>, AppError> {
    conn.query_row(
        &format!("SELECT {RECORD_COLUMNS} FROM history WHERE id = ?1"),
        params![id],
        map_record,
    )
    .optional()
    .map_err(|e| AppError::Persistence(format!("读取记录失败: {}", e)))
}

pub(super) fn require_record(conn: &Connection, id: i64) -> Result<ClipboardRecord, AppError> {
    get_record(conn, id)?.ok_or(AppError::NotFound(id))
}

/// 时钟驱动的写入时间：同一毫秒内的连续操作顺延 1ms，保证最近操作排在最前
fn next_timestamp(conn: &Connection, requested_ms: i64) -> Result<i64, AppError> {
    let latest: Option<i64> = conn
        .query_row("SELECT MAX(created_at) FROM history", [], |row| row.get(0))
        .map_err(|e| AppError::Persistence(format!("查询最新时间失败: {}", e)))?;
    Ok(match latest {
        Some(latest) if latest >= requested_ms => latest + 1,
        _ => requested_ms,
    })
}

pub(super) fn insert_record(
    conn: &Connection,
    content: &ClassifiedContent,
    created_at_ms: i64,
    is_pinned: bool,
) -> Result<i64, AppError> {
    let (primary, binary, hash) = match &content.data {
        RecordData::Text(text) => (Some(text.as_str()), None, Some(content_hash(text))),
        RecordData::Binary(bytes) => (None, Some(bytes.as_slice()), None),
    };

    conn.execute(
        "INSERT INTO history (content_type, primary_data, binary_data, content_hash, preview, size_bytes, created_at, is_pinned, format)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            content.content_type.as_str(),
            primary,
            binary,
            hash,
            content.preview,
            content.size_bytes,
            created_at_ms,
            i64::from(is_pinned),
            content.format,
        ],
    ).map_err(|e| AppError::Persistence(format!("插入记录失败: {}", e)))?;

    Ok(conn.last_insert_rowid())
}

pub(super) fn find_duplicate_id(
    conn: &Connection,
    content_type: ContentType,
    text: &str,
) -> Result<Option<i64>, AppError> {
    conn.query_row(
        "SELECT id FROM history
         WHERE content_type = ?1 AND content_hash = ?2 AND primary_data = ?3
         ORDER BY created_at DESC, id DESC LIMIT 1",
        params![content_type.as_str(), content_hash(text), text],
        |row| row.get(0),
    )
    .optional()
    .map_err(|e| AppError::Persistence(format!("查询重复记录失败: {}", e)))
}

fn touch_record(conn: &Connection, id: i64, created_at_ms: i64) -> Result<bool, AppError> {
    let changed = conn
        .execute(
            "UPDATE history SET created_at = ?1 WHERE id = ?2",
            params![created_at_ms, id],
        )
        .map_err(|e| AppError::Persistence(format!("更新记录时间失败: {}", e)))?;
    Ok(changed > 0)
}

fn toggle_pin_record(conn: &Connection, id: i64) -> Result<bool, AppError> {
    let changed = conn
        .execute(
            "UPDATE history SET is_pinned = 1 - is_pinned WHERE id = ?1",
            params![id],
        )
        .map_err(|e| AppError::Persistence(format!("切换置顶失败: {}", e)))?;
    Ok(changed > 0)
}

fn delete_record(conn: &Connection, id: i64) -> Result<bool, AppError> {
    let changed = conn
        .execute("DELETE FROM history WHERE id = ?1", params![id])
        .map_err(|e| AppError::Persistence(format!("删除记录失败: {}", e)))?;
    Ok(changed > 0)
}

/// 在同一把锁内完成“去重检查 → 提升或插入 → 上限裁剪”
fn upsert_locked(
    conn: &Connection,
    content: &ClassifiedContent,
    now_ms: i64,
    max_items: usize,
) -> Result<(UpsertOutcome, Vec<i64>), AppError> {
    let duplicate = match &content.data {
        RecordData::Text(text) if content.content_type.is_dedupable() => {
            find_duplicate_id(conn, content.content_type, text)?
        }
        _ => None,
    };

    let created_at = next_timestamp(conn, now_ms)?;

    if let Some(id) = duplicate {
        touch_record(conn, id, created_at)?;
        let record = require_record(conn, id)?;
        return Ok((UpsertOutcome::Promoted(record), Vec::new()));
    }

    let id = insert_record(conn, content, created_at, false)?;
    let record = require_record(conn, id)?;
    let removed = if max_items > 0 {
        super::cleanup::enforce_max_items_locked(conn, max_items)?
    } else {
        Vec::new()
    };
    Ok((UpsertOutcome::Inserted(record), removed))
}

fn query_records(conn: &Connection, query: &HistoryQuery) -> Result<Vec<ClipboardRecord>, AppError> {
    if query.limit == 0 {
        return Ok(Vec::new());
    }

    let type_filter = query.content_type.map(ContentType::as_str);
    let limit = i64::try_from(query.limit).unwrap_or(i64::MAX);
    let offset = i64::try_from(query.offset).unwrap_or(i64::MAX);

    let search = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let Some(search) = search else {
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {RECORD_COLUMNS} FROM history
                 WHERE (?1 IS NULL OR content_type = ?1)
                 ORDER BY is_pinned DESC, created_at DESC, id DESC
                 LIMIT ?2 OFFSET ?3"
            ))
            .map_err(|e| AppError::Persistence(format!("准备查询失败: {}", e)))?;
        return stmt
            .query_map(params![type_filter, limit, offset], map_record)
            .map_err(|e| AppError::Persistence(format!("查询历史失败: {}", e)))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AppError::Persistence(format!("读取行失败: {}", e)));
    };

    // SQLite 的 LIKE 只对 ASCII 忽略大小写，搜索在这里逐行匹配
    let mut stmt = conn
        .prepare(
            "SELECT id, primary_data, preview FROM history
             WHERE (?1 IS NULL OR content_type = ?1)
             ORDER BY is_pinned DESC, created_at DESC, id DESC",
        )
        .map_err(|e| AppError::Persistence(format!("准备搜索失败: {}", e)))?;
    let candidates = stmt
        .query_map(params![type_filter], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, String>(2)?,
            ))
        })
        .map_err(|e| AppError::Persistence(format!("搜索历史失败: {}", e)))?;

    let mut ids = Vec::new();
    let mut skipped = 0usize;
    for row in candidates {
        let (id, primary, preview) =
            row.map_err(|e| AppError::Persistence(format!("读取搜索结果失败: {}", e)))?;
        if !text_matches(search, primary.as_deref(), &preview) {
            continue;
        }
        if skipped < query.offset {
            skipped += 1;
            continue;
        }
        ids.push(id);
        if ids.len() >= query.limit {
            break;
        }
    }

    let mut records = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(record) = get_record(conn, id)? {
            records.push(record);
        }
    }
    Ok(records)
}

fn count_where(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<i64, AppError> {
    conn.query_row(sql, params, |row| row.get(0))
        .map_err(|e| AppError::Persistence(format!("统计失败: {}", e)))
}

fn get_stats(conn: &Connection) -> Result<HistoryStats, AppError> {
    let total = count_where(conn, "SELECT COUNT(*) FROM history", [])?;
    let pinned = count_where(conn, "SELECT COUNT(*) FROM history WHERE is_pinned = 1", [])?;

    let start_of_day = Local::now()
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|midnight| midnight.and_local_timezone(Local).earliest())
        .map(|midnight| midnight.timestamp_millis())
        .unwrap_or(0);
    let today = count_where(
        conn,
        "SELECT COUNT(*) FROM history WHERE created_at >= ?1",
        params![start_of_day],
    )?;

    let mut stmt = conn
        .prepare("SELECT content_type, COUNT(*) FROM history GROUP BY content_type")
        .map_err(|e| AppError::Persistence(format!("准备分类统计失败: {}", e)))?;
    let mut by_type = BTreeMap::new();
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
        .map_err(|e| AppError::Persistence(format!("分类统计失败: {}", e)))?;
    for row in rows {
        let (content_type, count) =
            row.map_err(|e| AppError::Persistence(format!("读取分类统计失败: {}", e)))?;
        *by_type.entry(ContentType::parse(&content_type)).or_insert(0) += count;
    }

    Ok(HistoryStats { total, today, pinned, by_type })
}

impl HistoryStore {
    /// 直接追加一条记录（不做去重），返回新 id
    pub fn add(&self, content: &ClassifiedContent) -> Result<i64, AppError> {
        let now = Utc::now().timestamp_millis();
        let record = self.with_conn(|conn| {
            let created_at = next_timestamp(conn, now)?;
            let id = insert_record(conn, content, created_at, false)?;
            require_record(conn, id)
        })?;
        let id = record.id;
        self.events.emit(EngineEvent::ClipboardChanged(record));
        Ok(id)
    }

    /// 以指定时间追加记录，时间原样写入
    pub fn add_at(&self, content: &ClassifiedContent, created_at: DateTime<Utc>) -> Result<i64, AppError> {
        let record = self.with_conn(|conn| {
            let id = insert_record(conn, content, created_at.timestamp_millis(), false)?;
            require_record(conn, id)
        })?;
        let id = record.id;
        self.events.emit(EngineEvent::ClipboardChanged(record));
        Ok(id)
    }

    /// 查找与给定文本完全相同的同类型记录
    pub fn find_duplicate(
        &self,
        content_type: ContentType,
        text: &str,
    ) -> Result<Option<ClipboardRecord>, AppError> {
        self.with_conn(|conn| match find_duplicate_id(conn, content_type, text)? {
            Some(id) => get_record(conn, id),
            None => Ok(None),
        })
    }

    /// 分类并写入一次剪贴板变化；空内容返回 `None`
    pub fn upsert_on_change(&self, payload: &RawPayload) -> Result<Option<UpsertOutcome>, AppError> {
        self.upsert_on_change_at(payload, Utc::now())
    }

    pub fn upsert_on_change_at(
        &self,
        payload: &RawPayload,
        now: DateTime<Utc>,
    ) -> Result<Option<UpsertOutcome>, AppError> {
        match classifier::classify(payload) {
            Some(content) => self.upsert_classified_at(&content, now).map(Some),
            None => Ok(None),
        }
    }

    pub fn upsert_classified(&self, content: &ClassifiedContent) -> Result<UpsertOutcome, AppError> {
        self.upsert_classified_at(content, Utc::now())
    }

    /// 已存在相同内容时提升到最前，否则插入新记录并按上限裁剪
    pub fn upsert_classified_at(
        &self,
        content: &ClassifiedContent,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, AppError> {
        let max_items = self.max_items();
        let (outcome, removed) = self.with_conn(|conn| {
            upsert_locked(conn, content, now.timestamp_millis(), max_items)
        })?;

        match &outcome {
            UpsertOutcome::Inserted(record) => {
                log::info!("📋 新增剪贴板记录: id={}, type={}", record.id, record.content_type.as_str());
            }
            UpsertOutcome::Promoted(record) => {
                log::debug!("重复内容，提升已有记录: id={}", record.id);
            }
        }

        self.events.emit(EngineEvent::ClipboardChanged(outcome.record().clone()));
        if !removed.is_empty() {
            log::info!("超出记录上限，移除 {} 条最旧记录", removed.len());
            self.events.emit(EngineEvent::RecordsRemoved(removed));
        }
        Ok(outcome)
    }

    /// 将记录时间刷新为当前时间，使其回到列表最前
    pub fn touch(&self, id: i64) -> Result<ClipboardRecord, AppError> {
        self.touch_at(id, Utc::now())
    }

    pub fn touch_at(&self, id: i64, now: DateTime<Utc>) -> Result<ClipboardRecord, AppError> {
        let record = self.with_conn(|conn| {
            let created_at = next_timestamp(conn, now.timestamp_millis())?;
            if !touch_record(conn, id, created_at)? {
                return Err(AppError::NotFound(id));
            }
            require_record(conn, id)
        })?;
        self.events.emit(EngineEvent::ClipboardChanged(record.clone()));
        Ok(record)
    }

    /// 切换置顶状态，返回更新后的记录
    pub fn toggle_pin(&self, id: i64) -> Result<ClipboardRecord, AppError> {
        let record = self.with_conn(|conn| {
            if !toggle_pin_record(conn, id)? {
                return Err(AppError::NotFound(id));
            }
            require_record(conn, id)
        })?;
        log::debug!("切换置顶: id={}, pinned={}", record.id, record.is_pinned);
        self.events.emit(EngineEvent::RecordUpdated(record.clone()));
        Ok(record)
    }

    /// 删除记录；记录不存在时返回 `Ok(false)`
    pub fn delete(&self, id: i64) -> Result<bool, AppError> {
        let removed = self.with_conn(|conn| delete_record(conn, id))?;
        if removed {
            self.events.emit(EngineEvent::RecordsRemoved(vec![id]));
        } else {
            log::debug!("删除的记录不存在: id={}", id);
        }
        Ok(removed)
    }

    pub fn get(&self, id: i64) -> Result<Option<ClipboardRecord>, AppError> {
        self.with_conn(|conn| get_record(conn, id))
    }

    /// 按 置顶优先 → 时间倒序 → id 倒序 返回一页记录
    pub fn query(&self, query: &HistoryQuery) -> Result<Vec<ClipboardRecord>, AppError> {
        self.with_conn(|conn| query_records(conn, query))
    }

    pub fn count(&self) -> Result<i64, AppError> {
        self.with_conn(|conn| count_where(conn, "SELECT COUNT(*) FROM history", []))
    }

    pub fn stats(&self) -> Result<HistoryStats, AppError> {
        self.with_conn(get_stats)
    }
}
