//! 导入导出子模块
//!
//! 导出为 JSON 数组，二进制载荷以 base64 编码；导入时在单个事务内写入，
//! 可去重类型遇到已存在的相同内容时跳过，载荷种类与类型不符的条目同样跳过。
//! 提交后按上限裁剪，并为每条新记录广播 `ClipboardChanged`。

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::clipboard::classifier::{self, ClassifiedContent};
use crate::error::AppError;

use crate::events::EngineEvent;

use super::history::{find_duplicate_id, map_record, require_record, RECORD_COLUMNS};
use super::ClipboardRecord;
use super::{ContentType, HistoryStore, RecordData};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImportItem {
    content_type: ContentType,
    data: RecordData,
    #[serde(default)]
    preview: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    is_pinned: bool,
    #[serde(default)]
    format: Option<String>,
}

/// 导入结果统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub imported: usize,
    pub skipped: usize,
}

impl ImportItem {
    fn into_content(self) -> (ClassifiedContent, Option<DateTime<Utc>>, bool) {
        let preview = match self.preview {
            Some(preview) if !preview.trim().is_empty() => preview,
            _ => match &self.data {
                RecordData::Text(text) => classifier::truncate_preview(text),
                RecordData::Binary(bytes) => {
                    let size = classifier::format_size(bytes.len() as u64);
                    match self.content_type {
                        ContentType::Image => format!("Image ({size})"),
                        _ => format!("Data ({size})"),
                    }
                }
            },
        };
        let format = self.format.unwrap_or_else(|| default_format(self.content_type).to_string());
        let size_bytes = self.data.size_bytes();
        (
            ClassifiedContent {
                content_type: self.content_type,
                data: self.data,
                preview,
                format,
                size_bytes,
            },
            self.created_at,
            self.is_pinned,
        )
    }
}

fn default_format(content_type: ContentType) -> &'static str {
    match content_type {
        ContentType::Text => "text/plain",
        ContentType::Code => "text/code",
        ContentType::Link => "text/link",
        ContentType::Color => "color/hex",
        ContentType::Image => "image/png",
        ContentType::Files => "files",
        ContentType::Other => "application/octet-stream",
    }
}

fn is_blank(data: &RecordData) -> bool {
    match data {
        RecordData::Text(text) => text.trim().is_empty(),
        RecordData::Binary(bytes) => bytes.is_empty(),
    }
}

fn payload_matches_type(content_type: ContentType, data: &RecordData) -> bool {
    content_type.stores_binary() == matches!(data, RecordData::Binary(_))
}

struct ImportResult {
    summary: ImportSummary,
    inserted: Vec<ClipboardRecord>,
    removed: Vec<i64>,
}

fn import_items(
    conn: &mut Connection,
    items: Vec<ImportItem>,
    max_items: usize,
) -> Result<ImportResult, AppError> {
    let tx = conn
        .transaction()
        .map_err(|e| AppError::Persistence(format!("开始事务失败: {}", e)))?;

    let now = Utc::now().timestamp_millis();
    let mut summary = ImportSummary::default();
    let mut inserted = Vec::new();

    for item in items {
        if is_blank(&item.data) {
            summary.skipped += 1;
            continue;
        }
        if !payload_matches_type(item.content_type, &item.data) {
            log::warn!("导入条目的载荷与类型 {} 不符，已跳过", item.content_type.as_str());
            summary.skipped += 1;
            continue;
        }

        let (content, created_at, is_pinned) = item.into_content();
        if let RecordData::Text(text) = &content.data {
            if content.content_type.is_dedupable()
                && find_duplicate_id(&tx, content.content_type, text)?.is_some()
            {
                summary.skipped += 1;
                continue;
            }
        }

        let created_at = created_at.map_or(now, |at| at.timestamp_millis());
        let id = super::history::insert_record(&tx, &content, created_at, is_pinned)?;
        inserted.push(require_record(&tx, id)?);
        summary.imported += 1;
    }

    tx.commit()
        .map_err(|e| AppError::Persistence(format!("提交事务失败: {}", e)))?;

    // 裁剪自带事务，只能在导入事务提交之后执行
    let removed = if max_items > 0 && !inserted.is_empty() {
        super::cleanup::enforce_max_items_locked(conn, max_items)?
    } else {
        Vec::new()
    };
    inserted.retain(|record| !removed.contains(&record.id));

    Ok(ImportResult { summary, inserted, removed })
}

impl HistoryStore {
    /// 按展示顺序导出全部记录
    pub fn export_json(&self) -> Result<String, AppError> {
        let records = self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {RECORD_COLUMNS} FROM history ORDER BY is_pinned DESC, created_at DESC, id DESC"
                ))
                .map_err(|e| AppError::Persistence(format!("准备导出查询失败: {}", e)))?;
            stmt.query_map([], map_record)
                .map_err(|e| AppError::Persistence(format!("导出查询失败: {}", e)))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| AppError::Persistence(format!("读取导出数据失败: {}", e)))
        })?;

        log::info!("导出 {} 条历史记录", records.len());
        serde_json::to_string_pretty(&records)
            .map_err(|e| AppError::InvalidData(format!("序列化导出数据失败: {}", e)))
    }

    /// 导入 `export_json` 产出的数据，`id` 字段被忽略
    pub fn import_json(&self, json: &str) -> Result<ImportSummary, AppError> {
        let items: Vec<ImportItem> = serde_json::from_str(json)
            .map_err(|e| AppError::InvalidData(format!("解析导入数据失败: {}", e)))?;

        let max_items = self.max_items();
        let result = self.with_conn_mut(|conn| import_items(conn, items, max_items))?;
        let summary = result.summary;
        log::info!("导入完成: 新增 {} 条，跳过 {} 条", summary.imported, summary.skipped);

        for record in result.inserted {
            self.events.emit(EngineEvent::ClipboardChanged(record));
        }
        if !result.removed.is_empty() {
            log::info!("导入后超出记录上限，移除 {} 条最旧记录", result.removed.len());
            self.events.emit(EngineEvent::RecordsRemoved(result.removed));
        }
        Ok(summary)
    }
}
