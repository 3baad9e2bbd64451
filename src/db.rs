//! 历史存储模块
//!
//! # 设计思路
//!
//! 剪贴板历史的唯一数据源。使用 `rusqlite` 直接操作 SQLite，
//! 连接由 `Mutex` 保护，去重检查、置顶切换、保留清理都在同一把锁内完成，
//! 避免快速连续复制时的交错竞争。
//!
//! # 实现思路
//!
//! - 每个写操作成功后通过 `EventBus` 广播变化，失败返回 `AppError::Persistence`。
//! - 内容载荷用 `RecordData` 和类型保证“文本 / 二进制二选一”。
//! - 排序契约：`is_pinned DESC, created_at DESC, id DESC`，由索引支撑。
//! - 子模块按职责拆分：建表迁移 `schema`、增删改查 `history`、清理 `cleanup`、导入导出 `transfer`。

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::fs;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::events::EventBus;

mod cleanup;
mod history;
mod schema;
mod transfer;

pub use history::{text_matches, UpsertOutcome};
pub use transfer::ImportSummary;

// ============================================================================
// 数据模型
// ============================================================================

/// 剪贴板内容类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ContentType {
    Text,
    Code,
    Link,
    Color,
    Image,
    Files,
    Other,
}

impl ContentType {
    pub const ALL: [ContentType; 7] = [
        ContentType::Text,
        ContentType::Code,
        ContentType::Link,
        ContentType::Color,
        ContentType::Image,
        ContentType::Files,
        ContentType::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::Code => "code",
            ContentType::Link => "link",
            ContentType::Color => "color",
            ContentType::Image => "image",
            ContentType::Files => "files",
            ContentType::Other => "other",
        }
    }

    /// 未知的类型字符串归为 `Other`
    pub fn parse(value: &str) -> Self {
        match value {
            "text" => ContentType::Text,
            "code" => ContentType::Code,
            "link" => ContentType::Link,
            "color" => ContentType::Color,
            "image" => ContentType::Image,
            "files" => ContentType::Files,
            _ => ContentType::Other,
        }
    }

    /// 是否按内容精确去重
    ///
    /// 仅单值文本类参与去重；图片与文件列表总是追加。
    pub fn is_dedupable(self) -> bool {
        match self {
            ContentType::Text | ContentType::Code | ContentType::Link | ContentType::Color => true,
            ContentType::Image | ContentType::Files | ContentType::Other => false,
        }
    }

    /// 该类型的载荷是否为二进制（否则为文本）
    pub fn stores_binary(self) -> bool {
        matches!(self, ContentType::Image | ContentType::Other)
    }
}

/// 记录载荷：文本与二进制互斥
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "encoding", content = "value", rename_all = "camelCase")]
pub enum RecordData {
    Text(String),
    Binary(#[serde(with = "base64_bytes")] Vec<u8>),
}

impl RecordData {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            RecordData::Text(text) => Some(text),
            RecordData::Binary(_) => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            RecordData::Text(_) => None,
            RecordData::Binary(bytes) => Some(bytes),
        }
    }

    /// 文本按 UTF-8 字节计，二进制按原始字节计
    pub fn size_bytes(&self) -> i64 {
        let len = match self {
            RecordData::Text(text) => text.len(),
            RecordData::Binary(bytes) => bytes.len(),
        };
        i64::try_from(len).unwrap_or(i64::MAX)
    }
}

/// 持久化的剪贴板历史记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipboardRecord {
    pub id: i64,
    pub content_type: ContentType,
    pub data: RecordData,
    pub preview: String,
    pub size_bytes: i64,
    pub created_at: DateTime<Utc>,
    pub is_pinned: bool,
    pub format: String,
}

impl ClipboardRecord {
    pub fn primary_data(&self) -> Option<&str> {
        self.data.as_text()
    }

    pub fn binary_data(&self) -> Option<&[u8]> {
        self.data.as_bytes()
    }
}

/// 历史查询参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryQuery {
    pub limit: usize,
    pub offset: usize,
    pub search: Option<String>,
    pub content_type: Option<ContentType>,
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
            search: None,
            content_type: None,
        }
    }
}

impl HistoryQuery {
    pub fn new(limit: usize) -> Self {
        Self { limit, ..Self::default() }
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = Some(content_type);
        self
    }
}

/// 历史统计信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryStats {
    pub total: i64,
    pub today: i64,
    pub pinned: i64,
    pub by_type: std::collections::BTreeMap<ContentType, i64>,
}

// ============================================================================
// 存储句柄
// ============================================================================

/// 历史存储，持有唯一的 SQLite 连接
pub struct HistoryStore {
    conn: Mutex<Connection>,
    events: EventBus,
    max_items: AtomicUsize,
}

impl HistoryStore {
    /// 打开（或创建）数据库文件并初始化表结构
    pub fn open(db_path: &Path, events: EventBus) -> Result<Self, AppError> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)?;
        }
        log::info!("数据库路径: {}", db_path.display());

        let conn = Connection::open(db_path).map_err(|e| {
            AppError::Persistence(format!("打开数据库失败: {}", e))
        })?;
        Self::from_connection(conn, events)
    }

    /// 内存数据库，进程退出即丢弃
    pub fn open_in_memory(events: EventBus) -> Result<Self, AppError> {
        let conn = Connection::open_in_memory().map_err(|e| {
            AppError::Persistence(format!("打开内存数据库失败: {}", e))
        })?;
        Self::from_connection(conn, events)
    }

    fn from_connection(conn: Connection, events: EventBus) -> Result<Self, AppError> {
        schema::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            events,
            max_items: AtomicUsize::new(0),
        })
    }

    /// 设置记录数上限，0 表示不限制
    pub fn with_max_items(self, max_items: usize) -> Self {
        self.set_max_items(max_items);
        self
    }

    pub fn set_max_items(&self, max_items: usize) {
        self.max_items.store(max_items, Ordering::Relaxed);
    }

    pub fn max_items(&self) -> usize {
        self.max_items.load(Ordering::Relaxed)
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub(crate) fn with_conn<T>(
        &self,
        op: impl FnOnce(&Connection) -> Result<T, AppError>,
    ) -> Result<T, AppError> {
        let conn = self.conn.lock().map_err(|e| {
            AppError::Persistence(format!("获取数据库锁失败: {}", e))
        })?;
        op(&conn)
    }

    pub(crate) fn with_conn_mut<T>(
        &self,
        op: impl FnOnce(&mut Connection) -> Result<T, AppError>,
    ) -> Result<T, AppError> {
        let mut conn = self.conn.lock().map_err(|e| {
            AppError::Persistence(format!("获取数据库锁失败: {}", e))
        })?;
        op(&mut conn)
    }
}

/// 二进制字段在 JSON 中以 base64 表示
mod base64_bytes {
    use base64::{engine::general_purpose, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::{ContentType, RecordData};

    #[test]
    fn content_type_roundtrips_through_column_value() {
        for content_type in ContentType::ALL {
            assert_eq!(ContentType::parse(content_type.as_str()), content_type);
        }
        assert_eq!(ContentType::parse("bitmap"), ContentType::Other);
    }

    #[test]
    fn only_text_like_types_dedup() {
        assert!(ContentType::Text.is_dedupable());
        assert!(ContentType::Color.is_dedupable());
        assert!(!ContentType::Image.is_dedupable());
        assert!(!ContentType::Files.is_dedupable());
    }

    #[test]
    fn binary_data_serializes_as_base64() {
        let data = RecordData::Binary(vec![0xde, 0xad, 0xbe, 0xef]);
        let json = serde_json::to_string(&data).expect("serialize binary");
        assert_eq!(json, r#"{"encoding":"binary","value":"3q2+7w=="}"#);

        let back: RecordData = serde_json::from_str(&json).expect("deserialize binary");
        assert_eq!(back, data);
    }

    #[test]
    fn size_counts_utf8_bytes() {
        assert_eq!(RecordData::Text("héllo".to_string()).size_bytes(), 6);
        assert_eq!(RecordData::Binary(vec![1, 2, 3]).size_bytes(), 3);
    }
}
