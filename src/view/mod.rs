//! 视图层
//!
//! # 设计思路
//!
//! 消费者（界面、命令行）看到的是轻量的 `ViewProjection`，而不是完整记录：
//! 预格式化的日期、大小、显示文本与置顶图标。投影由有上限的 `ViewCache` 持有，
//! `HistoryView` 在缓存快照上套用类别与搜索过滤，产出有序的可见列表。
//!
//! # 实现思路
//!
//! - `HistoryView::apply` 消费 `EngineEvent`，只修改缓存，然后整体重建可见列表。
//! - 可见列表的排序与存储层一致：置顶优先 → 时间倒序 → id 倒序。
//! - 视图从不主动访问数据库：`load` 显式查询，`load_records` 接收调用方已查询好的记录。

mod cache;
mod filter;

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use serde::Serialize;

pub use cache::ViewCache;
pub use filter::{Category, HistoryFilter};

use crate::clipboard::classifier::format_size;
use crate::db::{ClipboardRecord, ContentType, HistoryQuery, HistoryStore};
use crate::error::AppError;
use crate::events::EngineEvent;

pub const PINNED_GLYPH: &str = "⭐";
pub const UNPINNED_GLYPH: &str = "☆";

/// 单条记录的展示投影
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewProjection {
    pub id: i64,
    pub content_type: ContentType,
    pub display_text: String,
    pub preview: String,
    /// 文本内容，用于搜索；二进制记录为 `None`
    pub text: Option<String>,
    pub created_at: DateTime<Utc>,
    pub formatted_date: String,
    pub size_bytes: i64,
    pub formatted_size: String,
    pub is_pinned: bool,
    pub favorite_glyph: &'static str,
}

impl ViewProjection {
    pub fn from_record(record: &ClipboardRecord) -> Self {
        let text = record.primary_data().map(str::to_string);
        let display_text = if record.preview.is_empty() {
            text.clone().unwrap_or_default()
        } else {
            record.preview.clone()
        };

        Self {
            id: record.id,
            content_type: record.content_type,
            display_text,
            preview: record.preview.clone(),
            text,
            created_at: record.created_at,
            formatted_date: format_date(record.created_at),
            size_bytes: record.size_bytes,
            formatted_size: format_size(u64::try_from(record.size_bytes).unwrap_or(0)),
            is_pinned: record.is_pinned,
            favorite_glyph: if record.is_pinned { PINNED_GLYPH } else { UNPINNED_GLYPH },
        }
    }

    /// 投影是否仍与记录一致
    pub fn reflects(&self, record: &ClipboardRecord) -> bool {
        self.id == record.id
            && self.is_pinned == record.is_pinned
            && self.created_at == record.created_at
            && self.preview == record.preview
            && self.size_bytes == record.size_bytes
    }

    /// 展示顺序：置顶优先 → 时间倒序 → id 倒序
    pub fn display_order(a: &Self, b: &Self) -> Ordering {
        b.is_pinned
            .cmp(&a.is_pinned)
            .then_with(|| b.created_at.cmp(&a.created_at))
            .then_with(|| b.id.cmp(&a.id))
    }
}

/// 本地时间 `dd/MM/yyyy HH:mm`
pub fn format_date(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%d/%m/%Y %H:%M").to_string()
}

/// 面向消费者的历史列表
pub struct HistoryView {
    cache: ViewCache,
    filter: HistoryFilter,
    visible: Vec<Arc<ViewProjection>>,
}

impl HistoryView {
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: ViewCache::new(capacity),
            filter: HistoryFilter::default(),
            visible: Vec::new(),
        }
    }

    /// 从存储重新加载最近的记录，填满缓存
    pub fn load(&mut self, store: &HistoryStore) -> Result<(), AppError> {
        let records = store.query(&HistoryQuery::new(self.cache.capacity()))?;
        self.load_records(&records);
        Ok(())
    }

    /// 用已查询到的记录（按展示顺序）重建缓存
    pub fn load_records(&mut self, records: &[ClipboardRecord]) {
        let selected = self.cache.selected();

        self.cache.clear();
        // 倒序插入，使最近的记录位于缓存的最近端
        for record in records.iter().rev() {
            self.cache.get_or_create(record);
        }
        if let Some(id) = selected.filter(|id| self.cache.contains(*id)) {
            self.cache.select(Some(id));
        }

        log::debug!("视图已加载 {} 条记录", self.cache.len());
        self.recompute();
    }

    pub fn capacity(&self) -> usize {
        self.cache.capacity()
    }

    /// 应用一次引擎事件；返回可见列表是否可能变化
    pub fn apply(&mut self, event: &EngineEvent) -> bool {
        match event {
            EngineEvent::ClipboardChanged(record) => {
                self.cache.get_or_create(record);
            }
            EngineEvent::RecordUpdated(record) => {
                if !self.cache.refresh(record) {
                    self.cache.get_or_create(record);
                }
            }
            EngineEvent::RecordsRemoved(ids) => {
                let mut removed = false;
                for id in ids {
                    removed |= self.cache.remove(*id).is_some();
                }
                if !removed {
                    return false;
                }
            }
            EngineEvent::ErrorOccurred(_) | EngineEvent::MonitorStateChanged(_) => return false,
        }
        self.recompute();
        true
    }

    pub fn set_search(&mut self, search: impl Into<String>) {
        self.filter.search = search.into();
        self.recompute();
    }

    pub fn set_category(&mut self, category: Category) {
        self.filter.category = category;
        self.recompute();
    }

    pub fn filter(&self) -> &HistoryFilter {
        &self.filter
    }

    pub fn select(&mut self, id: Option<i64>) {
        self.cache.select(id.filter(|id| self.cache.contains(*id)));
    }

    pub fn selected(&self) -> Option<Arc<ViewProjection>> {
        self.cache.selected().and_then(|id| self.cache.peek(id))
    }

    pub fn items(&self) -> &[Arc<ViewProjection>] {
        &self.visible
    }

    pub fn cache(&self) -> &ViewCache {
        &self.cache
    }

    /// 基于缓存快照整体重建可见列表
    fn recompute(&mut self) {
        let mut items: Vec<_> = self
            .cache
            .snapshot()
            .into_iter()
            .filter(|projection| self.filter.matches(projection))
            .collect();
        items.sort_by(|a, b| ViewProjection::display_order(a, b));
        self.visible = items;
    }
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;

    use super::{Category, HistoryView, ViewProjection, PINNED_GLYPH, UNPINNED_GLYPH};
    use crate::db::{ClipboardRecord, ContentType, RecordData};
    use crate::events::EngineEvent;

    fn record(id: i64, text: &str, content_type: ContentType, ms: i64) -> ClipboardRecord {
        ClipboardRecord {
            id,
            content_type,
            data: RecordData::Text(text.to_string()),
            preview: text.to_string(),
            size_bytes: text.len() as i64,
            created_at: DateTime::from_timestamp_millis(ms).expect("timestamp"),
            is_pinned: false,
            format: "text/plain".to_string(),
        }
    }

    fn visible_ids(view: &HistoryView) -> Vec<i64> {
        view.items().iter().map(|p| p.id).collect()
    }

    #[test]
    fn projection_formats_fields() {
        let mut rec = record(1, "hello", ContentType::Text, 0);
        rec.size_bytes = 1536;
        let projection = ViewProjection::from_record(&rec);
        assert_eq!(projection.display_text, "hello");
        assert_eq!(projection.formatted_size, "1.5 KB");
        assert_eq!(projection.favorite_glyph, UNPINNED_GLYPH);
        assert_eq!(projection.formatted_date.len(), "dd/mm/yyyy hh:mm".len());

        rec.is_pinned = true;
        rec.preview.clear();
        let projection = ViewProjection::from_record(&rec);
        assert_eq!(projection.favorite_glyph, PINNED_GLYPH);
        assert_eq!(projection.display_text, "hello");
    }

    #[test]
    fn events_keep_pinned_first_then_recency() {
        let mut view = HistoryView::new(10);
        view.apply(&EngineEvent::ClipboardChanged(record(1, "a", ContentType::Text, 1_000)));
        view.apply(&EngineEvent::ClipboardChanged(record(2, "b", ContentType::Text, 2_000)));
        view.apply(&EngineEvent::ClipboardChanged(record(3, "c", ContentType::Text, 3_000)));
        assert_eq!(visible_ids(&view), vec![3, 2, 1]);

        let mut pinned = record(1, "a", ContentType::Text, 1_000);
        pinned.is_pinned = true;
        view.apply(&EngineEvent::RecordUpdated(pinned));
        assert_eq!(visible_ids(&view), vec![1, 3, 2]);

        view.apply(&EngineEvent::ClipboardChanged(record(2, "b", ContentType::Text, 4_000)));
        assert_eq!(visible_ids(&view), vec![1, 2, 3]);

        assert!(view.apply(&EngineEvent::RecordsRemoved(vec![3])));
        assert_eq!(visible_ids(&view), vec![1, 2]);
        assert!(!view.apply(&EngineEvent::RecordsRemoved(vec![99])));
    }

    #[test]
    fn category_and_search_filter_the_snapshot() {
        let mut view = HistoryView::new(10);
        view.apply(&EngineEvent::ClipboardChanged(record(1, "Hello", ContentType::Text, 1_000)));
        view.apply(&EngineEvent::ClipboardChanged(record(2, "https://hello.dev", ContentType::Link, 2_000)));
        view.apply(&EngineEvent::ClipboardChanged(record(3, "#fff", ContentType::Color, 3_000)));

        view.set_category(Category::Links);
        assert_eq!(visible_ids(&view), vec![2]);

        view.set_category(Category::All);
        view.set_search("HELLO");
        assert_eq!(visible_ids(&view), vec![2, 1]);

        view.set_search("");
        assert_eq!(visible_ids(&view), vec![3, 2, 1]);
    }

    #[test]
    fn other_category_shows_unrecognized_binary() {
        let mut view = HistoryView::new(10);
        view.apply(&EngineEvent::ClipboardChanged(record(1, "words", ContentType::Text, 1_000)));
        let mut blob = record(2, "Data (4 B)", ContentType::Other, 2_000);
        blob.data = RecordData::Binary(vec![1, 2, 3, 4]);
        view.apply(&EngineEvent::ClipboardChanged(blob));

        view.set_category(Category::from_label("Other"));
        assert_eq!(visible_ids(&view), vec![2]);
        view.set_category(Category::Images);
        assert!(visible_ids(&view).is_empty());
    }

    #[test]
    fn load_records_rebuilds_and_keeps_selection() {
        let mut view = HistoryView::new(2);
        view.apply(&EngineEvent::ClipboardChanged(record(1, "a", ContentType::Text, 1_000)));
        view.apply(&EngineEvent::ClipboardChanged(record(2, "b", ContentType::Text, 2_000)));
        view.select(Some(2));

        view.load_records(&[
            record(3, "c", ContentType::Text, 3_000),
            record(2, "b", ContentType::Text, 2_000),
        ]);
        assert_eq!(visible_ids(&view), vec![3, 2]);
        assert_eq!(view.selected().map(|p| p.id), Some(2));
        assert_eq!(view.capacity(), 2);

        view.load_records(&[record(4, "d", ContentType::Text, 4_000)]);
        assert_eq!(visible_ids(&view), vec![4]);
        assert!(view.selected().is_none());
    }

    #[test]
    fn removing_selected_item_clears_selection() {
        let mut view = HistoryView::new(10);
        view.apply(&EngineEvent::ClipboardChanged(record(1, "a", ContentType::Text, 1_000)));
        view.select(Some(1));
        assert_eq!(view.selected().map(|p| p.id), Some(1));

        view.apply(&EngineEvent::RecordsRemoved(vec![1]));
        assert!(view.selected().is_none());

        view.select(Some(42));
        assert!(view.selected().is_none());
    }
}
