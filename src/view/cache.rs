//! 视图缓存
//!
//! ## 职责
//! - 以记录 id 为键缓存 `ViewProjection`，容量有上限
//! - `get_or_create` 命中时刷新投影并移到最近端，未命中时新建
//! - 超出容量时淘汰最久未使用的条目；当前选中项受保护
//!
//! ## 淘汰规则
//! 一轮淘汰中若最旧的条目恰好是选中项，把它移到最近端并结束本轮，
//! 缓存可能暂时多出一个条目，下一轮插入时再补偿。

use std::sync::Arc;

use lru::LruCache;

use super::ViewProjection;
use crate::db::ClipboardRecord;

pub struct ViewCache {
    entries: LruCache<i64, Arc<ViewProjection>>,
    capacity: usize,
    selected: Option<i64>,
}

impl ViewCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: LruCache::unbounded(),
            capacity: capacity.max(1),
            selected: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: i64) -> bool {
        self.entries.contains(&id)
    }

    /// 读取投影，不改变最近使用顺序
    pub fn peek(&self, id: i64) -> Option<Arc<ViewProjection>> {
        self.entries.peek(&id).cloned()
    }

    /// 返回记录对应的投影；已存在时按最新记录刷新并移到最近端
    pub fn get_or_create(&mut self, record: &ClipboardRecord) -> Arc<ViewProjection> {
        if let Some(existing) = self.entries.get_mut(&record.id) {
            if !existing.reflects(record) {
                *existing = Arc::new(ViewProjection::from_record(record));
            }
            return existing.clone();
        }

        let projection = Arc::new(ViewProjection::from_record(record));
        self.entries.put(record.id, projection.clone());
        self.evict_if_over_capacity();
        projection
    }

    /// 记录变化时原地刷新，不改变最近使用顺序；未缓存时返回 `false`
    pub fn refresh(&mut self, record: &ClipboardRecord) -> bool {
        match self.entries.peek_mut(&record.id) {
            Some(existing) => {
                if !existing.reflects(record) {
                    *existing = Arc::new(ViewProjection::from_record(record));
                }
                true
            }
            None => false,
        }
    }

    /// 移到最近端，O(1)
    pub fn move_to_front(&mut self, id: i64) -> bool {
        if self.entries.contains(&id) {
            self.entries.promote(&id);
            true
        } else {
            false
        }
    }

    pub fn remove(&mut self, id: i64) -> Option<Arc<ViewProjection>> {
        if self.selected == Some(id) {
            self.selected = None;
        }
        self.entries.pop(&id)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.selected = None;
    }

    pub fn select(&mut self, id: Option<i64>) {
        self.selected = id;
        if let Some(id) = id {
            self.move_to_front(id);
        }
    }

    pub fn selected(&self) -> Option<i64> {
        self.selected
    }

    /// 淘汰超出容量的条目，返回被淘汰的 id
    pub fn evict_if_over_capacity(&mut self) -> Vec<i64> {
        let mut evicted = Vec::new();
        while self.entries.len() > self.capacity {
            let Some((&oldest, _)) = self.entries.peek_lru() else {
                break;
            };
            if Some(oldest) == self.selected {
                self.entries.promote(&oldest);
                log::trace!("跳过淘汰选中项: id={}", oldest);
                break;
            }
            self.entries.pop_lru();
            evicted.push(oldest);
        }
        if !evicted.is_empty() {
            log::trace!("视图缓存淘汰 {} 个条目", evicted.len());
        }
        evicted
    }

    /// 当前所有投影（从最近到最久）
    pub fn snapshot(&self) -> Vec<Arc<ViewProjection>> {
        self.entries.iter().map(|(_, projection)| projection.clone()).collect()
    }

    /// 从最近到最久的 id 顺序
    pub fn ids_by_recency(&self) -> Vec<i64> {
        self.entries.iter().map(|(id, _)| *id).collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;

    use super::ViewCache;
    use crate::db::{ClipboardRecord, ContentType, RecordData};

    fn record(id: i64) -> ClipboardRecord {
        ClipboardRecord {
            id,
            content_type: ContentType::Text,
            data: RecordData::Text(format!("item {id}")),
            preview: format!("item {id}"),
            size_bytes: 6,
            created_at: DateTime::from_timestamp_millis(id * 1_000).expect("timestamp"),
            is_pinned: false,
            format: "text/plain".to_string(),
        }
    }

    #[test]
    fn evicts_least_recently_used() {
        let mut cache = ViewCache::new(3);
        for id in 1..=3 {
            cache.get_or_create(&record(id));
        }
        cache.move_to_front(1);
        cache.get_or_create(&record(4));

        assert_eq!(cache.len(), 3);
        assert!(!cache.contains(2));
        assert_eq!(cache.ids_by_recency(), vec![4, 1, 3]);
    }

    #[test]
    fn selected_item_survives_one_eviction_round() {
        let mut cache = ViewCache::new(2);
        cache.get_or_create(&record(1));
        cache.get_or_create(&record(2));
        cache.select(Some(1));
        cache.move_to_front(2);

        cache.get_or_create(&record(3));
        assert!(cache.contains(1));
        assert_eq!(cache.len(), 3);

        cache.select(None);
        cache.get_or_create(&record(4));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn get_or_create_refreshes_changed_record() {
        let mut cache = ViewCache::new(4);
        let first = cache.get_or_create(&record(1));
        assert!(!first.is_pinned);

        let mut pinned = record(1);
        pinned.is_pinned = true;
        let refreshed = cache.get_or_create(&pinned);
        assert!(refreshed.is_pinned);
        assert_eq!(cache.len(), 1);

        let same = cache.get_or_create(&pinned);
        assert!(std::sync::Arc::ptr_eq(&same, &refreshed));
    }

    #[test]
    fn refresh_does_not_insert_unknown_records() {
        let mut cache = ViewCache::new(4);
        assert!(!cache.refresh(&record(9)));
        assert!(cache.is_empty());
    }

    #[test]
    fn removing_selected_clears_selection() {
        let mut cache = ViewCache::new(4);
        cache.get_or_create(&record(1));
        cache.select(Some(1));
        assert!(cache.remove(1).is_some());
        assert_eq!(cache.selected(), None);
    }
}
