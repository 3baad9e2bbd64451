//! 历史顺序、置顶豁免与视图缓存上限的约定

use chrono::{DateTime, Duration, Utc};
use clipboard_history_engine::clipboard::classifier::{classify, classify_text, PREVIEW_MAX_CHARS};
use clipboard_history_engine::clipboard::RawPayload;
use clipboard_history_engine::view::ViewCache;
use clipboard_history_engine::{ClipboardRecord, EventBus, HistoryQuery, HistoryStore};
use proptest::prelude::*;

fn at(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(1_700_000_000_000 + ms).expect("timestamp")
}

fn store() -> HistoryStore {
    HistoryStore::open_in_memory(EventBus::default()).expect("open store")
}

fn add_text(store: &HistoryStore, text: &str, created_at: DateTime<Utc>) -> i64 {
    let content = classify_text(text).expect("classified");
    store.add_at(&content, created_at).expect("add")
}

#[test]
fn pinned_records_sort_first_then_newest() {
    let store = store();
    let a = add_text(&store, "A", at(1));
    let b = add_text(&store, "B", at(5));
    let c = add_text(&store, "C", at(2));
    store.toggle_pin(a).expect("pin a");
    store.toggle_pin(c).expect("pin c");

    let ids: Vec<i64> = store
        .query(&HistoryQuery::new(10))
        .expect("query")
        .iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(ids, vec![c, a, b]);
}

#[test]
fn recopy_takes_time_of_second_copy() {
    let store = store();
    let first = store
        .upsert_on_change_at(&RawPayload::text("C"), at(10))
        .expect("first copy")
        .expect("outcome");
    store
        .upsert_on_change_at(&RawPayload::text("other"), at(20))
        .expect("other copy");
    let second = store
        .upsert_on_change_at(&RawPayload::text("C"), at(30))
        .expect("second copy")
        .expect("outcome");

    assert!(first.is_inserted());
    assert!(!second.is_inserted());
    assert_eq!(second.record().id, first.record().id);
    assert_eq!(second.record().created_at, at(30));
    assert_eq!(store.count().expect("count"), 2);
}

#[test]
fn retention_never_removes_pinned_records() {
    let store = store();
    let old_pinned = add_text(&store, "keep me", at(0));
    add_text(&store, "drop me", at(1));
    let recent = add_text(&store, "recent", at(10_000));
    store.toggle_pin(old_pinned).expect("pin");

    let removed = store.retention_sweep_before(at(5_000)).expect("sweep");
    assert_eq!(removed.len(), 1);

    let remaining: Vec<i64> = store
        .query(&HistoryQuery::new(10))
        .expect("query")
        .iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(remaining, vec![old_pinned, recent]);

    assert!(store.retention_sweep_before(at(5_000)).expect("second sweep").is_empty());
}

fn cache_record(id: i64) -> ClipboardRecord {
    let content = classify_text(&format!("entry number {id}")).expect("classified");
    ClipboardRecord {
        id,
        content_type: content.content_type,
        data: content.data,
        preview: content.preview,
        size_bytes: content.size_bytes,
        created_at: at(id),
        is_pinned: false,
        format: content.format,
    }
}

#[test]
fn cache_keeps_most_recent_entries() {
    let capacity = 20;
    let mut cache = ViewCache::new(capacity);
    for id in 1..=(capacity as i64 + 50) {
        cache.get_or_create(&cache_record(id));
    }

    assert_eq!(cache.len(), capacity);
    let expected: Vec<i64> = (51..=70).rev().collect();
    assert_eq!(cache.ids_by_recency(), expected);
}

proptest! {
    #[test]
    fn cache_never_exceeds_capacity_without_selection(
        capacity in 1usize..16,
        refs in prop::collection::vec(0i64..40, 1..120),
    ) {
        let mut cache = ViewCache::new(capacity);
        for id in &refs {
            cache.get_or_create(&cache_record(*id));
            prop_assert!(cache.len() <= capacity);
        }

        // 最近引用的不同 id 依次保留
        let mut expected = Vec::new();
        for id in refs.iter().rev() {
            if !expected.contains(id) {
                expected.push(*id);
            }
        }
        expected.truncate(capacity);
        prop_assert_eq!(cache.ids_by_recency(), expected);
    }

    #[test]
    fn classifier_is_total_over_text(text in "\\PC{0,400}") {
        match classify(&RawPayload::text(text.clone())) {
            Some(content) => {
                prop_assert!(!text.trim().is_empty());
                prop_assert!(!content.preview.is_empty());
                prop_assert!(content.preview.chars().count() <= PREVIEW_MAX_CHARS + 1);
            }
            None => prop_assert!(text.trim().is_empty()),
        }
    }
}

#[test]
fn history_window_after_many_copies() {
    let store = store();
    let start = at(0);
    for i in 0..30 {
        store
            .upsert_on_change_at(&RawPayload::text(format!("copy {i}")), start + Duration::milliseconds(i))
            .expect("copy");
    }
    let page = store
        .query(&HistoryQuery::new(5).offset(5))
        .expect("page");
    let texts: Vec<_> = page.iter().filter_map(|r| r.primary_data()).collect();
    assert_eq!(texts, vec!["copy 24", "copy 23", "copy 22", "copy 21", "copy 20"]);
}
