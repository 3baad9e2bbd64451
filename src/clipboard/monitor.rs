//! 剪贴板监控器
//!
//! ## 职责
//! - 管理监听生命周期：`Stopped → Starting → Monitoring → Stopping → Stopped`
//! - 每次变化通知：抑制检查 → 读取 → 分类 → 捕获过滤 → 写入历史
//! - 应用主动写回剪贴板（`set_clipboard_content` / `apply_record`）并抑制自身触发的通知
//!
//! ## 并发
//! - `lifecycle` 锁串行化 `start` / `stop`
//! - `processing` 锁保证同一时刻只处理一次变化；`stop` 等待正在处理的那次完成
//! - 回调只持有 `Weak`，监控器释放后回调自然失效
//!
//! ## 错误语义
//! - 暂时性读取失败：记录警告后丢弃本次通知，不广播错误
//! - 其他失败：广播 `ErrorOccurred`，监控继续运行
//! - 只有监听注册失败会让 `start()` 返回错误

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use crate::config::{CaptureSettings, EngineConfig};
use crate::db::{ClipboardRecord, ContentType, HistoryStore, RecordData, UpsertOutcome};
use crate::error::{AppError, ErrorKind};
use crate::events::{EngineEvent, EventBus};

use super::{
    classifier, ChangeCallback, ChangeListener, ClipboardAccess, DecodedImage, IgnoreGuard, MonitorState,
    SuppressionFlag,
};

/// 一次变化通知的处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeOutcome {
    /// 监控未运行，通知被丢弃
    NotMonitoring,
    /// 应用自身写入触发的通知
    Suppressed,
    /// 剪贴板为空或只有空白
    Empty,
    /// 该类型的捕获开关已关闭
    Filtered(ContentType),
    Recorded(UpsertOutcome),
    Failed(ErrorKind),
}

struct MonitorInner {
    state: Mutex<MonitorState>,
    lifecycle: Mutex<()>,
    processing: Mutex<()>,
    store: Arc<HistoryStore>,
    access: Arc<dyn ClipboardAccess>,
    listener: Arc<dyn ChangeListener>,
    suppression: SuppressionFlag,
    capture: CaptureSettings,
    events: EventBus,
}

fn lock_recover<'a, T>(mutex: &'a Mutex<T>, name: &str) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::warn!("{}锁中毒，继续使用恢复数据", name);
            poisoned.into_inner()
        }
    }
}

impl MonitorInner {
    fn state(&self) -> MonitorState {
        *lock_recover(&self.state, "监控状态")
    }

    fn set_state(&self, next: MonitorState) {
        let changed = {
            let mut state = lock_recover(&self.state, "监控状态");
            let changed = *state != next;
            *state = next;
            changed
        };
        if changed {
            log::debug!("监控状态切换为 {:?}", next);
            self.events.emit(EngineEvent::MonitorStateChanged(next));
        }
    }

    fn handle_change(&self) -> ChangeOutcome {
        if self.state() != MonitorState::Monitoring {
            return ChangeOutcome::NotMonitoring;
        }

        let _processing = lock_recover(&self.processing, "变化处理");
        if self.state() != MonitorState::Monitoring {
            return ChangeOutcome::NotMonitoring;
        }

        if self.suppression.try_consume() {
            log::debug!("⏭️  忽略应用主动触发的剪贴板变化");
            return ChangeOutcome::Suppressed;
        }

        let payload = match self.access.read() {
            Ok(payload) => payload,
            Err(err) if err.is_transient() => {
                log::warn!("剪贴板被占用，跳过本次变化: {}", err);
                return ChangeOutcome::Failed(err.kind());
            }
            Err(err) => {
                log::error!("读取剪贴板失败: {}", err);
                self.events.emit_error(&err);
                return ChangeOutcome::Failed(err.kind());
            }
        };

        let Some(content) = classifier::classify(&payload) else {
            log::trace!("剪贴板内容为空，跳过");
            return ChangeOutcome::Empty;
        };

        if !self.capture.allows(content.content_type) {
            log::debug!("捕获开关已关闭，跳过 {} 内容", content.content_type.as_str());
            return ChangeOutcome::Filtered(content.content_type);
        }

        match self.store.upsert_classified(&content) {
            Ok(outcome) => ChangeOutcome::Recorded(outcome),
            Err(err) => {
                log::error!("保存剪贴板记录失败: {}", err);
                self.events.emit_error(&err);
                ChangeOutcome::Failed(err.kind())
            }
        }
    }

    fn accepts_writes(&self) -> bool {
        matches!(self.state(), MonitorState::Monitoring | MonitorState::Starting)
    }

    fn write_with_suppression(
        &self,
        write: impl FnOnce(&dyn ClipboardAccess) -> Result<(), AppError>,
    ) -> Result<(), AppError> {
        if !self.accepts_writes() {
            return write(self.access.as_ref());
        }
        let guard = IgnoreGuard::new(&self.suppression);
        write(self.access.as_ref())?;
        guard.commit();
        Ok(())
    }
}

/// 剪贴板变化监控器
pub struct ClipboardMonitor {
    inner: Arc<MonitorInner>,
}

impl ClipboardMonitor {
    pub fn new(
        store: Arc<HistoryStore>,
        access: Arc<dyn ClipboardAccess>,
        listener: Arc<dyn ChangeListener>,
        config: &EngineConfig,
    ) -> Self {
        let events = store.events().clone();
        Self {
            inner: Arc::new(MonitorInner {
                state: Mutex::new(MonitorState::Stopped),
                lifecycle: Mutex::new(()),
                processing: Mutex::new(()),
                store,
                access,
                listener,
                suppression: SuppressionFlag::new(Duration::from_millis(config.suppression_window_ms)),
                capture: config.capture.clone(),
                events,
            }),
        }
    }

    pub fn state(&self) -> MonitorState {
        self.inner.state()
    }

    pub fn is_monitoring(&self) -> bool {
        self.state() == MonitorState::Monitoring
    }

    pub fn store(&self) -> &Arc<HistoryStore> {
        &self.inner.store
    }

    pub fn suppression(&self) -> &SuppressionFlag {
        &self.inner.suppression
    }

    fn callback(&self) -> ChangeCallback {
        let weak: Weak<MonitorInner> = Arc::downgrade(&self.inner);
        Arc::new(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if catch_unwind(AssertUnwindSafe(|| inner.handle_change())).is_err() {
                log::error!("处理剪贴板变化时发生 panic，已拦截");
            }
        })
    }

    /// 开始监听；已在监听时为空操作
    pub fn start(&self) -> Result<(), AppError> {
        let _lifecycle = lock_recover(&self.inner.lifecycle, "生命周期");
        if self.inner.state() == MonitorState::Monitoring {
            return Ok(());
        }

        self.inner.set_state(MonitorState::Starting);
        match self.inner.listener.subscribe(self.callback()) {
            Ok(()) => {
                self.inner.set_state(MonitorState::Monitoring);
                log::info!("📋 剪贴板监听已启动");
                Ok(())
            }
            Err(err) => {
                let err = match err {
                    AppError::ListenerRegistration(_) => err,
                    other => AppError::ListenerRegistration(other.to_string()),
                };
                log::error!("📋 {}", err);
                self.inner.suppression.disarm();
                self.inner.set_state(MonitorState::Stopped);
                self.inner.events.emit_error(&err);
                Err(err)
            }
        }
    }

    /// 停止监听；等待正在处理的变化完成后返回
    pub fn stop(&self) {
        let _lifecycle = lock_recover(&self.inner.lifecycle, "生命周期");
        if self.inner.state() == MonitorState::Stopped {
            return;
        }

        self.inner.set_state(MonitorState::Stopping);
        self.inner.listener.unsubscribe();
        drop(lock_recover(&self.inner.processing, "变化处理"));
        self.inner.suppression.disarm();
        self.inner.set_state(MonitorState::Stopped);
        log::info!("📋 剪贴板监听已停止");
    }

    /// 处理一次变化通知，平台回调与测试都从这里进入
    pub fn handle_change(&self) -> ChangeOutcome {
        self.inner.handle_change()
    }

    /// 将文本写入系统剪贴板，本次写入触发的通知不会进入历史
    pub fn set_clipboard_content(&self, text: &str) -> Result<(), AppError> {
        self.inner.write_with_suppression(|access| access.write_text(text))
    }

    /// 将历史记录写回剪贴板，并把该记录提升到最前
    pub fn apply_record(&self, id: i64) -> Result<ClipboardRecord, AppError> {
        let record = self.inner.store.get(id)?.ok_or(AppError::NotFound(id))?;

        match (&record.data, record.content_type) {
            (RecordData::Text(text), _) => {
                self.inner.write_with_suppression(|access| access.write_text(text))?;
            }
            (RecordData::Binary(bytes), ContentType::Image) => {
                let image = DecodedImage::decode(bytes)?;
                self.inner.write_with_suppression(|access| access.write_image(&image))?;
            }
            (RecordData::Binary(_), other) => {
                return Err(AppError::InvalidData(format!(
                    "无法写回 {} 类型的内容",
                    other.as_str()
                )));
            }
        }

        self.inner.store.touch(id)
    }
}

impl Drop for ClipboardMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::{Duration, Instant};

    use super::{ChangeOutcome, ClipboardMonitor};
    use crate::clipboard::memory::MemoryClipboard;
    use crate::clipboard::{MonitorState, RawPayload};
    use crate::config::EngineConfig;
    use crate::db::{ContentType, HistoryQuery, HistoryStore};
    use crate::error::{AppError, ErrorKind};
    use crate::events::{EngineEvent, EventBus};

    fn setup(config: &EngineConfig) -> (Arc<MemoryClipboard>, ClipboardMonitor) {
        let store = Arc::new(HistoryStore::open_in_memory(EventBus::default()).expect("open store"));
        let clipboard = Arc::new(MemoryClipboard::new());
        let monitor = ClipboardMonitor::new(store, clipboard.clone(), clipboard.clone(), config);
        (clipboard, monitor)
    }

    #[test]
    fn notifications_are_ignored_while_stopped() {
        let (clipboard, monitor) = setup(&EngineConfig::default());
        clipboard.copy_text("before start");
        assert_eq!(monitor.handle_change(), ChangeOutcome::NotMonitoring);
        assert_eq!(monitor.store().count().expect("count"), 0);
    }

    #[test]
    fn start_is_idempotent_and_stop_returns_to_stopped() {
        let (clipboard, monitor) = setup(&EngineConfig::default());
        monitor.start().expect("start");
        monitor.start().expect("second start");
        assert!(monitor.is_monitoring());
        assert_eq!(clipboard.subscriber_count(), 1);

        monitor.stop();
        assert_eq!(monitor.state(), MonitorState::Stopped);
        assert_eq!(clipboard.subscriber_count(), 0);

        clipboard.copy_text("after stop");
        assert_eq!(monitor.store().count().expect("count"), 0);
    }

    #[test]
    fn failed_registration_reports_and_stays_stopped() {
        let (clipboard, monitor) = setup(&EngineConfig::default());
        let mut rx = monitor.store().events().subscribe();
        clipboard.fail_next_subscribe();

        let err = monitor.start().expect_err("registration should fail");
        assert!(matches!(err, AppError::ListenerRegistration(_)));
        assert_eq!(monitor.state(), MonitorState::Stopped);

        let mut saw_error = false;
        while let Ok(event) = rx.try_recv() {
            if let EngineEvent::ErrorOccurred(error) = event {
                assert_eq!(error.kind, ErrorKind::ListenerRegistration);
                saw_error = true;
            }
        }
        assert!(saw_error);
    }

    #[test]
    fn own_write_is_suppressed_exactly_once() {
        let (clipboard, monitor) = setup(&EngineConfig::default());
        monitor.start().expect("start");

        monitor.set_clipboard_content("from app").expect("write");
        assert_eq!(monitor.store().count().expect("count"), 0);
        assert!(!monitor.suppression().is_armed());

        clipboard.copy_text("from user");
        assert_eq!(monitor.store().count().expect("count"), 1);
    }

    #[test]
    fn failed_write_does_not_leave_flag_armed() {
        let (clipboard, monitor) = setup(&EngineConfig::default());
        monitor.start().expect("start");
        clipboard.fail_next_write();

        assert!(monitor.set_clipboard_content("nope").is_err());
        assert!(!monitor.suppression().is_armed());

        clipboard.copy_text("real copy");
        assert_eq!(monitor.store().count().expect("count"), 1);
    }

    #[test]
    fn transient_read_failure_is_swallowed() {
        let (clipboard, monitor) = setup(&EngineConfig::default());
        let mut rx = monitor.store().events().subscribe();
        monitor.start().expect("start");
        clipboard.fail_next_reads(1);

        clipboard.copy_text("busy");
        assert_eq!(monitor.store().count().expect("count"), 0);
        assert!(monitor.is_monitoring());
        while let Ok(event) = rx.try_recv() {
            assert!(!matches!(event, EngineEvent::ErrorOccurred(_)));
        }

        assert!(matches!(monitor.handle_change(), ChangeOutcome::Recorded(_)));
        assert_eq!(monitor.store().count().expect("count"), 1);
    }

    #[test]
    fn disabled_capture_type_is_filtered() {
        let mut config = EngineConfig::default();
        config.capture.colors = false;
        let (clipboard, monitor) = setup(&config);
        monitor.start().expect("start");

        clipboard.copy_text("#FF5733");
        assert_eq!(monitor.store().count().expect("count"), 0);
        assert_eq!(monitor.handle_change(), ChangeOutcome::Filtered(ContentType::Color));
    }

    #[test]
    fn empty_clipboard_is_dropped() {
        let (clipboard, monitor) = setup(&EngineConfig::default());
        monitor.start().expect("start");
        clipboard.copy(RawPayload::text("  "));
        assert_eq!(monitor.handle_change(), ChangeOutcome::Empty);
    }

    #[test]
    fn apply_record_writes_back_and_promotes() {
        let (clipboard, monitor) = setup(&EngineConfig::default());
        monitor.start().expect("start");
        clipboard.copy_text("first");
        clipboard.copy_text("second");

        let records = monitor.store().query(&HistoryQuery::new(10)).expect("query");
        let first = records
            .iter()
            .find(|r| r.primary_data() == Some("first"))
            .expect("first record")
            .id;

        let applied = monitor.apply_record(first).expect("apply");
        assert_eq!(applied.id, first);
        assert_eq!(clipboard.current().text.as_deref(), Some("first"));

        let records = monitor.store().query(&HistoryQuery::new(10)).expect("query");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, first);

        assert!(matches!(monitor.apply_record(404), Err(AppError::NotFound(404))));
    }

    fn png_bytes() -> Vec<u8> {
        let mut bytes = Vec::new();
        image::RgbaImage::new(1, 1)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .expect("encode png");
        bytes
    }

    #[test]
    fn undecodable_image_fails_before_arming_suppression() {
        let (clipboard, monitor) = setup(&EngineConfig::default());
        monitor.start().expect("start");
        // PNG 签名后没有任何图像块
        let broken = vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 1, 2, 3];
        monitor
            .store()
            .upsert_on_change(&RawPayload::image(broken, 1, 1))
            .expect("store image");
        let id = monitor.store().query(&HistoryQuery::new(1)).expect("query")[0].id;
        let writes_before = clipboard.change_count();

        assert!(matches!(monitor.apply_record(id), Err(AppError::InvalidData(_))));
        assert!(!monitor.suppression().is_armed());
        assert_eq!(clipboard.change_count(), writes_before);

        clipboard.copy_text("next user copy");
        assert_eq!(monitor.store().count().expect("count"), 2);
    }

    #[test]
    fn decoded_image_is_written_back_without_recording() {
        let (clipboard, monitor) = setup(&EngineConfig::default());
        monitor.start().expect("start");
        let png = png_bytes();
        clipboard.copy(RawPayload::image(png.clone(), 1, 1));
        clipboard.copy_text("later text");

        let image_id = monitor
            .store()
            .query(&HistoryQuery::new(10))
            .expect("query")
            .iter()
            .find(|r| r.content_type == ContentType::Image)
            .expect("image record")
            .id;

        monitor.apply_record(image_id).expect("apply image");
        assert!(!monitor.suppression().is_armed());
        assert_eq!(monitor.store().count().expect("count"), 2);
        let image = clipboard.current().image.expect("image on clipboard");
        assert_eq!((image.width, image.height), (1, 1));
        assert_eq!(image.bytes, png);
    }

    #[test]
    fn stop_waits_for_in_flight_change() {
        let (clipboard, monitor) = setup(&EngineConfig::default());
        let monitor = Arc::new(monitor);
        monitor.start().expect("start");

        let entered = Arc::new(Barrier::new(2));
        let release = Arc::new(Barrier::new(2));
        clipboard.hold_next_read(entered.clone(), release.clone());

        let copier = {
            let clipboard = clipboard.clone();
            thread::spawn(move || clipboard.copy_text("in flight"))
        };
        entered.wait();

        let stopped = Arc::new(AtomicBool::new(false));
        let stopper = {
            let monitor = monitor.clone();
            let stopped = stopped.clone();
            thread::spawn(move || {
                monitor.stop();
                stopped.store(true, Ordering::SeqCst);
                monitor.store().count().expect("count")
            })
        };

        let deadline = Instant::now() + Duration::from_secs(5);
        while monitor.state() != MonitorState::Stopping {
            assert!(Instant::now() < deadline, "stop never entered Stopping");
            thread::sleep(Duration::from_millis(1));
        }
        thread::sleep(Duration::from_millis(20));
        assert!(!stopped.load(Ordering::SeqCst));
        assert_eq!(monitor.handle_change(), ChangeOutcome::NotMonitoring);

        release.wait();
        copier.join().expect("copier thread");
        let count_when_stopped = stopper.join().expect("stopper thread");

        assert_eq!(count_when_stopped, 1);
        assert_eq!(monitor.state(), MonitorState::Stopped);
        assert!(!monitor.suppression().is_armed());
        assert_eq!(clipboard.subscriber_count(), 0);
    }
}
