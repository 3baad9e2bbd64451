//! 内存剪贴板
//!
//! 同时实现 `ClipboardAccess` 与 `ChangeListener`：写入（无论来自“外部”还是监控器）
//! 都会同步触发已订阅的回调，行为与系统剪贴板一致。还可以注入故障：
//! 暂时性读取失败、监听注册失败、写入失败、丢失的变化通知，以及在读取中途暂停。

use std::sync::{Arc, Barrier, Mutex, MutexGuard};

use crate::error::AppError;

use super::{ChangeCallback, ChangeListener, ClipboardAccess, DecodedImage, ImagePayload, RawPayload};

#[derive(Default)]
struct MemoryState {
    payload: RawPayload,
    callback: Option<ChangeCallback>,
    failing_reads: u32,
    fail_subscribe: bool,
    fail_write: bool,
    read_gate: Option<(Arc<Barrier>, Arc<Barrier>)>,
    change_count: u64,
}

#[derive(Default)]
pub struct MemoryClipboard {
    state: Mutex<MemoryState>,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("内存剪贴板锁中毒，继续使用恢复数据");
                poisoned.into_inner()
            }
        }
    }

    /// 替换剪贴板内容并通知订阅者（模拟其他应用复制）
    pub fn copy(&self, payload: RawPayload) {
        self.replace(payload);
        self.notify();
    }

    pub fn copy_text(&self, text: impl Into<String>) {
        self.copy(RawPayload::text(text));
    }

    /// 替换内容但不发送通知（模拟通知丢失）
    pub fn copy_silently(&self, payload: RawPayload) {
        self.replace(payload);
    }

    fn replace(&self, payload: RawPayload) {
        let mut state = self.lock();
        state.payload = payload;
        state.change_count += 1;
    }

    /// 向订阅者发送一次变化通知；回调在锁外执行
    pub fn notify(&self) {
        let callback = self.lock().callback.clone();
        if let Some(callback) = callback {
            callback();
        }
    }

    pub fn current(&self) -> RawPayload {
        self.lock().payload.clone()
    }

    pub fn change_count(&self) -> u64 {
        self.lock().change_count
    }

    pub fn subscriber_count(&self) -> usize {
        usize::from(self.lock().callback.is_some())
    }

    /// 接下来 `count` 次读取返回暂时性错误
    pub fn fail_next_reads(&self, count: u32) {
        self.lock().failing_reads = count;
    }

    /// 下一次读取先在 `entered` 处汇合，再等待 `release` 放行
    pub fn hold_next_read(&self, entered: Arc<Barrier>, release: Arc<Barrier>) {
        self.lock().read_gate = Some((entered, release));
    }

    pub fn fail_next_subscribe(&self) {
        self.lock().fail_subscribe = true;
    }

    pub fn fail_next_write(&self) {
        self.lock().fail_write = true;
    }

    fn take_write_failure(&self) -> Result<(), AppError> {
        let mut state = self.lock();
        if state.fail_write {
            state.fail_write = false;
            return Err(AppError::Clipboard("模拟写入失败".to_string()));
        }
        Ok(())
    }
}

impl ClipboardAccess for MemoryClipboard {
    fn read(&self) -> Result<RawPayload, AppError> {
        let gate = self.lock().read_gate.take();
        if let Some((entered, release)) = gate {
            entered.wait();
            release.wait();
        }

        let mut state = self.lock();
        if state.failing_reads > 0 {
            state.failing_reads -= 1;
            return Err(AppError::TransientClipboardAccess("剪贴板被占用".to_string()));
        }
        Ok(state.payload.clone())
    }

    fn write_text(&self, text: &str) -> Result<(), AppError> {
        self.take_write_failure()?;
        self.copy(RawPayload::text(text));
        Ok(())
    }

    fn write_image(&self, image: &DecodedImage) -> Result<(), AppError> {
        self.take_write_failure()?;
        self.copy(RawPayload {
            image: Some(ImagePayload {
                width: image.width,
                height: image.height,
                bytes: image.encoded.clone(),
            }),
            ..RawPayload::default()
        });
        Ok(())
    }
}

impl ChangeListener for MemoryClipboard {
    fn subscribe(&self, callback: ChangeCallback) -> Result<(), AppError> {
        let mut state = self.lock();
        if state.fail_subscribe {
            state.fail_subscribe = false;
            return Err(AppError::ListenerRegistration("模拟监听注册失败".to_string()));
        }
        state.callback = Some(callback);
        Ok(())
    }

    fn unsubscribe(&self) {
        self.lock().callback = None;
    }
}
