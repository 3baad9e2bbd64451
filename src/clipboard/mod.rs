//! 剪贴板管理模块
//!
//! # 设计思路
//!
//! 统一管理剪贴板相关的核心能力：
//! - **监控**：`ClipboardMonitor` 接收系统变化通知，读取、分类并写入历史
//! - **自写抑制 + RAII Guard**：应用自身写入剪贴板前设置一次性标志，
//!   对应的那次通知被吞掉；标志带过期时间，通知丢失时不会误吞后续的真实复制
//! - **分类**：`classifier` 与 `code_detection` 为纯函数
//! - **平台适配**：`system`（arboard 读写）、`listener`（clipboard-master 通知）、
//!   `memory`（测试与无界面环境使用的内存剪贴板）
//!
//! # 实现思路
//!
//! - 平台能力通过 `ClipboardAccess` / `ChangeListener` 两个 trait 注入，监控器只依赖 trait。
//! - 抑制标志使用 `AtomicU64` 保存截止时间，`swap` 保证检查与清除是原子的。
//! - `IgnoreGuard` 构造时设置标志；写入失败未 `commit()` 时，`Drop` 自动撤销标志。

pub mod classifier;
pub mod code_detection;
pub mod listener;
pub mod memory;
pub mod monitor;
pub mod system;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::AppError;

pub use classifier::{classify, ClassifiedContent, ImagePayload, RawPayload};
pub use monitor::{ChangeOutcome, ClipboardMonitor};

// ============================================================================
// 平台接缝
// ============================================================================

/// 剪贴板变化回调
pub type ChangeCallback = Arc<dyn Fn() + Send + Sync>;

/// 读写系统剪贴板
pub trait ClipboardAccess: Send + Sync {
    /// 读取当前剪贴板内容
    ///
    /// 剪贴板被其他进程占用时返回 `AppError::TransientClipboardAccess`。
    fn read(&self) -> Result<RawPayload, AppError>;

    fn write_text(&self, text: &str) -> Result<(), AppError>;

    /// 写入已解码的图片
    fn write_image(&self, image: &DecodedImage) -> Result<(), AppError>;
}

/// 解码完成、可直接写入剪贴板的图片
///
/// 解码可能耗时较长，须在设置自写抑制标志之前完成。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    /// RGBA8 像素
    pub rgba: Vec<u8>,
    /// 原始编码数据（PNG 等）
    pub encoded: Vec<u8>,
}

impl DecodedImage {
    pub fn decode(bytes: &[u8]) -> Result<Self, AppError> {
        let img = image::load_from_memory(bytes)
            .map_err(|e| AppError::InvalidData(format!("解码图片失败: {}", e)))?;
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        Ok(Self {
            width,
            height,
            rgba: rgba.into_raw(),
            encoded: bytes.to_vec(),
        })
    }
}

/// 订阅系统剪贴板变化通知
pub trait ChangeListener: Send + Sync {
    fn subscribe(&self, callback: ChangeCallback) -> Result<(), AppError>;

    fn unsubscribe(&self);
}

/// 监控器生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MonitorState {
    Stopped,
    Starting,
    Monitoring,
    Stopping,
}

// ============================================================================
// 自写抑制标志
// ============================================================================

static EPOCH: once_cell::sync::Lazy<Instant> = once_cell::sync::Lazy::new(Instant::now);

fn now_ms() -> u64 {
    // +1 保证 0 始终表示“未设置”
    u64::try_from(EPOCH.elapsed().as_millis()).unwrap_or(u64::MAX - 1) + 1
}

/// 一次性、带过期时间的自写抑制标志
#[derive(Debug)]
pub struct SuppressionFlag {
    armed_until_ms: AtomicU64,
    window: Duration,
}

impl SuppressionFlag {
    pub fn new(window: Duration) -> Self {
        Self {
            armed_until_ms: AtomicU64::new(0),
            window,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// 设置标志：窗口期内的下一次变化通知将被忽略
    pub fn arm(&self) {
        let window_ms = u64::try_from(self.window.as_millis()).unwrap_or(u64::MAX / 2);
        self.armed_until_ms
            .store(now_ms().saturating_add(window_ms), Ordering::SeqCst);
        log::debug!("🚫 已设置剪贴板忽略标志 - 下一次剪贴板变化将被忽略");
    }

    pub fn disarm(&self) {
        self.armed_until_ms.store(0, Ordering::SeqCst);
    }

    pub fn is_armed(&self) -> bool {
        let deadline = self.armed_until_ms.load(Ordering::SeqCst);
        deadline != 0 && now_ms() <= deadline
    }

    /// 原子地检查并清除标志；仅在标志未过期时返回 `true`
    pub fn try_consume(&self) -> bool {
        let deadline = self.armed_until_ms.swap(0, Ordering::SeqCst);
        if deadline == 0 {
            return false;
        }
        if now_ms() > deadline {
            log::debug!("忽略标志已过期，按正常变化处理");
            return false;
        }
        true
    }
}

/// 自写抑制标志的 RAII 守卫
///
/// 构造时设置标志。写入成功后调用 `commit()` 保留标志，等待监控器消费；
/// 未 `commit()` 就离开作用域（写入失败、提前返回、panic）时撤销标志。
pub struct IgnoreGuard<'a> {
    flag: &'a SuppressionFlag,
    committed: bool,
}

impl<'a> IgnoreGuard<'a> {
    pub fn new(flag: &'a SuppressionFlag) -> Self {
        flag.arm();
        Self { flag, committed: false }
    }

    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for IgnoreGuard<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.flag.disarm();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::{IgnoreGuard, SuppressionFlag};

    #[test]
    fn flag_is_consumed_once() {
        let flag = SuppressionFlag::new(Duration::from_secs(5));
        flag.arm();
        assert!(flag.is_armed());
        assert!(flag.try_consume());
        assert!(!flag.try_consume());
        assert!(!flag.is_armed());
    }

    #[test]
    fn expired_flag_does_not_suppress() {
        let flag = SuppressionFlag::new(Duration::from_millis(20));
        flag.arm();
        thread::sleep(Duration::from_millis(60));
        assert!(!flag.try_consume());
        assert!(!flag.try_consume());
    }

    #[test]
    fn guard_disarms_when_not_committed() {
        let flag = SuppressionFlag::new(Duration::from_secs(5));
        {
            let _guard = IgnoreGuard::new(&flag);
            assert!(flag.is_armed());
        }
        assert!(!flag.is_armed());
    }

    #[test]
    fn committed_guard_keeps_flag() {
        let flag = SuppressionFlag::new(Duration::from_secs(5));
        IgnoreGuard::new(&flag).commit();
        assert!(flag.try_consume());
    }
}
