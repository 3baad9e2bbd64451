//! 系统剪贴板变化监听
//!
//! 基于 `clipboard-master` 在独立线程中运行监听循环。`subscribe` 等待监听线程
//! 完成首次注册后才返回，注册失败直接报告给调用方；运行中意外退出时按指数退避重启。
//! `unsubscribe` 通过 `Shutdown` 句柄结束循环并回收线程。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use clipboard_master::{CallbackResult, ClipboardHandler, Master};

use super::{ChangeCallback, ChangeListener};
use crate::error::AppError;

const MONITOR_RESTART_BASE_DELAY_MS: u64 = 100;
const MONITOR_RESTART_MAX_DELAY_MS: u64 = 5_000;
const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(5);

fn compute_restart_backoff_ms(restart_attempt: u32) -> u64 {
    let exp = 1_u64 << restart_attempt.saturating_sub(1).min(6);
    MONITOR_RESTART_BASE_DELAY_MS
        .saturating_mul(exp)
        .min(MONITOR_RESTART_MAX_DELAY_MS)
}

fn lock_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::warn!("剪贴板监听状态锁中毒，继续使用恢复数据");
            poisoned.into_inner()
        }
    }
}

/// 剪贴板事件处理器（内部实现）
struct Handler {
    callback: ChangeCallback,
}

impl ClipboardHandler for Handler {
    fn on_clipboard_change(&mut self) -> CallbackResult {
        (self.callback)();
        CallbackResult::Next
    }

    fn on_clipboard_error(&mut self, error: std::io::Error) -> CallbackResult {
        log::error!("剪贴板错误：{}", error);
        CallbackResult::Next
    }
}

type ShutdownSignal = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct Worker {
    shutdown: Arc<Mutex<Option<ShutdownSignal>>>,
    stopping: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

/// `clipboard-master` 驱动的系统监听器
#[derive(Default)]
pub struct MasterListener {
    worker: Mutex<Option<Worker>>,
}

impl MasterListener {
    pub fn new() -> Self {
        Self::default()
    }
}

fn run_listener_loop(
    callback: ChangeCallback,
    shutdown_slot: Arc<Mutex<Option<ShutdownSignal>>>,
    stopping: Arc<AtomicBool>,
    ready: mpsc::Sender<Result<(), String>>,
) {
    let mut ready = Some(ready);
    let mut restart_attempt: u32 = 0;

    while !stopping.load(Ordering::SeqCst) {
        match Master::new(Handler { callback: callback.clone() }) {
            Ok(mut master) => {
                let shutdown = master.shutdown_channel();
                *lock_recover(&shutdown_slot) = Some(Box::new(move || shutdown.signal()));
                // 重启期间收到停止请求时，立即补发信号
                if stopping.load(Ordering::SeqCst) {
                    if let Some(signal) = lock_recover(&shutdown_slot).take() {
                        signal();
                    }
                }
                if let Some(ready) = ready.take() {
                    let _ = ready.send(Ok(()));
                }
                restart_attempt = 0;
                log::debug!("📋 剪贴板监听循环已进入");
                if let Err(err) = master.run() {
                    log::error!("📋 剪贴板监听异常退出: {}", err);
                }
                lock_recover(&shutdown_slot).take();
            }
            Err(err) => {
                if let Some(ready) = ready.take() {
                    let _ = ready.send(Err(err.to_string()));
                    return;
                }
                log::error!("📋 创建剪贴板监听失败: {}", err);
            }
        }

        if stopping.load(Ordering::SeqCst) {
            break;
        }

        restart_attempt = restart_attempt.saturating_add(1);
        let backoff_ms = compute_restart_backoff_ms(restart_attempt);
        log::warn!("📋 剪贴板监听 {}ms 后重试（attempt={}）", backoff_ms, restart_attempt);
        thread::sleep(Duration::from_millis(backoff_ms));
    }
}

impl ChangeListener for MasterListener {
    fn subscribe(&self, callback: ChangeCallback) -> Result<(), AppError> {
        let mut slot = lock_recover(&self.worker);
        if slot.is_some() {
            return Ok(());
        }

        let worker = Worker::default();
        let (ready_tx, ready_rx) = mpsc::channel();
        let shutdown = worker.shutdown.clone();
        let stopping = worker.stopping.clone();

        let handle = thread::Builder::new()
            .name("clipboard-listener".to_string())
            .spawn(move || run_listener_loop(callback, shutdown, stopping, ready_tx))
            .map_err(|e| AppError::ListenerRegistration(format!("启动监听线程失败: {}", e)))?;

        match ready_rx.recv_timeout(REGISTRATION_TIMEOUT) {
            Ok(Ok(())) => {
                *slot = Some(Worker { handle: Some(handle), ..worker });
                Ok(())
            }
            Ok(Err(message)) => {
                let _ = handle.join();
                Err(AppError::ListenerRegistration(message))
            }
            Err(_) => {
                worker.stopping.store(true, Ordering::SeqCst);
                Err(AppError::ListenerRegistration("等待监听注册超时".to_string()))
            }
        }
    }

    fn unsubscribe(&self) {
        let Some(mut worker) = lock_recover(&self.worker).take() else {
            return;
        };

        worker.stopping.store(true, Ordering::SeqCst);
        if let Some(signal) = lock_recover(&worker.shutdown).take() {
            signal();
        }
        if let Some(handle) = worker.handle.take() {
            if handle.join().is_err() {
                log::warn!("📋 剪贴板监听线程异常结束");
            }
        }
        log::debug!("📋 剪贴板监听线程已回收");
    }
}
