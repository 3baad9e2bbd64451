//! # 剪贴板历史引擎 — 无界面入口
//!
//! 加载配置、打开历史数据库、启动系统剪贴板监听，并定期执行保留期清理。
//! 引擎事件写入日志；Ctrl+C 时停止监听后退出。
//! 数据库查询与监听停止都会阻塞，统一放到 `spawn_blocking` 中执行。
//!
//! 用法：`clipboard-history-engine [配置文件路径]`

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clipboard_history_engine::clipboard::listener::MasterListener;
use clipboard_history_engine::clipboard::system::SystemClipboard;
use clipboard_history_engine::config::default_config_path;
use clipboard_history_engine::{
    AppError, ClipboardMonitor, ClipboardRecord, EngineConfig, EngineEvent, EventBus, HistoryQuery,
    HistoryStore, HistoryView,
};
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(err) = run().await {
        log::error!("引擎运行失败: {err}");
        std::process::exit(1);
    }
}

fn log_event(event: &EngineEvent) {
    match event {
        EngineEvent::ClipboardChanged(record) => {
            log::info!("📋 [{}] {}", record.content_type.as_str(), record.preview);
        }
        EngineEvent::RecordUpdated(record) => {
            log::debug!("记录更新: id={}, pinned={}", record.id, record.is_pinned);
        }
        EngineEvent::RecordsRemoved(ids) => log::debug!("记录移除: {:?}", ids),
        EngineEvent::ErrorOccurred(error) => log::warn!("引擎错误 ({:?}): {}", error.kind, error.message),
        EngineEvent::MonitorStateChanged(state) => log::debug!("监听状态: {:?}", state),
    }
}

async fn run_sweep(store: &Arc<HistoryStore>, config: &EngineConfig) {
    let Some(max_age) = config.retention() else {
        return;
    };
    let store = Arc::clone(store);
    match tokio::task::spawn_blocking(move || store.retention_sweep(max_age)).await {
        Ok(Ok(removed)) if !removed.is_empty() => {
            log::info!("🧹 清理过期记录 {} 条", removed.len());
        }
        Ok(Ok(_)) => {}
        Ok(Err(err)) => log::error!("保留期清理失败: {err}"),
        Err(err) => log::error!("保留期清理任务异常: {err}"),
    }
}

async fn query_recent(store: &Arc<HistoryStore>, limit: usize) -> Result<Vec<ClipboardRecord>, AppError> {
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || store.query(&HistoryQuery::new(limit)))
        .await
        .map_err(|e| AppError::Persistence(format!("查询任务异常: {e}")))?
}

async fn run() -> Result<(), AppError> {
    let config_path = match std::env::args().nth(1) {
        Some(path) => PathBuf::from(path),
        None => default_config_path()?,
    };
    let config = EngineConfig::load_from_path(&config_path).normalized();
    log::info!("配置文件: {}", config_path.display());

    let events = EventBus::default();
    let mut rx = events.subscribe();
    let store = Arc::new(
        HistoryStore::open(&config.resolve_db_path()?, events)?
            .with_max_items(config.max_items_in_database),
    );

    let mut view = HistoryView::new(config.max_cache_size);
    view.load_records(&query_recent(&store, view.capacity()).await?);
    log::info!("已加载 {} 条历史记录", view.items().len());

    let monitor = ClipboardMonitor::new(
        Arc::clone(&store),
        Arc::new(SystemClipboard::new()),
        Arc::new(MasterListener::new()),
        &config,
    );
    monitor.start()?;

    let mut sweep = tokio::time::interval(Duration::from_secs(config.sweep_interval_secs));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                if let Err(err) = result {
                    log::error!("监听退出信号失败: {err}");
                }
                break;
            }
            _ = sweep.tick() => run_sweep(&store, &config).await,
            event = rx.recv() => match event {
                Ok(event) => {
                    log_event(&event);
                    view.apply(&event);
                }
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("事件积压，跳过 {} 条，重新加载视图", skipped);
                    match query_recent(&store, view.capacity()).await {
                        Ok(records) => view.load_records(&records),
                        Err(err) => log::error!("重新加载视图失败: {err}"),
                    }
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    log::info!("正在停止剪贴板监听...");
    // stop 会等待正在处理的变化写完数据库
    if let Err(err) = tokio::task::spawn_blocking(move || monitor.stop()).await {
        log::error!("停止监听任务异常: {err}");
    }
    Ok(())
}
