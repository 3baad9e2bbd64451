//! # 剪贴板历史引擎 — 库入口
//!
//! ## 架构总览
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │             系统剪贴板 (arboard / clipboard-master)       │
//! └───────┬───────────────────────────────▲──────────────────┘
//!         │ 变化通知                       │ 写回 (IgnoreGuard)
//! ┌───────▼───────────────────────────────┴──────────────────┐
//! │  clipboard::ClipboardMonitor                             │
//! │   抑制检查 → 读取 → classifier → 捕获开关               │
//! └───────┬──────────────────────────────────────────────────┘
//!         │ upsert (去重 / 提升 / 上限裁剪)
//! ┌───────▼──────────────────────────────────────────────────┐
//! │  db::HistoryStore  SQLite (rusqlite)                     │
//! │   查询 · 置顶 · 删除 · 保留期清理 · 统计 · 导入导出      │
//! └───────┬──────────────────────────────────────────────────┘
//!         │ events::EventBus (tokio broadcast)
//! ┌───────▼──────────────────────────────────────────────────┐
//! │  view::HistoryView  ViewCache (lru) + 类别 / 搜索过滤    │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## 模块职责
//!
//! | 模块 | 职责 |
//! |------|------|
//! | [`error`] | 统一错误类型 `AppError` 与可广播的 `ErrorKind` |
//! | [`config`] | 引擎配置（保留期、上限、缓存容量、抑制窗口、捕获开关） |
//! | [`events`] | 引擎事件与广播总线 |
//! | [`clipboard`] | 监控器、分类器、系统/内存剪贴板适配、自写抑制 |
//! | [`db`] | SQLite 历史存储：去重写入、查询、清理、统计、导入导出 |
//! | [`view`] | 有上限的视图缓存与过滤后的可见列表 |

pub mod clipboard;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod view;

pub use clipboard::{ClipboardMonitor, MonitorState};
pub use config::EngineConfig;
pub use db::{ClipboardRecord, ContentType, HistoryQuery, HistoryStore};
pub use error::AppError;
pub use events::{EngineEvent, EventBus};
pub use view::HistoryView;
