//! 统一错误类型模块
//!
//! # 设计思路
//!
//! 定义全局统一的 `AppError` 枚举，引擎内所有可失败操作均返回 `Result<T, AppError>`。
//! 变体按错误语义划分，而不是按来源库划分：
//!
//! | 变体 | 语义 | 处理方式 |
//! |------|------|----------|
//! | `TransientClipboardAccess` | 剪贴板被其他进程占用 | 记录日志后吞掉，等待下一次通知 |
//! | `Persistence` | 数据库读写失败 | 通过错误事件通知消费者，监控继续运行 |
//! | `ListenerRegistration` | 无法注册系统剪贴板监听 | 仅对 `start()` 致命，状态回到 `Stopped` |
//!
//! # 实现思路
//!
//! - 使用 `thiserror` 派生可读错误消息。
//! - 实现 `Serialize` 将错误序列化为字符串，便于上层 UI 直接透传。
//! - `ErrorKind` 是可 `Clone` 的精简分类，用于广播到事件总线。

use serde::{Serialize, Serializer};

/// 应用级统一错误类型
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// 剪贴板暂时不可用（被其他进程锁定）
    #[error("剪贴板暂时不可用: {0}")]
    TransientClipboardAccess(String),

    /// 剪贴板读写失败（非暂时性）
    #[error("剪贴板操作失败: {0}")]
    Clipboard(String),

    /// 历史记录持久化失败
    #[error("数据库错误: {0}")]
    Persistence(String),

    /// 系统剪贴板监听注册失败
    #[error("剪贴板监听注册失败: {0}")]
    ListenerRegistration(String),

    /// 配置读写失败
    #[error("配置错误: {0}")]
    Config(String),

    /// 文件系统 I/O 错误
    #[error("文件系统错误: {0}")]
    Io(#[from] std::io::Error),

    /// 记录不存在
    #[error("记录不存在: {0}")]
    NotFound(i64),

    /// 导入数据或负载内容非法
    #[error("数据格式错误: {0}")]
    InvalidData(String),
}

/// 可克隆的错误分类，随 `ErrorEvent` 一起广播
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    TransientClipboardAccess,
    Clipboard,
    Persistence,
    ListenerRegistration,
    Config,
    Io,
    NotFound,
    InvalidData,
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::TransientClipboardAccess(_) => ErrorKind::TransientClipboardAccess,
            AppError::Clipboard(_) => ErrorKind::Clipboard,
            AppError::Persistence(_) => ErrorKind::Persistence,
            AppError::ListenerRegistration(_) => ErrorKind::ListenerRegistration,
            AppError::Config(_) => ErrorKind::Config,
            AppError::Io(_) => ErrorKind::Io,
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::InvalidData(_) => ErrorKind::InvalidData,
        }
    }

    /// 是否属于“记录后吞掉，等待下一次通知”的暂时性错误
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::TransientClipboardAccess(_))
    }
}

/// 将错误序列化为人类可读的字符串
impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
