//! 引擎事件总线
//!
//! 存储层与监控器通过 `tokio::sync::broadcast` 发布变化，消费者（视图层、日志、
//! UI 桥接）各自 `subscribe()`。发送端从不阻塞；没有订阅者时事件直接丢弃。

use serde::Serialize;
use tokio::sync::broadcast;

use crate::clipboard::MonitorState;
use crate::db::ClipboardRecord;
use crate::error::{AppError, ErrorKind};

const DEFAULT_CAPACITY: usize = 256;

/// 广播给消费者的错误描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEvent {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&AppError> for ErrorEvent {
    fn from(err: &AppError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum EngineEvent {
    /// 新记录写入，或已有记录被提升到最前
    ClipboardChanged(ClipboardRecord),
    /// 记录属性变化（置顶切换）
    RecordUpdated(ClipboardRecord),
    /// 记录被删除（手动删除、保留期清理、上限裁剪）
    RecordsRemoved(Vec<i64>),
    ErrorOccurred(ErrorEvent),
    MonitorStateChanged(MonitorState),
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: EngineEvent) {
        if self.sender.send(event).is_err() {
            log::trace!("事件无订阅者，已丢弃");
        }
    }

    pub fn emit_error(&self, err: &AppError) {
        self.emit(EngineEvent::ErrorOccurred(ErrorEvent::from(err)));
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::{EngineEvent, ErrorEvent, EventBus};
    use crate::error::{AppError, ErrorKind};

    #[test]
    fn emit_without_subscribers_is_silent() {
        let bus = EventBus::default();
        bus.emit(EngineEvent::RecordsRemoved(vec![1]));
        assert_eq!(bus.receiver_count(), 0);
    }

    #[test]
    fn error_events_carry_kind_and_message() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();
        bus.emit_error(&AppError::Persistence("disk full".to_string()));

        match rx.try_recv() {
            Ok(EngineEvent::ErrorOccurred(ErrorEvent { kind, message })) => {
                assert_eq!(kind, ErrorKind::Persistence);
                assert!(message.contains("disk full"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(EngineEvent::RecordsRemoved(vec![3, 4])).expect("serialize");
        assert_eq!(json["type"], "recordsRemoved");
        assert_eq!(json["payload"], serde_json::json!([3, 4]));
    }
}
