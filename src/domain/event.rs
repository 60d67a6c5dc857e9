//! 推送任务生命周期事件
//!
//! 收集器不直接回调其他组件，完成事件通过广播通道显式传递。

use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushLifecycleEvent {
    /// 某个变体的全部批次均已投递并计数完毕
    VariantCompleted {
        push_message_information_id: String,
        variant_id: String,
    },
    /// 推送任务的全部变体均已完成
    PushMessageCompleted {
        push_message_information_id: String,
    },
}

/// 生命周期事件总线，订阅方掉线不影响发布方
#[derive(Clone)]
pub struct LifecycleEvents {
    sender: broadcast::Sender<PushLifecycleEvent>,
}

impl LifecycleEvents {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: PushLifecycleEvent) {
        // 没有订阅者时丢弃即可
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PushLifecycleEvent> {
        self.sender.subscribe()
    }
}

impl Default for LifecycleEvents {
    fn default() -> Self {
        Self::new(64)
    }
}
