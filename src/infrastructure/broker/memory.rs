//! 进程内消息队列
//!
//! 提供消费端事务、消息选择器、幂等键去重与延迟投递。
//! 回滚的消息带重投递延迟回到原队列，超过最大重投递次数转入死信队列。

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::error::Result;
use crate::infrastructure::broker::queues::DEAD_LETTER_QUEUE;

/// 幂等键属性，同一队列上重复的键会被直接丢弃
pub const PROP_DUPLICATE_ID: &str = "_DUP_ID";
/// 定时投递属性，毫秒时间戳，仅作可见性记录
pub const PROP_SCHEDULED_DELIVERY: &str = "_SCHED_DELIVERY";
/// 死信消息的来源队列
pub const PROP_ORIGIN_QUEUE: &str = "_ORIGIN_QUEUE";
/// 死信消息进入死信队列前的投递次数
pub const PROP_REDELIVERY_COUNT: &str = "_REDELIVERY_COUNT";
/// 毒消息直接转死信时记录的失败原因
pub const PROP_FAILURE_REASON: &str = "_FAILURE_REASON";

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Str(String),
    Long(i64),
}

/// 队列消息：JSON 载荷加字符串/整型属性
#[derive(Debug, Clone)]
pub struct Envelope {
    body: serde_json::Value,
    properties: HashMap<String, PropertyValue>,
}

impl Envelope {
    pub fn json<T: Serialize>(body: &T) -> Result<Self> {
        Ok(Self {
            body: serde_json::to_value(body)?,
            properties: HashMap::new(),
        })
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.body.clone())?)
    }

    pub fn with_str_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties
            .insert(key.into(), PropertyValue::Str(value.into()));
        self
    }

    pub fn with_long_property(mut self, key: impl Into<String>, value: i64) -> Self {
        self.properties
            .insert(key.into(), PropertyValue::Long(value));
        self
    }

    pub fn with_duplicate_id(self, id: impl Into<String>) -> Self {
        self.with_str_property(PROP_DUPLICATE_ID, id)
    }

    pub fn str_property(&self, key: &str) -> Option<&str> {
        match self.properties.get(key) {
            Some(PropertyValue::Str(value)) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn long_property(&self, key: &str) -> Option<i64> {
        match self.properties.get(key) {
            Some(PropertyValue::Long(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn duplicate_id(&self) -> Option<&str> {
        self.str_property(PROP_DUPLICATE_ID)
    }

    fn matches(&self, selector: Option<(&str, &str)>) -> bool {
        match selector {
            None => true,
            Some((key, value)) => self.str_property(key) == Some(value),
        }
    }
}

struct QueuedEnvelope {
    envelope: Envelope,
    deliver_at: Option<Instant>,
    redelivery_count: u32,
}

impl QueuedEnvelope {
    fn is_ready(&self, now: Instant) -> bool {
        self.deliver_at.map_or(true, |at| at <= now)
    }
}

#[derive(Default)]
struct QueueState {
    messages: VecDeque<QueuedEnvelope>,
    seen_duplicate_ids: HashSet<String>,
}

struct BrokerInner {
    queues: Mutex<HashMap<String, QueueState>>,
    notify: Notify,
    max_redeliveries: u32,
    redelivery_delay: Duration,
}

impl BrokerInner {
    /// 取出第一条就绪且匹配选择器的消息；若只有未到期消息，返回其最早到期时刻
    fn try_pop(
        &self,
        queue: &str,
        selector: Option<(&str, &str)>,
    ) -> (Option<QueuedEnvelope>, Option<Instant>) {
        let now = Instant::now();
        let mut queues = self.queues.lock().expect("broker lock poisoned");
        let Some(state) = queues.get_mut(queue) else {
            return (None, None);
        };

        let mut next_ready: Option<Instant> = None;
        let mut found: Option<usize> = None;
        for (index, queued) in state.messages.iter().enumerate() {
            if !queued.envelope.matches(selector) {
                continue;
            }
            if queued.is_ready(now) {
                found = Some(index);
                break;
            }
            let at = queued.deliver_at.expect("not ready implies deliver_at");
            next_ready = Some(next_ready.map_or(at, |current| current.min(at)));
        }

        match found {
            Some(index) => (state.messages.remove(index), None),
            None => (None, next_ready),
        }
    }

    /// 正常入队路径，幂等键重复的消息直接丢弃
    fn enqueue(&self, queue: &str, envelope: Envelope, deliver_at: Option<Instant>) {
        let mut queues = self.queues.lock().expect("broker lock poisoned");
        let state = queues.entry(queue.to_string()).or_default();
        if let Some(dup_id) = envelope.duplicate_id() {
            if !state.seen_duplicate_ids.insert(dup_id.to_string()) {
                debug!(queue, dup_id, "dropping duplicate message");
                return;
            }
        }
        state.messages.push_back(QueuedEnvelope {
            envelope,
            deliver_at,
            redelivery_count: 0,
        });
    }

    /// 回滚重回队列，不再做幂等键判定
    fn requeue(&self, queue: &str, queued: QueuedEnvelope) {
        let mut queues = self.queues.lock().expect("broker lock poisoned");
        queues
            .entry(queue.to_string())
            .or_default()
            .messages
            .push_back(queued);
    }

    fn rollback_received(&self, received: Vec<(String, QueuedEnvelope)>) {
        if received.is_empty() {
            return;
        }
        for (queue, mut queued) in received {
            queued.redelivery_count += 1;
            if queued.redelivery_count > self.max_redeliveries {
                warn!(
                    queue = %queue,
                    redeliveries = queued.redelivery_count,
                    "message exhausted redeliveries, routing to dead letter queue"
                );
                let envelope = queued
                    .envelope
                    .with_str_property(PROP_ORIGIN_QUEUE, queue)
                    .with_long_property(PROP_REDELIVERY_COUNT, queued.redelivery_count as i64);
                self.requeue(
                    DEAD_LETTER_QUEUE,
                    QueuedEnvelope {
                        envelope,
                        deliver_at: None,
                        redelivery_count: 0,
                    },
                );
            } else {
                queued.deliver_at = Some(Instant::now() + self.redelivery_delay);
                self.requeue(&queue, queued);
            }
        }
        self.notify.notify_waiters();
    }
}

/// 进程内队列代理，克隆共享同一组队列
#[derive(Clone)]
pub struct Broker {
    inner: Arc<BrokerInner>,
}

impl Broker {
    pub fn new(max_redeliveries: u32, redelivery_delay: Duration) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                queues: Mutex::new(HashMap::new()),
                notify: Notify::new(),
                max_redeliveries,
                redelivery_delay,
            }),
        }
    }

    /// 开启一个消费端事务
    pub fn begin(&self) -> Transaction {
        Transaction {
            inner: self.inner.clone(),
            received: Vec::new(),
            sends: Vec::new(),
            finished: false,
        }
    }

    /// 非事务即时投递
    pub fn send_now(&self, queue: &str, envelope: Envelope) {
        self.inner.enqueue(queue, envelope, None);
        self.inner.notify.notify_waiters();
    }

    /// 当前可见消息数，含未到期消息
    pub fn queue_depth(&self, queue: &str) -> usize {
        self.inner
            .queues
            .lock()
            .expect("broker lock poisoned")
            .get(queue)
            .map_or(0, |state| state.messages.len())
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(10, Duration::from_millis(1_000))
    }
}

/// 消费端事务
///
/// 接收到的消息在提交前对其他消费者不可见；提交一并应用本事务内的发送，
/// 回滚（显式或析构时）把接收到的消息退回原队列等待重投递。
pub struct Transaction {
    inner: Arc<BrokerInner>,
    received: Vec<(String, QueuedEnvelope)>,
    sends: Vec<(String, Envelope, Option<Instant>)>,
    finished: bool,
}

impl Transaction {
    /// 阻塞接收，直到有匹配消息或超时
    pub async fn receive(
        &mut self,
        queue: &str,
        selector: Option<(&str, &str)>,
        timeout: Duration,
    ) -> Option<Envelope> {
        let deadline = tokio::time::Instant::now() + timeout;
        let inner = self.inner.clone();
        loop {
            let notified = inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(envelope) = self.take(queue, selector) {
                return Some(envelope);
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return None;
            }
            let mut wake_at = deadline;
            if let Some(ready_at) = self.peek_next_ready(queue, selector) {
                let ready_at = tokio::time::Instant::from_std(ready_at);
                if ready_at < wake_at {
                    wake_at = ready_at;
                }
            }
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    /// 非阻塞接收，队列里没有匹配消息时立即返回 None
    pub fn receive_no_wait(
        &mut self,
        queue: &str,
        selector: Option<(&str, &str)>,
    ) -> Option<Envelope> {
        self.take(queue, selector)
    }

    fn take(&mut self, queue: &str, selector: Option<(&str, &str)>) -> Option<Envelope> {
        let (popped, _) = self.inner.try_pop(queue, selector);
        popped.map(|queued| {
            let envelope = queued.envelope.clone();
            self.received.push((queue.to_string(), queued));
            envelope
        })
    }

    fn peek_next_ready(&self, queue: &str, selector: Option<(&str, &str)>) -> Option<Instant> {
        let now = Instant::now();
        let queues = self.inner.queues.lock().expect("broker lock poisoned");
        queues.get(queue).and_then(|state| {
            state
                .messages
                .iter()
                .filter(|queued| queued.envelope.matches(selector) && !queued.is_ready(now))
                .filter_map(|queued| queued.deliver_at)
                .min()
        })
    }

    /// 发送在提交时生效
    pub fn send(&mut self, queue: &str, envelope: Envelope) {
        self.sends.push((queue.to_string(), envelope, None));
    }

    /// 延迟投递：消息提交后入队，但在到期前不可被接收
    pub fn send_delayed(&mut self, queue: &str, envelope: Envelope, delay: Duration) {
        let deliver_at = Instant::now() + delay;
        let scheduled_ms = chrono::Utc::now().timestamp_millis() + delay.as_millis() as i64;
        let envelope = envelope.with_long_property(PROP_SCHEDULED_DELIVERY, scheduled_ms);
        self.sends.push((queue.to_string(), envelope, Some(deliver_at)));
    }

    /// 确认接收并应用全部发送
    pub fn commit(mut self) {
        self.received.clear();
        let had_sends = !self.sends.is_empty();
        for (queue, envelope, deliver_at) in self.sends.drain(..) {
            self.inner.enqueue(&queue, envelope, deliver_at);
        }
        if had_sends {
            self.inner.notify.notify_waiters();
        }
        self.finished = true;
    }

    /// 丢弃发送并退回接收到的消息
    pub fn rollback(mut self) {
        self.do_rollback();
    }

    fn do_rollback(&mut self) {
        self.sends.clear();
        let received = std::mem::take(&mut self.received);
        self.inner.rollback_received(received);
        self.finished = true;
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished {
            self.do_rollback();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Ping {
        seq: u32,
    }

    fn test_broker() -> Broker {
        Broker::new(2, Duration::from_millis(20))
    }

    #[tokio::test]
    async fn test_sends_invisible_until_commit() {
        let broker = test_broker();
        let mut tx = broker.begin();
        tx.send("q", Envelope::json(&Ping { seq: 1 }).unwrap());
        assert_eq!(broker.queue_depth("q"), 0);
        tx.commit();
        assert_eq!(broker.queue_depth("q"), 1);

        let mut rx = broker.begin();
        let envelope = rx.receive_no_wait("q", None).unwrap();
        assert_eq!(envelope.decode::<Ping>().unwrap(), Ping { seq: 1 });
        rx.commit();
        assert_eq!(broker.queue_depth("q"), 0);
    }

    #[tokio::test]
    async fn test_rollback_redelivers_after_delay() {
        let broker = test_broker();
        broker.send_now("q", Envelope::json(&Ping { seq: 7 }).unwrap());

        let mut tx = broker.begin();
        assert!(tx.receive_no_wait("q", None).is_some());
        tx.rollback();

        // 延迟到期前不可见
        let mut tx = broker.begin();
        assert!(tx.receive_no_wait("q", None).is_none());
        let redelivered = tx
            .receive("q", None, Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(redelivered.decode::<Ping>().unwrap(), Ping { seq: 7 });
        tx.commit();
    }

    #[tokio::test]
    async fn test_drop_without_commit_rolls_back() {
        let broker = test_broker();
        broker.send_now("q", Envelope::json(&Ping { seq: 3 }).unwrap());
        {
            let mut tx = broker.begin();
            assert!(tx.receive_no_wait("q", None).is_some());
            // 未提交即析构
        }
        let mut tx = broker.begin();
        assert!(tx
            .receive("q", None, Duration::from_millis(500))
            .await
            .is_some());
        tx.commit();
    }

    #[tokio::test]
    async fn test_selector_matches_by_property() {
        let broker = test_broker();
        broker.send_now(
            "q",
            Envelope::json(&Ping { seq: 1 })
                .unwrap()
                .with_str_property("variantID", "v1"),
        );
        broker.send_now(
            "q",
            Envelope::json(&Ping { seq: 2 })
                .unwrap()
                .with_str_property("variantID", "v2"),
        );

        let mut tx = broker.begin();
        assert!(tx.receive_no_wait("q", Some(("variantID", "v3"))).is_none());
        let envelope = tx.receive_no_wait("q", Some(("variantID", "v2"))).unwrap();
        assert_eq!(envelope.decode::<Ping>().unwrap(), Ping { seq: 2 });
        tx.commit();
        // v1 仍在队列
        assert_eq!(broker.queue_depth("q"), 1);
    }

    #[tokio::test]
    async fn test_duplicate_detection_drops_second_send() {
        let broker = test_broker();
        broker.send_now(
            "q",
            Envelope::json(&Ping { seq: 1 })
                .unwrap()
                .with_duplicate_id("job:seed"),
        );
        broker.send_now(
            "q",
            Envelope::json(&Ping { seq: 2 })
                .unwrap()
                .with_duplicate_id("job:seed"),
        );
        assert_eq!(broker.queue_depth("q"), 1);

        // 回滚重投递不受幂等键影响
        let mut tx = broker.begin();
        assert!(tx.receive_no_wait("q", None).is_some());
        tx.rollback();
        let mut tx = broker.begin();
        assert!(tx
            .receive("q", None, Duration::from_millis(500))
            .await
            .is_some());
        tx.commit();
    }

    #[tokio::test]
    async fn test_scheduled_delivery_withholds_message() {
        let broker = test_broker();
        let mut tx = broker.begin();
        tx.send_delayed(
            "q",
            Envelope::json(&Ping { seq: 5 }).unwrap(),
            Duration::from_millis(50),
        );
        tx.commit();

        let mut rx = broker.begin();
        assert!(rx.receive_no_wait("q", None).is_none());
        let envelope = rx
            .receive("q", None, Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(envelope.decode::<Ping>().unwrap(), Ping { seq: 5 });
        assert!(envelope.long_property(PROP_SCHEDULED_DELIVERY).is_some());
        rx.commit();
    }

    #[tokio::test]
    async fn test_exhausted_redeliveries_route_to_dead_letter_queue() {
        let broker = test_broker();
        broker.send_now("q", Envelope::json(&Ping { seq: 9 }).unwrap());

        // max_redeliveries = 2：第三次回滚进死信
        for _ in 0..3 {
            let mut tx = broker.begin();
            let received = tx.receive("q", None, Duration::from_millis(500)).await;
            assert!(received.is_some());
            tx.rollback();
        }

        assert_eq!(broker.queue_depth("q"), 0);
        let mut tx = broker.begin();
        let dead = tx.receive_no_wait(DEAD_LETTER_QUEUE, None).unwrap();
        assert_eq!(dead.str_property(PROP_ORIGIN_QUEUE), Some("q"));
        assert_eq!(dead.long_property(PROP_REDELIVERY_COUNT), Some(3));
        tx.commit();
    }
}
