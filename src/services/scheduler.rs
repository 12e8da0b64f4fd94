//! 周期任务调度与事件分发
//!
//! 所有周期性工作（状态轮询等）都通过 [`Scheduler`] 启动，共享同一个关闭信号；
//! 事件统一经 [`EventBus`] 广播给订阅者，订阅者各自在独立任务中按顺序处理。

use async_trait::async_trait;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::models::CoordinatorEvent;

const DEFAULT_BUS_CAPACITY: usize = 256;

/// 事件广播通道，发布永不阻塞
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<CoordinatorEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// 没有订阅者时事件直接丢弃
    pub fn publish(&self, event: CoordinatorEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

/// 事件订阅者
#[async_trait]
pub trait Subscriber: Send + Sync + 'static {
    async fn on_event(&self, event: &CoordinatorEvent);

    fn name(&self) -> &'static str;
}

/// 以 JSON 形式记录每个事件，供调试时追踪
pub struct LogSubscriber;

#[async_trait]
impl Subscriber for LogSubscriber {
    async fn on_event(&self, event: &CoordinatorEvent) {
        match serde_json::to_string(event) {
            Ok(line) => log::debug!("event {}", line),
            Err(e) => log::warn!("Failed to encode event {:?}: {}", event, e),
        }
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// 拥有全部后台任务的调度器
pub struct Scheduler {
    bus: EventBus,
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

impl Scheduler {
    pub fn new(bus: EventBus) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            bus,
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// 按固定间隔运行 `job`；上一次未完成时不会并发执行下一次
    pub fn spawn_periodic<F, Fut>(&self, name: &'static str, interval: Duration, job: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut shutdown = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => job().await,
                    _ = shutdown.changed() => break,
                }
            }
            log::debug!("Periodic job '{}' stopped", name);
        });
        self.handles.lock().push((name, handle));
    }

    /// 运行一个自带循环的后台任务，关闭时收到信号
    pub fn spawn_with_shutdown<F, Fut>(&self, name: &'static str, task: F)
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task(self.shutdown_tx.subscribe()));
        self.handles.lock().push((name, handle));
    }

    /// 把总线事件分发给订阅者，每个订阅者一个任务
    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber>) {
        let mut rx = self.bus.subscribe();
        let mut shutdown = self.shutdown_tx.subscribe();
        let name = subscriber.name();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = rx.recv() => match received {
                        Ok(event) => subscriber.on_event(&event).await,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            log::warn!("Subscriber '{}' lagged, skipped {} events", name, n);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = shutdown.changed() => break,
                }
            }
        });
        self.handles.lock().push((name, handle));
    }

    /// 通知所有任务退出并等待它们结束
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<_> = std::mem::take(&mut *self.handles.lock());
        for (name, handle) in handles {
            if let Err(e) = handle.await {
                log::warn!("Background task '{}' ended abnormally: {}", name, e);
            }
        }
        log::info!("Scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StatusChange;
    use crate::models::ProcessState;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(AtomicUsize);

    #[async_trait]
    impl Subscriber for Counter {
        async fn on_event(&self, _event: &CoordinatorEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }

        fn name(&self) -> &'static str {
            "counter"
        }
    }

    fn change() -> CoordinatorEvent {
        CoordinatorEvent::StatusChanged(StatusChange {
            id: "a".into(),
            name: "core".into(),
            previous: ProcessState::Unknown,
            current: ProcessState::Running,
            at: 0,
        })
    }

    #[tokio::test]
    async fn fans_out_to_subscribers() {
        let scheduler = Scheduler::new(EventBus::default());
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        scheduler.subscribe(counter.clone());

        scheduler.bus().publish(change());
        scheduler.bus().publish(change());
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn periodic_job_stops_on_shutdown() {
        let scheduler = Scheduler::new(EventBus::default());
        let runs = Arc::new(AtomicUsize::new(0));
        let counted = runs.clone();
        scheduler.spawn_periodic("tick", Duration::from_millis(10), move || {
            let counted = counted.clone();
            async move {
                counted.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(55)).await;
        scheduler.shutdown().await;
        let after = runs.load(Ordering::SeqCst);
        assert!(after >= 2);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(runs.load(Ordering::SeqCst), after);
    }
}
