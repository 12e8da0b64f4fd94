use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};

use crate::models::{now_secs, CoordinatorEvent, RuntimeStatus, StatusChange};
use crate::services::process_manager::ProcessManager;
use crate::services::registry::ProcessRegistry;
use crate::services::scheduler::EventBus;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(2);

/// 状态协调器
///
/// 从进程管理器刷新观测状态并与缓存比对，只有 `running` 翻转时才发出通知。
/// 管理器不可达或超时时，所有已登记进程按已停止处理。
pub struct StatusReconciler {
    manager: Arc<dyn ProcessManager>,
    registry: Arc<ProcessRegistry>,
    statuses: RwLock<HashMap<String, RuntimeStatus>>,
    bus: EventBus,
    wake: Notify,
    query_timeout: Duration,
    // 串行化轮询，避免两次并发轮询重复发出同一个跳变
    pass: tokio::sync::Mutex<()>,
}

impl StatusReconciler {
    pub fn new(
        manager: Arc<dyn ProcessManager>,
        registry: Arc<ProcessRegistry>,
        bus: EventBus,
        query_timeout: Duration,
    ) -> Self {
        Self {
            manager,
            registry,
            statuses: RwLock::new(HashMap::new()),
            bus,
            wake: Notify::new(),
            query_timeout,
            pass: tokio::sync::Mutex::new(()),
        }
    }

    /// 缓存中的状态；从未观测过的进程为 Unknown
    pub fn get_status(&self, id: &str) -> Option<RuntimeStatus> {
        if let Some(status) = self.statuses.read().get(id) {
            return Some(status.clone());
        }
        self.registry
            .get(id)
            .map(|d| RuntimeStatus::unknown(&d.id, &d.name))
    }

    pub fn snapshot(&self) -> Vec<RuntimeStatus> {
        self.registry
            .list()
            .iter()
            .filter_map(|d| self.get_status(&d.id))
            .collect()
    }

    /// 请求尽快执行一次轮询，不等待结果
    pub fn request_pass(&self) {
        self.wake.notify_one();
    }

    /// 执行一次协调，返回本次产生的跳变
    pub async fn poll_once(&self) -> Vec<StatusChange> {
        let _pass = self.pass.lock().await;

        let observed = match tokio::time::timeout(self.query_timeout, self.manager.list()).await {
            Ok(Ok(list)) => Some(list),
            Ok(Err(e)) => {
                log::warn!("Status query failed, treating processes as stopped: {}", e);
                None
            }
            Err(_) => {
                log::warn!(
                    "Status query timed out after {:?}, treating processes as stopped",
                    self.query_timeout
                );
                None
            }
        };

        let tracked = self.registry.list();
        let now = now_secs();
        let mut changes = Vec::new();

        {
            let mut statuses = self.statuses.write();
            statuses.retain(|id, _| tracked.iter().any(|d| &d.id == id));

            for descriptor in &tracked {
                let mut current = observed
                    .as_ref()
                    .and_then(|list| list.iter().find(|s| s.id == descriptor.id).cloned())
                    .unwrap_or_else(|| RuntimeStatus::stopped(&descriptor.id, &descriptor.name));
                current.name = descriptor.name.clone();
                current.is_running = current.state.is_running();

                let previous = statuses
                    .get(&descriptor.id)
                    .map(|s| s.state)
                    .unwrap_or_default();
                if previous.is_running() != current.is_running {
                    changes.push(StatusChange {
                        id: descriptor.id.clone(),
                        name: descriptor.name.clone(),
                        previous,
                        current: current.state,
                        at: now,
                    });
                }
                statuses.insert(descriptor.id.clone(), current);
            }
        }

        for change in &changes {
            log::info!(
                "Process '{}' {} -> {}",
                change.name,
                change.previous.as_str(),
                change.current.as_str()
            );
            self.bus
                .publish(CoordinatorEvent::StatusChanged(change.clone()));
        }
        changes
    }

    /// 轮询循环：固定间隔或收到请求时执行
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.wake.notified() => {}
                _ = shutdown.changed() => break,
            }
            self.poll_once().await;
        }
        log::debug!("Status reconciler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ProcessDescriptor, ProcessState};
    use crate::services::process_manager::fake::FakeProcessManager;

    async fn setup(names: &[&str]) -> (Arc<FakeProcessManager>, Arc<StatusReconciler>, Vec<String>) {
        let manager = Arc::new(FakeProcessManager::new());
        let registry = Arc::new(ProcessRegistry::new());
        let mut ids = Vec::new();
        for name in names {
            let desc = ProcessDescriptor::new(*name, "rclone", vec![]);
            let id = manager.create(&desc).await.unwrap();
            registry.upsert(desc).unwrap();
            ids.push(id);
        }
        let reconciler = Arc::new(StatusReconciler::new(
            manager.clone(),
            registry,
            EventBus::default(),
            Duration::from_millis(50),
        ));
        (manager, reconciler, ids)
    }

    #[tokio::test]
    async fn emits_once_per_transition() {
        let (manager, reconciler, ids) = setup(&["core"]).await;
        manager.start(&ids[0]).await.unwrap();

        let first = reconciler.poll_once().await;
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].previous, ProcessState::Unknown);
        assert_eq!(first[0].current, ProcessState::Running);

        for _ in 0..5 {
            assert!(reconciler.poll_once().await.is_empty());
        }

        manager.crash(&ids[0]);
        let down = reconciler.poll_once().await;
        assert_eq!(down.len(), 1);
        assert_eq!(down[0].current, ProcessState::Stopped);
    }

    #[tokio::test]
    async fn unknown_to_stopped_is_silent() {
        let (_manager, reconciler, ids) = setup(&["idle"]).await;
        assert_eq!(reconciler.get_status(&ids[0]).unwrap().state, ProcessState::Unknown);

        assert!(reconciler.poll_once().await.is_empty());
        assert_eq!(reconciler.get_status(&ids[0]).unwrap().state, ProcessState::Stopped);
    }

    #[tokio::test]
    async fn unreachable_manager_is_treated_as_stopped() {
        let (manager, reconciler, ids) = setup(&["core"]).await;
        manager.start(&ids[0]).await.unwrap();
        reconciler.poll_once().await;

        manager.set_list_unavailable(true);
        let changes = reconciler.poll_once().await;
        assert_eq!(changes.len(), 1);
        assert!(!reconciler.get_status(&ids[0]).unwrap().is_running);
    }

    #[tokio::test]
    async fn slow_query_times_out() {
        let (manager, reconciler, ids) = setup(&["core"]).await;
        manager.start(&ids[0]).await.unwrap();
        manager.set_list_delay(Some(Duration::from_secs(5)));

        let started = tokio::time::Instant::now();
        let changes = reconciler.poll_once().await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(changes.is_empty());
        assert_eq!(reconciler.get_status(&ids[0]).unwrap().state, ProcessState::Stopped);
    }

    #[tokio::test]
    async fn request_pass_wakes_loop() {
        let (manager, reconciler, ids) = setup(&["core"]).await;
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(reconciler.clone().run(Duration::from_secs(3600), rx));

        // 第一次 tick 立即触发
        tokio::time::sleep(Duration::from_millis(20)).await;
        manager.start(&ids[0]).await.unwrap();
        reconciler.request_pass();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(reconciler.get_status(&ids[0]).unwrap().is_running);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
