use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::SettingsError;
use crate::metrics::{MetricsSubscriber, METRICS};
use crate::services::reconciler::DEFAULT_QUERY_TIMEOUT;
use crate::services::scheduler::LogSubscriber;
use crate::services::{
    EventBus, LifecycleCoordinator, ProcessManager, ProcessRegistry, Scheduler, SettingsSynchronizer,
    SidecarPaths, SidecarService, StatusReconciler,
};

/// 构造应用上下文所需的配置
#[derive(Debug, Clone)]
pub struct ContextConfig {
    pub settings_file: PathBuf,
    pub poll_interval: Duration,
    pub paths: SidecarPaths,
}

/// 应用上下文：显式构造，显式拆除
pub struct AppContext {
    pub coordinator: Arc<LifecycleCoordinator>,
    pub settings: Arc<SettingsSynchronizer>,
    pub sidecar: Arc<SidecarService>,
    pub scheduler: Scheduler,
    poll_interval: Duration,
}

pub type AppState = Arc<AppContext>;

impl AppContext {
    pub fn build(config: ContextConfig, manager: Arc<dyn ProcessManager>) -> Result<AppState, SettingsError> {
        let bus = EventBus::default();
        let registry = Arc::new(ProcessRegistry::new());
        let reconciler = Arc::new(StatusReconciler::new(
            manager.clone(),
            registry.clone(),
            bus.clone(),
            DEFAULT_QUERY_TIMEOUT.min(config.poll_interval),
        ));
        let coordinator = Arc::new(LifecycleCoordinator::new(registry, manager, reconciler));
        let settings = Arc::new(SettingsSynchronizer::load_or_default(
            config.settings_file,
            bus.clone(),
        )?);
        let sidecar = Arc::new(SidecarService::new(
            coordinator.clone(),
            settings.clone(),
            config.paths,
        ));

        Ok(Arc::new(Self {
            coordinator,
            settings,
            sidecar,
            scheduler: Scheduler::new(bus),
            poll_interval: config.poll_interval,
        }))
    }

    /// 启动后台任务：状态轮询、事件订阅与指标刷新
    pub fn start_background(&self) {
        self.scheduler.subscribe(Arc::new(LogSubscriber));
        self.scheduler.subscribe(Arc::new(MetricsSubscriber));

        let reconciler = self.coordinator.reconciler().clone();
        let interval = self.poll_interval;
        self.scheduler
            .spawn_with_shutdown("status-reconciler", move |shutdown| reconciler.run(interval, shutdown));

        let coordinator = self.coordinator.clone();
        self.scheduler.spawn_periodic("metrics-refresh", interval, move || {
            let coordinator = coordinator.clone();
            async move { METRICS.refresh_processes(&coordinator.statuses()) }
        });
        log::info!("Status reconciler polling every {:?}", interval);
    }

    /// 停止挂载进程并结束后台任务
    pub async fn teardown(&self) {
        self.sidecar.shutdown().await;
        self.scheduler.shutdown().await;
    }
}
