use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

use crate::error::CoordinatorError;
use crate::metrics::record_operation;
use crate::models::{ProcessDescriptor, ProcessPatch, RuntimeStatus};
use crate::services::process_manager::ProcessManager;
use crate::services::reconciler::StatusReconciler;
use crate::services::registry::ProcessRegistry;

/// rename 的结果；部分完成不是错误，调用方必须显式处理
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RenameOutcome {
    Completed {
        new_id: String,
        old_id: Option<String>,
    },
    /// 新进程已创建，旧进程未能停止或删除，两者都保留
    PartialCompletion {
        new_id: String,
        old_id: String,
        reason: String,
    },
}

/// delete 的结果；注册表条目在三种情况下都已删除
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeleteOutcome {
    Removed,
    /// 进程已停止，但管理器未能删除其记录
    StoppedButNotRemoved { reason: String },
    /// 停止失败，操作系统进程可能仍在运行
    RemovedWhileRunning { reason: String },
}

/// 委托给管理器的单步操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Start,
    Stop,
    Restart,
}

impl Operation {
    fn as_str(self) -> &'static str {
        match self {
            Operation::Start => "start",
            Operation::Stop => "stop",
            Operation::Restart => "restart",
        }
    }
}

impl DeleteOutcome {
    pub fn is_clean(&self) -> bool {
        matches!(self, DeleteOutcome::Removed)
    }
}

/// 生命周期协调器
///
/// 同一逻辑名称上的操作按名称互斥串行执行，不同名称之间互不影响。
/// 查询只读注册表与状态缓存，不会被进行中的操作阻塞。
pub struct LifecycleCoordinator {
    registry: Arc<ProcessRegistry>,
    manager: Arc<dyn ProcessManager>,
    reconciler: Arc<StatusReconciler>,
    name_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

fn validate(descriptor: &ProcessDescriptor) -> Result<(), CoordinatorError> {
    if descriptor.name.trim().is_empty() {
        return Err(CoordinatorError::InvalidInput("process name is empty".into()));
    }
    if descriptor.id.trim().is_empty() {
        return Err(CoordinatorError::InvalidInput("process id is empty".into()));
    }
    if descriptor.bin_path.trim().is_empty() {
        return Err(CoordinatorError::InvalidInput(format!(
            "process '{}' has no binary path",
            descriptor.name
        )));
    }
    Ok(())
}

impl LifecycleCoordinator {
    pub fn new(
        registry: Arc<ProcessRegistry>,
        manager: Arc<dyn ProcessManager>,
        reconciler: Arc<StatusReconciler>,
    ) -> Self {
        Self {
            registry,
            manager,
            reconciler,
            name_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn serialize(&self, name: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .name_locks
            .lock()
            .entry(name.to_string())
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    /// 锁定名称后重新确认 id 仍然存在
    async fn lock_id(
        &self,
        id: &str,
    ) -> Result<(OwnedMutexGuard<()>, ProcessDescriptor), CoordinatorError> {
        let name = self
            .registry
            .get(id)
            .ok_or_else(|| CoordinatorError::NotFound(id.to_string()))?
            .name;
        let guard = self.serialize(&name).await;
        let descriptor = self
            .registry
            .get(id)
            .ok_or_else(|| CoordinatorError::NotFound(id.to_string()))?;
        Ok((guard, descriptor))
    }

    /// 先登记再交给管理器创建，失败时回滚登记；调用方持有名称锁
    async fn register(&self, descriptor: ProcessDescriptor) -> Result<String, CoordinatorError> {
        validate(&descriptor)?;
        self.registry.upsert(descriptor.clone())?;

        match self.manager.create(&descriptor).await {
            Ok(id) => {
                if id != descriptor.id && !self.registry.rekey(&descriptor.id, &id) {
                    self.registry.remove(&descriptor.id);
                    if let Err(e) = self.manager.delete(&id).await {
                        log::warn!("Failed to discard manager record '{}': {}", id, e);
                    }
                    return Err(CoordinatorError::CreationFailed {
                        name: descriptor.name,
                        source: crate::error::ManagerError::Rejected(format!(
                            "assigned id '{id}' is already registered"
                        )),
                    });
                }
                log::info!("Created process '{}' ({})", descriptor.name, id);
                Ok(id)
            }
            Err(source) => {
                self.registry.remove(&descriptor.id);
                log::error!("Failed to create process '{}': {}", descriptor.name, source);
                Err(CoordinatorError::CreationFailed {
                    name: descriptor.name,
                    source,
                })
            }
        }
    }

    /// 严格创建：名称已存在时返回 `DuplicateName`
    pub async fn create(&self, descriptor: ProcessDescriptor) -> Result<String, CoordinatorError> {
        let _guard = self.serialize(&descriptor.name).await;
        if let Some(existing) = self.registry.find(&descriptor.name) {
            return Err(CoordinatorError::DuplicateName {
                name: descriptor.name,
                existing_id: existing.id,
            });
        }
        let result = self.register(descriptor).await;
        record_operation("create", result.is_ok());
        result
    }

    /// 幂等创建：名称已存在时直接返回已有 id，否则用 `factory` 构造
    pub async fn ensure_created<F>(&self, name: &str, factory: F) -> Result<String, CoordinatorError>
    where
        F: FnOnce() -> Result<ProcessDescriptor, CoordinatorError>,
    {
        let _guard = self.serialize(name).await;
        if let Some(existing) = self.registry.find(name) {
            return Ok(existing.id);
        }

        let descriptor = factory()?;
        if descriptor.name != name {
            return Err(CoordinatorError::InvalidInput(format!(
                "factory produced '{}' for '{}'",
                descriptor.name, name
            )));
        }
        let result = self.register(descriptor).await;
        record_operation("create", result.is_ok());
        result
    }

    async fn delegate(&self, operation: Operation, id: &str) -> Result<(), CoordinatorError> {
        let (_guard, descriptor) = self.lock_id(id).await?;

        let outcome = match operation {
            Operation::Start => self.manager.start(id).await,
            Operation::Stop => self.manager.stop(id).await,
            Operation::Restart => self.manager.restart(id).await,
        };
        let operation = operation.as_str();
        self.reconciler.request_pass();

        let result = match outcome {
            Ok(true) => {
                log::info!("{} '{}' succeeded", operation, descriptor.name);
                Ok(())
            }
            Ok(false) => Err(CoordinatorError::refused(operation, id)),
            Err(e) => Err(CoordinatorError::manager(operation, id, e)),
        };
        if let Err(e) = &result {
            log::error!("{}", e);
        }
        record_operation(operation, result.is_ok());
        result
    }

    pub async fn start(&self, id: &str) -> Result<(), CoordinatorError> {
        self.delegate(Operation::Start, id).await
    }

    pub async fn stop(&self, id: &str) -> Result<(), CoordinatorError> {
        self.delegate(Operation::Stop, id).await
    }

    pub async fn restart(&self, id: &str) -> Result<(), CoordinatorError> {
        self.delegate(Operation::Restart, id).await
    }

    /// 合并字段到描述符；不会自动重启进程
    pub async fn update(
        &self,
        id: &str,
        patch: &ProcessPatch,
    ) -> Result<ProcessDescriptor, CoordinatorError> {
        let (_guard, descriptor) = self.lock_id(id).await?;
        if patch.is_empty() {
            return Ok(descriptor);
        }
        if patch.bin_path.as_deref().is_some_and(|b| b.trim().is_empty()) {
            return Err(CoordinatorError::InvalidInput("bin_path cannot be empty".into()));
        }

        let result = match self.manager.update(id, patch).await {
            Ok(true) => {
                let merged = descriptor.merged(patch);
                self.registry.upsert(merged.clone())?;
                log::info!("Updated process '{}'", merged.name);
                Ok(merged)
            }
            Ok(false) => Err(CoordinatorError::refused("update", id)),
            Err(e) => Err(CoordinatorError::manager("update", id, e)),
        };
        if result.is_err() {
            self.reconciler.request_pass();
        }
        record_operation("update", result.is_ok());
        result
    }

    async fn stop_and_delete(&self, descriptor: &ProcessDescriptor) -> Result<(), String> {
        match self.manager.stop(&descriptor.id).await {
            Ok(true) => {}
            Ok(false) => return Err(format!("could not stop '{}'", descriptor.name)),
            Err(e) => return Err(e.to_string()),
        }
        match self.manager.delete(&descriptor.id).await {
            Ok(true) => {}
            Ok(false) => return Err(format!("process manager kept '{}'", descriptor.name)),
            Err(e) => return Err(e.to_string()),
        }
        self.registry.remove(&descriptor.id);
        Ok(())
    }

    /// 重命名：先创建新进程，再停止并删除旧进程
    ///
    /// 第二步失败时新旧进程都保留（宁可多一个也不丢失），返回 `PartialCompletion`。
    pub async fn rename<F>(
        &self,
        old_name: &str,
        new_name: &str,
        factory: F,
    ) -> Result<RenameOutcome, CoordinatorError>
    where
        F: FnOnce() -> Result<ProcessDescriptor, CoordinatorError>,
    {
        if old_name == new_name {
            return Err(CoordinatorError::InvalidInput(format!(
                "rename target equals source '{old_name}'"
            )));
        }

        // 固定加锁顺序避免死锁
        let (first, second) = if old_name < new_name {
            (old_name, new_name)
        } else {
            (new_name, old_name)
        };
        let _first = self.serialize(first).await;
        let _second = self.serialize(second).await;

        if let Some(existing) = self.registry.find(new_name) {
            return Err(CoordinatorError::DuplicateName {
                name: new_name.to_string(),
                existing_id: existing.id,
            });
        }
        let descriptor = factory()?;
        if descriptor.name != new_name {
            return Err(CoordinatorError::InvalidInput(format!(
                "factory produced '{}' for '{}'",
                descriptor.name, new_name
            )));
        }

        let new_id = self.register(descriptor).await?;

        let Some(old) = self.registry.find(old_name) else {
            record_operation("rename", true);
            return Ok(RenameOutcome::Completed {
                new_id,
                old_id: None,
            });
        };

        let outcome = match self.stop_and_delete(&old).await {
            Ok(()) => {
                log::info!("Renamed process '{}' -> '{}'", old_name, new_name);
                RenameOutcome::Completed {
                    new_id,
                    old_id: Some(old.id),
                }
            }
            Err(reason) => {
                log::warn!(
                    "Rename '{}' -> '{}' partially completed: {}",
                    old_name,
                    new_name,
                    reason
                );
                RenameOutcome::PartialCompletion {
                    new_id,
                    old_id: old.id,
                    reason,
                }
            }
        };
        self.reconciler.request_pass();
        record_operation("rename", matches!(outcome, RenameOutcome::Completed { .. }));
        Ok(outcome)
    }

    /// 停止并删除；即使停止失败也会从注册表移除
    pub async fn delete(&self, id: &str) -> Result<DeleteOutcome, CoordinatorError> {
        let (_guard, descriptor) = self.lock_id(id).await?;

        let stop_failure = match self.manager.stop(id).await {
            Ok(true) | Err(crate::error::ManagerError::NotFound(_)) => None,
            Ok(false) => Some(format!("could not stop '{}'", descriptor.name)),
            Err(e) => Some(e.to_string()),
        };

        let outcome = match stop_failure {
            Some(reason) => {
                log::warn!(
                    "Removing '{}' although it could not be stopped: {}",
                    descriptor.name,
                    reason
                );
                DeleteOutcome::RemovedWhileRunning { reason }
            }
            None => match self.manager.delete(id).await {
                Ok(true) => DeleteOutcome::Removed,
                Ok(false) => {
                    log::warn!("Process manager refused to remove '{}'", descriptor.name);
                    DeleteOutcome::StoppedButNotRemoved {
                        reason: format!("process manager kept '{}'", descriptor.name),
                    }
                }
                Err(e) => {
                    log::warn!("Process manager kept '{}': {}", descriptor.name, e);
                    DeleteOutcome::StoppedButNotRemoved {
                        reason: e.to_string(),
                    }
                }
            },
        };

        self.registry.remove(id);
        self.reconciler.request_pass();
        log::info!("Deleted process '{}' ({})", descriptor.name, id);
        record_operation("delete", outcome.is_clean());
        Ok(outcome)
    }

    pub fn find(&self, name: &str) -> Option<ProcessDescriptor> {
        self.registry.find(name)
    }

    pub fn get(&self, id: &str) -> Option<ProcessDescriptor> {
        self.registry.get(id)
    }

    pub fn list(&self) -> Vec<ProcessDescriptor> {
        self.registry.list()
    }

    pub fn get_status(&self, id: &str) -> Result<RuntimeStatus, CoordinatorError> {
        self.reconciler
            .get_status(id)
            .ok_or_else(|| CoordinatorError::NotFound(id.to_string()))
    }

    pub fn statuses(&self) -> Vec<RuntimeStatus> {
        self.reconciler.snapshot()
    }

    pub fn reconciler(&self) -> &Arc<StatusReconciler> {
        &self.reconciler
    }
}
