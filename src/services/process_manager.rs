use async_trait::async_trait;

use crate::error::ManagerError;
use crate::models::{ProcessDescriptor, ProcessPatch, RuntimeStatus};

/// 外部进程管理器
///
/// 协调器只依赖这个契约；`LocalProcessManager` 是本地实现，测试使用脚本化的替身。
/// 返回 `Ok(false)` 表示管理器拒绝了操作但没有给出原因。
#[async_trait]
pub trait ProcessManager: Send + Sync {
    /// 注册描述符，返回管理器使用的 id
    async fn create(&self, descriptor: &ProcessDescriptor) -> Result<String, ManagerError>;

    async fn start(&self, id: &str) -> Result<bool, ManagerError>;

    async fn stop(&self, id: &str) -> Result<bool, ManagerError>;

    async fn restart(&self, id: &str) -> Result<bool, ManagerError>;

    async fn list(&self) -> Result<Vec<RuntimeStatus>, ManagerError>;

    async fn update(&self, id: &str, patch: &ProcessPatch) -> Result<bool, ManagerError>;

    async fn delete(&self, id: &str) -> Result<bool, ManagerError>;
}
