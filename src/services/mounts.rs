//! OpenList 核心与 rclone 挂载的工作流
//!
//! 进程生命周期全部经由 [`LifecycleCoordinator`]，设置变更经由 [`SettingsSynchronizer`]。
//! 挂载进程按逻辑名称 `rclone_mount_<remote>_process` 查找，首次挂载时才创建。

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{CoordinatorError, SidecarError};
use crate::models::{
    MountEntry, MountInfo, MountState, OpenListCoreConfig, ProcessDescriptor, ProcessPatch,
    ProcessState, RuntimeStatus,
};
use crate::services::args::split_args_vec;
use crate::services::coordinator::{DeleteOutcome, LifecycleCoordinator, RenameOutcome};
use crate::services::logs::{self, LogSource, APP_LOG_FILE, CORE_LOG_FILE, RCLONE_LOG_FILE};
use crate::services::rclone_conf::{self, RcloneConf};
use crate::services::settings_sync::{Persisted, SettingsSynchronizer};

pub const CORE_PROCESS_NAME: &str = "single_openlist_core_process";
const MOUNT_PREFIX: &str = "rclone_mount_";
const PING_TIMEOUT: Duration = Duration::from_secs(2);

lazy_static! {
    static ref REMOTE_NAME: Regex = Regex::new(r"^[A-Za-z0-9_.\-]+$").unwrap();
}

pub fn mount_process_name(remote: &str) -> String {
    format!("{MOUNT_PREFIX}{remote}_process")
}

fn validate_remote_name(name: &str) -> Result<(), SidecarError> {
    if REMOTE_NAME.is_match(name) {
        Ok(())
    } else {
        Err(SidecarError::InvalidName(name.to_string()))
    }
}

/// 挂载点可读即视为已挂载
fn is_mount_accessible(mount_point: &str) -> bool {
    #[cfg(windows)]
    if mount_point.len() == 2 && mount_point.ends_with(':') {
        return fs::read_dir(format!("{mount_point}\\")).is_ok();
    }
    fs::read_dir(mount_point).is_ok()
}

/// 启动参数中的路径配置，设置文件中的自定义路径优先
#[derive(Debug, Clone)]
pub struct SidecarPaths {
    pub openlist_binary: String,
    pub rclone_binary: String,
    pub rclone_conf: PathBuf,
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CoreStatus {
    pub registered: bool,
    /// `/ping` 是否应答成功
    pub running: bool,
    pub url: String,
    pub status: Option<RuntimeStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemoteUpdate {
    pub entry: MountEntry,
    /// 远程改名且存在挂载进程时的迁移结果
    pub rename: Option<RenameOutcome>,
}

pub struct SidecarService {
    coordinator: Arc<LifecycleCoordinator>,
    settings: Arc<SettingsSynchronizer>,
    paths: SidecarPaths,
    http: reqwest::Client,
}

impl SidecarService {
    pub fn new(
        coordinator: Arc<LifecycleCoordinator>,
        settings: Arc<SettingsSynchronizer>,
        paths: SidecarPaths,
    ) -> Self {
        Self {
            coordinator,
            settings,
            paths,
            http: reqwest::Client::new(),
        }
    }

    fn openlist_binary(&self) -> String {
        self.settings
            .snapshot()
            .app
            .custom_openlist_binary_path
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| self.paths.openlist_binary.clone())
    }

    fn rclone_binary(&self) -> String {
        let settings = self.settings.snapshot();
        settings
            .rclone
            .binary_path
            .or(settings.app.custom_rclone_binary_path)
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| self.paths.rclone_binary.clone())
    }

    fn rclone_conf_path(&self) -> PathBuf {
        let settings = self.settings.snapshot();
        settings
            .rclone
            .rclone_conf_path
            .or(settings.app.custom_rclone_config_path)
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| self.paths.rclone_conf.clone())
    }

    fn log_file(&self, file: &str) -> Option<String> {
        self.paths
            .log_dir
            .as_ref()
            .map(|dir| dir.join(file).to_string_lossy().into_owned())
    }

    fn working_dir_of(binary: &str) -> Option<String> {
        Path::new(binary)
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| p.to_string_lossy().into_owned())
    }

    fn core_descriptor(&self) -> ProcessDescriptor {
        let binary = self.openlist_binary();
        let mut descriptor =
            ProcessDescriptor::new(CORE_PROCESS_NAME, binary.clone(), vec!["server".to_string()]);
        descriptor.working_dir = Self::working_dir_of(&binary);
        descriptor.log_file = self.log_file(CORE_LOG_FILE);
        descriptor.auto_start = self.settings.openlist().auto_launch;
        descriptor.auto_restart = true;
        descriptor
    }

    fn mount_args(&self, entry: &MountEntry) -> Result<Vec<String>, CoordinatorError> {
        let mount_point = entry
            .mount
            .mount_point
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| {
                CoordinatorError::InvalidInput(format!(
                    "mount point is not set for remote '{}'",
                    entry.name
                ))
            })?;

        let mut args = vec![
            "mount".to_string(),
            "--config".to_string(),
            self.rclone_conf_path().to_string_lossy().into_owned(),
            format!(
                "{}:{}",
                entry.name,
                entry.mount.volume_name.as_deref().unwrap_or_default()
            ),
            mount_point.to_string(),
        ];
        args.extend(split_args_vec(&entry.mount.extra_flags));
        Ok(args)
    }

    fn mount_descriptor(&self, entry: &MountEntry) -> Result<ProcessDescriptor, CoordinatorError> {
        let binary = self.rclone_binary();
        let mut descriptor = ProcessDescriptor::new(
            mount_process_name(&entry.name),
            binary.clone(),
            self.mount_args(entry)?,
        );
        descriptor.working_dir = Self::working_dir_of(&binary);
        descriptor.log_file = self.log_file(RCLONE_LOG_FILE);
        descriptor.auto_start = entry.mount.auto_mount;
        descriptor.auto_restart = true;
        Ok(descriptor)
    }

    // ---- OpenList 核心 ----

    pub async fn start_core(&self) -> Result<String, SidecarError> {
        let id = self
            .coordinator
            .ensure_created(CORE_PROCESS_NAME, || Ok(self.core_descriptor()))
            .await?;
        self.coordinator.start(&id).await?;
        Ok(id)
    }

    pub async fn stop_core(&self) -> Result<(), SidecarError> {
        let core = self
            .coordinator
            .find(CORE_PROCESS_NAME)
            .ok_or_else(|| CoordinatorError::NotFound(CORE_PROCESS_NAME.to_string()))?;
        self.coordinator.stop(&core.id).await?;
        Ok(())
    }

    pub async fn restart_core(&self) -> Result<String, SidecarError> {
        let id = self
            .coordinator
            .ensure_created(CORE_PROCESS_NAME, || Ok(self.core_descriptor()))
            .await?;
        self.coordinator.restart(&id).await?;
        Ok(id)
    }

    /// 同时更新核心进程描述符和设置
    pub async fn set_core_auto_launch(
        &self,
        enabled: bool,
    ) -> Result<Persisted<OpenListCoreConfig>, SidecarError> {
        if let Some(core) = self.coordinator.find(CORE_PROCESS_NAME) {
            let patch = ProcessPatch {
                auto_start: Some(enabled),
                ..Default::default()
            };
            self.coordinator.update(&core.id, &patch).await?;
        }
        Ok(self.settings.update_openlist(|c| c.auto_launch = enabled))
    }

    async fn ping_core(&self, url: &str) -> bool {
        match self.http.get(format!("{url}/ping")).timeout(PING_TIMEOUT).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                log::debug!("OpenList ping failed: {}", e);
                false
            }
        }
    }

    pub async fn core_status(&self) -> CoreStatus {
        let openlist = self.settings.openlist();
        let scheme = if openlist.ssl_enabled { "https" } else { "http" };
        let url = format!("{scheme}://localhost:{}", openlist.port);
        let status = self
            .coordinator
            .find(CORE_PROCESS_NAME)
            .and_then(|core| self.coordinator.get_status(&core.id).ok());
        CoreStatus {
            registered: status.is_some(),
            running: self.ping_core(&url).await,
            url,
            status,
        }
    }

    // ---- 日志 ----

    fn log_path(&self, source: LogSource) -> Result<PathBuf, SidecarError> {
        if source == LogSource::Openlist {
            let data_root = Self::working_dir_of(&self.openlist_binary())
                .map(PathBuf::from)
                .unwrap_or_default();
            return Ok(data_root.join("data").join("log").join("log.log"));
        }
        let file = match source {
            LogSource::OpenlistCore => CORE_LOG_FILE,
            LogSource::Rclone => RCLONE_LOG_FILE,
            _ => APP_LOG_FILE,
        };
        self.paths
            .log_dir
            .as_ref()
            .map(|dir| dir.join(file))
            .ok_or(SidecarError::LogDirUnset)
    }

    pub fn logs(&self, source: LogSource, tail: Option<usize>) -> Result<Vec<String>, SidecarError> {
        logs::read_lines(&self.log_path(source)?, tail)
    }

    /// 核心首次启动时打印的管理员初始密码
    pub fn admin_password(&self) -> Result<String, SidecarError> {
        let lines = logs::read_lines(&self.log_path(LogSource::OpenlistCore)?, None)?;
        logs::admin_password_from_log(&lines.join("\n")).ok_or(SidecarError::AdminPasswordNotFound)
    }

    // ---- 远程与挂载 ----

    pub fn remotes(&self) -> Vec<MountEntry> {
        self.settings.mounts()
    }

    async fn write_conf_section(&self, entry: &MountEntry) -> Result<(), SidecarError> {
        let pass = match &entry.remote {
            crate::models::RemoteConfig::Webdav { pass, .. } if !pass.is_empty() => Some(
                rclone_conf::obscure(&self.rclone_binary(), pass)
                    .await
                    .map_err(|e| SidecarError::RcloneConf(format!("{e:#}")))?,
            ),
            _ => None,
        };
        let path = self.rclone_conf_path();
        let section = rclone_conf::to_section(&entry.remote, pass);
        let result = RcloneConf::load(&path).and_then(|mut conf| {
            conf.remotes.insert(entry.name.clone(), section);
            conf.save(&path)
        });
        result.map_err(|e| SidecarError::RcloneConf(format!("{e:#}")))
    }

    fn remove_conf_section(&self, name: &str) -> Result<(), SidecarError> {
        let path = self.rclone_conf_path();
        let result = RcloneConf::load(&path).and_then(|mut conf| {
            if conf.remotes.remove(name).is_some() {
                conf.save(&path)?;
            }
            Ok(())
        });
        result.map_err(|e| SidecarError::RcloneConf(format!("{e:#}")))
    }

    fn validate_entry(entry: &MountEntry) -> Result<(), SidecarError> {
        validate_remote_name(&entry.name)?;
        entry.remote.validate().map_err(SidecarError::InvalidRemote)
    }

    /// 远程名称不能等于其他远程的挂载进程名，反之亦然；`replacing` 是正在改名的旧条目
    fn check_name_collision(&self, name: &str, replacing: Option<&str>) -> Result<(), SidecarError> {
        let own_process = mount_process_name(name);
        let collision = self
            .settings
            .mounts()
            .into_iter()
            .filter(|other| Some(other.name.as_str()) != replacing)
            .find(|other| other.name == own_process || name == mount_process_name(&other.name));
        match collision {
            Some(other) => Err(SidecarError::NameCollision {
                name: name.to_string(),
                other: other.name,
            }),
            None => Ok(()),
        }
    }

    pub async fn create_remote(&self, mut entry: MountEntry) -> Result<Persisted<MountEntry>, SidecarError> {
        Self::validate_entry(&entry)?;
        if self.settings.mount(&entry.name).is_some() {
            return Err(SidecarError::RemoteExists(entry.name));
        }
        self.check_name_collision(&entry.name, None)?;
        entry.process_id = self
            .coordinator
            .find(&mount_process_name(&entry.name))
            .map(|d| d.id);

        self.write_conf_section(&entry).await?;
        log::info!("Created remote '{}' ({})", entry.name, entry.remote.remote_type());
        Ok(self.settings.upsert_mount(entry.clone()).map(|_| entry))
    }

    /// 原地更新；名称变化时经由协调器迁移挂载进程
    pub async fn update_remote(
        &self,
        name: &str,
        mut entry: MountEntry,
    ) -> Result<Persisted<RemoteUpdate>, SidecarError> {
        let existing = self
            .settings
            .mount(name)
            .ok_or_else(|| SidecarError::UnknownRemote(name.to_string()))?;
        Self::validate_entry(&entry)?;

        if entry.name == name {
            entry.process_id = existing.process_id;
            self.write_conf_section(&entry).await?;
            if let Some(process) = self.coordinator.find(&mount_process_name(name)) {
                let patch = ProcessPatch {
                    args: Some(self.mount_args(&entry)?),
                    auto_start: Some(entry.mount.auto_mount),
                    ..Default::default()
                };
                self.coordinator.update(&process.id, &patch).await?;
                entry.process_id = Some(process.id);
            }
            let persisted = self.settings.upsert_mount(entry.clone());
            return Ok(persisted.map(|_| RemoteUpdate { entry, rename: None }));
        }

        if self.settings.mount(&entry.name).is_some() {
            return Err(SidecarError::RemoteExists(entry.name));
        }
        self.check_name_collision(&entry.name, Some(name))?;

        // 新配置段先落盘，失败时进程与设置都保持原样
        self.write_conf_section(&entry).await?;

        let old_process = mount_process_name(name);
        let rename = match self.coordinator.find(&old_process) {
            Some(_) => {
                let renamed = self
                    .coordinator
                    .rename(&old_process, &mount_process_name(&entry.name), || {
                        self.mount_descriptor(&entry)
                    })
                    .await;
                let outcome = match renamed {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        if let Err(cleanup) = self.remove_conf_section(&entry.name) {
                            log::warn!("Failed to drop rclone section '{}': {}", entry.name, cleanup);
                        }
                        return Err(e.into());
                    }
                };
                entry.process_id = Some(match &outcome {
                    RenameOutcome::Completed { new_id, .. }
                    | RenameOutcome::PartialCompletion { new_id, .. } => new_id.clone(),
                });
                Some(outcome)
            }
            None => {
                entry.process_id = None;
                None
            }
        };

        let persisted = self.settings.rename_mount(name, entry.clone());
        // 部分完成时旧进程仍在使用旧配置段
        let old_retired = !matches!(rename, Some(RenameOutcome::PartialCompletion { .. }));
        if old_retired {
            if let Err(e) = self.remove_conf_section(name) {
                log::warn!("Failed to drop rclone section '{}': {}", name, e);
            }
        }
        log::info!("Renamed remote '{}' -> '{}'", name, entry.name);
        Ok(persisted.map(|_| RemoteUpdate { entry, rename }))
    }

    /// 先移除 rclone 配置段，再停止并删除挂载进程，最后移除远程设置
    pub async fn delete_remote(&self, name: &str) -> Result<Persisted<Option<DeleteOutcome>>, SidecarError> {
        if self.settings.mount(name).is_none() {
            return Err(SidecarError::UnknownRemote(name.to_string()));
        }
        self.remove_conf_section(name)?;
        let outcome = match self.coordinator.find(&mount_process_name(name)) {
            Some(process) => Some(self.coordinator.delete(&process.id).await?),
            None => None,
        };
        log::info!("Deleted remote '{}'", name);
        Ok(self.settings.remove_mount(name).map(|_| outcome))
    }

    /// 按需创建挂载进程并启动；已挂载时直接返回
    pub async fn mount(&self, name: &str) -> Result<Persisted<String>, SidecarError> {
        let entry = self
            .settings
            .mount(name)
            .ok_or_else(|| SidecarError::UnknownRemote(name.to_string()))?;
        let mount_point = entry
            .mount
            .mount_point
            .clone()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| SidecarError::MissingMountPoint(name.to_string()))?;

        if !Path::new(&mount_point).exists() {
            fs::create_dir_all(&mount_point).map_err(|source| SidecarError::MountPoint {
                path: mount_point.clone(),
                source,
            })?;
        }

        let id = self
            .coordinator
            .ensure_created(&mount_process_name(name), || self.mount_descriptor(&entry))
            .await?;
        let warning = if entry.process_id.as_deref() != Some(id.as_str()) {
            self.settings.record_association(name, &id)?.warning
        } else {
            None
        };

        let running = self
            .coordinator
            .get_status(&id)
            .map(|s| s.is_running)
            .unwrap_or(false);
        if running && is_mount_accessible(&mount_point) {
            log::info!("Remote '{}' is already mounted at {}", name, mount_point);
        } else {
            self.coordinator.start(&id).await?;
            log::info!("Mounting remote '{}' at {}", name, mount_point);
        }
        Ok(Persisted { value: id, warning })
    }

    /// 停止挂载进程；没有挂载进程时视为已卸载
    pub async fn unmount(&self, name: &str) -> Result<(), SidecarError> {
        if let Some(process) = self.coordinator.find(&mount_process_name(name)) {
            self.coordinator.stop(&process.id).await?;
            log::info!("Unmounted remote '{}'", name);
        }
        Ok(())
    }

    pub fn mount_infos(&self) -> Vec<MountInfo> {
        self.settings
            .mounts()
            .into_iter()
            .map(|entry| {
                let process = self.coordinator.find(&mount_process_name(&entry.name));
                let status = process
                    .as_ref()
                    .and_then(|p| self.coordinator.get_status(&p.id).ok());
                let mount_point = entry.mount.mount_point.clone();

                let state = match status {
                    None => MountState::Unmounted,
                    Some(s) if s.state == ProcessState::Error => MountState::Error,
                    Some(s) if s.is_running => {
                        if mount_point.as_deref().is_some_and(is_mount_accessible) {
                            MountState::Mounted
                        } else {
                            MountState::Mounting
                        }
                    }
                    Some(_) => MountState::Unmounted,
                };

                MountInfo {
                    remote_path: format!(
                        "{}:{}",
                        entry.name,
                        entry.mount.volume_name.as_deref().unwrap_or_default()
                    ),
                    name: entry.name,
                    process_id: process.map(|p| p.id),
                    mount_point,
                    status: state,
                }
            })
            .collect()
    }

    /// 启动时按设置拉起核心和自动挂载
    pub async fn bootstrap(&self) {
        for entry in self.settings.mounts() {
            // 上次运行记录的 id 在新的注册表中不存在
            if entry.process_id.is_some()
                && self.coordinator.find(&mount_process_name(&entry.name)).is_none()
            {
                if let Some(failure) = self.settings.drop_association(&entry.name).warning {
                    log::warn!(
                        "Failed to persist dropped association for '{}': {}",
                        entry.name,
                        failure.message
                    );
                }
            }
            if let Err(e) = self.write_conf_section(&entry).await {
                log::warn!("Failed to sync rclone config for '{}': {}", entry.name, e);
            }
        }

        if self.settings.openlist().auto_launch {
            match self.start_core().await {
                Ok(id) => log::info!("OpenList core launched ({})", id),
                Err(e) => log::error!("Failed to launch OpenList core: {}", e),
            }
        }

        for entry in self.settings.mounts().into_iter().filter(|e| e.mount.auto_mount) {
            if let Err(e) = self.mount(&entry.name).await {
                log::error!("Failed to auto-mount '{}': {}", entry.name, e);
            }
        }
    }

    /// 停止所有挂载进程
    pub async fn shutdown(&self) {
        let mounts = self
            .coordinator
            .list()
            .into_iter()
            .filter(|d| d.name.starts_with(MOUNT_PREFIX));
        for process in mounts {
            let running = self
                .coordinator
                .get_status(&process.id)
                .map(|s| s.state != ProcessState::Stopped)
                .unwrap_or(false);
            if !running {
                continue;
            }
            if let Err(e) = self.coordinator.stop(&process.id).await {
                log::warn!("Failed to stop mount process '{}': {}", process.name, e);
            }
        }
        log::info!("All mount processes stopped");
    }
}
