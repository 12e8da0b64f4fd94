use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};

use crate::error::ManagerError;
use crate::models::{now_secs, ProcessDescriptor, ProcessPatch, ProcessState, RuntimeStatus};
use crate::services::process_checker::{find_matching_pid, is_pid_alive, terminate_pid};
use crate::services::process_manager::ProcessManager;

const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;
const MAX_LOG_ARCHIVES: usize = 3;
const MAX_AUTO_RESTARTS: u32 = 5;
const STOP_GRACE: Duration = Duration::from_secs(3);

#[derive(Debug)]
struct ManagedProcess {
    descriptor: ProcessDescriptor,
    child: Option<Child>,
    /// 启动前已在运行、被接管的进程
    external_pid: Option<u32>,
    started_at: Option<u64>,
    restart_count: u32,
    last_exit_code: Option<i32>,
    /// 主动停止后不再自动重启
    stop_requested: bool,
}

impl ManagedProcess {
    /// 回收已退出的子进程，返回当前 PID
    fn refresh(&mut self) -> Option<u32> {
        if let Some(child) = self.child.as_mut() {
            match child.try_wait() {
                Ok(None) => return child.id(),
                Ok(Some(status)) => {
                    log::info!(
                        "Process '{}' exited with {}",
                        self.descriptor.name,
                        status
                    );
                    self.last_exit_code = status.code();
                }
                Err(e) => {
                    log::warn!("Error checking process '{}': {}", self.descriptor.name, e);
                }
            }
            self.child = None;
            self.started_at = None;
            return None;
        }

        if let Some(pid) = self.external_pid {
            if is_pid_alive(pid) {
                return Some(pid);
            }
            self.external_pid = None;
            self.started_at = None;
        }
        None
    }

    fn status(&self, pid: Option<u32>) -> RuntimeStatus {
        RuntimeStatus {
            id: self.descriptor.id.clone(),
            name: self.descriptor.name.clone(),
            state: if pid.is_some() {
                ProcessState::Running
            } else if self.last_exit_code.is_some_and(|c| c != 0) {
                ProcessState::Error
            } else {
                ProcessState::Stopped
            },
            is_running: pid.is_some(),
            pid,
            started_at: self.started_at,
            restart_count: self.restart_count,
            last_exit_code: self.last_exit_code,
        }
    }

    fn spawn(&mut self) -> Result<u32, ManagerError> {
        let descriptor = &self.descriptor;
        if descriptor.run_as_admin {
            log::warn!(
                "Process '{}' requests elevation, starting with current privileges",
                descriptor.name
            );
        }

        let (stdout, stderr) = match descriptor.log_file.as_deref() {
            Some(path) if !path.is_empty() => open_log(Path::new(path))?,
            _ => (Stdio::null(), Stdio::null()),
        };

        let mut cmd = Command::new(&descriptor.bin_path);
        cmd.args(&descriptor.args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);

        if let Some(dir) = &descriptor.working_dir {
            cmd.current_dir(dir);
        }
        if let Some(env_vars) = &descriptor.env_vars {
            cmd.envs(env_vars);
        }

        #[cfg(target_os = "windows")]
        {
            cmd.creation_flags(0x08000000); // CREATE_NO_WINDOW
        }

        let child = cmd
            .spawn()
            .map_err(|e| ManagerError::Spawn(format!("{}: {}", descriptor.bin_path, e)))?;
        let pid = child.id().unwrap_or_default();

        log::info!(
            "Started process '{}' (pid: {}) with command: {} {}",
            descriptor.name,
            pid,
            descriptor.bin_path,
            descriptor.args.join(" ")
        );

        self.child = Some(child);
        self.external_pid = None;
        self.started_at = Some(now_secs());
        self.stop_requested = false;
        Ok(pid)
    }
}

/// 在当前主机上直接派生子进程的进程管理器
#[derive(Default)]
pub struct LocalProcessManager {
    processes: Mutex<HashMap<String, ManagedProcess>>,
}

impl LocalProcessManager {
    pub fn new() -> Self {
        Self::default()
    }
}

/// 可执行文件存在，或能在 PATH 中找到
fn resolve_binary(bin_path: &str) -> Option<PathBuf> {
    let path = Path::new(bin_path);
    if path.components().count() > 1 || path.is_absolute() {
        return path.is_file().then(|| path.to_path_buf());
    }

    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .flat_map(|dir| {
            let plain = dir.join(bin_path);
            let exe = dir.join(format!("{bin_path}.exe"));
            [plain, exe]
        })
        .find(|candidate| candidate.is_file())
}

fn open_log(path: &Path) -> Result<(Stdio, Stdio), ManagerError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ManagerError::Spawn(format!("failed to create log directory: {e}")))?;
    }
    rotate_log_if_needed(path)
        .map_err(|e| ManagerError::Spawn(format!("failed to rotate log: {e}")))?;

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| ManagerError::Spawn(format!("failed to open log file: {e}")))?;
    let err_file = file
        .try_clone()
        .map_err(|e| ManagerError::Spawn(format!("failed to clone log handle: {e}")))?;
    Ok((Stdio::from(file), Stdio::from(err_file)))
}

/// 超过 10 MiB 时轮转：`name.log` → `name.1.log` … 保留 3 份
fn rotate_log_if_needed(log_path: &Path) -> std::io::Result<()> {
    let Ok(metadata) = std::fs::metadata(log_path) else {
        return Ok(());
    };
    if metadata.len() < MAX_LOG_SIZE {
        return Ok(());
    }

    let dir = log_path.parent().unwrap_or_else(|| Path::new("."));
    let stem = log_path.file_stem().and_then(|s| s.to_str()).unwrap_or("log");
    let ext = log_path.extension().and_then(|s| s.to_str()).unwrap_or("log");
    let archive = |i: usize| dir.join(format!("{stem}.{i}.{ext}"));

    let oldest = archive(MAX_LOG_ARCHIVES);
    if oldest.exists() {
        std::fs::remove_file(&oldest)?;
    }
    for i in (1..MAX_LOG_ARCHIVES).rev() {
        let from = archive(i);
        if from.exists() {
            std::fs::rename(&from, archive(i + 1))?;
        }
    }
    std::fs::rename(log_path, archive(1))?;
    log::info!("Rotated log file '{}'", log_path.display());
    Ok(())
}

#[async_trait]
impl ProcessManager for LocalProcessManager {
    async fn create(&self, descriptor: &ProcessDescriptor) -> Result<String, ManagerError> {
        if resolve_binary(&descriptor.bin_path).is_none() {
            return Err(ManagerError::Rejected(format!(
                "binary not found: {}",
                descriptor.bin_path
            )));
        }
        if self.processes.lock().contains_key(&descriptor.id) {
            return Err(ManagerError::Rejected(format!(
                "process id '{}' already exists",
                descriptor.id
            )));
        }

        // 接管上次运行遗留下来的同一命令行进程
        let bin = descriptor.bin_path.clone();
        let args = descriptor.args.clone();
        let adopted = tokio::task::spawn_blocking(move || find_matching_pid(&bin, &args))
            .await
            .unwrap_or(None);
        if let Some(pid) = adopted {
            log::info!("Adopting running process '{}' (pid: {})", descriptor.name, pid);
        }

        let mut processes = self.processes.lock();
        if processes.contains_key(&descriptor.id) {
            return Err(ManagerError::Rejected(format!(
                "process id '{}' already exists",
                descriptor.id
            )));
        }
        processes.insert(
            descriptor.id.clone(),
            ManagedProcess {
                descriptor: descriptor.clone(),
                child: None,
                external_pid: adopted,
                started_at: adopted.map(|_| now_secs()),
                restart_count: 0,
                last_exit_code: None,
                stop_requested: false,
            },
        );
        log::info!("Registered process '{}' ({})", descriptor.name, descriptor.id);
        Ok(descriptor.id.clone())
    }

    async fn start(&self, id: &str) -> Result<bool, ManagerError> {
        let mut processes = self.processes.lock();
        let managed = processes
            .get_mut(id)
            .ok_or_else(|| ManagerError::NotFound(id.to_string()))?;

        if managed.refresh().is_some() {
            return Ok(true);
        }
        managed.spawn()?;
        Ok(true)
    }

    async fn stop(&self, id: &str) -> Result<bool, ManagerError> {
        let (child, external_pid, name) = {
            let mut processes = self.processes.lock();
            let managed = processes
                .get_mut(id)
                .ok_or_else(|| ManagerError::NotFound(id.to_string()))?;
            managed.stop_requested = true;
            managed.started_at = None;
            (
                managed.child.take(),
                managed.external_pid.take(),
                managed.descriptor.name.clone(),
            )
        };

        let mut stopped = true;
        if let Some(mut child) = child {
            if let Some(pid) = child.id() {
                if !terminate_pid(pid, STOP_GRACE).await {
                    let _ = child.kill().await;
                }
            }
            match tokio::time::timeout(STOP_GRACE, child.wait()).await {
                Ok(Ok(status)) => {
                    if let Some(m) = self.processes.lock().get_mut(id) {
                        m.last_exit_code = status.code();
                    }
                }
                Ok(Err(e)) => log::warn!("Failed to reap process '{}': {}", name, e),
                Err(_) => {
                    log::error!("Process '{}' did not exit after kill", name);
                    stopped = false;
                    if let Some(m) = self.processes.lock().get_mut(id) {
                        m.child = Some(child);
                    }
                }
            }
        } else if let Some(pid) = external_pid {
            if !terminate_pid(pid, STOP_GRACE).await {
                stopped = false;
                if let Some(m) = self.processes.lock().get_mut(id) {
                    m.external_pid = Some(pid);
                }
            }
        }

        if stopped {
            log::info!("Stopped process '{}'", name);
        }
        Ok(stopped)
    }

    async fn restart(&self, id: &str) -> Result<bool, ManagerError> {
        if !self.stop(id).await? {
            return Ok(false);
        }
        self.start(id).await
    }

    async fn list(&self) -> Result<Vec<RuntimeStatus>, ManagerError> {
        let mut processes = self.processes.lock();
        let mut result = Vec::with_capacity(processes.len());

        for managed in processes.values_mut() {
            let mut pid = managed.refresh();

            if pid.is_none()
                && managed.descriptor.auto_restart
                && !managed.stop_requested
                && managed.last_exit_code.is_some()
                && managed.restart_count < MAX_AUTO_RESTARTS
            {
                managed.restart_count += 1;
                log::warn!(
                    "Auto-restarting '{}' (attempt {}/{})",
                    managed.descriptor.name,
                    managed.restart_count,
                    MAX_AUTO_RESTARTS
                );
                match managed.spawn() {
                    Ok(new_pid) => pid = Some(new_pid),
                    Err(e) => log::error!("Auto-restart of '{}' failed: {}", managed.descriptor.name, e),
                }
            }

            result.push(managed.status(pid));
        }

        Ok(result)
    }

    async fn update(&self, id: &str, patch: &ProcessPatch) -> Result<bool, ManagerError> {
        if let Some(bin) = &patch.bin_path {
            if resolve_binary(bin).is_none() {
                return Err(ManagerError::Rejected(format!("binary not found: {bin}")));
            }
        }
        let mut processes = self.processes.lock();
        let managed = processes
            .get_mut(id)
            .ok_or_else(|| ManagerError::NotFound(id.to_string()))?;
        managed.descriptor = managed.descriptor.merged(patch);
        Ok(true)
    }

    async fn delete(&self, id: &str) -> Result<bool, ManagerError> {
        let mut processes = self.processes.lock();
        let Some(managed) = processes.get_mut(id) else {
            return Ok(false);
        };
        // 仍在运行则拒绝，由调用方先 stop
        if managed.refresh().is_some() {
            return Err(ManagerError::Rejected(format!(
                "process '{}' is still running",
                managed.descriptor.name
            )));
        }
        if let Some(managed) = processes.remove(id) {
            log::info!("Deleted process '{}'", managed.descriptor.name);
        }
        Ok(true)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sleeper(name: &str) -> ProcessDescriptor {
        ProcessDescriptor::new(name, "sleep", vec!["30".into()])
    }

    #[tokio::test]
    async fn create_rejects_missing_binary() {
        let manager = LocalProcessManager::new();
        let desc = ProcessDescriptor::new("ghost", "/definitely/not/here", vec![]);
        let err = manager.create(&desc).await.unwrap_err();
        assert!(matches!(err, ManagerError::Rejected(_)));
    }

    #[tokio::test]
    async fn start_stop_roundtrip() {
        let manager = LocalProcessManager::new();
        let mut desc = sleeper("sleeper");
        // 避免接管机器上已有的 sleep 30
        desc.args = vec![format!("{}", 3000 + std::process::id() % 1000)];
        let id = manager.create(&desc).await.unwrap();

        assert!(manager.start(&id).await.unwrap());
        let listed = manager.list().await.unwrap();
        assert!(listed.iter().any(|s| s.id == id && s.is_running));

        assert!(manager.stop(&id).await.unwrap());
        let listed = manager.list().await.unwrap();
        assert!(listed.iter().any(|s| s.id == id && !s.is_running));

        assert!(manager.delete(&id).await.unwrap());
        assert!(!manager.delete(&id).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let manager = LocalProcessManager::new();
        assert_eq!(
            manager.start("nope").await.unwrap_err(),
            ManagerError::NotFound("nope".into())
        );
    }

    #[test]
    fn rotation_keeps_bounded_archives() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("core.log");
        std::fs::write(&log, vec![b'x'; (MAX_LOG_SIZE + 1) as usize]).unwrap();

        rotate_log_if_needed(&log).unwrap();
        assert!(!log.exists());
        assert!(dir.path().join("core.1.log").exists());
    }
}
