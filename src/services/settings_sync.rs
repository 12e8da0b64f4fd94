use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::SettingsError;
use crate::models::{AppConfig, CoordinatorEvent, MountEntry, OpenListCoreConfig, Settings};
use crate::services::scheduler::EventBus;

/// 持久化失败的警告；运行时状态已经生效，不会回滚
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersistenceFailure {
    pub operation: String,
    pub message: String,
}

/// 修改设置后的结果，附带可能的持久化警告
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub struct Persisted<T> {
    pub value: T,
    pub warning: Option<PersistenceFailure>,
}

impl<T> Persisted<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Persisted<U> {
        Persisted {
            value: f(self.value),
            warning: self.warning,
        }
    }
}

/// 设置同步器：内存中的设置聚合加上落盘
pub struct SettingsSynchronizer {
    path: PathBuf,
    settings: RwLock<Settings>,
    bus: EventBus,
    // 串行化落盘，保证后写的快照不会被先写的覆盖
    write_lock: Mutex<()>,
}

impl SettingsSynchronizer {
    /// 读取设置文件；文件不存在时使用默认值
    pub fn load_or_default(path: impl Into<PathBuf>, bus: EventBus) -> Result<Self, SettingsError> {
        let path = path.into();
        let settings = match fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => Settings::default(),
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("Settings file {} not found, using defaults", path.display());
                Settings::default()
            }
            Err(source) => {
                return Err(SettingsError::Io {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        log::info!(
            "Loaded settings from {} ({} remotes)",
            path.display(),
            settings.rclone.config.len()
        );

        Ok(Self {
            path,
            settings: RwLock::new(settings),
            bus,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> Settings {
        self.settings.read().clone()
    }

    pub fn openlist(&self) -> OpenListCoreConfig {
        self.settings.read().openlist.clone()
    }

    pub fn mount(&self, name: &str) -> Option<MountEntry> {
        self.settings.read().rclone.config.get(name).cloned()
    }

    pub fn mounts(&self) -> Vec<MountEntry> {
        self.settings.read().rclone.config.values().cloned().collect()
    }

    /// 整体写入：先写临时文件再重命名
    pub fn persist(&self) -> Result<(), SettingsError> {
        let _write = self.write_lock.lock();
        let body = serde_json::to_string_pretty(&*self.settings.read())?;

        let io_err = |source: std::io::Error| SettingsError::Io {
            path: self.path.display().to_string(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, body).map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            io_err(e)
        })?;
        log::debug!("Settings persisted to {}", self.path.display());
        Ok(())
    }

    fn commit<R>(&self, operation: &str, mutate: impl FnOnce(&mut Settings) -> R) -> Persisted<R> {
        let value = mutate(&mut self.settings.write());
        let warning = self.persist().err().map(|e| {
            log::warn!("Failed to persist settings after {}: {}", operation, e);
            let failure = PersistenceFailure {
                operation: operation.to_string(),
                message: e.to_string(),
            };
            self.bus.publish(CoordinatorEvent::PersistFailed {
                operation: failure.operation.clone(),
                message: failure.message.clone(),
            });
            failure
        });
        Persisted { value, warning }
    }

    /// 记录挂载与进程 id 的关联
    pub fn record_association(
        &self,
        mount: &str,
        process_id: &str,
    ) -> Result<Persisted<()>, SettingsError> {
        if !self.settings.read().rclone.config.contains_key(mount) {
            return Err(SettingsError::UnknownRemote(mount.to_string()));
        }
        Ok(self.commit("record_association", |s| {
            if let Some(entry) = s.rclone.config.get_mut(mount) {
                entry.process_id = Some(process_id.to_string());
            }
        }))
    }

    /// 清除关联，返回是否存在过关联
    pub fn drop_association(&self, mount: &str) -> Persisted<bool> {
        self.commit("drop_association", |s| {
            s.rclone
                .config
                .get_mut(mount)
                .and_then(|entry| entry.process_id.take())
                .is_some()
        })
    }

    pub fn update_openlist(
        &self,
        update: impl FnOnce(&mut OpenListCoreConfig),
    ) -> Persisted<OpenListCoreConfig> {
        self.commit("update_openlist", |s| {
            update(&mut s.openlist);
            s.openlist.clone()
        })
    }

    pub fn update_app(&self, app: AppConfig) -> Persisted<()> {
        self.commit("update_app", |s| s.app = app)
    }

    pub fn upsert_mount(&self, entry: MountEntry) -> Persisted<()> {
        self.commit("upsert_mount", |s| {
            s.rclone.config.insert(entry.name.clone(), entry);
        })
    }

    /// 远程改名时在一次提交中迁移条目
    pub fn rename_mount(&self, old_name: &str, entry: MountEntry) -> Persisted<()> {
        self.commit("rename_mount", |s| {
            s.rclone.config.remove(old_name);
            s.rclone.config.insert(entry.name.clone(), entry);
        })
    }

    pub fn remove_mount(&self, name: &str) -> Persisted<Option<MountEntry>> {
        self.commit("remove_mount", |s| s.rclone.config.remove(name))
    }

    pub fn replace(&self, settings: Settings) -> Persisted<()> {
        self.commit("replace", |s| *s = settings)
    }

    pub fn reset(&self) -> Persisted<()> {
        self.commit("reset", |s| *s = Settings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MountOptions, RemoteConfig};

    fn entry(name: &str) -> MountEntry {
        MountEntry {
            name: name.to_string(),
            remote: RemoteConfig::Webdav {
                url: "https://dav.example.com".into(),
                vendor: None,
                user: "u".into(),
                pass: "p".into(),
            },
            mount: MountOptions::default(),
            process_id: None,
        }
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let sync =
            SettingsSynchronizer::load_or_default(dir.path().join("settings.json"), EventBus::default())
                .unwrap();
        assert_eq!(sync.snapshot(), Settings::default());
    }

    #[test]
    fn changes_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let sync = SettingsSynchronizer::load_or_default(&path, EventBus::default()).unwrap();

        assert!(sync.upsert_mount(entry("gdrive")).warning.is_none());
        sync.record_association("gdrive", "pid-1").unwrap();
        let updated = sync.update_openlist(|c| c.auto_launch = true);
        assert!(updated.value.auto_launch);

        let reloaded = SettingsSynchronizer::load_or_default(&path, EventBus::default()).unwrap();
        assert_eq!(reloaded.mount("gdrive").unwrap().process_id.as_deref(), Some("pid-1"));
        assert!(reloaded.openlist().auto_launch);
        assert!(!dir.path().join("settings.json.tmp").exists());
    }

    #[test]
    fn association_requires_known_remote() {
        let dir = tempfile::tempdir().unwrap();
        let sync =
            SettingsSynchronizer::load_or_default(dir.path().join("s.json"), EventBus::default())
                .unwrap();
        assert!(matches!(
            sync.record_association("nope", "x"),
            Err(SettingsError::UnknownRemote(_))
        ));
        assert!(!sync.drop_association("nope").value);
    }

    #[test]
    fn failed_persist_keeps_runtime_state_and_warns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let bus = EventBus::default();
        let mut events = bus.subscribe();
        let sync = SettingsSynchronizer::load_or_default(&path, bus).unwrap();
        // 目标位置被目录占据，重命名必然失败
        fs::create_dir(&path).unwrap();

        let result = sync.upsert_mount(entry("gdrive"));
        let warning = result.warning.expect("persist should fail");
        assert_eq!(warning.operation, "upsert_mount");
        assert!(sync.mount("gdrive").is_some());
        assert!(matches!(
            events.try_recv().unwrap(),
            CoordinatorEvent::PersistFailed { .. }
        ));
    }

    #[test]
    fn rename_mount_migrates_entry() {
        let dir = tempfile::tempdir().unwrap();
        let sync =
            SettingsSynchronizer::load_or_default(dir.path().join("s.json"), EventBus::default())
                .unwrap();
        let _ = sync.upsert_mount(entry("a"));
        let _ = sync.rename_mount("a", entry("b"));
        assert!(sync.mount("a").is_none());
        assert!(sync.mount("b").is_some());

        let _ = sync.reset();
        assert!(sync.mounts().is_empty());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            SettingsSynchronizer::load_or_default(&path, EventBus::default()),
            Err(SettingsError::Format(_))
        ));
    }
}
