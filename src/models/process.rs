use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// 当前 Unix 时间戳（秒）
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// 受管进程的声明式配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessDescriptor {
    /// 运行时标识
    pub id: String,
    /// 逻辑名称（查找用的稳定键，与 id 不同）
    pub name: String,
    /// 可执行文件路径
    pub bin_path: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub env_vars: Option<HashMap<String, String>>,
    /// stdout/stderr 追加写入的日志文件，为空时丢弃输出
    #[serde(default)]
    pub log_file: Option<String>,
    #[serde(default)]
    pub auto_start: bool,
    #[serde(default)]
    pub auto_restart: bool,
    #[serde(default)]
    pub run_as_admin: bool,
    #[serde(default)]
    pub created_at: u64,
    #[serde(default)]
    pub updated_at: u64,
}

impl ProcessDescriptor {
    /// 以随机 id 创建描述符
    pub fn new(name: impl Into<String>, bin_path: impl Into<String>, args: Vec<String>) -> Self {
        let now = now_secs();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            bin_path: bin_path.into(),
            args,
            working_dir: None,
            env_vars: None,
            log_file: None,
            auto_start: false,
            auto_restart: false,
            run_as_admin: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// 合并部分更新，返回新的描述符
    pub fn merged(&self, patch: &ProcessPatch) -> Self {
        let mut next = self.clone();
        if let Some(bin_path) = &patch.bin_path {
            next.bin_path = bin_path.clone();
        }
        if let Some(args) = &patch.args {
            next.args = args.clone();
        }
        if let Some(working_dir) = &patch.working_dir {
            next.working_dir = working_dir.clone();
        }
        if let Some(env_vars) = &patch.env_vars {
            next.env_vars = env_vars.clone();
        }
        if let Some(log_file) = &patch.log_file {
            next.log_file = log_file.clone();
        }
        if let Some(v) = patch.auto_start {
            next.auto_start = v;
        }
        if let Some(v) = patch.auto_restart {
            next.auto_restart = v;
        }
        if let Some(v) = patch.run_as_admin {
            next.run_as_admin = v;
        }
        next.updated_at = now_secs().max(self.updated_at);
        next
    }
}

/// 描述符的部分更新；`None` 表示字段保持不变
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessPatch {
    #[serde(default)]
    pub bin_path: Option<String>,
    #[serde(default)]
    pub args: Option<Vec<String>>,
    #[serde(default)]
    pub working_dir: Option<Option<String>>,
    #[serde(default)]
    pub env_vars: Option<Option<HashMap<String, String>>>,
    #[serde(default)]
    pub log_file: Option<Option<String>>,
    #[serde(default)]
    pub auto_start: Option<bool>,
    #[serde(default)]
    pub auto_restart: Option<bool>,
    #[serde(default)]
    pub run_as_admin: Option<bool>,
}

impl ProcessPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// 观测到的进程状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    #[default]
    Unknown,
    Running,
    Stopped,
    Error,
}

impl ProcessState {
    /// Unknown 视为未运行
    pub fn is_running(self) -> bool {
        matches!(self, ProcessState::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProcessState::Unknown => "unknown",
            ProcessState::Running => "running",
            ProcessState::Stopped => "stopped",
            ProcessState::Error => "error",
        }
    }
}

/// 进程运行状态，只由状态协调器写入
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeStatus {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub state: ProcessState,
    pub is_running: bool,
    pub pid: Option<u32>,
    pub started_at: Option<u64>,
    #[serde(default)]
    pub restart_count: u32,
    pub last_exit_code: Option<i32>,
}

impl RuntimeStatus {
    /// 尚未观测过的进程
    pub fn unknown(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            state: ProcessState::Unknown,
            is_running: false,
            pid: None,
            started_at: None,
            restart_count: 0,
            last_exit_code: None,
        }
    }

    /// 进程管理器不可达时的保守状态
    pub fn stopped(id: &str, name: &str) -> Self {
        Self {
            state: ProcessState::Stopped,
            ..Self::unknown(id, name)
        }
    }
}
