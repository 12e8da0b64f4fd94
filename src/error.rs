use thiserror::Error;

/// 进程管理器返回的错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ManagerError {
    #[error("process '{0}' is not known to the process manager")]
    NotFound(String),
    #[error("process manager rejected the request: {0}")]
    Rejected(String),
    #[error("failed to spawn process: {0}")]
    Spawn(String),
    #[error("process manager unavailable: {0}")]
    Unavailable(String),
}

/// 生命周期协调器的错误分类
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoordinatorError {
    #[error("no process registered for '{0}'")]
    NotFound(String),

    #[error("logical name '{name}' is already registered with id '{existing_id}'")]
    DuplicateName { name: String, existing_id: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("process manager could not create '{name}': {source}")]
    CreationFailed {
        name: String,
        #[source]
        source: ManagerError,
    },

    #[error("process manager failed to {operation} '{id}': {message}")]
    ExternalManager {
        operation: &'static str,
        id: String,
        message: String,
    },
}

impl CoordinatorError {
    /// 外部进程管理器的瞬时失败可以由调用方重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoordinatorError::ExternalManager { .. } | CoordinatorError::CreationFailed { .. }
        )
    }

    /// 结构性错误（输入错误或对象不存在），不应重试
    pub fn is_structural(&self) -> bool {
        !self.is_retryable()
    }

    pub(crate) fn manager(operation: &'static str, id: &str, err: ManagerError) -> Self {
        CoordinatorError::ExternalManager {
            operation,
            id: id.to_string(),
            message: err.to_string(),
        }
    }

    pub(crate) fn refused(operation: &'static str, id: &str) -> Self {
        CoordinatorError::ExternalManager {
            operation,
            id: id.to_string(),
            message: "process manager returned false".to_string(),
        }
    }
}

/// 设置读写错误
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("settings file error ({path}): {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid settings document: {0}")]
    Format(#[from] serde_json::Error),
    #[error("no remote named '{0}' in settings")]
    UnknownRemote(String),
}

/// 挂载与核心工作流的错误
#[derive(Error, Debug)]
pub enum SidecarError {
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error("invalid remote name '{0}': only letters, digits, '_', '.' and '-' are allowed")]
    InvalidName(String),

    #[error("invalid remote config: {0}")]
    InvalidRemote(String),

    #[error("remote '{0}' already exists")]
    RemoteExists(String),

    #[error("no remote named '{0}'")]
    UnknownRemote(String),

    #[error("mount point is not set for remote '{0}'")]
    MissingMountPoint(String),

    #[error("cannot prepare mount point {path}: {source}")]
    MountPoint {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to update rclone config: {0}")]
    RcloneConf(String),

    #[error("remote name '{name}' collides with the mount process of remote '{other}'")]
    NameCollision { name: String, other: String },

    #[error("unknown log source '{0}'")]
    InvalidLogSource(String),

    #[error("log directory is not configured")]
    LogDirUnset,

    #[error("cannot read log {path}: {source}")]
    Log {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no admin password found in the core log")]
    AdminPasswordNotFound,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(CoordinatorError::NotFound("x".into()).is_structural());
        assert!(CoordinatorError::InvalidInput("bad".into()).is_structural());
        assert!(CoordinatorError::refused("start", "x").is_retryable());
        let err = CoordinatorError::manager("stop", "x", ManagerError::Unavailable("down".into()));
        assert!(err.to_string().contains("failed to stop 'x'"));
    }
}
