use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 远程存储连接配置，按 `type` 区分
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RemoteConfig {
    Webdav {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        vendor: Option<String>,
        #[serde(default)]
        user: String,
        #[serde(default)]
        pass: String,
    },
    /// 尚未建模的 rclone 后端，原样保留选项
    Other {
        remote_type: String,
        #[serde(default)]
        options: BTreeMap<String, String>,
    },
}

impl RemoteConfig {
    /// rclone 后端类型名
    pub fn remote_type(&self) -> &str {
        match self {
            RemoteConfig::Webdav { .. } => "webdav",
            RemoteConfig::Other { remote_type, .. } => remote_type,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            RemoteConfig::Webdav { url, .. } => {
                if url.trim().is_empty() {
                    return Err("webdav remote requires a url".to_string());
                }
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(format!("webdav url must be http(s): {url}"));
                }
                Ok(())
            }
            RemoteConfig::Other { remote_type, .. } => {
                if remote_type.trim().is_empty() || remote_type == "webdav" {
                    return Err(format!("invalid remote type: '{remote_type}'"));
                }
                Ok(())
            }
        }
    }
}

/// 挂载选项
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MountOptions {
    #[serde(default)]
    pub mount_point: Option<String>,
    #[serde(default)]
    pub volume_name: Option<String>,
    #[serde(default)]
    pub extra_flags: Vec<String>,
    #[serde(default)]
    pub auto_mount: bool,
}

/// 已配置的远程存储，可能关联一个挂载进程
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MountEntry {
    pub name: String,
    pub remote: RemoteConfig,
    #[serde(default)]
    pub mount: MountOptions,
    /// 首次挂载时惰性创建的挂载进程 id
    #[serde(default)]
    pub process_id: Option<String>,
}

/// 挂载状态（对外展示）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MountState {
    Mounted,
    Mounting,
    Unmounted,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountInfo {
    pub name: String,
    pub process_id: Option<String>,
    pub remote_path: String,
    pub mount_point: Option<String>,
    pub status: MountState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_config_is_tagged_by_type() {
        let json = r#"{"type":"webdav","url":"https://dav.example.com","user":"u","pass":"p"}"#;
        let remote: RemoteConfig = serde_json::from_str(json).unwrap();
        assert_eq!(remote.remote_type(), "webdav");
        assert!(remote.validate().is_ok());

        let other: RemoteConfig = serde_json::from_str(
            r#"{"type":"other","remote_type":"s3","options":{"region":"eu-west-1"}}"#,
        )
        .unwrap();
        assert_eq!(other.remote_type(), "s3");
    }

    #[test]
    fn webdav_without_scheme_is_rejected() {
        let remote = RemoteConfig::Webdav {
            url: "dav.example.com".into(),
            vendor: None,
            user: String::new(),
            pass: String::new(),
        };
        assert!(remote.validate().is_err());
    }
}
