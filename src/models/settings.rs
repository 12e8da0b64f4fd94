use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::mount::MountEntry;

/// OpenList 核心配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenListCoreConfig {
    pub port: u16,
    #[serde(default)]
    pub api_token: String,
    #[serde(default)]
    pub auto_launch: bool,
    #[serde(default)]
    pub ssl_enabled: bool,
}

impl Default for OpenListCoreConfig {
    fn default() -> Self {
        Self {
            port: 5244,
            api_token: String::new(),
            auto_launch: false,
            ssl_enabled: false,
        }
    }
}

/// rclone 配置，按远程名称索引
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RcloneSettings {
    #[serde(default)]
    pub config: BTreeMap<String, MountEntry>,
    #[serde(default)]
    pub binary_path: Option<String>,
    #[serde(default)]
    pub rclone_conf_path: Option<String>,
}

/// 应用偏好
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub theme: Option<String>,
    pub auto_update_enabled: Option<bool>,
    pub gh_proxy: Option<String>,
    pub gh_proxy_api: Option<bool>,
    pub open_links_in_browser: Option<bool>,
    pub show_window_on_startup: Option<bool>,
    pub log_filter_level: Option<String>,
    pub log_filter_source: Option<String>,
    pub custom_openlist_binary_path: Option<String>,
    pub custom_rclone_binary_path: Option<String>,
    pub custom_rclone_config_path: Option<String>,
    pub hide_dock_icon: Option<bool>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            theme: Some("light".to_string()),
            auto_update_enabled: Some(true),
            gh_proxy: None,
            gh_proxy_api: Some(false),
            open_links_in_browser: Some(false),
            show_window_on_startup: Some(true),
            log_filter_level: Some("all".to_string()),
            log_filter_source: Some("openlist".to_string()),
            custom_openlist_binary_path: None,
            custom_rclone_binary_path: None,
            custom_rclone_config_path: None,
            hide_dock_icon: Some(false),
        }
    }
}

/// 持久化的设置聚合，整体读写
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub openlist: OpenListCoreConfig,
    #[serde(default)]
    pub rclone: RcloneSettings,
    #[serde(default)]
    pub app: AppConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let settings: Settings = serde_json::from_str(r#"{"openlist":{"port":6000}}"#).unwrap();
        assert_eq!(settings.openlist.port, 6000);
        assert!(settings.rclone.config.is_empty());
        assert_eq!(settings.app.theme.as_deref(), Some("light"));
    }
}
