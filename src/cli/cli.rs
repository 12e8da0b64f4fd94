use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::services::reconciler::DEFAULT_POLL_INTERVAL;
use crate::services::SidecarPaths;
use crate::state::ContextConfig;

/// Sidecar Coordinator - OpenList 核心与 rclone 挂载进程的生命周期守护
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CommandArgs {
    /// 监听端口
    #[arg(short, long, env = "PORT", default_value_t = 9999)]
    pub port: u16,

    /// 监听地址
    #[arg(short = 'a', long, env = "ADDRESS", default_value = "127.0.0.1")]
    pub address: String,

    /// 设置文件路径
    #[arg(short = 's', long, env = "SETTINGS_FILE", default_value = "settings.json")]
    pub settings_file: PathBuf,

    /// 状态轮询间隔（秒）
    #[arg(long, env = "POLL_INTERVAL_SECS", default_value_t = DEFAULT_POLL_INTERVAL.as_secs())]
    pub poll_interval_secs: u64,

    /// OpenList 可执行文件
    #[arg(long, env = "OPENLIST_BINARY", default_value = "openlist")]
    pub openlist_binary: String,

    /// rclone 可执行文件
    #[arg(long, env = "RCLONE_BINARY", default_value = "rclone")]
    pub rclone_binary: String,

    /// rclone.conf 路径，默认与设置文件同目录
    #[arg(long, env = "RCLONE_CONFIG")]
    pub rclone_config: Option<PathBuf>,

    /// 子进程与本服务的日志目录
    #[arg(long, env = "LOG_DIR")]
    pub log_dir: Option<PathBuf>,
}

impl CommandArgs {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn context_config(&self) -> ContextConfig {
        let rclone_conf = self.rclone_config.clone().unwrap_or_else(|| {
            self.settings_file
                .parent()
                .map(|dir| dir.join("rclone.conf"))
                .unwrap_or_else(|| PathBuf::from("rclone.conf"))
        });
        ContextConfig {
            settings_file: self.settings_file.clone(),
            poll_interval: Duration::from_secs(self.poll_interval_secs.max(1)),
            paths: SidecarPaths {
                openlist_binary: self.openlist_binary.clone(),
                rclone_binary: self.rclone_binary.clone(),
                rclone_conf,
                log_dir: self.log_dir.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_place_rclone_conf_next_to_settings() {
        let args = CommandArgs::parse_from(["sidecar-coordinator", "--settings-file", "/etc/sidecar/settings.json"]);
        let config = args.context_config();
        assert_eq!(config.paths.rclone_conf, PathBuf::from("/etc/sidecar/rclone.conf"));
    }

    #[test]
    fn zero_interval_is_clamped() {
        let args = CommandArgs::parse_from(["sidecar-coordinator", "--poll-interval-secs", "0"]);
        assert_eq!(args.context_config().poll_interval, Duration::from_secs(1));
    }
}
