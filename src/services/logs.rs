//! 日志读取与管理员初始密码提取

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::error::SidecarError;

pub const CORE_LOG_FILE: &str = "process_openlist_core.log";
pub const RCLONE_LOG_FILE: &str = "process_rclone.log";
pub const APP_LOG_FILE: &str = "app.log";

lazy_static! {
    static ref ADMIN_PASSWORD: Regex =
        Regex::new(r"Successfully created the admin user and the initial password is: (\w+)").unwrap();
}

/// 可读取的日志来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSource {
    /// 核心进程的标准输出
    OpenlistCore,
    /// 所有挂载进程共用的输出
    Rclone,
    /// 本服务自身的日志
    App,
    /// OpenList 写在数据目录下的日志
    Openlist,
}

impl FromStr for LogSource {
    type Err = SidecarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openlist_core" => Ok(LogSource::OpenlistCore),
            "rclone" => Ok(LogSource::Rclone),
            "app" => Ok(LogSource::App),
            "openlist" => Ok(LogSource::Openlist),
            other => Err(SidecarError::InvalidLogSource(other.to_string())),
        }
    }
}

/// 按行读取日志；`tail` 只保留最后若干行
pub fn read_lines(path: &Path, tail: Option<usize>) -> Result<Vec<String>, SidecarError> {
    let content = fs::read_to_string(path).map_err(|source| SidecarError::Log {
        path: path.display().to_string(),
        source,
    })?;
    let lines: Vec<String> = content.lines().map(str::to_string).collect();
    Ok(match tail {
        Some(n) if n < lines.len() => lines[lines.len() - n..].to_vec(),
        _ => lines,
    })
}

/// 日志中最后一次出现的初始密码
pub fn admin_password_from_log(content: &str) -> Option<String> {
    content
        .lines()
        .filter_map(|line| ADMIN_PASSWORD.captures(line))
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .last()
}
