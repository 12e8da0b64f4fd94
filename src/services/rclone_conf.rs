//! rclone.conf 读写
//!
//! 只维护由本服务管理的远程段落，文件中的其他段落原样保留。

use anyhow::Context;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::models::RemoteConfig;

/// rclone.conf 中的一个段落
#[derive(Debug, Clone, PartialEq)]
pub struct RcloneRemote {
    pub remote_type: String,
    pub options: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RcloneConf {
    pub remotes: BTreeMap<String, RcloneRemote>,
}

impl RcloneConf {
    pub fn parse(content: &str) -> Self {
        let mut conf = RcloneConf::default();
        let mut section: Option<(String, RcloneRemote)> = None;

        for line in content.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                if let Some((name, remote)) = section.take() {
                    conf.remotes.insert(name, remote);
                }
                section = Some((
                    name.to_string(),
                    RcloneRemote {
                        remote_type: String::new(),
                        options: BTreeMap::new(),
                    },
                ));
                continue;
            }
            let (Some((_, remote)), Some((key, value))) = (section.as_mut(), line.split_once('='))
            else {
                continue;
            };
            let (key, value) = (key.trim(), value.trim().to_string());
            if key == "type" {
                remote.remote_type = value;
            } else {
                remote.options.insert(key.to_string(), value);
            }
        }

        if let Some((name, remote)) = section {
            conf.remotes.insert(name, remote);
        }
        conf
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (name, remote) in &self.remotes {
            out.push_str(&format!("[{name}]\ntype = {}\n", remote.remote_type));
            for (key, value) in &remote.options {
                out.push_str(&format!("{key} = {value}\n"));
            }
            out.push('\n');
        }
        out
    }

    /// 文件不存在时返回空配置
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(Self::parse(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let tmp = path.with_extension("conf.tmp");
        fs::write(&tmp, self.render())
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, path).with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }
}

/// 把远程配置转换为段落；`pass` 需要已经过 obscure 处理
pub fn to_section(remote: &RemoteConfig, obscured_pass: Option<String>) -> RcloneRemote {
    let mut options = BTreeMap::new();
    match remote {
        RemoteConfig::Webdav {
            url, vendor, user, ..
        } => {
            options.insert("url".to_string(), url.clone());
            if let Some(vendor) = vendor.as_ref().filter(|v| !v.is_empty()) {
                options.insert("vendor".to_string(), vendor.clone());
            }
            if !user.is_empty() {
                options.insert("user".to_string(), user.clone());
            }
            if let Some(pass) = obscured_pass.filter(|p| !p.is_empty()) {
                options.insert("pass".to_string(), pass);
            }
        }
        RemoteConfig::Other {
            options: extra, ..
        } => options.extend(extra.clone()),
    }
    RcloneRemote {
        remote_type: remote.remote_type().to_string(),
        options,
    }
}

/// 调用 `rclone obscure` 生成配置文件可用的密码
pub async fn obscure(rclone_bin: &str, plain: &str) -> anyhow::Result<String> {
    let output = tokio::process::Command::new(rclone_bin)
        .arg("obscure")
        .arg(plain)
        .output()
        .await
        .with_context(|| format!("Failed to run {rclone_bin} obscure"))?;
    if !output.status.success() {
        anyhow::bail!(
            "rclone obscure exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
