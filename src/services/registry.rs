use parking_lot::RwLock;

use crate::error::CoordinatorError;
use crate::models::ProcessDescriptor;

/// 逻辑名称到描述符的注册表
///
/// 规模只有少量进程，按名称线性扫描即可。锁只在同步代码中短暂持有。
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    entries: RwLock<Vec<ProcessDescriptor>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按逻辑名称查找（不是 id）
    pub fn find(&self, name: &str) -> Option<ProcessDescriptor> {
        self.entries.read().iter().find(|d| d.name == name).cloned()
    }

    pub fn get(&self, id: &str) -> Option<ProcessDescriptor> {
        self.entries.read().iter().find(|d| d.id == id).cloned()
    }

    /// 插入或替换描述符
    ///
    /// 名称已映射到另一个 id 时返回 `DuplicateName`。
    pub fn upsert(&self, descriptor: ProcessDescriptor) -> Result<(), CoordinatorError> {
        let mut entries = self.entries.write();

        if let Some(existing) = entries
            .iter()
            .find(|d| d.name == descriptor.name && d.id != descriptor.id)
        {
            return Err(CoordinatorError::DuplicateName {
                name: descriptor.name.clone(),
                existing_id: existing.id.clone(),
            });
        }

        match entries.iter_mut().find(|d| d.id == descriptor.id) {
            Some(slot) => *slot = descriptor,
            None => entries.push(descriptor),
        }
        Ok(())
    }

    /// 删除描述符；未知 id 不是错误
    pub fn remove(&self, id: &str) -> Option<ProcessDescriptor> {
        let mut entries = self.entries.write();
        let idx = entries.iter().position(|d| d.id == id)?;
        Some(entries.remove(idx))
    }

    /// 把描述符从旧 id 迁移到管理器分配的新 id
    pub(crate) fn rekey(&self, old_id: &str, new_id: &str) -> bool {
        let mut entries = self.entries.write();
        if entries.iter().any(|d| d.id == new_id) {
            return false;
        }
        match entries.iter_mut().find(|d| d.id == old_id) {
            Some(slot) => {
                slot.id = new_id.to_string();
                true
            }
            None => false,
        }
    }

    pub fn list(&self) -> Vec<ProcessDescriptor> {
        self.entries.read().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(id: &str, name: &str) -> ProcessDescriptor {
        let mut d = ProcessDescriptor::new(name, "/usr/bin/rclone", vec![]);
        d.id = id.to_string();
        d
    }

    #[test]
    fn find_matches_logical_name_not_id() {
        let registry = ProcessRegistry::new();
        registry.upsert(descriptor("p-1", "rclone_mount_gdrive_process")).unwrap();

        assert!(registry.find("rclone_mount_gdrive_process").is_some());
        assert!(registry.find("p-1").is_none());
        assert_eq!(registry.get("p-1").unwrap().name, "rclone_mount_gdrive_process");
    }

    #[test]
    fn upsert_rejects_name_bound_to_other_id() {
        let registry = ProcessRegistry::new();
        registry.upsert(descriptor("a", "core")).unwrap();

        let err = registry.upsert(descriptor("b", "core")).unwrap_err();
        assert_eq!(
            err,
            CoordinatorError::DuplicateName {
                name: "core".into(),
                existing_id: "a".into()
            }
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn upsert_same_id_replaces() {
        let registry = ProcessRegistry::new();
        registry.upsert(descriptor("a", "core")).unwrap();
        let mut next = descriptor("a", "core");
        next.args = vec!["server".into()];
        registry.upsert(next).unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("a").unwrap().args, vec!["server".to_string()]);
    }

    #[test]
    fn remove_unknown_is_noop() {
        let registry = ProcessRegistry::new();
        registry.upsert(descriptor("a", "core")).unwrap();

        assert!(registry.remove("missing").is_none());
        assert!(registry.remove("a").is_some());
        assert!(registry.remove("a").is_none());
        assert!(registry.list().is_empty());
    }

    #[test]
    fn rekey_refuses_collisions() {
        let registry = ProcessRegistry::new();
        registry.upsert(descriptor("a", "one")).unwrap();
        registry.upsert(descriptor("b", "two")).unwrap();

        assert!(!registry.rekey("a", "b"));
        assert!(registry.rekey("a", "c"));
        assert_eq!(registry.find("one").unwrap().id, "c");
    }
}
