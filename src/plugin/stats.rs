use super::Plugin;
use crate::datatypes::RecordType;
use indexmap::IndexMap;

/// 插件统计信息
pub struct PluginStats {
    pub name: String,
    pub is_master: bool,
    pub is_localized: bool,
    pub is_loaded: bool,
    pub master_count: usize,
    pub record_count: usize,
    pub changed_count: usize,
    pub orphan_count: usize,
    pub empty_group_count: usize,
    /// 各类型记录数（按首次出现顺序）
    pub types: IndexMap<RecordType, usize>,
}

impl std::fmt::Display for PluginStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== 插件统计信息 ===")?;
        writeln!(f, "名称: {}", self.name)?;
        writeln!(f, "主文件: {}", if self.is_master { "是" } else { "否" })?;
        writeln!(f, "本地化: {}", if self.is_localized { "是" } else { "否" })?;
        writeln!(f, "已载入: {}", if self.is_loaded { "是" } else { "否" })?;
        writeln!(f, "依赖主文件数: {}", self.master_count)?;
        writeln!(f, "记录数量: {}", self.record_count)?;
        writeln!(f, "已修改记录: {}", self.changed_count)?;
        writeln!(f, "孤立记录: {}", self.orphan_count)?;
        writeln!(f, "空组数量: {}", self.empty_group_count)?;
        for (record_type, count) in &self.types {
            writeln!(f, "  {}: {}", record_type, count)?;
        }
        Ok(())
    }
}

impl Plugin {
    /// 获取统计信息
    pub fn stats(&self) -> PluginStats {
        let mut types: IndexMap<RecordType, usize> = IndexMap::new();
        let mut changed_count = 0;
        for (_, record) in self.store.iter() {
            *types.entry(record.record_type()).or_default() += 1;
            if record.is_changed() {
                changed_count += 1;
            }
        }

        PluginStats {
            name: self.name.clone(),
            is_master: self.is_master(),
            is_localized: self.is_localized(),
            is_loaded: self.loaded,
            master_count: self.header.masters.len(),
            record_count: self.store.len(),
            changed_count,
            orphan_count: self.store.orphans().len(),
            empty_group_count: self.empty_groups,
            types,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldTree;
    use crate::formid::FormId;
    use crate::game::Game;
    use crate::plugin::PluginFlags;
    use crate::store::Record;

    #[test]
    fn test_counts_by_type() {
        let mut plugin = Plugin::new("Test.esp".into(), "Test.esp".into(), PluginFlags::normal(), Game::Skyrim);
        for (index, kind) in [b"GLOB", b"MISC", b"GLOB"].iter().enumerate() {
            let record = Record::new(RecordType(**kind), FormId(0x800 + index as u32), None, FieldTree::new());
            plugin.store.insert(record).unwrap();
        }

        let stats = plugin.stats();
        assert_eq!(stats.record_count, 3);
        assert_eq!(stats.types.get(&RecordType(*b"GLOB")), Some(&2));
        assert!(!stats.is_master);
        assert!(stats.to_string().contains("GLOB: 2"));
    }
}
