use crate::arena::Key;
use crate::utils::{name_key, EspError, Result};

/// 加载顺序最多容纳的插件数（索引 0xFF 保留给未激活的主文件）
pub const MAX_LOAD_ORDER: usize = 255;

#[derive(Debug, Clone)]
struct Slot {
    key: Key,
    name: String,
    name_key: String,
}

/// 加载顺序索引
///
/// 位于加载顺序中的插件按位置排列，位置即 FormID 高字节；
/// 不在加载顺序中的插件按添加顺序排在其后，只参与冲突排序。
#[derive(Debug, Clone, Default)]
pub struct LoadOrder {
    active: Vec<Slot>,
    inactive: Vec<Slot>,
}

impl LoadOrder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加插件
    pub fn push(&mut self, key: Key, name: &str, in_load_order: bool) -> Result<()> {
        if self.find_by_name(name).is_some() {
            return Err(EspError::DuplicateIdentifier(format!("插件已在集合中: {}", name)));
        }

        let slot = Slot { key, name: name.to_string(), name_key: name_key(name) };
        if in_load_order {
            if self.active.len() >= MAX_LOAD_ORDER {
                return Err(EspError::InvalidOperation(format!(
                    "加载顺序已满 ({} 个插件)，无法添加 {}", MAX_LOAD_ORDER, name
                )));
            }
            self.active.push(slot);
        } else {
            self.inactive.push(slot);
        }
        Ok(())
    }

    /// 加载顺序中的插件数量
    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// 插件在加载顺序中的位置
    pub fn index_of(&self, key: Key) -> Option<u8> {
        self.active.iter().position(|slot| slot.key == key).map(|i| i as u8)
    }

    /// 按名称查找加载顺序位置（不区分大小写）
    pub fn index_of_name(&self, name: &str) -> Option<u8> {
        let wanted = name_key(name);
        self.active.iter().position(|slot| slot.name_key == wanted).map(|i| i as u8)
    }

    /// 位于指定位置的插件
    pub fn plugin_at(&self, index: u8) -> Option<Key> {
        self.active.get(index as usize).map(|slot| slot.key)
    }

    /// 位于指定位置的插件名
    pub fn name_at(&self, index: u8) -> Option<&str> {
        self.active.get(index as usize).map(|slot| slot.name.as_str())
    }

    /// 按名称查找任意插件（包括不在加载顺序中的）
    pub fn find_by_name(&self, name: &str) -> Option<Key> {
        let wanted = name_key(name);
        self.active
            .iter()
            .chain(self.inactive.iter())
            .find(|slot| slot.name_key == wanted)
            .map(|slot| slot.key)
    }

    /// 冲突排序键：加载顺序中的插件在前，其余按添加顺序在后
    pub fn order_key(&self, key: Key) -> Option<usize> {
        if let Some(index) = self.active.iter().position(|slot| slot.key == key) {
            return Some(index);
        }
        self.inactive
            .iter()
            .position(|slot| slot.key == key)
            .map(|index| MAX_LOAD_ORDER + index)
    }

    /// 加载顺序中的插件
    pub fn keys(&self) -> impl Iterator<Item = Key> + '_ {
        self.active.iter().map(|slot| slot.key)
    }

    /// 全部插件（按冲突排序）
    pub fn all_keys(&self) -> impl Iterator<Item = Key> + '_ {
        self.active.iter().chain(self.inactive.iter()).map(|slot| slot.key)
    }

    pub fn clear(&mut self) {
        self.active.clear();
        self.inactive.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;

    fn keys(n: usize) -> Vec<Key> {
        let mut arena = Arena::new();
        (0..n).map(|i| arena.insert(i)).collect()
    }

    #[test]
    fn test_positions_and_names() {
        let k = keys(3);
        let mut order = LoadOrder::new();
        order.push(k[0], "Skyrim.esm", true).unwrap();
        order.push(k[1], "Scan.esp", false).unwrap();
        order.push(k[2], "Patch.esp", true).unwrap();

        assert_eq!(order.len(), 2);
        assert_eq!(order.index_of(k[2]), Some(1));
        assert_eq!(order.index_of(k[1]), None);
        assert_eq!(order.index_of_name("PATCH.ESP"), Some(1));
        assert_eq!(order.name_at(0), Some("Skyrim.esm"));
        assert_eq!(order.find_by_name("scan.esp"), Some(k[1]));
        assert!(order.order_key(k[1]).unwrap() > order.order_key(k[2]).unwrap());
        assert_eq!(order.all_keys().collect::<Vec<_>>(), vec![k[0], k[2], k[1]]);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let k = keys(2);
        let mut order = LoadOrder::new();
        order.push(k[0], "A.esp", true).unwrap();
        assert!(matches!(order.push(k[1], "a.ESP", false), Err(EspError::DuplicateIdentifier(_))));
    }

    #[test]
    fn test_load_order_limit() {
        let k = keys(MAX_LOAD_ORDER + 1);
        let mut order = LoadOrder::new();
        for (i, key) in k.iter().take(MAX_LOAD_ORDER).enumerate() {
            order.push(*key, &format!("{}.esp", i), true).unwrap();
        }
        let overflow = order.push(k[MAX_LOAD_ORDER], "Overflow.esp", true);
        assert!(matches!(overflow, Err(EspError::InvalidOperation(_))));
    }
}
