//! 批量引用替换
//!
//! 在记录的字段树中查找 FormID 类字段（递归进入列表），把旧 FormID 改写为新 FormID。

use crate::field::FieldTree;
use crate::formid::FormId;
use crate::handles::{PluginId, RecordId};
use crate::utils::{EspError, Result};
use std::collections::HashMap;

/// 替换范围
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceScope {
    /// 单条记录
    Record(RecordId),
    /// 插件中的全部记录
    Plugin(PluginId),
}

/// 替换结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceUpdate {
    /// 每个旧 FormID 被替换的次数（与输入数组一一对应）
    pub changes: Vec<u32>,
    /// 替换总数
    pub total: u32,
}

/// 旧 -> 新 FormID 映射，附带旧值在输入数组中的位置
#[derive(Debug, Clone)]
pub struct ReferenceMap {
    targets: HashMap<FormId, (usize, FormId)>,
    len: usize,
}

impl ReferenceMap {
    /// 两个数组长度必须一致
    pub fn new(old: &[FormId], new: &[FormId]) -> Result<Self> {
        if old.len() != new.len() {
            return Err(EspError::InvalidArgument(format!(
                "旧 FormID 数量 ({}) 与新 FormID 数量 ({}) 不一致", old.len(), new.len()
            )));
        }

        let mut targets = HashMap::with_capacity(old.len());
        for (index, (from, to)) in old.iter().zip(new).enumerate() {
            // 重复的旧值以第一次出现为准
            targets.entry(*from).or_insert((index, *to));
        }
        Ok(ReferenceMap { targets, len: old.len() })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 字段树中是否有需要替换的 FormID
    pub fn touches(&self, fields: &FieldTree) -> bool {
        let mut found = false;
        fields.for_each_form_id(&mut |form_id| {
            if let Some((_, replacement)) = self.targets.get(&form_id) {
                found |= *replacement != form_id;
            }
        });
        found
    }

    /// 改写字段树，把各旧值的替换次数累加到 `changes`
    ///
    /// 旧值与新值相同的项不计为修改。返回本次替换总数。
    pub fn apply(&self, fields: &mut FieldTree, changes: &mut [u32]) -> u32 {
        let mut total = 0;
        fields.for_each_form_id_mut(&mut |form_id| {
            if let Some((index, replacement)) = self.targets.get(form_id) {
                if *replacement != *form_id {
                    *form_id = *replacement;
                    changes[*index] += 1;
                    total += 1;
                }
            }
        });
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldValue;
    use proptest::prelude::*;

    fn tree_with(ids: &[u32]) -> FieldTree {
        let mut tree = FieldTree::new();
        tree.insert(7, FieldValue::FormId(FormId(ids[0])));
        let elements = ids[1..]
            .iter()
            .map(|id| {
                let mut element = FieldTree::new();
                element.insert(1, FieldValue::FormId(FormId(*id)));
                element
            })
            .collect();
        tree.insert(9, FieldValue::List(elements));
        tree
    }

    #[test]
    fn test_length_mismatch() {
        let result = ReferenceMap::new(&[FormId(1)], &[]);
        assert!(matches!(result, Err(EspError::InvalidArgument(_))));
    }

    #[test]
    fn test_counts_per_old_id() {
        let map = ReferenceMap::new(&[FormId(1), FormId(2)], &[FormId(10), FormId(20)]).unwrap();
        let mut tree = tree_with(&[1, 1, 2, 3]);
        let mut changes = vec![0; map.len()];

        assert_eq!(map.apply(&mut tree, &mut changes), 3);
        assert_eq!(changes, vec![2, 1]);

        let Some(FieldValue::List(elements)) = tree.get(9) else { panic!("list") };
        assert_eq!(elements[2].get(1), Some(&FieldValue::FormId(FormId(3))));
    }

    #[test]
    fn test_identity_mapping_is_not_a_change() {
        let map = ReferenceMap::new(&[FormId(5)], &[FormId(5)]).unwrap();
        let mut tree = tree_with(&[5, 5]);
        let mut changes = vec![0];
        assert!(!map.touches(&tree));
        assert_eq!(map.apply(&mut tree, &mut changes), 0);
    }

    proptest! {
        #[test]
        fn second_run_changes_nothing(ids in prop::collection::vec(1u32..20, 1..12), shift in 20u32..40) {
            let old: Vec<FormId> = (1..10).map(FormId).collect();
            let new: Vec<FormId> = old.iter().map(|id| FormId(id.0 + shift)).collect();
            let map = ReferenceMap::new(&old, &new).unwrap();

            let mut tree = tree_with(&ids);
            let mut changes = vec![0; map.len()];
            map.apply(&mut tree, &mut changes);

            let mut again = vec![0; map.len()];
            prop_assert_eq!(map.apply(&mut tree, &mut again), 0);
            prop_assert!(again.iter().all(|count| *count == 0));
        }
    }
}
