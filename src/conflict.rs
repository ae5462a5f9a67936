//! 冲突解析
//!
//! 把同一身份的记录跨插件归为一组，按插件顺序排列。分组在首次查询时才建立，
//! 修改身份、载入或卸载插件时只作废缓存，下一次查询再重建。

use crate::arena::Key;
use crate::store::Identity;
use std::cell::RefCell;
use std::collections::HashMap;

/// 冲突分组成员
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Member {
    pub plugin: Key,
    pub record: Key,
    /// 所在插件以扩展冲突模式载入
    pub extended: bool,
}

impl Member {
    pub fn is(&self, plugin: Key, record: Key) -> bool {
        self.plugin == plugin && self.record == record
    }
}

/// 建立分组所需的插件与记录查询
pub trait ConflictSource {
    /// 已载入的插件（按插件顺序）及其是否为扩展冲突模式
    fn plugins_in_order(&self) -> Vec<(Key, bool)>;

    /// 插件中具有该身份的记录
    fn find(&self, plugin: Key, identity: &Identity) -> Option<Key>;
}

/// 按身份缓存的冲突分组
#[derive(Debug, Default)]
pub struct ConflictResolver {
    groups: RefCell<HashMap<Identity, Vec<Member>>>,
}

impl ConflictResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// 身份对应的完整分组（含扩展冲突成员），按插件顺序升序
    pub fn group(&self, source: &dyn ConflictSource, identity: &Identity) -> Vec<Member> {
        if let Some(members) = self.groups.borrow().get(identity) {
            return members.clone();
        }

        let members: Vec<Member> = source
            .plugins_in_order()
            .into_iter()
            .filter_map(|(plugin, extended)| {
                source.find(plugin, identity).map(|record| Member { plugin, record, extended })
            })
            .collect();

        tracing::trace!("重建冲突分组 {}: {} 个成员", identity, members.len());
        self.groups.borrow_mut().insert(identity.clone(), members.clone());
        members
    }

    /// 作废单个身份的分组
    pub fn invalidate(&self, identity: &Identity) {
        self.groups.borrow_mut().remove(identity);
    }

    /// 作废全部分组
    pub fn clear(&self) {
        self.groups.borrow_mut().clear();
    }

    pub fn cached_groups(&self) -> usize {
        self.groups.borrow().len()
    }
}

/// 按查询模式筛选分组
///
/// 非扩展视图只包含非扩展冲突插件的成员；扩展视图包含全部成员。
pub fn view(members: &[Member], extended: bool) -> Vec<Member> {
    members
        .iter()
        .filter(|member| extended || !member.extended)
        .copied()
        .collect()
}

/// 视图中的胜出记录（插件顺序最靠后者）
pub fn winner(members: &[Member], extended: bool) -> Option<Member> {
    members.iter().rev().find(|member| extended || !member.extended).copied()
}

/// 记录是否为视图中的胜出记录
pub fn is_winning(members: &[Member], plugin: Key, record: Key, extended: bool) -> bool {
    winner(members, extended).is_some_and(|member| member.is(plugin, record))
}

/// 除自身以外的非扩展成员
pub fn history(members: &[Member], plugin: Key, record: Key) -> Vec<Member> {
    members
        .iter()
        .filter(|member| !member.extended && !member.is(plugin, record))
        .copied()
        .collect()
}

/// 排在记录之前、最近的非扩展成员（即记录的主文件版本）
pub fn previous(members: &[Member], plugin: Key, record: Key) -> Option<Member> {
    let position = members.iter().position(|member| member.is(plugin, record))?;
    members[..position].iter().rev().find(|member| !member.extended).copied()
}
