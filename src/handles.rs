use crate::arena::Key;

/// 集合句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CollectionId(pub(crate) Key);

/// 插件句柄（所属集合 + 插件槽位）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PluginId {
    pub(crate) collection: CollectionId,
    pub(crate) key: Key,
}

impl PluginId {
    pub fn collection(self) -> CollectionId {
        self.collection
    }
}

/// 记录句柄（所属插件 + 记录槽位）
///
/// 记录被删除、卸载，或所属插件被卸载、集合被删除后，句柄失效。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId {
    pub(crate) plugin: PluginId,
    pub(crate) key: Key,
}

impl RecordId {
    pub fn plugin(self) -> PluginId {
        self.plugin
    }

    pub fn collection(self) -> CollectionId {
        self.plugin.collection
    }
}

impl std::fmt::Display for CollectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "collection#{}.{}", self.0.index(), self.0.generation())
    }
}

impl std::fmt::Display for PluginId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/plugin#{}.{}", self.collection, self.key.index(), self.key.generation())
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/record#{}.{}", self.plugin, self.key.index(), self.key.generation())
    }
}
