//! 集合注册表
//!
//! 替代进程级的"全部集合"状态：注册表持有自己创建的集合，
//! 不同注册表之间互不影响。

use crate::arena::Arena;
use crate::codec::{RecordCodec, SchemaCodec};
use crate::collection::{Collection, ProgressCallback, SaveFlags};
use crate::diagnostics::Diagnostics;
use crate::game::Game;
use crate::handles::{CollectionId, PluginId};
use crate::io::PluginIo;
use crate::utils::{EspError, Result};
use std::sync::Arc;

/// 集合注册表
#[derive(Debug, Default)]
pub struct Registry {
    collections: Arena<Collection>,
    diagnostics: Diagnostics,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 新建集合
    ///
    /// `codec` 为空时使用内置记录结构定义。
    pub fn create_collection(
        &mut self,
        game: Game,
        io: Arc<dyn PluginIo>,
        codec: Option<Arc<dyn RecordCodec>>,
    ) -> Result<CollectionId> {
        let codec = match codec {
            Some(codec) => codec,
            None => self.diagnostics.check("create_collection", SchemaCodec::for_game(game))?.shared(),
        };
        let diagnostics = self.diagnostics.clone();
        let key = self
            .collections
            .insert_with(|key| Collection::new(CollectionId(key), game, io, codec, diagnostics));

        tracing::debug!("创建 {} 集合 {}", game, CollectionId(key));
        Ok(CollectionId(key))
    }

    pub fn collection(&self, id: CollectionId) -> Result<&Collection> {
        self.collections
            .get(id.0)
            .ok_or_else(|| EspError::StaleHandle(format!("集合已删除: {}", id)))
    }

    pub fn collection_mut(&mut self, id: CollectionId) -> Result<&mut Collection> {
        self.collections
            .get_mut(id.0)
            .ok_or_else(|| EspError::StaleHandle(format!("集合已删除: {}", id)))
    }

    /// 删除集合，其下所有插件和记录句柄随之失效
    pub fn delete_collection(&mut self, id: CollectionId) -> Result<()> {
        let result = self
            .collections
            .remove(id.0)
            .map(|_| ())
            .ok_or_else(|| EspError::StaleHandle(format!("集合已删除: {}", id)));
        self.diagnostics.check("delete_collection", result)
    }

    /// 卸载所有集合中的全部插件
    pub fn unload_all(&mut self) {
        for (_, collection) in self.collections.iter_mut() {
            collection.unload();
        }
    }

    /// 删除全部集合
    pub fn delete_all(&mut self) {
        self.collections.clear();
    }

    /// 指定游戏的集合
    pub fn collections_of(&self, game: Game) -> Vec<CollectionId> {
        self.collections
            .iter()
            .filter(|(_, collection)| collection.game() == game)
            .map(|(key, _)| CollectionId(key))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }

    /// 保存插件；`CLOSE_COLLECTION` 时保存成功后删除所属集合
    pub fn save_plugin(
        &mut self,
        plugin: PluginId,
        destination: Option<&str>,
        flags: SaveFlags,
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<()> {
        let collection = plugin.collection();
        self.collection_mut(collection)?.save_plugin(plugin, destination, flags, progress)?;
        if flags.contains(SaveFlags::CLOSE_COLLECTION) {
            self.delete_collection(collection)?;
        }
        Ok(())
    }

    /// 注册日志回调（所有集合共用）
    pub fn set_log_sink(&self, sink: Option<Box<dyn Fn(&str) + Send>>) {
        self.diagnostics.set_log_sink(sink);
    }

    /// 注册跟踪回调（所有集合共用）
    pub fn set_trace_sink(&self, sink: Option<Box<dyn Fn(&str) + Send>>) {
        self.diagnostics.set_trace_sink(sink);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryIo;
    use crate::plugin::PluginFlags;

    fn memory() -> Arc<dyn PluginIo> {
        Arc::new(MemoryIo::new())
    }

    #[test]
    fn test_deleted_collection_handles_are_stale() {
        let mut registry = Registry::new();
        let id = registry.create_collection(Game::Skyrim, memory(), None).unwrap();
        let plugin = registry
            .collection_mut(id)
            .unwrap()
            .add_plugin("New.esp", PluginFlags::CREATE_NEW | PluginFlags::IN_LOAD_ORDER)
            .unwrap();

        registry.delete_collection(id).unwrap();
        assert!(matches!(registry.collection(id), Err(EspError::StaleHandle(_))));

        // 槽位复用后旧句柄仍然失效
        let reused = registry.create_collection(Game::Skyrim, memory(), None).unwrap();
        assert_ne!(reused, id);
        let collection = registry.collection(reused).unwrap();
        assert!(matches!(collection.plugin(plugin), Err(EspError::StaleHandle(_))));
    }

    #[test]
    fn test_collections_by_game() {
        let mut registry = Registry::new();
        registry.create_collection(Game::Oblivion, memory(), None).unwrap();
        let skyrim = registry.create_collection(Game::Skyrim, memory(), None).unwrap();

        assert_eq!(registry.collections_of(Game::Skyrim), vec![skyrim]);
        registry.delete_all();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_close_collection_after_save() {
        let mut registry = Registry::new();
        let io = Arc::new(MemoryIo::new());
        let id = registry.create_collection(Game::Skyrim, io.clone(), None).unwrap();
        let collection = registry.collection_mut(id).unwrap();
        let flags = PluginFlags::CREATE_NEW | PluginFlags::IN_LOAD_ORDER | PluginFlags::SAVEABLE;
        let plugin = collection.add_plugin("Out.esp", flags).unwrap();
        collection.load_plugin(plugin).unwrap();

        registry.save_plugin(plugin, None, SaveFlags::CLOSE_COLLECTION, None).unwrap();
        assert!(io.get("Out.esp").is_some());
        assert!(registry.collection(id).is_err());
    }
}
