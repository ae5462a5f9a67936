//! 插件集合
//!
//! [`Collection`] 持有加载顺序、各插件的记录存储和冲突分组缓存，
//! 是插件、记录与字段操作的统一入口。所有句柄都经过代数校验，
//! 插件卸载或记录删除后旧句柄返回 `StaleHandle`。

use crate::accessor::{self, FieldAttributes};
use crate::arena::{Arena, Key};
use crate::codec::RecordCodec;
use crate::conflict::{self, ConflictResolver, ConflictSource, Member};
use crate::datatypes::{RecordFlags, RecordType};
use crate::diagnostics::Diagnostics;
use crate::field::{
    FieldKind, FieldPath, FieldTree, FieldValue, FIELD_EDITOR_ID, FIELD_FLAGS, FIELD_FORM_ID,
    FIELD_FORM_VERSION, FIRST_SCHEMA_FIELD,
};
use crate::formid::{self, FormId, FormIdMapper, LongFormId, MgefCode, INVALID_MOD_INDEX};
use crate::game::Game;
use crate::handles::{CollectionId, PluginId, RecordId};
use crate::io::traits::strip_ghost;
use crate::io::PluginIo;
use crate::load_order::LoadOrder;
use crate::plugin::loader::{decode_records, parse_plugin, read_header};
use crate::plugin::writer::{write_plugin, OutputRecord};
use crate::plugin::{Plugin, PluginFlags, PluginHeader};
use crate::record::RawRecord;
use crate::references::{ReferenceMap, ReferenceScope, ReferenceUpdate};
use crate::store::{Identity, Record, RecordStore, UnloadedRecord};
use crate::utils::{name_key, EspError, Result};
use bitflags::bitflags;
use indexmap::IndexSet;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

bitflags! {
    /// 新建或复制记录的选项
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CreateFlags: u32 {
        /// 作为已有记录的覆盖版本创建（沿用其 FormID）
        const SET_AS_OVERRIDE = 0x0000_0001;
        /// 用胜出版本的数据初始化；复制时缺失的父记录也一并复制
        const COPY_WINNING_PARENT = 0x0000_0002;
    }
}

bitflags! {
    /// 保存选项
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SaveFlags: u32 {
        /// 移除未被引用的主文件
        const CLEAN_MASTERS = 0x0000_0001;
        /// 保存后删除集合（由注册表处理）
        const CLOSE_COLLECTION = 0x0000_0002;
    }
}

/// 进度信息
#[derive(Debug, Clone, Copy)]
pub struct Progress<'a> {
    pub position: usize,
    pub total: usize,
    pub name: &'a str,
}

/// 进度回调，返回值目前不起作用（不支持中途取消）
pub type ProgressCallback<'a> = &'a mut dyn FnMut(&Progress) -> bool;

fn report(progress: &mut Option<ProgressCallback<'_>>, position: usize, total: usize, name: &str) {
    if let Some(callback) = progress {
        callback(&Progress { position, total, name });
    }
}

/// 插件内的记录查找方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordLookup<'a> {
    FormId(FormId),
    EditorId(&'a str),
}

fn find_in_store(store: &RecordStore, identity: &Identity) -> Option<Key> {
    match identity {
        Identity::FormId(form_id) => store.find_form_id(*form_id),
        Identity::EditorId(editor_id) => store.find_editor_id(editor_id),
    }
}

/// 冲突分组的数据来源：只包含已载入的插件
struct Source<'a> {
    plugins: &'a Arena<Plugin>,
    load_order: &'a LoadOrder,
    game: Game,
}

impl ConflictSource for Source<'_> {
    fn plugins_in_order(&self) -> Vec<(Key, bool)> {
        self.load_order
            .all_keys()
            .filter_map(|key| {
                let plugin = self.plugins.get(key).filter(|plugin| plugin.loaded)?;
                Some((key, plugin.flags.contains(PluginFlags::EXTENDED_CONFLICTS)))
            })
            .collect()
    }

    fn find(&self, plugin: Key, identity: &Identity) -> Option<Key> {
        let store = &self.plugins.get(plugin)?.store;
        let key = find_in_store(store, identity)?;
        (store.get(key)?.identity(self.game) == *identity).then_some(key)
    }
}

/// 保存时待写出的记录（FormID 仍为集合相对形式）
struct SaveEntry {
    raw: RawRecord,
    editor_id: Option<String>,
    fields: FieldTree,
    parent: Option<FormId>,
}

/// 插件集合
pub struct Collection {
    id: CollectionId,
    game: Game,
    io: Arc<dyn PluginIo>,
    codec: Arc<dyn RecordCodec>,
    plugins: Arena<Plugin>,
    load_order: LoadOrder,
    conflicts: ConflictResolver,
    diagnostics: Diagnostics,
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("id", &self.id)
            .field("game", &self.game)
            .field("plugins", &self.plugins.len())
            .field("load_order", &self.load_order)
            .finish()
    }
}

impl Collection {
    pub(crate) fn new(
        id: CollectionId,
        game: Game,
        io: Arc<dyn PluginIo>,
        codec: Arc<dyn RecordCodec>,
        diagnostics: Diagnostics,
    ) -> Self {
        Collection {
            id,
            game,
            io,
            codec,
            plugins: Arena::new(),
            load_order: LoadOrder::new(),
            conflicts: ConflictResolver::new(),
            diagnostics,
        }
    }

    pub fn id(&self) -> CollectionId {
        self.id
    }

    pub fn game(&self) -> Game {
        self.game
    }

    pub fn codec(&self) -> &dyn RecordCodec {
        self.codec.as_ref()
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    // ---- 句柄解析 ----

    fn plugin_id(&self, key: Key) -> PluginId {
        PluginId { collection: self.id, key }
    }

    fn record_id(&self, plugin: Key, key: Key) -> RecordId {
        RecordId { plugin: self.plugin_id(plugin), key }
    }

    fn plugin_key(&self, plugin: PluginId) -> Result<Key> {
        if plugin.collection != self.id || !self.plugins.contains(plugin.key) {
            return Err(EspError::StaleHandle(format!("插件句柄已失效: {}", plugin)));
        }
        Ok(plugin.key)
    }

    /// 记录句柄 -> (插件键, 记录键)
    fn locate(&self, record: RecordId) -> Result<(Key, Key)> {
        let plugin = self.plugin_key(record.plugin)?;
        let exists = self.plugins.get(plugin).is_some_and(|p| p.store.contains(record.key));
        if !exists {
            return Err(EspError::StaleHandle(format!("记录句柄已失效: {}", record)));
        }
        Ok((plugin, record.key))
    }

    fn stale(record: RecordId) -> EspError {
        EspError::StaleHandle(format!("记录句柄已失效: {}", record))
    }

    pub fn plugin(&self, plugin: PluginId) -> Result<&Plugin> {
        let key = self.plugin_key(plugin)?;
        self.plugins.get(key).ok_or_else(|| EspError::StaleHandle(format!("{}", plugin)))
    }

    fn plugin_mut(&mut self, plugin: PluginId) -> Result<&mut Plugin> {
        let key = self.plugin_key(plugin)?;
        self.plugins.get_mut(key).ok_or_else(|| EspError::StaleHandle(format!("{}", plugin)))
    }

    pub fn record(&self, record: RecordId) -> Result<&Record> {
        let (plugin, key) = self.locate(record)?;
        self.plugins
            .get(plugin)
            .and_then(|p| p.store.get(key))
            .ok_or_else(|| Self::stale(record))
    }

    fn record_mut(&mut self, record: RecordId) -> Result<&mut Record> {
        let (plugin, key) = self.locate(record)?;
        self.plugins
            .get_mut(plugin)
            .and_then(|p| p.store.get_mut(key))
            .ok_or_else(|| Self::stale(record))
    }

    /// 可编辑的插件：已载入且位于加载顺序中
    fn editable_plugin(&self, plugin: PluginId) -> Result<(Key, u8)> {
        let key = self.plugin_key(plugin)?;
        let loaded = self.plugins.get(key).is_some_and(|p| p.loaded);
        if !loaded {
            return Err(EspError::InvalidOperation(format!("插件未载入: {}", plugin)));
        }
        let index = self.load_order.index_of(key).ok_or_else(|| {
            EspError::InvalidOperation(format!("插件不在加载顺序中，不能创建记录: {}", plugin))
        })?;
        Ok((key, index))
    }

    // ---- 插件生命周期 ----

    /// 把插件加入集合（不载入记录）
    ///
    /// 名称中的 `.ghost` 后缀会被去掉，磁盘上的幽灵化文件照常可用。
    /// 设置了 `ADD_MASTERS` 时，缺失的主文件按依赖顺序先于插件加入。
    pub fn add_plugin(&mut self, name: &str, flags: PluginFlags) -> Result<PluginId> {
        let result = self.add_plugin_inner(name, flags, &mut Vec::new());
        self.diagnostics.check("add_plugin", result)
    }

    fn add_plugin_inner(&mut self, name: &str, flags: PluginFlags, visiting: &mut Vec<String>) -> Result<PluginId> {
        let flags = flags.normalized();
        let name = strip_ghost(name).to_string();
        if self.load_order.find_by_name(&name).is_some() {
            return Err(EspError::DuplicateIdentifier(format!("插件已在集合中: {}", name)));
        }

        let file_name = if flags.contains(PluginFlags::CREATE_NEW) {
            name.clone()
        } else {
            self.io
                .resolve_file_name(&name)
                .ok_or_else(|| EspError::NotFound(format!("插件文件不存在: {}", name)))?
        };

        if flags.contains(PluginFlags::ADD_MASTERS) && !flags.contains(PluginFlags::CREATE_NEW) {
            visiting.push(name_key(&name));
            self.add_missing_masters(&file_name, flags, visiting)?;
        }

        let key = self.plugins.insert(Plugin::new(name.clone(), file_name, flags, self.game));
        if let Err(error) = self.load_order.push(key, &name, flags.contains(PluginFlags::IN_LOAD_ORDER)) {
            self.plugins.remove(key);
            return Err(error);
        }
        self.conflicts.clear();

        tracing::debug!("加入插件 {} ({:?})", name, flags);
        Ok(self.plugin_id(key))
    }

    fn add_missing_masters(&mut self, file_name: &str, flags: PluginFlags, visiting: &mut Vec<String>) -> Result<()> {
        let bytes = self.io.read(file_name)?;
        let header = PluginHeader::parse(&read_header(&bytes, self.game)?, self.game)?;

        let master_flags = if flags.contains(PluginFlags::LOAD_MASTERS) {
            (flags - PluginFlags::CREATE_NEW) | PluginFlags::IN_LOAD_ORDER
        } else {
            PluginFlags::MIN_LOAD | PluginFlags::IN_LOAD_ORDER
        };

        for master in &header.masters {
            if self.load_order.find_by_name(master).is_some() || visiting.contains(&name_key(master)) {
                continue;
            }
            if self.io.resolve_file_name(master).is_none() {
                self.diagnostics.log(&format!("{} 的主文件 {} 不存在，已跳过", file_name, master));
                continue;
            }
            self.add_plugin_inner(master, master_flags, visiting)?;
        }
        Ok(())
    }

    /// 载入插件的记录
    pub fn load_plugin(&mut self, plugin: PluginId) -> Result<()> {
        let result = self.plugin_key(plugin).and_then(|key| self.load_plugin_inner(key));
        self.diagnostics.check("load_plugin", result)
    }

    fn load_plugin_inner(&mut self, key: Key) -> Result<()> {
        let (name, file_name, flags) = match self.plugins.get(key) {
            Some(plugin) if plugin.loaded => return Ok(()),
            Some(plugin) => (plugin.name.clone(), plugin.file_name.clone(), plugin.flags),
            None => return Err(EspError::StaleHandle(format!("插件槽位 {:?}", key))),
        };

        // 沿用原有存储，卸载前的记录句柄保持失效
        let mut store = match self.plugins.get_mut(key) {
            Some(plugin) => std::mem::take(&mut plugin.store),
            None => RecordStore::new(),
        };
        let result = self.read_plugin(&name, &file_name, flags, &mut store);
        if result.is_err() {
            store.clear();
        }

        let plugin = self
            .plugins
            .get_mut(key)
            .ok_or_else(|| EspError::StaleHandle(format!("插件槽位 {:?}", key)))?;
        plugin.store = store;
        self.conflicts.clear();

        let (header, empty_groups) = result?;
        plugin.header = header;
        plugin.empty_groups = empty_groups;
        plugin.loaded = true;
        tracing::info!("载入 {}: {} 条记录", name, plugin.store.len());
        Ok(())
    }

    /// 读取插件文件，把记录放入 `store`；返回头部和空组数量
    fn read_plugin(
        &self,
        name: &str,
        file_name: &str,
        flags: PluginFlags,
        store: &mut RecordStore,
    ) -> Result<(PluginHeader, usize)> {
        let game = self.game;
        if flags.contains(PluginFlags::CREATE_NEW) {
            let mut header = PluginHeader::new(game);
            if name.to_ascii_lowercase().ends_with(".esm") {
                header.flags |= RecordFlags::MASTER_FILE;
            }
            return Ok((header, 0));
        }

        let bytes = self.io.read(file_name)?;
        if flags.header_only() {
            let header = PluginHeader::parse(&read_header(&bytes, game)?, game)?;
            return Ok((header, 0));
        }

        let parsed = parse_plugin(&bytes, game)?;
        let header = PluginHeader::parse(&parsed.header, game)?;
        let decoded = decode_records(self.codec.as_ref(), &parsed.records)?;

        let mapper = FormIdMapper::expanding(&header.masters, name, &self.load_order);
        let own_file_index = header.masters.len();
        let mut seen_types = HashSet::new();

        for (placed, decoded) in parsed.records.into_iter().zip(decoded) {
            let raw = placed.record;
            let is_new = FormId(raw.form_id).mod_index() as usize >= own_file_index;
            if is_new && flags.contains(PluginFlags::SKIP_NEW_RECORDS) {
                continue;
            }

            let form_id = mapper.map(FormId(raw.form_id));
            let inactive_master = !is_new && form_id.mod_index() == INVALID_MOD_INDEX;
            if inactive_master && flags.contains(PluginFlags::IGNORE_INACTIVE_MASTERS) {
                continue;
            }
            if flags.contains(PluginFlags::SKIP_ALL_RECORDS) && !seen_types.insert(raw.record_type) {
                continue;
            }

            let parent = match placed.parent {
                Some(parent) => match store.find_form_id(mapper.map(FormId(parent))) {
                    Some(parent) => Some(parent),
                    None => {
                        store.add_orphan(form_id);
                        continue;
                    }
                },
                None => None,
            };

            let mut fields = decoded.fields;
            let mut invalid = !form_id.is_null() && form_id.mod_index() == INVALID_MOD_INDEX;
            fields.for_each_form_id_mut(&mut |reference| {
                *reference = mapper.map(*reference);
                invalid |= !reference.is_null() && reference.mod_index() == INVALID_MOD_INDEX;
            });

            let mut record = Record::new(raw.record_type, form_id, decoded.editor_id, fields);
            record.flags = raw.flags;
            record.version_control = raw.version_control;
            record.form_version = raw.form_version;
            record.unknown = raw.unknown;
            record.parent = parent;
            record.invalid_formids = invalid;

            match store.insert_loaded(record) {
                Ok(_) => {}
                Err(EspError::DuplicateIdentifier(message)) => {
                    tracing::warn!("{}: 跳过重复记录 ({})", name, message);
                }
                Err(error) => return Err(error),
            }
        }

        if !store.orphans().is_empty() {
            self.diagnostics.log(&format!("{}: {} 条记录缺少父记录", name, store.orphans().len()));
        }
        Ok((header, parsed.empty_groups))
    }

    /// 卸载插件的全部记录，保留插件句柄、标志和加载顺序位置
    pub fn unload_plugin(&mut self, plugin: PluginId) -> Result<()> {
        let result = self.plugin_mut(plugin).map(|plugin| {
            plugin.store.clear();
            plugin.empty_groups = 0;
            plugin.loaded = false;
        });
        self.conflicts.clear();
        self.diagnostics.check("unload_plugin", result)
    }

    /// 按冲突排序载入全部尚未载入的插件
    pub fn load(&mut self, mut progress: Option<ProgressCallback<'_>>) -> Result<()> {
        let keys: Vec<Key> = self.load_order.all_keys().collect();
        let total = keys.len();
        for (position, key) in keys.into_iter().enumerate() {
            if let Some(plugin) = self.plugins.get(key) {
                report(&mut progress, position, total, &plugin.name);
            }
            let result = self.load_plugin_inner(key);
            self.diagnostics.check("load", result)?;
        }
        Ok(())
    }

    /// 卸载全部插件
    pub fn unload(&mut self) {
        for (_, plugin) in self.plugins.iter_mut() {
            plugin.store.clear();
            plugin.empty_groups = 0;
            plugin.loaded = false;
        }
        self.conflicts.clear();
    }

    /// 保存插件
    ///
    /// `destination` 为空时写回插件自身的文件。被记录引用、但不在主文件列表中的插件
    /// 会自动加入主文件列表；`CLEAN_MASTERS` 同时移除未被引用的主文件。
    pub fn save_plugin(
        &mut self,
        plugin: PluginId,
        destination: Option<&str>,
        flags: SaveFlags,
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<()> {
        let result = self.save_plugin_inner(plugin, destination, flags, progress);
        self.diagnostics.check("save_plugin", result)
    }

    fn save_plugin_inner(
        &mut self,
        plugin: PluginId,
        destination: Option<&str>,
        flags: SaveFlags,
        mut progress: Option<ProgressCallback<'_>>,
    ) -> Result<()> {
        let key = self.plugin_key(plugin)?;
        let entries = self.save_entries(key)?;
        let masters = self.masters_for_save(key, &entries, flags.contains(SaveFlags::CLEAN_MASTERS))?;

        let source = self.plugins.get(key).ok_or_else(|| EspError::StaleHandle(format!("{}", plugin)))?;
        let mapper = FormIdMapper::collapsing(&masters, &source.name, &self.load_order);
        let target = destination.unwrap_or(&source.file_name).to_string();
        let mut header = source.header.clone();
        header.masters = masters;

        let total = entries.len();
        let mut output = Vec::with_capacity(total);
        for (position, entry) in entries.into_iter().enumerate() {
            let SaveEntry { mut raw, editor_id, mut fields, parent } = entry;
            fields.for_each_form_id_mut(&mut |reference| *reference = mapper.map(*reference));
            raw.form_id = mapper.map(FormId(raw.form_id)).0;
            raw.set_data(self.codec.encode(raw.record_type, editor_id.as_deref(), &fields)?);
            report(&mut progress, position, total, &source.name);
            output.push(OutputRecord { raw, parent: parent.map(|parent| mapper.map(parent).0) });
        }

        let game = self.game;
        let written = write_plugin(
            |count| {
                let mut header = header.clone();
                header.record_count = count;
                header.to_raw()
            },
            &output,
            game,
        )?;
        self.io.write(&target, &written.bytes)?;
        self.diagnostics.log(&format!("已保存 {} ({} 条记录)", target, output.len()));

        if let Some(plugin) = self.plugins.get_mut(key) {
            header.record_count = written.record_count;
            plugin.header = header;
        }
        Ok(())
    }

    /// 收集插件的全部记录（已载入的和已卸载的），检查保存前提
    fn save_entries(&self, key: Key) -> Result<Vec<SaveEntry>> {
        let plugin = self.plugins.get(key).ok_or_else(|| EspError::StaleHandle(format!("插件槽位 {:?}", key)))?;
        if !plugin.flags.contains(PluginFlags::SAVEABLE) {
            return Err(EspError::InvalidOperation(format!("插件未标记为可保存: {}", plugin.name)));
        }
        if !plugin.loaded {
            return Err(EspError::InvalidOperation(format!("插件未载入: {}", plugin.name)));
        }
        if plugin.flags.header_only() && !plugin.flags.contains(PluginFlags::CREATE_NEW) {
            return Err(EspError::InvalidOperation(format!("插件只载入了头部，不能保存: {}", plugin.name)));
        }

        let store = &plugin.store;
        let mut entries = Vec::with_capacity(store.len());
        for (_, record) in store.iter() {
            if record.invalid_formids {
                return Err(EspError::InvalidOperation(format!(
                    "{}: 记录 {} 引用了未激活的主文件", plugin.name, record.form_id
                )));
            }
            let parent = record.parent.and_then(|parent| store.get(parent)).map(|parent| parent.form_id);
            entries.push(SaveEntry {
                raw: record.to_raw(record.form_id.0, Vec::new()),
                editor_id: record.editor_id.clone(),
                fields: record.fields.clone(),
                parent,
            });
        }
        for unloaded in store.unloaded() {
            if unloaded.invalid_formids {
                return Err(EspError::InvalidOperation(format!(
                    "{}: 记录 {:08X} 引用了未激活的主文件", plugin.name, unloaded.raw.form_id
                )));
            }
            let decoded = self.codec.decode(unloaded.raw.record_type, &unloaded.raw.data)?;
            entries.push(SaveEntry {
                raw: unloaded.raw.clone(),
                editor_id: decoded.editor_id,
                fields: decoded.fields,
                parent: unloaded.parent,
            });
        }
        Ok(entries)
    }

    /// 记录引用到的其他插件在加载顺序中的位置
    fn referenced_indices(entries: &[SaveEntry]) -> BTreeSet<u8> {
        let mut indices = BTreeSet::new();
        for entry in entries {
            let mut visit = |form_id: FormId| {
                if !form_id.is_null() {
                    indices.insert(form_id.mod_index());
                }
            };
            visit(FormId(entry.raw.form_id));
            entry.fields.for_each_form_id(&mut visit);
        }
        indices
    }

    /// 保存时使用的主文件列表
    fn masters_for_save(&self, key: Key, entries: &[SaveEntry], clean: bool) -> Result<Vec<String>> {
        let plugin = self.plugins.get(key).ok_or_else(|| EspError::StaleHandle(format!("插件槽位 {:?}", key)))?;
        let own_index = self.load_order.index_of(key);

        let mut referenced: IndexSet<String> = IndexSet::new();
        for index in Self::referenced_indices(entries) {
            if Some(index) == own_index {
                continue;
            }
            let name = self.load_order.name_at(index).ok_or_else(|| {
                EspError::InvalidReference(format!("{}: 插件索引 {:02X} 不在加载顺序中", plugin.name, index))
            })?;
            referenced.insert(name.to_string());
        }

        let referenced_keys: HashSet<String> = referenced.iter().map(|name| name_key(name)).collect();
        let mut masters: Vec<String> = plugin
            .header
            .masters
            .iter()
            .filter(|master| !clean || referenced_keys.contains(&name_key(master)))
            .cloned()
            .collect();
        for name in referenced {
            if !masters.iter().any(|master| name_key(master) == name_key(&name)) {
                tracing::debug!("{}: 加入主文件 {}", plugin.name, name);
                masters.push(name);
            }
        }
        Ok(masters)
    }

    /// 从主文件列表中移除未被引用的主文件，返回移除数量
    pub fn clean_masters(&mut self, plugin: PluginId) -> Result<usize> {
        let result = self.clean_masters_inner(plugin);
        self.diagnostics.check("clean_masters", result)
    }

    fn clean_masters_inner(&mut self, plugin: PluginId) -> Result<usize> {
        let (key, _) = self.editable_plugin(plugin)?;
        let entries = self.save_entries(key)?;
        let referenced: HashSet<String> = Self::referenced_indices(&entries)
            .into_iter()
            .filter_map(|index| self.load_order.name_at(index).map(name_key))
            .collect();

        let plugin = self.plugin_mut(plugin)?;
        let before = plugin.header.masters.len();
        plugin.header.masters.retain(|master| referenced.contains(&name_key(master)));
        let removed = before - plugin.header.masters.len();
        if removed > 0 {
            tracing::info!("{}: 移除 {} 个未引用的主文件", plugin.name, removed);
        }
        Ok(removed)
    }

    // ---- 插件枚举 ----

    /// 全部插件（加载顺序中的插件在前，其余按加入顺序）
    pub fn plugins(&self) -> Vec<PluginId> {
        self.load_order.all_keys().map(|key| self.plugin_id(key)).collect()
    }

    /// 加载顺序中的插件
    pub fn load_order(&self) -> Vec<PluginId> {
        self.load_order.keys().map(|key| self.plugin_id(key)).collect()
    }

    pub fn plugin_by_name(&self, name: &str) -> Result<PluginId> {
        self.load_order
            .find_by_name(strip_ghost(name))
            .map(|key| self.plugin_id(key))
            .ok_or_else(|| EspError::NotFound(format!("集合中没有插件 {}", name)))
    }

    pub fn plugin_by_load_order(&self, index: u8) -> Result<PluginId> {
        self.load_order
            .plugin_at(index)
            .map(|key| self.plugin_id(key))
            .ok_or_else(|| EspError::NotFound(format!("加载顺序位置 {} 没有插件", index)))
    }

    /// 插件在加载顺序中的位置（不在加载顺序中时为 `None`）
    pub fn load_order_position(&self, plugin: PluginId) -> Result<Option<u8>> {
        let key = self.plugin_key(plugin)?;
        Ok(self.load_order.index_of(key))
    }

    /// 磁盘上的文件名（可能带 `.ghost` 后缀）
    pub fn file_name(&self, plugin: PluginId) -> Result<&str> {
        Ok(self.plugin(plugin)?.file_name())
    }

    pub fn plugin_name(&self, plugin: PluginId) -> Result<&str> {
        Ok(self.plugin(plugin)?.name())
    }

    pub fn masters(&self, plugin: PluginId) -> Result<&[String]> {
        Ok(self.plugin(plugin)?.masters())
    }

    pub fn header(&self, plugin: PluginId) -> Result<&PluginHeader> {
        Ok(self.plugin(plugin)?.header())
    }

    // ---- FormID 转换 ----

    /// 短格式转长格式
    ///
    /// `is_mgef` 为真时 `form_id` 是魔法效果代码，按编辑器 ID 在已载入插件中查找定义者，
    /// 加载顺序靠后的插件优先。
    pub fn to_long_form(&self, record: RecordId, form_id: FormId, is_mgef: bool) -> Result<LongFormId> {
        let result = self.locate(record).and_then(|_| {
            if !is_mgef {
                return formid::to_long_form(&self.load_order, form_id);
            }
            let code = MgefCode::from_u32(form_id.0).as_string();
            self.load_order
                .all_keys()
                .filter_map(|key| self.plugins.get(key))
                .filter(|plugin| {
                    plugin.store.find_editor_id(&code).and_then(|key| plugin.store.get(key))
                        .is_some_and(|record| record.record_type == RecordType::MGEF)
                })
                .last()
                .map(|plugin| LongFormId { plugin: plugin.name.clone(), object_id: form_id.0 })
                .ok_or_else(|| EspError::InvalidReference(format!("没有插件定义魔法效果 {}", code)))
        });
        self.diagnostics.check("to_long_form", result)
    }

    /// 长格式转短格式；魔法效果代码原样返回
    pub fn to_short_form(&self, plugin: PluginId, object_id: u32, is_mgef: bool) -> Result<FormId> {
        let result = self.plugin(plugin).and_then(|plugin| {
            if is_mgef {
                Ok(FormId(object_id))
            } else {
                formid::to_short_form(&self.load_order, &plugin.name, object_id)
            }
        });
        self.diagnostics.check("to_short_form", result)
    }

    // ---- 记录生命周期 ----

    /// 新建记录
    ///
    /// `form_id` 为空时分配插件的下一个对象 ID。`SET_AS_OVERRIDE` 时 `form_id`
    /// 必须指向已存在的记录，新记录成为它的覆盖版本；再加上 `COPY_WINNING_PARENT`
    /// 则复制胜出版本的字段。
    pub fn create_record(
        &mut self,
        plugin: PluginId,
        record_type: RecordType,
        form_id: FormId,
        editor_id: Option<&str>,
        parent: Option<RecordId>,
        flags: CreateFlags,
    ) -> Result<RecordId> {
        let result = self.create_record_inner(plugin, record_type, form_id, editor_id, parent, flags);
        self.diagnostics.check("create_record", result)
    }

    fn create_record_inner(
        &mut self,
        plugin: PluginId,
        record_type: RecordType,
        form_id: FormId,
        editor_id: Option<&str>,
        parent: Option<RecordId>,
        flags: CreateFlags,
    ) -> Result<RecordId> {
        let (key, own_index) = self.editable_plugin(plugin)?;
        let parent = self.parent_in(key, parent)?;

        let mut fields = self.codec.default_fields(record_type);
        let mut editor_id = editor_id.map(str::to_string);
        let mut form_id = form_id;

        if flags.contains(CreateFlags::SET_AS_OVERRIDE) {
            if form_id.is_null() {
                return Err(EspError::InvalidArgument("覆盖记录需要指定 FormID".into()));
            }
            let winner = self
                .winner(&Identity::FormId(form_id), false)
                .ok_or_else(|| EspError::NotFound(format!("没有可覆盖的记录 {}", form_id)))?;
            let source = self.record(winner)?;
            if source.record_type != record_type {
                return Err(EspError::InvalidArgument(format!(
                    "记录 {} 的类型是 {}，不是 {}", form_id, source.record_type, record_type
                )));
            }
            if flags.contains(CreateFlags::COPY_WINNING_PARENT) {
                fields = source.fields.clone();
                if editor_id.is_none() {
                    editor_id = source.editor_id.clone();
                }
            }
        } else if form_id.is_null() {
            let plugin = self.plugin_mut(plugin)?;
            form_id = FormId::new(own_index, plugin.header.allocate_object_id());
        }

        let mut record = Record::new(record_type, form_id, editor_id, fields);
        record.parent = parent;
        self.insert_created(key, record)
    }

    fn insert_created(&mut self, plugin: Key, mut record: Record) -> Result<RecordId> {
        record.mark_created();
        let identity = record.identity(self.game);
        let store = &mut self
            .plugins
            .get_mut(plugin)
            .ok_or_else(|| EspError::StaleHandle(format!("插件槽位 {:?}", plugin)))?
            .store;
        let key = store.insert(record)?;
        self.conflicts.invalidate(&identity);
        Ok(self.record_id(plugin, key))
    }

    /// 父记录必须属于目标插件
    fn parent_in(&self, plugin: Key, parent: Option<RecordId>) -> Result<Option<Key>> {
        let Some(parent) = parent else { return Ok(None) };
        let (parent_plugin, key) = self.locate(parent)?;
        if parent_plugin != plugin {
            return Err(EspError::InvalidArgument(format!("父记录 {} 不属于目标插件", parent)));
        }
        Ok(Some(key))
    }

    /// 把记录复制到另一个插件
    ///
    /// `SET_AS_OVERRIDE` 时沿用源记录的 FormID（或 `dest_form_id`），否则作为新记录复制。
    /// 源记录有父记录而目标插件中没有对应版本时，`COPY_WINNING_PARENT` 会先复制父记录的胜出版本。
    pub fn copy_record(
        &mut self,
        source: RecordId,
        dest: PluginId,
        dest_parent: Option<RecordId>,
        dest_form_id: Option<FormId>,
        dest_editor_id: Option<&str>,
        flags: CreateFlags,
    ) -> Result<RecordId> {
        let result = self.copy_record_inner(source, dest, dest_parent, dest_form_id, dest_editor_id, flags);
        self.diagnostics.check("copy_record", result)
    }

    fn copy_record_inner(
        &mut self,
        source: RecordId,
        dest: PluginId,
        dest_parent: Option<RecordId>,
        dest_form_id: Option<FormId>,
        dest_editor_id: Option<&str>,
        flags: CreateFlags,
    ) -> Result<RecordId> {
        let (dest_key, own_index) = self.editable_plugin(dest)?;
        let (source_plugin, source_key) = self.locate(source)?;
        let template = self.record(source)?.clone();

        let parent = match dest_parent {
            Some(_) => self.parent_in(dest_key, dest_parent)?,
            None => match template.parent {
                Some(parent) => Some(self.ensure_parent(source_plugin, parent, dest_key, flags)?),
                None => None,
            },
        };

        let form_id = match dest_form_id {
            Some(form_id) if !form_id.is_null() => form_id,
            _ if flags.contains(CreateFlags::SET_AS_OVERRIDE) => template.form_id,
            _ => {
                let plugin = self.plugin_mut(dest)?;
                FormId::new(own_index, plugin.header.allocate_object_id())
            }
        };
        let editor_id = dest_editor_id.map(str::to_string).or_else(|| template.editor_id.clone());

        let mut record = Record::new(template.record_type, form_id, editor_id, template.fields);
        record.flags = template.flags;
        record.version_control = template.version_control;
        record.form_version = template.form_version;
        record.unknown = template.unknown;
        record.parent = parent;

        tracing::debug!("复制记录 {} -> {}", source_key.index(), form_id);
        self.insert_created(dest_key, record)
    }

    /// 在目标插件中找到父记录的对应版本，必要时复制胜出版本
    fn ensure_parent(&mut self, source_plugin: Key, parent: Key, dest: Key, flags: CreateFlags) -> Result<Key> {
        let identity = self
            .plugins
            .get(source_plugin)
            .and_then(|plugin| plugin.store.get(parent))
            .map(|record| record.identity(self.game))
            .ok_or_else(|| EspError::StaleHandle(format!("父记录 {:?} 不存在", parent)))?;

        if let Some(existing) = self.plugins.get(dest).and_then(|plugin| find_in_store(&plugin.store, &identity)) {
            return Ok(existing);
        }
        if !flags.contains(CreateFlags::COPY_WINNING_PARENT) {
            return Err(EspError::InvalidArgument(format!("目标插件中没有父记录 {}", identity)));
        }

        let winner = self
            .winner(&identity, false)
            .ok_or_else(|| EspError::NotFound(format!("父记录 {} 没有胜出版本", identity)))?;
        let dest_id = self.plugin_id(dest);
        let copied = self.copy_record_inner(
            winner,
            dest_id,
            None,
            None,
            None,
            CreateFlags::SET_AS_OVERRIDE | CreateFlags::COPY_WINNING_PARENT,
        )?;
        Ok(copied.key)
    }

    /// 从内存中卸载未修改的记录（连同其子记录），保存时仍会写出
    pub fn unload_record(&mut self, record: RecordId) -> Result<()> {
        let result = self.unload_record_inner(record);
        self.diagnostics.check("unload_record", result)
    }

    fn unload_record_inner(&mut self, record: RecordId) -> Result<()> {
        let (plugin_key, key) = self.locate(record)?;
        let game = self.game;
        let plugin = self.plugins.get(plugin_key).ok_or_else(|| Self::stale(record))?;
        let store = &plugin.store;

        let mut keys = store.descendants(key);
        keys.push(key);

        let mut unloaded = Vec::with_capacity(keys.len());
        for key in &keys {
            let current = store.get(*key).ok_or_else(|| Self::stale(record))?;
            if current.changed {
                return Err(EspError::InvalidOperation(format!(
                    "记录 {} 有未保存的修改，需先撤销", current.form_id
                )));
            }
            let data = self.codec.encode(current.record_type, current.editor_id.as_deref(), &current.fields)?;
            let parent = current.parent.and_then(|parent| store.get(parent)).map(|parent| parent.form_id);
            unloaded.push((*key, current.identity(game), UnloadedRecord {
                raw: current.to_raw(current.form_id.0, data),
                parent,
                invalid_formids: current.invalid_formids,
            }));
        }

        let store = &mut self.plugins.get_mut(plugin_key).ok_or_else(|| Self::stale(record))?.store;
        for (key, identity, raw) in unloaded {
            store.unload(key, raw);
            self.conflicts.invalidate(&identity);
        }
        Ok(())
    }

    /// 撤销记录的全部修改
    pub fn reset_record(&mut self, record: RecordId) -> Result<()> {
        let result = self.reset_record_inner(record);
        self.diagnostics.check("reset_record", result)
    }

    fn reset_record_inner(&mut self, record: RecordId) -> Result<()> {
        let (plugin_key, key) = self.locate(record)?;
        let game = self.game;
        let store = &mut self.plugins.get_mut(plugin_key).ok_or_else(|| Self::stale(record))?.store;
        let current = store.get(key).ok_or_else(|| Self::stale(record))?;
        if !current.can_reset() {
            return Err(EspError::InvalidOperation(format!("记录 {} 没有可撤销的修改", current.form_id)));
        }
        // 改名后原身份可能已被其他记录占用
        if let Some((form_id, editor_id)) = current.snapshot_identity() {
            store.check_identity(form_id, editor_id, Some(key))?;
        }

        let current = store.get_mut(key).ok_or_else(|| Self::stale(record))?;
        let before = current.identity(game);
        let (old_form_id, old_editor_id) = (current.form_id, current.editor_id.clone());
        current.reset()?;
        let after = current.identity(game);
        store.reindex(key, old_form_id, old_editor_id.as_deref());

        self.conflicts.invalidate(&before);
        self.conflicts.invalidate(&after);
        Ok(())
    }

    /// 删除记录及其全部子记录
    pub fn delete_record(&mut self, record: RecordId) -> Result<()> {
        let result = self.delete_record_inner(record);
        self.diagnostics.check("delete_record", result)
    }

    fn delete_record_inner(&mut self, record: RecordId) -> Result<()> {
        let (plugin_key, key) = self.locate(record)?;
        let game = self.game;
        let store = &mut self.plugins.get_mut(plugin_key).ok_or_else(|| Self::stale(record))?.store;

        let mut keys = store.descendants(key);
        keys.push(key);
        let mut deleted = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(removed) = store.remove(key) {
                self.conflicts.invalidate(&removed.identity(game));
                deleted.push(removed.form_id);
            }
        }
        // 已卸载的子记录随父记录一起删除
        let detached = store.remove_unloaded_descendants(deleted);
        if detached > 0 {
            tracing::debug!("删除记录时一并移除 {} 条已卸载的子记录", detached);
        }
        Ok(())
    }

    /// 修改记录的 FormID 和编辑器 ID
    pub fn set_id_fields(&mut self, record: RecordId, form_id: FormId, editor_id: Option<&str>) -> Result<()> {
        let result = self.set_id_fields_inner(record, form_id, editor_id.map(str::to_string));
        self.diagnostics.check("set_id_fields", result)
    }

    fn set_id_fields_inner(&mut self, record: RecordId, form_id: FormId, editor_id: Option<String>) -> Result<()> {
        if form_id.is_null() {
            return Err(EspError::InvalidArgument("FormID 不能为空".into()));
        }
        let (plugin_key, key) = self.locate(record)?;
        let game = self.game;
        let store = &mut self.plugins.get_mut(plugin_key).ok_or_else(|| Self::stale(record))?.store;

        let before = store.get(key).ok_or_else(|| Self::stale(record))?.identity(game);
        store.set_identity(key, form_id, editor_id)?;
        let after = store.get(key).ok_or_else(|| Self::stale(record))?.identity(game);

        self.conflicts.invalidate(&before);
        self.conflicts.invalidate(&after);
        Ok(())
    }

    // ---- 记录查询 ----

    /// 在插件中按 FormID 或编辑器 ID 查找记录
    pub fn find_record(&self, plugin: PluginId, lookup: RecordLookup<'_>) -> Result<RecordId> {
        let key = self.plugin_key(plugin)?;
        let store = &self.plugin(plugin)?.store;
        let found = match lookup {
            RecordLookup::FormId(form_id) => store.find_form_id(form_id),
            RecordLookup::EditorId(editor_id) => store.find_editor_id(editor_id),
        };
        found
            .map(|record| self.record_id(key, record))
            .ok_or_else(|| EspError::NotFound(format!("{} 中没有记录 {:?}", plugin, lookup)))
    }

    /// 插件中的记录（可按类型筛选），按载入顺序
    pub fn records(&self, plugin: PluginId, record_type: Option<RecordType>) -> Result<Vec<RecordId>> {
        let key = self.plugin_key(plugin)?;
        let store = &self.plugin(plugin)?.store;
        Ok(store
            .iter()
            .filter(|(_, record)| record_type.map_or(true, |wanted| record.record_type == wanted))
            .map(|(record, _)| self.record_id(key, record))
            .collect())
    }

    pub fn record_count(&self, plugin: PluginId, record_type: Option<RecordType>) -> Result<usize> {
        let store = &self.plugin(plugin)?.store;
        Ok(match record_type {
            Some(record_type) => store.of_type(record_type).count(),
            None => store.len(),
        })
    }

    pub fn parent(&self, record: RecordId) -> Result<Option<RecordId>> {
        let parent = self.record(record)?.parent;
        Ok(parent.map(|key| RecordId { plugin: record.plugin, key }))
    }

    /// 直接子记录
    pub fn children(&self, record: RecordId) -> Result<Vec<RecordId>> {
        let (plugin, key) = self.locate(record)?;
        let store = &self.plugin(record.plugin)?.store;
        Ok(store.children(key).iter().map(|child| self.record_id(plugin, *child)).collect())
    }

    /// 载入时父记录缺失而被丢弃的记录
    pub fn orphans(&self, plugin: PluginId) -> Result<&[FormId]> {
        Ok(self.plugin(plugin)?.store.orphans())
    }

    /// 插件新增（非覆盖）记录的类型，需要以 `TRACK_NEW_TYPES` 载入
    pub fn record_types(&self, plugin: PluginId) -> Result<Vec<RecordType>> {
        let key = self.plugin_key(plugin)?;
        let source = self.plugin(plugin)?;
        if !source.flags.contains(PluginFlags::TRACK_NEW_TYPES) {
            return Err(EspError::InvalidOperation(format!("插件未以 TRACK_NEW_TYPES 载入: {}", source.name)));
        }
        let own_index = self.load_order.index_of(key).unwrap_or(INVALID_MOD_INDEX);
        let types: IndexSet<RecordType> = source
            .store
            .iter()
            .filter(|(_, record)| record.form_id.mod_index() == own_index)
            .map(|(_, record)| record.record_type)
            .collect();
        Ok(types.into_iter().collect())
    }

    pub fn is_plugin_empty(&self, plugin: PluginId) -> Result<bool> {
        Ok(self.plugin(plugin)?.is_empty())
    }

    pub fn empty_group_count(&self, plugin: PluginId) -> Result<usize> {
        Ok(self.plugin(plugin)?.empty_groups)
    }

    /// 记录是否引用了未激活的主文件
    pub fn is_record_invalid(&self, record: RecordId) -> Result<bool> {
        Ok(self.record(record)?.invalid_formids)
    }

    pub fn has_updated_references(&self, record: RecordId) -> Result<bool> {
        Ok(self.record(record)?.updated_references)
    }

    // ---- 冲突查询 ----

    fn source(&self) -> Source<'_> {
        Source { plugins: &self.plugins, load_order: &self.load_order, game: self.game }
    }

    pub fn identity_of(&self, record: RecordId) -> Result<Identity> {
        Ok(self.record(record)?.identity(self.game))
    }

    /// 记录所在的冲突分组
    fn members(&self, record: RecordId) -> Result<(Key, Key, Vec<Member>)> {
        let (plugin, key) = self.locate(record)?;
        let identity = self.identity_of(record)?;
        Ok((plugin, key, self.conflicts.group(&self.source(), &identity)))
    }

    fn member_ids(&self, members: &[Member]) -> Vec<RecordId> {
        members.iter().map(|member| self.record_id(member.plugin, member.record)).collect()
    }

    /// 记录是否为所在分组的胜出版本
    pub fn is_winning(&self, record: RecordId, extended: bool) -> Result<bool> {
        let result = self
            .members(record)
            .map(|(plugin, key, members)| conflict::is_winning(&members, plugin, key, extended));
        self.diagnostics.check("is_winning", result)
    }

    pub fn conflict_count(&self, record: RecordId, extended: bool) -> Result<usize> {
        let result = self.members(record).map(|(_, _, members)| conflict::view(&members, extended).len());
        self.diagnostics.check("conflict_count", result)
    }

    /// 同一身份的全部版本，按插件顺序升序
    pub fn conflicts(&self, record: RecordId, extended: bool) -> Result<Vec<RecordId>> {
        let result = self
            .members(record)
            .map(|(_, _, members)| self.member_ids(&conflict::view(&members, extended)));
        self.diagnostics.check("conflicts", result)
    }

    /// 除自身外的非扩展版本；扩展冲突插件中的记录没有历史
    pub fn history(&self, record: RecordId) -> Result<Vec<RecordId>> {
        let result = self.members(record).and_then(|(plugin, key, members)| {
            let extended = self
                .plugins
                .get(plugin)
                .is_some_and(|plugin| plugin.flags.contains(PluginFlags::EXTENDED_CONFLICTS));
            if extended {
                return Err(EspError::InvalidOperation(format!("扩展冲突插件中的记录没有历史: {}", record)));
            }
            Ok(self.member_ids(&conflict::history(&members, plugin, key)))
        });
        self.diagnostics.check("history", result)
    }

    /// 身份对应的胜出记录
    pub fn winner(&self, identity: &Identity, extended: bool) -> Option<RecordId> {
        let members = self.conflicts.group(&self.source(), identity);
        conflict::winner(&members, extended).map(|member| self.record_id(member.plugin, member.record))
    }

    /// 插件中与主文件版本完全相同的未修改记录
    pub fn identical_to_master(&self, plugin: PluginId) -> Result<Vec<RecordId>> {
        let result = self.identical_to_master_inner(plugin);
        self.diagnostics.check("identical_to_master", result)
    }

    pub fn identical_to_master_count(&self, plugin: PluginId) -> Result<usize> {
        self.identical_to_master(plugin).map(|records| records.len())
    }

    fn identical_to_master_inner(&self, plugin: PluginId) -> Result<Vec<RecordId>> {
        let key = self.plugin_key(plugin)?;
        let store = &self.plugin(plugin)?.store;
        let source = self.source();

        let mut identical = Vec::new();
        for (record_key, record) in store.iter() {
            if record.changed {
                continue;
            }
            let members = self.conflicts.group(&source, &record.identity(self.game));
            let Some(master) = conflict::previous(&members, key, record_key) else { continue };
            let Some(master) = self.plugins.get(master.plugin).and_then(|p| p.store.get(master.record)) else {
                continue;
            };
            if self.same_content(record, master) {
                identical.push(self.record_id(key, record_key));
            }
        }
        Ok(identical)
    }

    fn same_content(&self, record: &Record, master: &Record) -> bool {
        let editor_ids_match = match (&record.editor_id, &master.editor_id) {
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
            (None, None) => true,
            _ => false,
        };
        record.record_type == master.record_type
            && editor_ids_match
            && record.flags - RecordFlags::COMPRESSED == master.flags - RecordFlags::COMPRESSED
            && self.codec.fields_equal(record.record_type, &record.fields, &master.fields)
    }

    // ---- 引用替换 ----

    /// 把范围内记录中的 `old[i]` 引用改写为 `new[i]`
    pub fn update_references(&mut self, scope: ReferenceScope, old: &[FormId], new: &[FormId]) -> Result<ReferenceUpdate> {
        let result = ReferenceMap::new(old, new).and_then(|map| self.apply_references(scope, &map));
        self.diagnostics.check("update_references", result)
    }

    /// 以映射表形式替换引用；`changes` 按旧 FormID 升序排列
    pub fn update_references_map(
        &mut self,
        scope: ReferenceScope,
        replacements: &HashMap<FormId, FormId>,
    ) -> Result<ReferenceUpdate> {
        let mut pairs: Vec<(FormId, FormId)> = replacements.iter().map(|(from, to)| (*from, *to)).collect();
        pairs.sort();
        let (old, new): (Vec<FormId>, Vec<FormId>) = pairs.into_iter().unzip();
        self.update_references(scope, &old, &new)
    }

    fn apply_references(&mut self, scope: ReferenceScope, map: &ReferenceMap) -> Result<ReferenceUpdate> {
        let (plugin_key, keys) = match scope {
            ReferenceScope::Record(record) => {
                let (plugin, key) = self.locate(record)?;
                (plugin, vec![key])
            }
            ReferenceScope::Plugin(plugin) => {
                let key = self.plugin_key(plugin)?;
                (key, self.plugin(plugin)?.store.keys().collect())
            }
        };

        let game = self.game;
        let mut update = ReferenceUpdate { changes: vec![0; map.len()], total: 0 };
        let mut touched = Vec::new();
        let store = &mut self
            .plugins
            .get_mut(plugin_key)
            .ok_or_else(|| EspError::StaleHandle(format!("插件槽位 {:?}", plugin_key)))?
            .store;

        for key in keys {
            let Some(record) = store.get_mut(key) else { continue };
            if !map.touches(&record.fields) {
                continue;
            }
            let changes = &mut update.changes;
            let mut count = 0;
            record.edit_fields(|fields| {
                count = map.apply(fields, changes);
                Ok(count > 0)
            })?;
            record.updated_references = true;
            update.total += count;
            touched.push(record.identity(game));
        }

        for identity in &touched {
            self.conflicts.invalidate(identity);
        }
        tracing::debug!("引用替换: {} 条记录, {} 处", touched.len(), update.total);
        Ok(update)
    }

    // ---- 字段访问 ----

    /// 头部字段（1..=5）只能直接寻址，不能带列表层级
    fn header_target(path: &FieldPath) -> Result<Option<u32>> {
        path.validate()?;
        match path.field {
            FIELD_FLAGS..=FIELD_FORM_VERSION if path.levels.is_empty() => Ok(Some(path.field)),
            FIELD_FLAGS..=FIELD_FORM_VERSION => {
                Err(EspError::InvalidArgument(format!("InvalidPath {}: 头部字段不是列表", path)))
            }
            field if field < FIRST_SCHEMA_FIELD => {
                Err(EspError::InvalidArgument(format!("InvalidPath {}: 保留字段", path)))
            }
            _ => Ok(None),
        }
    }

    fn schema_codec(&self, record_type: RecordType) -> Result<Arc<dyn RecordCodec>> {
        if self.codec.schema(record_type).is_none() {
            return Err(EspError::InvalidArgument(format!("记录类型 {} 没有字段定义", record_type)));
        }
        Ok(Arc::clone(&self.codec))
    }

    /// 字段的声明类型
    pub fn field_kind(&self, record: RecordId, path: &FieldPath) -> Result<FieldKind> {
        let result = self.field_kind_inner(record, path);
        self.diagnostics.check("field_kind", result)
    }

    fn field_kind_inner(&self, record: RecordId, path: &FieldPath) -> Result<FieldKind> {
        self.field_attributes_inner(record, path).map(|attributes| attributes.kind)
    }

    /// 字段的声明属性：类型、定长字节数、是否必需、是否为列表
    pub fn field_attributes(&self, record: RecordId, path: &FieldPath) -> Result<FieldAttributes> {
        let result = self.field_attributes_inner(record, path);
        self.diagnostics.check("field_attributes", result)
    }

    fn field_attributes_inner(&self, record: RecordId, path: &FieldPath) -> Result<FieldAttributes> {
        let current = self.record(record)?;
        if let Some(field) = Self::header_target(path)? {
            let kind = Record::header_kind(field)
                .ok_or_else(|| EspError::InvalidArgument(format!("InvalidPath {}", path)))?;
            return Ok(FieldAttributes::of_kind(kind, field != FIELD_EDITOR_ID));
        }
        let codec = self.schema_codec(current.record_type)?;
        let schema = codec.schema(current.record_type).ok_or_else(|| EspError::InvalidArgument(format!("{}", path)))?;
        accessor::attributes(&schema.layout, path)
    }

    /// 读取字段；可选字段不存在时返回 `FieldValue::Missing`
    pub fn get_field(&self, record: RecordId, path: &FieldPath) -> Result<FieldValue> {
        let result = self.get_field_inner(record, path);
        self.diagnostics.check("get_field", result)
    }

    fn get_field_inner(&self, record: RecordId, path: &FieldPath) -> Result<FieldValue> {
        let current = self.record(record)?;
        if let Some(field) = Self::header_target(path)? {
            return current
                .header_field(field)
                .ok_or_else(|| EspError::InvalidArgument(format!("InvalidPath {}", path)));
        }
        let codec = self.schema_codec(current.record_type)?;
        let schema = codec.schema(current.record_type).ok_or_else(|| EspError::InvalidArgument(format!("{}", path)))?;
        accessor::get(&schema.layout, &current.fields, path)
    }

    /// 写入字段（复制 `value`）
    ///
    /// 写入 FormID（2）或编辑器 ID（4）等同于 [`Collection::set_id_fields`]。
    pub fn set_field(&mut self, record: RecordId, path: &FieldPath, value: &FieldValue) -> Result<()> {
        let result = self.set_field_inner(record, path, value);
        self.diagnostics.check("set_field", result)
    }

    fn set_field_inner(&mut self, record: RecordId, path: &FieldPath, value: &FieldValue) -> Result<()> {
        let current = self.record(record)?;
        let (form_id, editor_id, record_type) = (current.form_id, current.editor_id.clone(), current.record_type);

        match (Self::header_target(path)?, value) {
            (Some(FIELD_FORM_ID), FieldValue::FormId(new_form_id)) => {
                self.set_id_fields_inner(record, *new_form_id, editor_id)
            }
            (Some(FIELD_EDITOR_ID), FieldValue::String(new_editor_id)) => {
                self.set_id_fields_inner(record, form_id, Some(new_editor_id.clone()))
            }
            (Some(FIELD_FORM_ID | FIELD_EDITOR_ID), other) => Err(EspError::InvalidArgument(format!(
                "字段 {} 不能写入 {:?}", path, other.kind()
            ))),
            (Some(field), value) => self.record_mut(record)?.set_header_field(field, value),
            (None, value) => {
                let codec = self.schema_codec(record_type)?;
                let schema = codec.schema(record_type).ok_or_else(|| EspError::InvalidArgument(format!("{}", path)))?;
                self.record_mut(record)?
                    .edit_fields(|fields| accessor::set(&schema.layout, fields, path, value).map(|()| true))
            }
        }
    }

    /// 以原始小端字节写入字段，按声明类型解析
    pub fn set_field_bytes(&mut self, record: RecordId, path: &FieldPath, bytes: &[u8]) -> Result<()> {
        let result = self.set_field_bytes_inner(record, path, bytes);
        self.diagnostics.check("set_field_bytes", result)
    }

    fn set_field_bytes_inner(&mut self, record: RecordId, path: &FieldPath, bytes: &[u8]) -> Result<()> {
        let record_type = self.record(record)?.record_type;
        if let Some(field) = Self::header_target(path)? {
            let kind = Record::header_kind(field)
                .ok_or_else(|| EspError::InvalidArgument(format!("InvalidPath {}", path)))?;
            let value = FieldValue::from_le_bytes(kind, bytes)?;
            return self.set_field_inner(record, path, &value);
        }
        let codec = self.schema_codec(record_type)?;
        let schema = codec.schema(record_type).ok_or_else(|| EspError::InvalidArgument(format!("{}", path)))?;
        self.record_mut(record)?
            .edit_fields(|fields| accessor::set_bytes(&schema.layout, fields, path, bytes).map(|()| true))
    }

    /// 删除字段或列表元素
    ///
    /// 删除编辑器 ID（4）会清空它；其余头部字段和必需字段不能删除。
    pub fn delete_field(&mut self, record: RecordId, path: &FieldPath) -> Result<()> {
        let result = self.delete_field_inner(record, path);
        self.diagnostics.check("delete_field", result)
    }

    fn delete_field_inner(&mut self, record: RecordId, path: &FieldPath) -> Result<()> {
        let current = self.record(record)?;
        let (form_id, record_type) = (current.form_id, current.record_type);

        match Self::header_target(path)? {
            Some(FIELD_EDITOR_ID) => self.set_id_fields_inner(record, form_id, None),
            Some(_) => Err(EspError::InvalidOperation(format!("头部字段 {} 不能删除", path))),
            None => {
                let codec = self.schema_codec(record_type)?;
                let schema = codec.schema(record_type).ok_or_else(|| EspError::InvalidArgument(format!("{}", path)))?;
                self.record_mut(record)?
                    .edit_fields(|fields| accessor::delete(&schema.layout, fields, path))
            }
        }
    }
}
