//! 记录存储
//!
//! 每个插件拥有一个 [`RecordStore`]：记录本体放在代数竞技场中，
//! 另外维护 FormID 索引、编辑器 ID 索引（不区分大小写）以及父 -> 子的所属层级索引。
//! 所属层级与冲突分组是两种独立关系，这里只维护前者。

use crate::arena::{Arena, Key};
use crate::datatypes::{RecordFlags, RecordType};
use crate::field::{
    FieldKind, FieldTree, FieldValue, FIELD_EDITOR_ID, FIELD_FLAGS, FIELD_FORM_ID,
    FIELD_FORM_VERSION, FIELD_VERSION_CONTROL,
};
use crate::formid::FormId;
use crate::game::Game;
use crate::record::RawRecord;
use crate::utils::{name_key, EspError, Result};
use indexmap::{IndexMap, IndexSet};
use std::collections::{HashMap, HashSet};

/// 记录在冲突分组中的身份
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    FormId(FormId),
    /// 小写的编辑器 ID
    EditorId(String),
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Identity::FormId(form_id) => write!(f, "{}", form_id),
            Identity::EditorId(editor_id) => f.write_str(editor_id),
        }
    }
}

/// 首次修改前的记录状态
#[derive(Debug, Clone)]
struct Snapshot {
    form_id: FormId,
    editor_id: Option<String>,
    flags: RecordFlags,
    version_control: u32,
    form_version: u16,
    fields: FieldTree,
}

/// 已载入的记录
#[derive(Debug, Clone)]
pub struct Record {
    pub(crate) record_type: RecordType,
    pub(crate) form_id: FormId,
    pub(crate) editor_id: Option<String>,
    pub(crate) flags: RecordFlags,
    pub(crate) version_control: u32,
    pub(crate) form_version: u16,
    pub(crate) unknown: u16,
    /// 所属的父记录（同一插件内）
    pub(crate) parent: Option<Key>,
    pub(crate) fields: FieldTree,
    pub(crate) changed: bool,
    pub(crate) updated_references: bool,
    /// 引用了未激活主文件（保存时无法还原）
    pub(crate) invalid_formids: bool,
    snapshot: Option<Box<Snapshot>>,
}

impl Record {
    pub fn new(record_type: RecordType, form_id: FormId, editor_id: Option<String>, fields: FieldTree) -> Self {
        Record {
            record_type,
            form_id,
            editor_id,
            flags: RecordFlags::empty(),
            version_control: 0,
            form_version: 0,
            unknown: 0,
            parent: None,
            fields,
            changed: false,
            updated_references: false,
            invalid_formids: false,
            snapshot: None,
        }
    }

    pub fn record_type(&self) -> RecordType {
        self.record_type
    }

    pub fn form_id(&self) -> FormId {
        self.form_id
    }

    pub fn editor_id(&self) -> Option<&str> {
        self.editor_id.as_deref()
    }

    pub fn flags(&self) -> RecordFlags {
        self.flags
    }

    pub fn fields(&self) -> &FieldTree {
        &self.fields
    }

    pub fn is_changed(&self) -> bool {
        self.changed
    }

    pub fn has_updated_references(&self) -> bool {
        self.updated_references
    }

    pub fn has_invalid_formids(&self) -> bool {
        self.invalid_formids
    }

    /// 冲突分组身份
    ///
    /// Oblivion 的 MGEF 以及没有 FormID 的记录按编辑器 ID 分组。
    pub fn identity(&self, game: Game) -> Identity {
        let by_editor_id = game.is_identified_by_editor_id(self.record_type) || self.form_id.is_null();
        match (&self.editor_id, by_editor_id) {
            (Some(editor_id), true) => Identity::EditorId(name_key(editor_id)),
            _ => Identity::FormId(self.form_id),
        }
    }

    /// 修改前调用：首次修改时保存载入状态
    pub(crate) fn mark_changed(&mut self) {
        if !self.changed {
            self.take_snapshot(self.fields.clone());
        }
    }

    fn take_snapshot(&mut self, fields: FieldTree) {
        self.snapshot = Some(Box::new(Snapshot {
            form_id: self.form_id,
            editor_id: self.editor_id.clone(),
            flags: self.flags,
            version_control: self.version_control,
            form_version: self.form_version,
            fields,
        }));
        self.changed = true;
    }

    /// 修改字段树
    ///
    /// `edit` 返回是否确实修改了内容，失败时不得修改字段树。
    /// 记录首次修改前复制一份字段树作为载入状态快照；已修改的记录直接原地编辑。
    pub(crate) fn edit_fields(&mut self, edit: impl FnOnce(&mut FieldTree) -> Result<bool>) -> Result<()> {
        if self.changed {
            return edit(&mut self.fields).map(|_| ());
        }

        let before = self.fields.clone();
        match edit(&mut self.fields) {
            Ok(true) => {
                self.take_snapshot(before);
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(error) => {
                self.fields = before;
                Err(error)
            }
        }
    }

    /// 新建记录没有可恢复的载入状态
    pub(crate) fn mark_created(&mut self) {
        self.changed = true;
        self.snapshot = None;
    }

    /// 是否存在可恢复的载入状态
    pub(crate) fn can_reset(&self) -> bool {
        self.changed && self.snapshot.is_some()
    }

    /// 载入状态中的 FormID 和编辑器 ID
    pub(crate) fn snapshot_identity(&self) -> Option<(FormId, Option<&str>)> {
        self.snapshot.as_ref().map(|snapshot| (snapshot.form_id, snapshot.editor_id.as_deref()))
    }

    /// 恢复载入状态
    pub(crate) fn reset(&mut self) -> Result<()> {
        let snapshot = self.snapshot.take().ok_or_else(|| {
            EspError::InvalidOperation(format!("记录 {} 没有可撤销的修改", self.form_id))
        })?;
        let snapshot = *snapshot;
        self.form_id = snapshot.form_id;
        self.editor_id = snapshot.editor_id;
        self.flags = snapshot.flags;
        self.version_control = snapshot.version_control;
        self.form_version = snapshot.form_version;
        self.fields = snapshot.fields;
        self.changed = false;
        self.updated_references = false;
        Ok(())
    }

    /// 头部字段的声明类型（字段 1..=5）
    pub fn header_kind(field: u32) -> Option<FieldKind> {
        match field {
            FIELD_FLAGS => Some(FieldKind::U32Flags),
            FIELD_FORM_ID => Some(FieldKind::FormId),
            FIELD_VERSION_CONTROL => Some(FieldKind::U32),
            FIELD_EDITOR_ID => Some(FieldKind::String),
            FIELD_FORM_VERSION => Some(FieldKind::U16),
            _ => None,
        }
    }

    /// 读取头部字段
    pub fn header_field(&self, field: u32) -> Option<FieldValue> {
        let value = match field {
            FIELD_FLAGS => FieldValue::U32Flags(self.flags.bits()),
            FIELD_FORM_ID => FieldValue::FormId(self.form_id),
            FIELD_VERSION_CONTROL => FieldValue::U32(self.version_control),
            FIELD_EDITOR_ID => match &self.editor_id {
                Some(editor_id) => FieldValue::String(editor_id.clone()),
                None => FieldValue::Missing,
            },
            FIELD_FORM_VERSION => FieldValue::U16(self.form_version),
            _ => return None,
        };
        Some(value)
    }

    /// 写入非身份头部字段（标志位、版本控制、表单版本）
    pub(crate) fn set_header_field(&mut self, field: u32, value: &FieldValue) -> Result<()> {
        match (field, value) {
            (FIELD_FLAGS, FieldValue::U32Flags(bits)) => {
                self.mark_changed();
                self.flags = RecordFlags::from_bits_retain(*bits);
            }
            (FIELD_VERSION_CONTROL, FieldValue::U32(value)) => {
                self.mark_changed();
                self.version_control = *value;
            }
            (FIELD_FORM_VERSION, FieldValue::U16(value)) => {
                self.mark_changed();
                self.form_version = *value;
            }
            _ => {
                return Err(EspError::InvalidArgument(format!(
                    "头部字段 {} 不能写入 {:?}", field, value.kind()
                )))
            }
        }
        Ok(())
    }

    /// 转换为原始记录（数据由调用方编码）
    pub(crate) fn to_raw(&self, form_id: u32, data: Vec<u8>) -> RawRecord {
        RawRecord {
            record_type: self.record_type,
            flags: self.flags,
            form_id,
            version_control: self.version_control,
            form_version: self.form_version,
            unknown: self.unknown,
            data,
            original_compressed_data: None,
        }
    }
}

/// 从内存中卸载的记录
///
/// 保留编码后的数据（FormID 为集合相对形式），保存插件时重新解码写出。
#[derive(Debug, Clone)]
pub struct UnloadedRecord {
    pub raw: RawRecord,
    pub parent: Option<FormId>,
    pub invalid_formids: bool,
}

/// 单个插件的记录存储
#[derive(Debug, Default)]
pub struct RecordStore {
    records: Arena<Record>,
    /// 插入顺序
    order: IndexSet<Key>,
    by_form_id: IndexMap<FormId, Key>,
    by_editor_id: HashMap<String, Key>,
    children: HashMap<Key, Vec<Key>>,
    unloaded: IndexMap<FormId, UnloadedRecord>,
    /// 父记录缺失、未能挂入层级的记录
    orphans: Vec<FormId>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, key: Key) -> Option<&Record> {
        self.records.get(key)
    }

    pub fn get_mut(&mut self, key: Key) -> Option<&mut Record> {
        self.records.get_mut(key)
    }

    pub fn contains(&self, key: Key) -> bool {
        self.records.contains(key)
    }

    /// 检查身份是否可用（`except` 为正在改名的记录自身）
    pub fn check_identity(&self, form_id: FormId, editor_id: Option<&str>, except: Option<Key>) -> Result<()> {
        if !form_id.is_null() {
            if let Some(existing) = self.by_form_id.get(&form_id) {
                if Some(*existing) != except {
                    return Err(EspError::DuplicateIdentifier(format!("FormID {} 已存在", form_id)));
                }
            }
        }
        if let Some(editor_id) = editor_id {
            if let Some(existing) = self.by_editor_id.get(&name_key(editor_id)) {
                if Some(*existing) != except {
                    return Err(EspError::DuplicateIdentifier(format!("编辑器 ID {} 已存在", editor_id)));
                }
            }
        }
        Ok(())
    }

    /// 插入记录
    pub fn insert(&mut self, record: Record) -> Result<Key> {
        self.check_identity(record.form_id, record.editor_id.as_deref(), None)?;
        self.insert_indexed(record)
    }

    /// 插入从文件载入的记录
    ///
    /// 文件中偶有重复的编辑器 ID，此时索引保留先出现的记录；FormID 重复仍然拒绝。
    pub fn insert_loaded(&mut self, record: Record) -> Result<Key> {
        self.check_identity(record.form_id, None, None)?;
        let duplicate_editor_id = record
            .editor_id
            .as_deref()
            .is_some_and(|editor_id| self.by_editor_id.contains_key(&name_key(editor_id)));
        if duplicate_editor_id {
            tracing::warn!(
                "编辑器 ID {:?} 重复，记录 {} 不进入编辑器 ID 索引",
                record.editor_id, record.form_id
            );
            let mut record = record;
            let editor_id = record.editor_id.take();
            let key = self.insert_indexed(record)?;
            if let Some(stored) = self.records.get_mut(key) {
                stored.editor_id = editor_id;
            }
            return Ok(key);
        }
        self.insert_indexed(record)
    }

    fn insert_indexed(&mut self, record: Record) -> Result<Key> {
        if let Some(parent) = record.parent {
            if !self.records.contains(parent) {
                return Err(EspError::StaleHandle(format!("父记录 {:?} 不存在", parent)));
            }
        }

        let form_id = record.form_id;
        let editor_id = record.editor_id.as_deref().map(name_key);
        let parent = record.parent;

        let key = self.records.insert(record);
        self.order.insert(key);
        if !form_id.is_null() {
            self.by_form_id.insert(form_id, key);
            self.unloaded.shift_remove(&form_id);
        }
        if let Some(editor_id) = editor_id {
            self.by_editor_id.insert(editor_id, key);
        }
        if let Some(parent) = parent {
            self.children.entry(parent).or_default().push(key);
        }
        Ok(key)
    }

    /// 移除单条记录（不处理其子记录）
    pub fn remove(&mut self, key: Key) -> Option<Record> {
        let record = self.records.remove(key)?;
        self.order.shift_remove(&key);
        self.unindex(key, record.form_id, record.editor_id.as_deref());
        self.children.remove(&key);
        if let Some(parent) = record.parent {
            if let Some(siblings) = self.children.get_mut(&parent) {
                siblings.retain(|child| *child != key);
            }
        }
        Some(record)
    }

    fn unindex(&mut self, key: Key, form_id: FormId, editor_id: Option<&str>) {
        if self.by_form_id.get(&form_id) == Some(&key) {
            self.by_form_id.shift_remove(&form_id);
        }
        if let Some(editor_id) = editor_id {
            let lowered = name_key(editor_id);
            if self.by_editor_id.get(&lowered) == Some(&key) {
                self.by_editor_id.remove(&lowered);
            }
        }
    }

    /// 修改记录身份并更新索引
    pub fn set_identity(&mut self, key: Key, form_id: FormId, editor_id: Option<String>) -> Result<()> {
        self.check_identity(form_id, editor_id.as_deref(), Some(key))?;
        let (old_form_id, old_editor_id) = {
            let record = self.records.get(key).ok_or_else(|| EspError::StaleHandle(format!("{:?}", key)))?;
            (record.form_id, record.editor_id.clone())
        };
        self.unindex(key, old_form_id, old_editor_id.as_deref());

        if let Some(record) = self.records.get_mut(key) {
            record.mark_changed();
            record.form_id = form_id;
            record.editor_id = editor_id.clone();
        }
        if !form_id.is_null() {
            self.by_form_id.insert(form_id, key);
        }
        if let Some(editor_id) = editor_id {
            self.by_editor_id.insert(name_key(&editor_id), key);
        }
        Ok(())
    }

    /// 重建单条记录的索引（撤销修改后身份可能变化）
    pub fn reindex(&mut self, key: Key, old_form_id: FormId, old_editor_id: Option<&str>) {
        self.unindex(key, old_form_id, old_editor_id);
        if let Some(record) = self.records.get(key) {
            if !record.form_id.is_null() {
                self.by_form_id.insert(record.form_id, key);
            }
            if let Some(editor_id) = &record.editor_id {
                self.by_editor_id.insert(name_key(editor_id), key);
            }
        }
    }

    pub fn find_form_id(&self, form_id: FormId) -> Option<Key> {
        self.by_form_id.get(&form_id).copied()
    }

    pub fn find_editor_id(&self, editor_id: &str) -> Option<Key> {
        self.by_editor_id.get(&name_key(editor_id)).copied()
    }

    /// 直接子记录（按插入顺序）
    pub fn children(&self, key: Key) -> &[Key] {
        self.children.get(&key).map_or(&[], Vec::as_slice)
    }

    /// 全部后代记录，子记录先于父记录
    pub fn descendants(&self, key: Key) -> Vec<Key> {
        let mut result = Vec::new();
        for child in self.children(key) {
            result.extend(self.descendants(*child));
            result.push(*child);
        }
        result
    }

    /// 按插入顺序遍历
    pub fn iter(&self) -> impl Iterator<Item = (Key, &Record)> {
        self.order
            .iter()
            .filter_map(|key| self.records.get(*key).map(|record| (*key, record)))
    }

    pub fn keys(&self) -> impl Iterator<Item = Key> + '_ {
        self.order.iter().copied()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Key, &mut Record)> {
        self.records.iter_mut()
    }

    /// 指定类型的记录
    pub fn of_type(&self, record_type: RecordType) -> impl Iterator<Item = (Key, &Record)> {
        self.iter().filter(move |(_, record)| record.record_type == record_type)
    }

    /// 卸载一条记录，保留编码后的数据
    pub fn unload(&mut self, key: Key, unloaded: UnloadedRecord) -> Option<Record> {
        let form_id = FormId(unloaded.raw.form_id);
        let record = self.remove(key)?;
        self.unloaded.insert(form_id, unloaded);
        Some(record)
    }

    pub fn unloaded(&self) -> impl Iterator<Item = &UnloadedRecord> {
        self.unloaded.values()
    }

    /// 移除父记录链通向 `roots` 的已卸载记录，返回移除的条数
    pub fn remove_unloaded_descendants(&mut self, roots: impl IntoIterator<Item = FormId>) -> usize {
        let mut removed: HashSet<FormId> = roots.into_iter().collect();
        let before = self.unloaded.len();
        loop {
            let detached: Vec<FormId> = self
                .unloaded
                .iter()
                .filter(|(_, entry)| entry.parent.is_some_and(|parent| removed.contains(&parent)))
                .map(|(form_id, _)| *form_id)
                .collect();
            if detached.is_empty() {
                break;
            }
            for form_id in detached {
                self.unloaded.shift_remove(&form_id);
                removed.insert(form_id);
            }
        }
        before - self.unloaded.len()
    }

    pub fn add_orphan(&mut self, form_id: FormId) {
        self.orphans.push(form_id);
    }

    pub fn orphans(&self) -> &[FormId] {
        &self.orphans
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.order.clear();
        self.by_form_id.clear();
        self.by_editor_id.clear();
        self.children.clear();
        self.unloaded.clear();
        self.orphans.clear();
    }
}
