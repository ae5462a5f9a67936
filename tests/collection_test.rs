//! 集合集成测试
//!
//! 全部在内存中进行：先用新建插件生成 Base.esm 和 Patch.esp，
//! 再在新的集合中从"磁盘"载入，验证冲突、字段访问、引用替换和保存。

use esp_collection::{
    CreateFlags, EspError, FieldPath, FieldValue, FormId, Game, MemoryIo, MgefCode, PluginFlags,
    PluginId, Progress, ProgressCallback, RecordId, RecordLookup, RecordType, ReferenceScope,
    Registry, SaveFlags,
};
use std::sync::Arc;

const GLOB: RecordType = RecordType(*b"GLOB");
const WEAP: RecordType = RecordType(*b"WEAP");
const DIAL: RecordType = RecordType(*b"DIAL");
const INFO: RecordType = RecordType(*b"INFO");

fn new_plugin_flags() -> PluginFlags {
    PluginFlags::CREATE_NEW | PluginFlags::IN_LOAD_ORDER | PluginFlags::SAVEABLE
}

/// 生成 Base.esm（两个 GLOB）和 Patch.esp（覆盖这两个 GLOB，其中一个改了数值）
fn seed_plugins() -> Arc<MemoryIo> {
    let io = Arc::new(MemoryIo::new());
    let mut registry = Registry::new();

    let id = registry.create_collection(Game::Skyrim, io.clone(), None).unwrap();
    let collection = registry.collection_mut(id).unwrap();
    let base = collection.add_plugin("Base.esm", new_plugin_flags()).unwrap();
    collection.load_plugin(base).unwrap();

    let game_hour = collection
        .create_record(base, GLOB, FormId(0), Some("GameHour"), None, CreateFlags::empty())
        .unwrap();
    let time_scale = collection
        .create_record(base, GLOB, FormId(0), Some("TimeScale"), None, CreateFlags::empty())
        .unwrap();
    assert_eq!(collection.record(game_hour).unwrap().form_id(), FormId(0x0000_0800));
    assert_eq!(collection.record(time_scale).unwrap().form_id(), FormId(0x0000_0801));
    collection.set_field(game_hour, &FieldPath::new(8), &FieldValue::F32(8.0)).unwrap();
    collection.set_field(time_scale, &FieldPath::new(8), &FieldValue::F32(20.0)).unwrap();

    let patch = collection.add_plugin("Patch.esp", new_plugin_flags()).unwrap();
    collection.load_plugin(patch).unwrap();
    let override_flags = CreateFlags::SET_AS_OVERRIDE | CreateFlags::COPY_WINNING_PARENT;
    collection
        .create_record(patch, GLOB, FormId(0x0000_0800), None, None, override_flags)
        .unwrap();
    let changed = collection
        .create_record(patch, GLOB, FormId(0x0000_0801), None, None, override_flags)
        .unwrap();
    collection.set_field(changed, &FieldPath::new(8), &FieldValue::F32(6.0)).unwrap();

    collection.save_plugin(base, None, SaveFlags::empty(), None).unwrap();
    collection.save_plugin(patch, None, SaveFlags::empty(), None).unwrap();
    io
}

/// 按顺序载入 Base.esm 和 Patch.esp
fn load_both(io: Arc<MemoryIo>) -> (Registry, esp_collection::CollectionId, PluginId, PluginId) {
    let mut registry = Registry::new();
    let id = registry.create_collection(Game::Skyrim, io, None).unwrap();
    let collection = registry.collection_mut(id).unwrap();
    let base = collection.add_plugin("Base.esm", PluginFlags::normal()).unwrap();
    let patch = collection.add_plugin("Patch.esp", PluginFlags::normal()).unwrap();
    collection.load(None).unwrap();
    (registry, id, base, patch)
}

/// 在 Base.esm/Patch.esp 之外再给 Patch.esp 加一条自己的新记录
fn seed_with_new_record() -> Arc<MemoryIo> {
    let io = seed_plugins();
    let (mut registry, id, _, patch) = load_both(io.clone());
    let collection = registry.collection_mut(id).unwrap();
    let added = collection
        .create_record(patch, GLOB, FormId(0), Some("PatchOnly"), None, CreateFlags::empty())
        .unwrap();
    assert_eq!(collection.record(added).unwrap().form_id().mod_index(), 1);
    collection.save_plugin(patch, None, SaveFlags::empty(), None).unwrap();
    io
}

/// 生成 Dialogue.esm：一个话题及其一条回应
fn seed_dialogue() -> Arc<MemoryIo> {
    let io = Arc::new(MemoryIo::new());
    let mut registry = Registry::new();
    let id = registry.create_collection(Game::Skyrim, io.clone(), None).unwrap();
    let collection = registry.collection_mut(id).unwrap();
    let plugin = collection.add_plugin("Dialogue.esm", new_plugin_flags()).unwrap();
    collection.load_plugin(plugin).unwrap();

    let topic = collection
        .create_record(plugin, DIAL, FormId(0), Some("Greeting"), None, CreateFlags::empty())
        .unwrap();
    collection
        .create_record(plugin, INFO, FormId(0), None, Some(topic), CreateFlags::empty())
        .unwrap();
    collection.save_plugin(plugin, None, SaveFlags::empty(), None).unwrap();
    io
}

fn glob(registry: &Registry, id: esp_collection::CollectionId, plugin: PluginId, form_id: u32) -> RecordId {
    registry
        .collection(id)
        .unwrap()
        .find_record(plugin, RecordLookup::FormId(FormId(form_id)))
        .unwrap()
}

#[test]
fn test_saved_patch_lists_master() {
    let io = seed_plugins();
    let (registry, id, base, patch) = load_both(io);
    let collection = registry.collection(id).unwrap();

    assert_eq!(collection.masters(patch).unwrap(), ["Base.esm".to_string()]);
    assert!(collection.plugin(base).unwrap().is_master());
    assert_eq!(collection.record_count(base, Some(GLOB)).unwrap(), 2);
    assert_eq!(collection.record_count(patch, None).unwrap(), 2);
    assert_eq!(collection.load_order_position(patch).unwrap(), Some(1));
}

#[test]
fn test_override_wins_and_history() {
    let io = seed_plugins();
    let (registry, id, base, patch) = load_both(io);
    let collection = registry.collection(id).unwrap();

    let original = glob(&registry, id, base, 0x0000_0800);
    let overriding = glob(&registry, id, patch, 0x0000_0800);

    assert!(!collection.is_winning(original, false).unwrap());
    assert!(collection.is_winning(overriding, false).unwrap());
    assert_eq!(collection.history(overriding).unwrap(), vec![original]);
    assert_eq!(collection.history(original).unwrap(), vec![overriding]);

    let conflicts = collection.conflicts(original, false).unwrap();
    assert_eq!(conflicts, vec![original, overriding]);
    assert_eq!(collection.conflict_count(original, false).unwrap(), conflicts.len());
}

#[test]
fn test_identical_to_master() {
    let io = seed_plugins();
    let (registry, id, _, patch) = load_both(io);
    let collection = registry.collection(id).unwrap();

    let identical = collection.identical_to_master(patch).unwrap();
    assert_eq!(identical.len(), 1);
    assert_eq!(collection.identical_to_master_count(patch).unwrap(), 1);
    assert_eq!(collection.record(identical[0]).unwrap().editor_id(), Some("GameHour"));
}

#[test]
fn test_edited_override_is_no_longer_identical() {
    let io = seed_plugins();
    let (mut registry, id, _, patch) = load_both(io);
    let record = glob(&registry, id, patch, 0x0000_0800);
    let collection = registry.collection_mut(id).unwrap();

    collection.set_field(record, &FieldPath::new(8), &FieldValue::F32(12.0)).unwrap();
    assert_eq!(collection.get_field(record, &FieldPath::new(8)).unwrap(), FieldValue::F32(12.0));
    assert_eq!(collection.identical_to_master_count(patch).unwrap(), 0);

    // 撤销修改后恢复为与主文件相同
    collection.reset_record(record).unwrap();
    assert_eq!(collection.get_field(record, &FieldPath::new(8)).unwrap(), FieldValue::F32(8.0));
    assert_eq!(collection.identical_to_master_count(patch).unwrap(), 1);
}

#[test]
fn test_saved_values_survive_reload() {
    let io = seed_plugins();
    let (registry, id, _, patch) = load_both(io);
    let collection = registry.collection(id).unwrap();

    let record = glob(&registry, id, patch, 0x0000_0801);
    assert_eq!(collection.get_field(record, &FieldPath::new(8)).unwrap(), FieldValue::F32(6.0));
    assert_eq!(collection.record(record).unwrap().editor_id(), Some("TimeScale"));
    assert!(!collection.record(record).unwrap().is_changed());
}

#[test]
fn test_handles_stale_after_reload() {
    let io = seed_plugins();
    let (mut registry, id, base, _) = load_both(io);
    let record = glob(&registry, id, base, 0x0000_0800);
    let collection = registry.collection_mut(id).unwrap();

    collection.unload_plugin(base).unwrap();
    assert!(matches!(collection.record(record), Err(EspError::StaleHandle(_))));

    collection.load_plugin(base).unwrap();
    assert!(matches!(collection.record(record), Err(EspError::StaleHandle(_))));

    let reloaded = collection.find_record(base, RecordLookup::EditorId("gamehour")).unwrap();
    assert_ne!(reloaded, record);
    assert_eq!(collection.record(reloaded).unwrap().form_id(), FormId(0x0000_0800));
}

#[test]
fn test_short_and_long_form() {
    let io = seed_plugins();
    let (registry, id, base, patch) = load_both(io);
    let collection = registry.collection(id).unwrap();

    let short = collection.to_short_form(base, 0x800, false).unwrap();
    assert_eq!(short, FormId(0x0000_0800));

    let record = glob(&registry, id, patch, 0x0000_0800);
    let long = collection.to_long_form(record, short, false).unwrap();
    assert_eq!(long.plugin, "Base.esm");
    assert_eq!(long.object_id, 0x800);
    assert_eq!(collection.to_short_form(patch, 0x800, false).unwrap(), FormId(0x0100_0800));
}

#[test]
fn test_add_masters_loads_missing_master() {
    let io = seed_plugins();
    let mut registry = Registry::new();
    let id = registry.create_collection(Game::Skyrim, io, None).unwrap();
    let collection = registry.collection_mut(id).unwrap();

    let patch = collection.add_plugin("Patch.esp", PluginFlags::normal()).unwrap();
    let order = collection.load_order();
    assert_eq!(order.len(), 2);
    assert_eq!(order[1], patch);
    assert_eq!(collection.plugin_name(order[0]).unwrap(), "Base.esm");

    collection.load(None).unwrap();
    let overriding = collection.find_record(patch, RecordLookup::FormId(FormId(0x0000_0800))).unwrap();
    assert_eq!(collection.history(overriding).unwrap().len(), 1);
}

#[test]
fn test_delete_optional_field() {
    let io = Arc::new(MemoryIo::new());
    let mut registry = Registry::new();
    let id = registry.create_collection(Game::Skyrim, io, None).unwrap();
    let collection = registry.collection_mut(id).unwrap();
    let plugin = collection.add_plugin("Items.esp", new_plugin_flags()).unwrap();
    collection.load_plugin(plugin).unwrap();

    let sword = collection
        .create_record(plugin, WEAP, FormId(0), Some("IronSword"), None, CreateFlags::empty())
        .unwrap();
    let name = FieldPath::new(7);
    collection.set_field(sword, &name, &FieldValue::String("Iron Sword".into())).unwrap();
    assert_eq!(collection.get_field(sword, &name).unwrap(), FieldValue::String("Iron Sword".into()));

    collection.delete_field(sword, &name).unwrap();
    assert_eq!(collection.get_field(sword, &name).unwrap(), FieldValue::Missing);
}

#[test]
fn test_update_references_is_idempotent() {
    let io = Arc::new(MemoryIo::new());
    let mut registry = Registry::new();
    let id = registry.create_collection(Game::Skyrim, io, None).unwrap();
    let collection = registry.collection_mut(id).unwrap();
    let plugin = collection.add_plugin("Items.esp", new_plugin_flags()).unwrap();
    collection.load_plugin(plugin).unwrap();

    let enchantment = FieldPath::new(12);
    let mut swords = Vec::new();
    for editor_id in ["SwordA", "SwordB"] {
        let sword = collection
            .create_record(plugin, WEAP, FormId(0), Some(editor_id), None, CreateFlags::empty())
            .unwrap();
        collection.set_field(sword, &enchantment, &FieldValue::FormId(FormId(0x0000_0900))).unwrap();
        swords.push(sword);
    }

    let old = [FormId(0x0000_0900), FormId(0x0000_0901)];
    let new = [FormId(0x0000_0A00), FormId(0x0000_0A01)];
    let update = collection.update_references(ReferenceScope::Plugin(plugin), &old, &new).unwrap();
    assert_eq!(update.changes, vec![2, 0]);
    assert_eq!(update.total, 2);
    assert!(collection.has_updated_references(swords[0]).unwrap());
    assert_eq!(
        collection.get_field(swords[1], &enchantment).unwrap(),
        FieldValue::FormId(FormId(0x0000_0A00))
    );

    let again = collection.update_references(ReferenceScope::Plugin(plugin), &old, &new).unwrap();
    assert_eq!(again.total, 0);

    let mismatched = collection.update_references(ReferenceScope::Record(swords[0]), &old, &new[..1]);
    assert!(matches!(mismatched, Err(EspError::InvalidArgument(_))));
}

#[test]
fn test_clean_masters_on_save() {
    let io = seed_plugins();
    let mut registry = Registry::new();
    let id = registry.create_collection(Game::Skyrim, io.clone(), None).unwrap();
    let collection = registry.collection_mut(id).unwrap();
    let patch = collection.add_plugin("Patch.esp", PluginFlags::normal()).unwrap();
    collection.load(None).unwrap();

    for record in collection.records(patch, None).unwrap() {
        collection.delete_record(record).unwrap();
    }
    collection.save_plugin(patch, Some("Clean.esp"), SaveFlags::CLEAN_MASTERS, None).unwrap();
    assert!(io.get("Clean.esp").is_some());
    assert!(collection.masters(patch).unwrap().is_empty());
}

#[test]
fn test_copy_record_as_override_and_as_new() {
    let io = seed_plugins();
    let (mut registry, id, base, _) = load_both(io);
    let original = glob(&registry, id, base, 0x0000_0800);
    let collection = registry.collection_mut(id).unwrap();
    let copies = collection.add_plugin("Copies.esp", new_plugin_flags()).unwrap();
    collection.load_plugin(copies).unwrap();

    let overriding = collection
        .copy_record(original, copies, None, None, None, CreateFlags::SET_AS_OVERRIDE)
        .unwrap();
    assert_eq!(collection.record(overriding).unwrap().form_id(), FormId(0x0000_0800));
    assert_eq!(collection.get_field(overriding, &FieldPath::new(8)).unwrap(), FieldValue::F32(8.0));
    assert!(collection.is_winning(overriding, false).unwrap());
    assert_eq!(collection.conflict_count(original, false).unwrap(), 3);

    let copy = collection
        .copy_record(original, copies, None, None, Some("GameHourCopy"), CreateFlags::empty())
        .unwrap();
    let copied = collection.record(copy).unwrap();
    assert_eq!(copied.form_id().mod_index(), 2);
    assert_eq!(copied.editor_id(), Some("GameHourCopy"));
    assert_eq!(collection.conflict_count(copy, false).unwrap(), 1);
}

#[test]
fn test_copy_child_record_needs_parent() {
    let io = seed_dialogue();
    let mut registry = Registry::new();
    let id = registry.create_collection(Game::Skyrim, io, None).unwrap();
    let collection = registry.collection_mut(id).unwrap();
    let dialogue = collection.add_plugin("Dialogue.esm", PluginFlags::normal()).unwrap();
    collection.load(None).unwrap();
    let patch = collection.add_plugin("Patch.esp", new_plugin_flags()).unwrap();
    collection.load_plugin(patch).unwrap();

    let topic = collection.find_record(dialogue, RecordLookup::EditorId("Greeting")).unwrap();
    let info = collection.children(topic).unwrap()[0];

    let without_parent = collection.copy_record(info, patch, None, None, None, CreateFlags::SET_AS_OVERRIDE);
    assert!(matches!(without_parent, Err(EspError::InvalidArgument(_))));
    assert_eq!(collection.record_count(patch, None).unwrap(), 0);

    let flags = CreateFlags::SET_AS_OVERRIDE | CreateFlags::COPY_WINNING_PARENT;
    let copied = collection.copy_record(info, patch, None, None, None, flags).unwrap();
    let parent = collection.parent(copied).unwrap().expect("copied parent");
    assert_eq!(parent.plugin(), patch);
    assert_eq!(collection.record(parent).unwrap().form_id(), collection.record(topic).unwrap().form_id());
    assert_eq!(collection.children(parent).unwrap(), vec![copied]);
    assert!(collection.is_winning(parent, false).unwrap());
}

#[test]
fn test_unloaded_record_is_still_saved() {
    let io = seed_plugins();
    let (mut registry, id, _, patch) = load_both(io.clone());
    let record = glob(&registry, id, patch, 0x0000_0801);
    let collection = registry.collection_mut(id).unwrap();

    collection.unload_record(record).unwrap();
    assert!(matches!(collection.record(record), Err(EspError::StaleHandle(_))));
    assert_eq!(collection.record_count(patch, None).unwrap(), 1);
    collection.save_plugin(patch, None, SaveFlags::empty(), None).unwrap();

    let (registry, id, _, patch) = load_both(io);
    let collection = registry.collection(id).unwrap();
    assert_eq!(collection.record_count(patch, None).unwrap(), 2);
    let reloaded = glob(&registry, id, patch, 0x0000_0801);
    assert_eq!(collection.get_field(reloaded, &FieldPath::new(8)).unwrap(), FieldValue::F32(6.0));
}

#[test]
fn test_deleting_parent_drops_unloaded_children() {
    let io = seed_dialogue();
    let mut registry = Registry::new();
    let id = registry.create_collection(Game::Skyrim, io.clone(), None).unwrap();
    let collection = registry.collection_mut(id).unwrap();
    let dialogue = collection.add_plugin("Dialogue.esm", PluginFlags::normal()).unwrap();
    collection.load(None).unwrap();

    let topic = collection.find_record(dialogue, RecordLookup::EditorId("Greeting")).unwrap();
    let info = collection.children(topic).unwrap()[0];
    collection.unload_record(info).unwrap();
    collection.delete_record(topic).unwrap();
    collection.save_plugin(dialogue, Some("Trimmed.esm"), SaveFlags::empty(), None).unwrap();

    let mut registry = Registry::new();
    let id = registry.create_collection(Game::Skyrim, io, None).unwrap();
    let collection = registry.collection_mut(id).unwrap();
    let trimmed = collection.add_plugin("Trimmed.esm", PluginFlags::normal()).unwrap();
    collection.load(None).unwrap();
    assert_eq!(collection.record_count(trimmed, None).unwrap(), 0);
    assert!(collection.orphans(trimmed).unwrap().is_empty());
}

#[test]
fn test_extended_conflicts_hidden_from_normal_view() {
    let io = seed_plugins();
    let mut registry = Registry::new();
    let id = registry.create_collection(Game::Skyrim, io, None).unwrap();
    let collection = registry.collection_mut(id).unwrap();
    let base = collection.add_plugin("Base.esm", PluginFlags::normal()).unwrap();
    let patch = collection
        .add_plugin("Patch.esp", PluginFlags::normal() | PluginFlags::EXTENDED_CONFLICTS)
        .unwrap();
    collection.load(None).unwrap();

    let original = glob(&registry, id, base, 0x0000_0800);
    let extended = glob(&registry, id, patch, 0x0000_0800);
    let collection = registry.collection(id).unwrap();

    assert_eq!(collection.conflicts(original, false).unwrap(), vec![original]);
    assert_eq!(collection.conflicts(original, true).unwrap(), vec![original, extended]);
    assert!(collection.is_winning(original, false).unwrap());
    assert!(collection.is_winning(extended, true).unwrap());
    assert!(collection.history(original).unwrap().is_empty());
    assert!(matches!(collection.history(extended), Err(EspError::InvalidOperation(_))));
}

#[test]
fn test_skip_new_records() {
    let io = seed_with_new_record();
    let mut registry = Registry::new();
    let id = registry.create_collection(Game::Skyrim, io, None).unwrap();
    let collection = registry.collection_mut(id).unwrap();
    let patch = collection
        .add_plugin("Patch.esp", PluginFlags::normal() | PluginFlags::SKIP_NEW_RECORDS)
        .unwrap();
    collection.load(None).unwrap();

    assert_eq!(collection.record_count(patch, None).unwrap(), 2);
    assert!(collection.find_record(patch, RecordLookup::EditorId("PatchOnly")).is_err());
    assert!(collection.find_record(patch, RecordLookup::EditorId("GameHour")).is_ok());
}

#[test]
fn test_ignore_inactive_masters() {
    let io = seed_with_new_record();
    let mut registry = Registry::new();
    let id = registry.create_collection(Game::Skyrim, io, None).unwrap();
    let collection = registry.collection_mut(id).unwrap();
    let patch = collection
        .add_plugin("Patch.esp", PluginFlags::normal() | PluginFlags::IGNORE_INACTIVE_MASTERS)
        .unwrap();
    assert_eq!(collection.load_order(), vec![patch]);
    collection.load(None).unwrap();

    // 只剩插件自己的新记录
    assert_eq!(collection.record_count(patch, None).unwrap(), 1);
    let own = collection.find_record(patch, RecordLookup::EditorId("PatchOnly")).unwrap();
    assert_eq!(collection.record(own).unwrap().form_id().mod_index(), 0);
    assert!(!collection.is_record_invalid(own).unwrap());
}

#[test]
fn test_inactive_master_marks_records_invalid() {
    let io = seed_plugins();
    let mut registry = Registry::new();
    let id = registry.create_collection(Game::Skyrim, io, None).unwrap();
    let collection = registry.collection_mut(id).unwrap();
    let patch = collection
        .add_plugin("Patch.esp", PluginFlags::normal() - PluginFlags::ADD_MASTERS)
        .unwrap();
    collection.load(None).unwrap();

    let records = collection.records(patch, None).unwrap();
    assert_eq!(records.len(), 2);
    for record in &records {
        assert!(collection.is_record_invalid(*record).unwrap());
        assert_eq!(collection.record(*record).unwrap().form_id().mod_index(), 0xFF);
    }
    let saved = collection.save_plugin(patch, Some("Broken.esp"), SaveFlags::empty(), None);
    assert!(matches!(saved, Err(EspError::InvalidOperation(_))));
}

#[test]
fn test_mgef_codes_in_long_and_short_form() {
    let io = Arc::new(MemoryIo::new());
    let mut registry = Registry::new();
    let id = registry.create_collection(Game::Skyrim, io, None).unwrap();
    let collection = registry.collection_mut(id).unwrap();
    let plugin = collection.add_plugin("Effects.esm", new_plugin_flags()).unwrap();
    collection.load_plugin(plugin).unwrap();
    let effect = collection
        .create_record(plugin, RecordType::MGEF, FormId(0), Some("FIDG"), None, CreateFlags::empty())
        .unwrap();

    let code = MgefCode(*b"FIDG").to_u32();
    let long = collection.to_long_form(effect, FormId(code), true).unwrap();
    assert_eq!(long.plugin, "Effects.esm");
    assert_eq!(long.object_id, code);
    assert_eq!(collection.to_short_form(plugin, code, true).unwrap(), FormId(code));

    let unknown = collection.to_long_form(effect, FormId(MgefCode(*b"ZZZZ").to_u32()), true);
    assert!(matches!(unknown, Err(EspError::InvalidReference(_))));
}

#[test]
fn test_set_field_bytes() {
    let io = seed_plugins();
    let (mut registry, id, _, patch) = load_both(io);
    let record = glob(&registry, id, patch, 0x0000_0800);
    let collection = registry.collection_mut(id).unwrap();

    let value = FieldPath::new(8);
    collection.set_field_bytes(record, &value, &3.5f32.to_le_bytes()).unwrap();
    assert_eq!(collection.get_field(record, &value).unwrap(), FieldValue::F32(3.5));
    assert!(collection.record(record).unwrap().is_changed());

    let short = collection.set_field_bytes(record, &value, &[1, 2]);
    assert!(matches!(short, Err(EspError::InvalidArgument(_))));
    assert_eq!(collection.get_field(record, &value).unwrap(), FieldValue::F32(3.5));
}

#[test]
fn test_load_reports_progress() {
    let io = seed_plugins();
    let mut registry = Registry::new();
    let id = registry.create_collection(Game::Skyrim, io, None).unwrap();
    let collection = registry.collection_mut(id).unwrap();
    collection.add_plugin("Patch.esp", PluginFlags::normal()).unwrap();

    let mut seen = Vec::new();
    {
        let mut report: Box<dyn FnMut(&Progress) -> bool + '_> = Box::new(|progress| {
            seen.push((progress.position, progress.total, progress.name.to_string()));
            true
        });
        let callback: ProgressCallback<'_> = report.as_mut();
        collection.load(Some(callback)).unwrap();
    }

    assert_eq!(
        seen,
        vec![(0, 2, "Base.esm".to_string()), (1, 2, "Patch.esp".to_string())]
    );
}

#[test]
fn test_reset_refuses_identity_taken_since_rename() {
    let io = seed_plugins();
    let (mut registry, id, base, _) = load_both(io);
    let game_hour = glob(&registry, id, base, 0x0000_0800);
    let collection = registry.collection_mut(id).unwrap();

    collection.set_id_fields(game_hour, FormId(0x0000_0800), Some("Renamed")).unwrap();
    let taken = collection
        .create_record(base, GLOB, FormId(0), Some("GameHour"), None, CreateFlags::empty())
        .unwrap();

    let reset = collection.reset_record(game_hour);
    assert!(matches!(reset, Err(EspError::DuplicateIdentifier(_))));
    assert_eq!(collection.find_record(base, RecordLookup::EditorId("GameHour")).unwrap(), taken);
    assert_eq!(collection.find_record(base, RecordLookup::EditorId("Renamed")).unwrap(), game_hour);

    collection.delete_record(taken).unwrap();
    collection.reset_record(game_hour).unwrap();
    assert_eq!(collection.find_record(base, RecordLookup::EditorId("GameHour")).unwrap(), game_hour);
}
