use crate::datatypes::{RawString, RecordType};
use crate::field::{FieldKind, FieldTree, FieldValue};
use crate::formid::MgefCode;
use crate::game::Game;
use crate::subrecord::Subrecord;
use crate::utils::{EspError, Result};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// 内置记录结构定义
const RECORD_SCHEMAS: &str = include_str!("../data/record_schemas.json");

/// 四字符子记录签名
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub struct Signature(pub [u8; 4]);

impl TryFrom<String> for Signature {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, String> {
        let bytes: [u8; 4] = value
            .as_bytes()
            .try_into()
            .map_err(|_| format!("子记录签名必须是 4 个字符: {:?}", value))?;
        Ok(Signature(bytes))
    }
}

/// 联合类型的解析规则
///
/// 兄弟字段的值在 `any_of` 中，或与 `mask` 有交集时，解析为 FormID；否则解析为另一方。
#[derive(Debug, Clone, Deserialize)]
pub struct ResolveRule {
    pub field: u32,
    #[serde(default)]
    pub any_of: Vec<u32>,
    #[serde(default)]
    pub mask: u32,
}

impl ResolveRule {
    fn selects_form_id(&self, sibling: Option<&FieldValue>) -> bool {
        match sibling.and_then(FieldValue::as_u32) {
            Some(value) => self.any_of.contains(&value) || (self.mask != 0 && value & self.mask != 0),
            None => false,
        }
    }
}

/// 打包在子记录中的单个字段
#[derive(Debug, Clone, Deserialize)]
pub struct FieldDef {
    pub id: u32,
    #[serde(default)]
    pub name: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
    /// 定长字节数组的长度
    #[serde(default)]
    pub size: Option<usize>,
    #[serde(default)]
    pub resolve: Option<ResolveRule>,
}

impl FieldDef {
    /// 字段在子记录中占用的字节数；变长字段返回 `None`
    pub fn byte_size(&self) -> Option<usize> {
        self.size.or_else(|| self.kind.fixed_size())
    }
}

/// 记录布局中的一项：一个子记录（可打包多个字段），或一个重复的元素列表
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Layout {
    List {
        list: u32,
        #[serde(default)]
        name: String,
        #[serde(default)]
        required: bool,
        elements: Vec<Layout>,
    },
    Subrecord {
        signature: Signature,
        fields: Vec<FieldDef>,
    },
}

impl Layout {
    /// 该项开始时的子记录签名
    fn start_signature(&self) -> Option<Signature> {
        match self {
            Layout::Subrecord { signature, .. } => Some(*signature),
            Layout::List { elements, .. } => elements.first().and_then(Layout::start_signature),
        }
    }
}

/// 按 ID 查到的字段定义
#[derive(Debug, Clone, Copy)]
pub enum FieldSpec<'a> {
    Scalar(&'a FieldDef),
    List { id: u32, required: bool, elements: &'a [Layout] },
}

impl<'a> FieldSpec<'a> {
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldSpec::Scalar(def) => def.kind,
            FieldSpec::List { .. } => FieldKind::List,
        }
    }

    pub fn required(&self) -> bool {
        match self {
            FieldSpec::Scalar(def) => def.required,
            FieldSpec::List { required, .. } => *required,
        }
    }

    /// 列表元素的布局
    pub fn elements(&self) -> Option<&'a [Layout]> {
        match self {
            FieldSpec::List { elements, .. } => Some(elements),
            FieldSpec::Scalar(_) => None,
        }
    }
}

/// 在布局中按字段 ID 查找
pub fn find_field(layout: &[Layout], id: u32) -> Option<FieldSpec<'_>> {
    layout.iter().find_map(|entry| match entry {
        Layout::Subrecord { fields, .. } => fields.iter().find(|def| def.id == id).map(FieldSpec::Scalar),
        Layout::List { list, required, elements, .. } if *list == id => {
            Some(FieldSpec::List { id: *list, required: *required, elements })
        }
        Layout::List { .. } => None,
    })
}

/// 布局中必需字段的默认值
pub fn default_tree(layout: &[Layout]) -> FieldTree {
    let mut tree = FieldTree::new();
    for entry in layout {
        match entry {
            Layout::Subrecord { fields, .. } => {
                for def in fields.iter().filter(|def| def.required) {
                    tree.insert(def.id, default_value(def));
                }
            }
            Layout::List { list, required: true, .. } => {
                tree.insert(*list, FieldValue::List(Vec::new()));
            }
            Layout::List { .. } => {}
        }
    }
    tree
}

fn default_value(def: &FieldDef) -> FieldValue {
    match (def.kind, def.size) {
        (FieldKind::ByteArray, Some(size)) => FieldValue::ByteArray(vec![0; size]),
        (kind, _) => FieldValue::default_for(kind),
    }
}

/// 单个记录类型的结构定义
#[derive(Debug, Clone, Deserialize)]
pub struct RecordSchema {
    pub layout: Vec<Layout>,
}

impl RecordSchema {
    pub fn field(&self, id: u32) -> Option<FieldSpec<'_>> {
        find_field(&self.layout, id)
    }
}

/// 解码结果
#[derive(Debug, Clone, Default)]
pub struct DecodedRecord {
    pub editor_id: Option<String>,
    pub fields: FieldTree,
}

/// 记录编解码器
///
/// 负责某个游戏全部记录类型的子记录数据与字段树之间的转换。
/// FormID 保持文件相对形式，由集合负责在加载和保存时映射。
pub trait RecordCodec: Send + Sync {
    /// 记录类型的结构定义；未知类型返回 `None`
    fn schema(&self, record_type: RecordType) -> Option<&RecordSchema>;

    /// 将子记录数据解码为字段树
    fn decode(&self, record_type: RecordType, data: &[u8]) -> Result<DecodedRecord>;

    /// 将字段树编码为子记录数据
    fn encode(&self, record_type: RecordType, editor_id: Option<&str>, fields: &FieldTree) -> Result<Vec<u8>>;

    /// 两棵同类型字段树是否结构相等
    fn fields_equal(&self, _record_type: RecordType, a: &FieldTree, b: &FieldTree) -> bool {
        a.structurally_equals(b)
    }

    /// 新建记录的默认字段
    fn default_fields(&self, record_type: RecordType) -> FieldTree {
        self.schema(record_type)
            .map(|schema| default_tree(&schema.layout))
            .unwrap_or_default()
    }
}

type SchemaFile = HashMap<String, HashMap<String, RecordSchema>>;

/// 基于结构定义的默认编解码器
#[derive(Debug, Clone)]
pub struct SchemaCodec {
    game: Game,
    schemas: HashMap<RecordType, RecordSchema>,
}

impl SchemaCodec {
    /// 使用内置结构定义
    pub fn for_game(game: Game) -> Result<Self> {
        Self::from_json(game, RECORD_SCHEMAS)
    }

    /// 从 JSON 加载结构定义
    ///
    /// JSON 顶层键为 `common` 或游戏键（见 [`Game::schema_key`]），
    /// 游戏专属定义覆盖 `common` 中的同名类型。
    pub fn from_json(game: Game, json: &str) -> Result<Self> {
        let mut file: SchemaFile = serde_json::from_str(json)?;
        let mut schemas = HashMap::new();

        for section in ["common", game.schema_key()] {
            if let Some(types) = file.remove(section) {
                for (name, schema) in types {
                    let record_type = RecordType::parse(&name).ok_or_else(|| {
                        EspError::InvalidFormat(format!("记录类型必须是 4 个字符: {:?}", name))
                    })?;
                    validate_layout(&schema.layout).map_err(|message| {
                        EspError::InvalidFormat(format!("{} 结构定义无效: {}", name, message))
                    })?;
                    schemas.insert(record_type, schema);
                }
            }
        }

        tracing::debug!("{} 记录结构定义: {} 种类型", game, schemas.len());
        Ok(SchemaCodec { game, schemas })
    }

    /// 包装为共享的编解码器
    pub fn shared(self) -> Arc<dyn RecordCodec> {
        Arc::new(self)
    }

    pub fn game(&self) -> Game {
        self.game
    }

    pub fn record_types(&self) -> impl Iterator<Item = RecordType> + '_ {
        self.schemas.keys().copied()
    }

    fn decode_tree(
        &self,
        layout: &[Layout],
        subrecords: &[Subrecord],
        pos: &mut usize,
        tree: &mut FieldTree,
        element_start: Option<Signature>,
    ) -> Result<()> {
        let mut seen: HashSet<[u8; 4]> = HashSet::new();
        let mut consumed = false;

        while let Some(subrecord) = subrecords.get(*pos) {
            let signature = subrecord.signature;
            if let Some(start) = element_start {
                // 元素起始签名再次出现，或已出现过的子记录重复，视为下一个元素
                if consumed && (signature == start.0 || seen.contains(&signature)) {
                    break;
                }
            }

            let entry = layout.iter().find(|entry| match entry {
                Layout::Subrecord { signature: s, .. } => s.0 == signature && !seen.contains(&signature),
                Layout::List { .. } => entry.start_signature().is_some_and(|s| s.0 == signature),
            });

            match entry {
                Some(Layout::Subrecord { fields, .. }) => {
                    if !decode_packed(fields, &subrecord.data, tree)? {
                        tracing::debug!("子记录 {} 长度与结构定义不符，按原样保留", subrecord.signature_str());
                        tree.extra.push(subrecord.clone());
                    }
                    seen.insert(signature);
                    consumed = true;
                    *pos += 1;
                }
                Some(Layout::List { list: id, elements, .. }) => {
                    let before = *pos;
                    let start = elements.first().and_then(Layout::start_signature);
                    let mut element = FieldTree::new();
                    self.decode_tree(elements, subrecords, pos, &mut element, start)?;
                    if *pos == before {
                        tree.extra.push(subrecord.clone());
                        *pos += 1;
                        continue;
                    }
                    self.resolve_unions(elements, &mut element);
                    match tree.get_mut(*id) {
                        Some(FieldValue::List(items)) => items.push(element),
                        _ => {
                            tree.insert(*id, FieldValue::List(vec![element]));
                        }
                    }
                    consumed = true;
                }
                None if element_start.is_some() => break,
                None => {
                    tree.extra.push(subrecord.clone());
                    *pos += 1;
                }
            }
        }

        Ok(())
    }

    /// 按兄弟字段解析联合类型
    fn resolve_unions(&self, layout: &[Layout], tree: &mut FieldTree) {
        for entry in layout {
            let Layout::Subrecord { fields, .. } = entry else { continue };
            for def in fields.iter().filter(|def| def.kind.is_union()) {
                let Some(FieldValue::FormId(raw)) = tree.get(def.id).cloned() else { continue };
                let as_form_id = match &def.resolve {
                    Some(rule) => rule.selects_form_id(tree.get(rule.field)),
                    None => !(def.kind == FieldKind::FormIdOrMgefCode && self.game == Game::Oblivion),
                };
                if as_form_id {
                    continue;
                }
                let resolved = match def.kind {
                    FieldKind::FormIdOrU32 => FieldValue::U32(raw.0),
                    FieldKind::FormIdOrMgefCode => FieldValue::MgefCode(MgefCode::from_u32(raw.0)),
                    FieldKind::FormIdOrFloat => FieldValue::F32(f32::from_bits(raw.0)),
                    _ => continue,
                };
                tree.insert(def.id, resolved);
            }
        }
    }

    fn encode_tree(&self, layout: &[Layout], tree: &FieldTree, output: &mut Vec<Subrecord>) -> Result<()> {
        for entry in layout {
            match entry {
                Layout::Subrecord { signature, fields } => {
                    if !fields.iter().any(|def| tree.contains(def.id)) {
                        continue;
                    }
                    let mut data = Vec::new();
                    for def in fields {
                        let value = match tree.get(def.id) {
                            Some(FieldValue::Missing) | None => default_value(def),
                            Some(value) => value.clone(),
                        };
                        let mut bytes = value.to_le_bytes();
                        if let Some(size) = def.size {
                            bytes.resize(size, 0);
                        }
                        data.extend_from_slice(&bytes);
                    }
                    output.push(Subrecord::new(signature.0, data));
                }
                Layout::List { list, elements, .. } => {
                    match tree.get(*list) {
                        Some(FieldValue::List(items)) => {
                            for item in items {
                                self.encode_tree(elements, item, output)?;
                                output.extend(item.extra.iter().cloned());
                            }
                        }
                        Some(FieldValue::Missing) | None => {}
                        Some(other) => {
                            return Err(EspError::InvalidArgument(format!(
                                "字段 {} 应为列表，实际为 {:?}", list, other.kind()
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// 每个子记录最多一个变长字段（变长字段占用定长字段以外的全部字节）
fn validate_layout(layout: &[Layout]) -> std::result::Result<(), String> {
    for entry in layout {
        match entry {
            Layout::Subrecord { signature, fields } => {
                let variable = fields.iter().filter(|def| def.byte_size().is_none()).count();
                if variable > 1 {
                    return Err(format!(
                        "子记录 {} 有 {} 个变长字段",
                        String::from_utf8_lossy(&signature.0),
                        variable
                    ));
                }
            }
            Layout::List { elements, .. } => validate_layout(elements)?,
        }
    }
    Ok(())
}

/// 解码一个打包子记录；长度与定义不符时返回 `false`
fn decode_packed(fields: &[FieldDef], data: &[u8], tree: &mut FieldTree) -> Result<bool> {
    let fixed: usize = fields.iter().filter_map(FieldDef::byte_size).sum();
    let has_variable = fields.iter().any(|def| def.byte_size().is_none());
    if data.len() < fixed || (!has_variable && data.len() != fixed) {
        return Ok(false);
    }

    let mut offset = 0;
    for def in fields {
        let size = def.byte_size().unwrap_or(data.len() - fixed);
        let Some(bytes) = data.get(offset..offset + size) else { return Ok(false) };
        offset += size;
        let value = match def.kind {
            FieldKind::ByteArray => FieldValue::ByteArray(bytes.to_vec()),
            kind => FieldValue::from_le_bytes(kind, bytes)?,
        };
        tree.insert(def.id, value);
    }
    Ok(true)
}

impl RecordCodec for SchemaCodec {
    fn schema(&self, record_type: RecordType) -> Option<&RecordSchema> {
        self.schemas.get(&record_type)
    }

    fn decode(&self, record_type: RecordType, data: &[u8]) -> Result<DecodedRecord> {
        let mut subrecords = Subrecord::parse_all(data)?;

        let editor_id = match subrecords.iter().position(|sr| &sr.signature == b"EDID") {
            Some(index) => Some(RawString::parse_zstring(&subrecords.remove(index).data).content),
            None => None,
        };

        let mut fields = FieldTree::new();
        match self.schemas.get(&record_type) {
            Some(schema) => {
                let mut pos = 0;
                self.decode_tree(&schema.layout, &subrecords, &mut pos, &mut fields, None)?;
                self.resolve_unions(&schema.layout, &mut fields);
            }
            None => fields.extra = subrecords,
        }

        Ok(DecodedRecord { editor_id, fields })
    }

    fn encode(&self, record_type: RecordType, editor_id: Option<&str>, fields: &FieldTree) -> Result<Vec<u8>> {
        let mut output = Vec::new();
        if let Some(editor_id) = editor_id {
            output.push(Subrecord::new(*b"EDID", RawString::encode_zstring(editor_id)));
        }
        if let Some(schema) = self.schemas.get(&record_type) {
            self.encode_tree(&schema.layout, fields, &mut output)?;
        }
        output.extend(fields.extra.iter().cloned());
        Ok(Subrecord::write_all(&output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formid::FormId;

    fn sub(signature: &[u8; 4], data: Vec<u8>) -> Subrecord {
        Subrecord::new(*signature, data)
    }

    fn bytes(parts: &[&[u8]]) -> Vec<u8> {
        parts.concat()
    }

    #[test]
    fn test_builtin_schemas_load() {
        for game in Game::ALL {
            let codec = SchemaCodec::for_game(game).unwrap();
            assert!(codec.schema(RecordType(*b"GLOB")).is_some(), "{} 缺少 GLOB", game);
            assert!(codec.schema(RecordType(*b"SPEL")).is_some(), "{} 缺少 SPEL", game);
        }
    }

    #[test]
    fn test_decode_glob() {
        let codec = SchemaCodec::for_game(Game::Skyrim).unwrap();
        let data = Subrecord::write_all(&[
            sub(b"EDID", b"GameHour\0".to_vec()),
            sub(b"FNAM", vec![b'f']),
            sub(b"FLTV", 12.5f32.to_le_bytes().to_vec()),
        ]);

        let decoded = codec.decode(RecordType(*b"GLOB"), &data).unwrap();
        assert_eq!(decoded.editor_id.as_deref(), Some("GameHour"));
        assert_eq!(decoded.fields.get(8), Some(&FieldValue::F32(12.5)));
        assert!(decoded.fields.extra.is_empty());

        let encoded = codec.encode(RecordType(*b"GLOB"), Some("GameHour"), &decoded.fields).unwrap();
        assert_eq!(encoded, data);
    }

    #[test]
    fn test_decode_nested_effect_lists() {
        let codec = SchemaCodec::for_game(Game::Skyrim).unwrap();
        let ctda = |function: u16, param: u32| {
            bytes(&[
                &[0u8], &[0, 0, 0], &1.0f32.to_le_bytes(), &function.to_le_bytes(),
                &[0, 0], &param.to_le_bytes(), &0u32.to_le_bytes(),
            ])
        };
        let efit = bytes(&[&5.0f32.to_le_bytes(), &0u32.to_le_bytes(), &30u32.to_le_bytes()]);
        let data = Subrecord::write_all(&[
            sub(b"EDID", b"Flames\0".to_vec()),
            sub(b"EFID", 0x0001_2FCDu32.to_le_bytes().to_vec()),
            sub(b"EFIT", efit.clone()),
            sub(b"CTDA", ctda(72, 0x0000_0014)),
            sub(b"CTDA", ctda(14, 5)),
            sub(b"EFID", 0x0001_2FCEu32.to_le_bytes().to_vec()),
            sub(b"EFIT", efit),
        ]);

        let decoded = codec.decode(RecordType(*b"SPEL"), &data).unwrap();
        let Some(FieldValue::List(effects)) = decoded.fields.get(11) else {
            panic!("effects should decode as a list");
        };
        assert_eq!(effects.len(), 2);
        assert_eq!(effects[0].get(1), Some(&FieldValue::FormId(FormId(0x0001_2FCD))));

        let Some(FieldValue::List(conditions)) = effects[0].get(5) else {
            panic!("conditions should decode as a list");
        };
        assert_eq!(conditions.len(), 2);
        // GetIsID 的参数是 FormID，GetActorValue 的参数是普通整数
        assert_eq!(conditions[0].get(6), Some(&FieldValue::FormId(FormId(0x14))));
        assert_eq!(conditions[1].get(6), Some(&FieldValue::U32(5)));
        assert_eq!(conditions[0].get(3), Some(&FieldValue::F32(1.0)));

        let encoded = codec.encode(RecordType(*b"SPEL"), Some("Flames"), &decoded.fields).unwrap();
        assert_eq!(encoded, data);
    }

    #[test]
    fn test_oblivion_script_visual_is_mgef_code() {
        let codec = SchemaCodec::for_game(Game::Oblivion).unwrap();
        let scit = bytes(&[&0x0000_1234u32.to_le_bytes(), &2u32.to_le_bytes(), b"FIDG", &[1u8], &[0, 0, 0]]);
        let data = Subrecord::write_all(&[
            sub(b"EFID", b"SEFF".to_vec()),
            sub(b"EFIT", bytes(&[b"SEFF", &0u32.to_le_bytes(), &0u32.to_le_bytes(), &10u32.to_le_bytes(), &0u32.to_le_bytes(), &0u32.to_le_bytes()])),
            sub(b"SCIT", scit),
        ]);

        let decoded = codec.decode(RecordType(*b"SPEL"), &data).unwrap();
        let Some(FieldValue::List(effects)) = decoded.fields.get(11) else {
            panic!("effects should decode as a list");
        };
        assert_eq!(effects[0].get(1), Some(&FieldValue::MgefCode(MgefCode(*b"SEFF"))));
        assert_eq!(effects[0].get(8), Some(&FieldValue::FormId(FormId(0x1234))));
        assert_eq!(effects[0].get(10), Some(&FieldValue::MgefCode(MgefCode(*b"FIDG"))));
    }

    #[test]
    fn test_unknown_type_and_subrecords_are_preserved() {
        let codec = SchemaCodec::for_game(Game::Skyrim).unwrap();
        let data = Subrecord::write_all(&[
            sub(b"EDID", b"Thing\0".to_vec()),
            sub(b"ZZZZ", vec![1, 2, 3]),
        ]);

        let unknown = codec.decode(RecordType(*b"XYZW"), &data).unwrap();
        assert_eq!(unknown.fields.extra.len(), 1);
        assert_eq!(codec.encode(RecordType(*b"XYZW"), Some("Thing"), &unknown.fields).unwrap(), data);

        let glob = codec.decode(RecordType(*b"GLOB"), &data).unwrap();
        assert_eq!(glob.fields.extra, vec![sub(b"ZZZZ", vec![1, 2, 3])]);
    }

    #[test]
    fn test_mismatched_subrecord_size_goes_to_extra() {
        let codec = SchemaCodec::for_game(Game::Skyrim).unwrap();
        let data = Subrecord::write_all(&[sub(b"FLTV", vec![1, 2])]);
        let decoded = codec.decode(RecordType(*b"GLOB"), &data).unwrap();
        assert!(!decoded.fields.contains(8));
        assert_eq!(decoded.fields.extra.len(), 1);
    }

    #[test]
    fn test_default_fields_fill_required() {
        let codec = SchemaCodec::for_game(Game::Skyrim).unwrap();
        let defaults = codec.default_fields(RecordType(*b"GLOB"));
        assert_eq!(defaults.get(7), Some(&FieldValue::U8Enum(0)));
        assert_eq!(defaults.get(8), Some(&FieldValue::F32(0.0)));
    }

    #[test]
    fn test_invalid_signature_in_json() {
        let json = r#"{"common": {"GLOB": {"layout": [{"signature": "TOOLONG", "fields": []}]}}}"#;
        assert!(SchemaCodec::from_json(Game::Skyrim, json).is_err());
    }

    #[test]
    fn test_two_variable_fields_in_json() {
        let json = r#"{"common": {"GLOB": {"layout": [{"signature": "DATA", "fields": [
            {"id": 7, "kind": "byte_array"},
            {"id": 8, "kind": "byte_array"}
        ]}]}}}"#;
        let result = SchemaCodec::from_json(Game::Skyrim, json);
        assert!(matches!(result, Err(EspError::InvalidFormat(_))));

        // 列表元素中的子记录同样检查
        let nested = r#"{"common": {"SPEL": {"layout": [{"list": 11, "elements": [
            {"signature": "EFID", "fields": [{"id": 1, "kind": "string"}, {"id": 2, "kind": "byte_array"}]}
        ]}]}}}"#;
        assert!(matches!(SchemaCodec::from_json(Game::Skyrim, nested), Err(EspError::InvalidFormat(_))));

        // 一个变长字段加定长字段是允许的
        let single = r#"{"common": {"GLOB": {"layout": [{"signature": "DATA", "fields": [
            {"id": 7, "kind": "u32"},
            {"id": 8, "kind": "byte_array"}
        ]}]}}}"#;
        let codec = SchemaCodec::from_json(Game::Skyrim, single).unwrap();
        let data = Subrecord::write_all(&[sub(b"DATA", vec![1, 0, 0, 0, 9, 9])]);
        let decoded = codec.decode(RecordType(*b"GLOB"), &data).unwrap();
        assert_eq!(decoded.fields.get(7), Some(&FieldValue::U32(1)));
        assert_eq!(decoded.fields.get(8), Some(&FieldValue::ByteArray(vec![9, 9])));
    }
}
