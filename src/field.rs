use crate::formid::{FormId, MgefCode};
use crate::subrecord::Subrecord;
use crate::utils::{EspError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;

/// 记录头部字段：标志位
pub const FIELD_FLAGS: u32 = 1;
/// 记录头部字段：FormID
pub const FIELD_FORM_ID: u32 = 2;
/// 记录头部字段：版本控制信息
pub const FIELD_VERSION_CONTROL: u32 = 3;
/// 记录头部字段：EditorID
pub const FIELD_EDITOR_ID: u32 = 4;
/// 记录头部字段：内部版本
pub const FIELD_FORM_VERSION: u32 = 5;
/// 结构定义字段的起始 ID
pub const FIRST_SCHEMA_FIELD: u32 = 7;

/// 字段的语义类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Unknown,
    Missing,
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
    Radian,
    FormId,
    MgefCode,
    ActorValue,
    U8Enum,
    U16Enum,
    U32Enum,
    U8Flags,
    U16Flags,
    U32Flags,
    String,
    IString,
    Char4,
    ByteArray,
    U32Array,
    FormIdArray,
    List,
    /// FormID 或普通整数
    FormIdOrU32,
    /// FormID 或魔法效果代码
    FormIdOrMgefCode,
    /// FormID 或浮点数
    FormIdOrFloat,
}

impl FieldKind {
    /// 是否为联合类型（解码时按规则解析为具体类型）
    pub fn is_union(self) -> bool {
        matches!(self, FieldKind::FormIdOrU32 | FieldKind::FormIdOrMgefCode | FieldKind::FormIdOrFloat)
    }

    /// 联合类型中非 FormID 的一方
    pub fn union_alternative(self) -> Option<FieldKind> {
        match self {
            FieldKind::FormIdOrU32 => Some(FieldKind::U32),
            FieldKind::FormIdOrMgefCode => Some(FieldKind::MgefCode),
            FieldKind::FormIdOrFloat => Some(FieldKind::F32),
            _ => None,
        }
    }

    /// 声明为 `self` 的字段能否保存 `value` 类型的值
    pub fn accepts(self, value: FieldKind) -> bool {
        if self == value {
            return true;
        }
        match self.union_alternative() {
            Some(alternative) => value == FieldKind::FormId || value == alternative,
            None => false,
        }
    }

    /// 定长类型的字节数；变长类型返回 `None`
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            FieldKind::Bool | FieldKind::I8 | FieldKind::U8 | FieldKind::U8Enum | FieldKind::U8Flags => Some(1),
            FieldKind::I16 | FieldKind::U16 | FieldKind::U16Enum | FieldKind::U16Flags => Some(2),
            FieldKind::I32
            | FieldKind::U32
            | FieldKind::F32
            | FieldKind::Radian
            | FieldKind::FormId
            | FieldKind::MgefCode
            | FieldKind::ActorValue
            | FieldKind::U32Enum
            | FieldKind::U32Flags
            | FieldKind::Char4
            | FieldKind::FormIdOrU32
            | FieldKind::FormIdOrMgefCode
            | FieldKind::FormIdOrFloat => Some(4),
            _ => None,
        }
    }
}

/// 字段值
///
/// 联合类型在解码时已经解析为具体变体，因此值本身不会是联合类型。
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Missing,
    Unknown(Vec<u8>),
    Bool(bool),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    F32(f32),
    Radian(f32),
    FormId(FormId),
    MgefCode(MgefCode),
    ActorValue(u32),
    U8Enum(u8),
    U16Enum(u16),
    U32Enum(u32),
    U8Flags(u8),
    U16Flags(u16),
    U32Flags(u32),
    String(String),
    IString(String),
    Char4([u8; 4]),
    ByteArray(Vec<u8>),
    U32Array(Vec<u32>),
    FormIdArray(Vec<FormId>),
    List(Vec<FieldTree>),
}

impl FieldValue {
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValue::Missing => FieldKind::Missing,
            FieldValue::Unknown(_) => FieldKind::Unknown,
            FieldValue::Bool(_) => FieldKind::Bool,
            FieldValue::I8(_) => FieldKind::I8,
            FieldValue::U8(_) => FieldKind::U8,
            FieldValue::I16(_) => FieldKind::I16,
            FieldValue::U16(_) => FieldKind::U16,
            FieldValue::I32(_) => FieldKind::I32,
            FieldValue::U32(_) => FieldKind::U32,
            FieldValue::F32(_) => FieldKind::F32,
            FieldValue::Radian(_) => FieldKind::Radian,
            FieldValue::FormId(_) => FieldKind::FormId,
            FieldValue::MgefCode(_) => FieldKind::MgefCode,
            FieldValue::ActorValue(_) => FieldKind::ActorValue,
            FieldValue::U8Enum(_) => FieldKind::U8Enum,
            FieldValue::U16Enum(_) => FieldKind::U16Enum,
            FieldValue::U32Enum(_) => FieldKind::U32Enum,
            FieldValue::U8Flags(_) => FieldKind::U8Flags,
            FieldValue::U16Flags(_) => FieldKind::U16Flags,
            FieldValue::U32Flags(_) => FieldKind::U32Flags,
            FieldValue::String(_) => FieldKind::String,
            FieldValue::IString(_) => FieldKind::IString,
            FieldValue::Char4(_) => FieldKind::Char4,
            FieldValue::ByteArray(_) => FieldKind::ByteArray,
            FieldValue::U32Array(_) => FieldKind::U32Array,
            FieldValue::FormIdArray(_) => FieldKind::FormIdArray,
            FieldValue::List(_) => FieldKind::List,
        }
    }

    /// 类型的默认值（新建记录或追加列表元素时填充必需字段）
    pub fn default_for(kind: FieldKind) -> FieldValue {
        match kind {
            FieldKind::Missing => FieldValue::Missing,
            FieldKind::Unknown => FieldValue::Unknown(Vec::new()),
            FieldKind::Bool => FieldValue::Bool(false),
            FieldKind::I8 => FieldValue::I8(0),
            FieldKind::U8 => FieldValue::U8(0),
            FieldKind::I16 => FieldValue::I16(0),
            FieldKind::U16 => FieldValue::U16(0),
            FieldKind::I32 => FieldValue::I32(0),
            FieldKind::U32 => FieldValue::U32(0),
            FieldKind::F32 => FieldValue::F32(0.0),
            FieldKind::Radian => FieldValue::Radian(0.0),
            FieldKind::FormId
            | FieldKind::FormIdOrU32
            | FieldKind::FormIdOrMgefCode
            | FieldKind::FormIdOrFloat => FieldValue::FormId(FormId::NULL),
            FieldKind::MgefCode => FieldValue::MgefCode(MgefCode::default()),
            FieldKind::ActorValue => FieldValue::ActorValue(0),
            FieldKind::U8Enum => FieldValue::U8Enum(0),
            FieldKind::U16Enum => FieldValue::U16Enum(0),
            FieldKind::U32Enum => FieldValue::U32Enum(0),
            FieldKind::U8Flags => FieldValue::U8Flags(0),
            FieldKind::U16Flags => FieldValue::U16Flags(0),
            FieldKind::U32Flags => FieldValue::U32Flags(0),
            FieldKind::String => FieldValue::String(String::new()),
            FieldKind::IString => FieldValue::IString(String::new()),
            FieldKind::Char4 => FieldValue::Char4([0; 4]),
            FieldKind::ByteArray => FieldValue::ByteArray(Vec::new()),
            FieldKind::U32Array => FieldValue::U32Array(Vec::new()),
            FieldKind::FormIdArray => FieldValue::FormIdArray(Vec::new()),
            FieldKind::List => FieldValue::List(Vec::new()),
        }
    }

    /// 按声明类型解析小端字节
    ///
    /// 联合类型解析为 FormID。
    pub fn from_le_bytes(kind: FieldKind, bytes: &[u8]) -> Result<FieldValue> {
        if let Some(size) = kind.fixed_size() {
            if bytes.len() != size {
                return Err(EspError::InvalidArgument(format!(
                    "{:?} 字段需要 {} 字节，实际 {} 字节", kind, size, bytes.len()
                )));
            }
        }

        let u16_at = |b: &[u8]| u16::from_le_bytes([b[0], b[1]]);
        let u32_at = |b: &[u8]| u32::from_le_bytes([b[0], b[1], b[2], b[3]]);

        let value = match kind {
            FieldKind::Missing => FieldValue::Missing,
            FieldKind::Unknown => FieldValue::Unknown(bytes.to_vec()),
            FieldKind::Bool => FieldValue::Bool(bytes[0] != 0),
            FieldKind::I8 => FieldValue::I8(bytes[0] as i8),
            FieldKind::U8 => FieldValue::U8(bytes[0]),
            FieldKind::U8Enum => FieldValue::U8Enum(bytes[0]),
            FieldKind::U8Flags => FieldValue::U8Flags(bytes[0]),
            FieldKind::I16 => FieldValue::I16(u16_at(bytes) as i16),
            FieldKind::U16 => FieldValue::U16(u16_at(bytes)),
            FieldKind::U16Enum => FieldValue::U16Enum(u16_at(bytes)),
            FieldKind::U16Flags => FieldValue::U16Flags(u16_at(bytes)),
            FieldKind::I32 => FieldValue::I32(u32_at(bytes) as i32),
            FieldKind::U32 => FieldValue::U32(u32_at(bytes)),
            FieldKind::U32Enum => FieldValue::U32Enum(u32_at(bytes)),
            FieldKind::U32Flags => FieldValue::U32Flags(u32_at(bytes)),
            FieldKind::ActorValue => FieldValue::ActorValue(u32_at(bytes)),
            FieldKind::F32 => FieldValue::F32(f32::from_bits(u32_at(bytes))),
            FieldKind::Radian => FieldValue::Radian(f32::from_bits(u32_at(bytes))),
            FieldKind::FormId
            | FieldKind::FormIdOrU32
            | FieldKind::FormIdOrMgefCode
            | FieldKind::FormIdOrFloat => FieldValue::FormId(FormId(u32_at(bytes))),
            FieldKind::MgefCode => FieldValue::MgefCode(MgefCode::from_u32(u32_at(bytes))),
            FieldKind::Char4 => FieldValue::Char4([bytes[0], bytes[1], bytes[2], bytes[3]]),
            FieldKind::String | FieldKind::IString => {
                let text = crate::datatypes::RawString::parse_zstring(bytes).content;
                if kind == FieldKind::String {
                    FieldValue::String(text)
                } else {
                    FieldValue::IString(text)
                }
            }
            FieldKind::ByteArray => FieldValue::ByteArray(bytes.to_vec()),
            FieldKind::U32Array | FieldKind::FormIdArray => {
                if bytes.len() % 4 != 0 {
                    return Err(EspError::InvalidArgument(format!(
                        "{:?} 字段长度必须是 4 的倍数，实际 {} 字节", kind, bytes.len()
                    )));
                }
                let values = bytes.chunks_exact(4).map(u32_at);
                if kind == FieldKind::U32Array {
                    FieldValue::U32Array(values.collect())
                } else {
                    FieldValue::FormIdArray(values.map(FormId).collect())
                }
            }
            FieldKind::List => {
                return Err(EspError::InvalidArgument("列表字段不能从原始字节设置".into()));
            }
        };
        Ok(value)
    }

    /// 序列化为小端字节（字符串以 NULL 结尾）
    pub fn to_le_bytes(&self) -> Vec<u8> {
        match self {
            FieldValue::Missing | FieldValue::List(_) => Vec::new(),
            FieldValue::Unknown(bytes) | FieldValue::ByteArray(bytes) => bytes.clone(),
            FieldValue::Bool(v) => vec![u8::from(*v)],
            FieldValue::I8(v) => v.to_le_bytes().to_vec(),
            FieldValue::U8(v) | FieldValue::U8Enum(v) | FieldValue::U8Flags(v) => vec![*v],
            FieldValue::I16(v) => v.to_le_bytes().to_vec(),
            FieldValue::U16(v) | FieldValue::U16Enum(v) | FieldValue::U16Flags(v) => v.to_le_bytes().to_vec(),
            FieldValue::I32(v) => v.to_le_bytes().to_vec(),
            FieldValue::U32(v)
            | FieldValue::U32Enum(v)
            | FieldValue::U32Flags(v)
            | FieldValue::ActorValue(v) => v.to_le_bytes().to_vec(),
            FieldValue::F32(v) | FieldValue::Radian(v) => v.to_le_bytes().to_vec(),
            FieldValue::FormId(id) => id.0.to_le_bytes().to_vec(),
            FieldValue::MgefCode(code) => code.0.to_vec(),
            FieldValue::Char4(chars) => chars.to_vec(),
            FieldValue::String(text) | FieldValue::IString(text) => {
                crate::datatypes::RawString::encode_zstring(text)
            }
            FieldValue::U32Array(values) => values.iter().flat_map(|v| v.to_le_bytes()).collect(),
            FieldValue::FormIdArray(ids) => ids.iter().flat_map(|id| id.0.to_le_bytes()).collect(),
        }
    }

    /// 解释为无符号整数（用于联合类型的解析规则）
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            FieldValue::Bool(v) => Some(u32::from(*v)),
            FieldValue::U8(v) | FieldValue::U8Enum(v) | FieldValue::U8Flags(v) => Some(*v as u32),
            FieldValue::U16(v) | FieldValue::U16Enum(v) | FieldValue::U16Flags(v) => Some(*v as u32),
            FieldValue::U32(v)
            | FieldValue::U32Enum(v)
            | FieldValue::U32Flags(v)
            | FieldValue::ActorValue(v) => Some(*v),
            FieldValue::I8(v) => Some(*v as u32),
            FieldValue::I16(v) => Some(*v as u32),
            FieldValue::I32(v) => Some(*v as u32),
            FieldValue::FormId(id) => Some(id.0),
            _ => None,
        }
    }

    /// 不区分大小写的字符串比较
    fn loosely_equals(&self, other: &FieldValue) -> bool {
        match (self, other) {
            (FieldValue::IString(a), FieldValue::IString(b)) => a.eq_ignore_ascii_case(b),
            (FieldValue::F32(a), FieldValue::F32(b)) | (FieldValue::Radian(a), FieldValue::Radian(b)) => {
                a.to_bits() == b.to_bits() || a == b
            }
            (FieldValue::List(a), FieldValue::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.structurally_equals(y))
            }
            _ => self == other,
        }
    }
}

/// 记录（或列表元素）的字段树
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldTree {
    fields: BTreeMap<u32, FieldValue>,
    /// 未被结构定义识别的子记录，按原样保留
    pub extra: Vec<Subrecord>,
}

impl FieldTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: u32) -> Option<&FieldValue> {
        self.fields.get(&id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut FieldValue> {
        self.fields.get_mut(&id)
    }

    pub fn insert(&mut self, id: u32, value: FieldValue) -> Option<FieldValue> {
        self.fields.insert(id, value)
    }

    pub fn remove(&mut self, id: u32) -> Option<FieldValue> {
        self.fields.remove(&id)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.fields.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &FieldValue)> {
        self.fields.iter().map(|(id, value)| (*id, value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.extra.is_empty()
    }

    /// 按字段语义比较（不区分大小写字符串、浮点按位比较）
    pub fn structurally_equals(&self, other: &FieldTree) -> bool {
        self.fields.len() == other.fields.len()
            && self.extra == other.extra
            && self.fields.iter().all(|(id, value)| {
                other.fields.get(id).is_some_and(|theirs| value.loosely_equals(theirs))
            })
    }

    /// 遍历所有 FormID（递归进入列表）
    pub fn for_each_form_id(&self, visit: &mut dyn FnMut(FormId)) {
        for value in self.fields.values() {
            match value {
                FieldValue::FormId(id) => visit(*id),
                FieldValue::FormIdArray(ids) => ids.iter().for_each(|id| visit(*id)),
                FieldValue::List(elements) => {
                    elements.iter().for_each(|element| element.for_each_form_id(visit))
                }
                _ => {}
            }
        }
    }

    /// 可变遍历所有 FormID（递归进入列表）
    pub fn for_each_form_id_mut(&mut self, visit: &mut dyn FnMut(&mut FormId)) {
        for value in self.fields.values_mut() {
            match value {
                FieldValue::FormId(id) => visit(id),
                FieldValue::FormIdArray(ids) => ids.iter_mut().for_each(|id| visit(id)),
                FieldValue::List(elements) => {
                    elements.iter_mut().for_each(|element| element.for_each_form_id_mut(visit))
                }
                _ => {}
            }
        }
    }
}

/// 字段路径：顶层字段 ID 加最多三层 (索引, 字段 ID)
///
/// 末层字段 ID 为 0 时表示列表元素本身。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    pub field: u32,
    pub levels: Vec<(usize, u32)>,
}

/// 路径允许的最大嵌套层数
pub const MAX_PATH_LEVELS: usize = 3;

impl FieldPath {
    pub fn new(field: u32) -> Self {
        FieldPath { field, levels: Vec::new() }
    }

    /// 进入列表第 `index` 个元素的 `field` 字段
    pub fn at(mut self, index: usize, field: u32) -> Self {
        self.levels.push((index, field));
        self
    }

    /// 指向列表第 `index` 个元素本身
    pub fn element(self, index: usize) -> Self {
        self.at(index, 0)
    }

    /// 从平铺的 ID 序列构造
    ///
    /// 第一个值是字段 ID，之后每两个值是一层 `(元素下标, 元素字段 ID)`。
    /// 切片长度决定层数，只给出字段 ID 时指向该字段本身；
    /// 某层的元素字段 ID 为 0 时指向该元素，路径到此结束。
    pub fn from_ids(ids: &[u32]) -> Self {
        let mut path = FieldPath::new(ids.first().copied().unwrap_or(0));
        for level in ids.get(1..).unwrap_or_default().chunks_exact(2) {
            let (index, field) = (level[0], level[1]);
            path.levels.push((index as usize, field));
            if field == 0 {
                break;
            }
        }
        path
    }

    /// 路径是否指向列表元素本身
    pub fn addresses_element(&self) -> bool {
        matches!(self.levels.last(), Some((_, 0)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.field == 0 {
            return Err(EspError::InvalidArgument("InvalidPath: 字段 ID 不能为 0".into()));
        }
        if self.levels.len() > MAX_PATH_LEVELS {
            return Err(EspError::InvalidArgument(format!(
                "InvalidPath: 路径最多 {} 层嵌套，实际 {} 层", MAX_PATH_LEVELS, self.levels.len()
            )));
        }
        let inner = &self.levels[..self.levels.len().saturating_sub(1)];
        if inner.iter().any(|(_, field)| *field == 0) {
            return Err(EspError::InvalidArgument("InvalidPath: 只有最后一层可以指向元素本身".into()));
        }
        Ok(())
    }
}

impl std::fmt::Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.field)?;
        for (index, field) in &self.levels {
            write!(f, "[{}].{}", index, field)?;
        }
        Ok(())
    }
}
