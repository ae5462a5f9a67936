use crate::datatypes::{RawString, RecordFlags, RecordType};
use crate::game::Game;
use crate::record::RawRecord;
use crate::store::RecordStore;
use crate::subrecord::Subrecord;
use crate::utils::{EspError, Result};
use bitflags::bitflags;

pub mod loader;
pub mod stats;
pub mod writer;

pub use stats::PluginStats;

bitflags! {
    /// 插件载入标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PluginFlags: u32 {
        /// 只载入 TES4 头部
        const MIN_LOAD = 0x0000_0001;
        /// 载入全部记录（优先于 MIN_LOAD）
        const FULL_LOAD = 0x0000_0002;
        /// 丢弃不覆盖主文件的新记录
        const SKIP_NEW_RECORDS = 0x0000_0004;
        /// 占用加载顺序位置，允许新建记录
        const IN_LOAD_ORDER = 0x0000_0008;
        const SAVEABLE = 0x0000_0010;
        /// 把缺失的主文件加入集合
        const ADD_MASTERS = 0x0000_0020;
        /// 同时载入加入的主文件
        const LOAD_MASTERS = 0x0000_0040;
        const EXTENDED_CONFLICTS = 0x0000_0080;
        /// 允许查询插件中的记录类型
        const TRACK_NEW_TYPES = 0x0000_0100;
        const INDEX_LANDS = 0x0000_0200;
        const FIXUP_PLACEABLES = 0x0000_0400;
        /// 新建空插件，不读取文件
        const CREATE_NEW = 0x0000_0800;
        /// 丢弃覆盖未激活主文件的记录
        const IGNORE_INACTIVE_MASTERS = 0x0000_1000;
        /// 每种类型只保留第一条记录
        const SKIP_ALL_RECORDS = 0x0000_2000;
    }
}

impl PluginFlags {
    /// 常规编辑用的组合
    pub fn normal() -> Self {
        PluginFlags::FULL_LOAD
            | PluginFlags::IN_LOAD_ORDER
            | PluginFlags::SAVEABLE
            | PluginFlags::ADD_MASTERS
            | PluginFlags::LOAD_MASTERS
    }

    /// 处理互斥的标志
    ///
    /// 不在加载顺序中的插件不可保存；忽略未激活主文件时不自动加入主文件。
    pub fn normalized(self) -> Self {
        let mut flags = self;
        if !flags.contains(PluginFlags::IN_LOAD_ORDER) {
            flags.remove(PluginFlags::SAVEABLE);
        }
        if flags.contains(PluginFlags::IGNORE_INACTIVE_MASTERS) {
            flags.remove(PluginFlags::ADD_MASTERS);
        }
        flags
    }

    /// 是否只载入头部
    pub fn header_only(self) -> bool {
        self.contains(PluginFlags::MIN_LOAD) && !self.contains(PluginFlags::FULL_LOAD)
    }
}

/// TES4 头部记录
#[derive(Debug, Clone)]
pub struct PluginHeader {
    pub flags: RecordFlags,
    /// HEDR 版本
    pub version: f32,
    /// HEDR 记录数（含组）
    pub record_count: u32,
    /// 下一个可用的对象 ID
    pub next_object_id: u32,
    pub author: Option<String>,
    pub description: Option<String>,
    pub masters: Vec<String>,
    pub version_control: u32,
    pub form_version: u16,
    pub unknown: u16,
    /// 其余子记录原样保留
    pub extra: Vec<Subrecord>,
}

impl PluginHeader {
    pub fn new(game: Game) -> Self {
        PluginHeader {
            flags: RecordFlags::empty(),
            version: game.hedr_version(),
            record_count: 0,
            next_object_id: game.first_object_id(),
            author: None,
            description: None,
            masters: Vec::new(),
            version_control: 0,
            form_version: 0,
            unknown: 0,
            extra: Vec::new(),
        }
    }

    /// 从 TES4 记录解析
    pub fn parse(raw: &RawRecord, game: Game) -> Result<Self> {
        if raw.record_type != RecordType::TES4 {
            return Err(EspError::InvalidFormat(format!(
                "Invalid ESP file: expected TES4, found {}", raw.record_type
            )));
        }

        let mut header = PluginHeader::new(game);
        header.flags = raw.flags;
        header.version_control = raw.version_control;
        header.form_version = raw.form_version;
        header.unknown = raw.unknown;

        for subrecord in raw.subrecords()? {
            match &subrecord.signature {
                b"HEDR" if subrecord.data.len() >= 12 => {
                    let data = &subrecord.data;
                    header.version = f32::from_le_bytes([data[0], data[1], data[2], data[3]]);
                    header.record_count = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
                    header.next_object_id = u32::from_le_bytes([data[8], data[9], data[10], data[11]]);
                }
                b"CNAM" => header.author = Some(RawString::parse_zstring(&subrecord.data).content),
                b"SNAM" => header.description = Some(RawString::parse_zstring(&subrecord.data).content),
                b"MAST" => header.masters.push(RawString::parse_zstring(&subrecord.data).content),
                // 主文件大小，写出时重新生成
                b"DATA" => {}
                _ => header.extra.push(subrecord),
            }
        }
        Ok(header)
    }

    /// 生成 TES4 记录
    pub fn to_raw(&self) -> RawRecord {
        let mut subrecords = Vec::with_capacity(4 + self.masters.len() * 2 + self.extra.len());

        let mut hedr = Vec::with_capacity(12);
        hedr.extend_from_slice(&self.version.to_le_bytes());
        hedr.extend_from_slice(&self.record_count.to_le_bytes());
        hedr.extend_from_slice(&self.next_object_id.to_le_bytes());
        subrecords.push(Subrecord::new(*b"HEDR", hedr));

        if let Some(author) = &self.author {
            subrecords.push(Subrecord::new(*b"CNAM", RawString::encode_zstring(author)));
        }
        if let Some(description) = &self.description {
            subrecords.push(Subrecord::new(*b"SNAM", RawString::encode_zstring(description)));
        }
        for master in &self.masters {
            subrecords.push(Subrecord::new(*b"MAST", RawString::encode_zstring(master)));
            subrecords.push(Subrecord::new(*b"DATA", vec![0u8; 8]));
        }
        subrecords.extend(self.extra.iter().cloned());

        RawRecord {
            record_type: RecordType::TES4,
            flags: self.flags - RecordFlags::COMPRESSED,
            form_id: 0,
            version_control: self.version_control,
            form_version: self.form_version,
            unknown: self.unknown,
            data: Subrecord::write_all(&subrecords),
            original_compressed_data: None,
        }
    }

    /// 分配一个新的对象 ID
    pub fn allocate_object_id(&mut self) -> u32 {
        let object_id = self.next_object_id & 0x00FF_FFFF;
        self.next_object_id = object_id + 1;
        object_id
    }
}

/// 集合中的插件
#[derive(Debug)]
pub struct Plugin {
    /// 插件名（不含 `.ghost` 后缀）
    pub(crate) name: String,
    /// 磁盘上的文件名
    pub(crate) file_name: String,
    pub(crate) flags: PluginFlags,
    pub(crate) header: PluginHeader,
    pub(crate) store: RecordStore,
    pub(crate) loaded: bool,
    pub(crate) empty_groups: usize,
}

impl Plugin {
    pub(crate) fn new(name: String, file_name: String, flags: PluginFlags, game: Game) -> Self {
        Plugin {
            name,
            file_name,
            flags,
            header: PluginHeader::new(game),
            store: RecordStore::new(),
            loaded: false,
            empty_groups: 0,
        }
    }

    /// 插件名（不含 `.ghost` 后缀）
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 磁盘上的文件名（可能带 `.ghost` 后缀）
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn flags(&self) -> PluginFlags {
        self.flags
    }

    pub fn header(&self) -> &PluginHeader {
        &self.header
    }

    pub fn masters(&self) -> &[String] {
        &self.header.masters
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn records(&self) -> &RecordStore {
        &self.store
    }

    /// 是否为主文件（头部标志或 .esm 扩展名）
    pub fn is_master(&self) -> bool {
        self.header.flags.contains(RecordFlags::MASTER_FILE)
            || self.name.to_ascii_lowercase().ends_with(".esm")
    }

    pub fn is_localized(&self) -> bool {
        self.header.flags.contains(RecordFlags::LOCALIZED)
    }

    /// 插件中是否没有任何记录
    pub fn is_empty(&self) -> bool {
        self.store.is_empty() && self.store.unloaded().next().is_none()
    }
}
