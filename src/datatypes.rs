use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;
use encoding_rs;

// 记录和组头部的小端整数读取
pub fn read_u16(cursor: &mut Cursor<&[u8]>) -> Result<u16, std::io::Error> {
    cursor.read_u16::<LittleEndian>()
}

pub fn read_u32(cursor: &mut Cursor<&[u8]>) -> Result<u32, std::io::Error> {
    cursor.read_u32::<LittleEndian>()
}

pub fn read_i32(cursor: &mut Cursor<&[u8]>) -> Result<i32, std::io::Error> {
    cursor.read_i32::<LittleEndian>()
}

// 支持的编码
const SUPPORTED_ENCODINGS: &[&str] = &["utf-8", "windows-1252", "windows-1250", "windows-1251"];

#[derive(Debug, Clone)]
pub struct RawString {
    pub content: String,
    pub encoding: String,
}

impl RawString {
    /// 尝试多种编码解码
    pub fn decode(data: &[u8]) -> Self {
        for encoding_name in SUPPORTED_ENCODINGS {
            if let Some(encoding) = encoding_rs::Encoding::for_label(encoding_name.as_bytes()) {
                let (decoded, _, had_errors) = encoding.decode(data);
                if !had_errors {
                    return RawString {
                        content: decoded.into_owned(),
                        encoding: encoding_name.to_string(),
                    };
                }
            }
        }

        // 回退到UTF-8，忽略错误
        RawString {
            content: String::from_utf8_lossy(data).into_owned(),
            encoding: "utf-8".to_string(),
        }
    }

    /// Z字符串解析(以null结尾)
    pub fn parse_zstring(data: &[u8]) -> Self {
        let null_pos = data.iter().position(|&b| b == 0).unwrap_or(data.len());
        Self::decode(&data[..null_pos])
    }

    /// 编码为 Z 字符串（末尾补 null）
    ///
    /// 优先使用 windows-1252，无法表示的字符回退为 UTF-8 字节。
    pub fn encode_zstring(text: &str) -> Vec<u8> {
        let (encoded, _, had_errors) = encoding_rs::WINDOWS_1252.encode(text);
        let mut bytes = if had_errors {
            text.as_bytes().to_vec()
        } else {
            encoded.into_owned()
        };
        bytes.push(0);
        bytes
    }
}

// 记录标志位定义
bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RecordFlags: u32 {
        const MASTER_FILE = 0x00000001;        // ESM标志
        const DELETED = 0x00000020;            // 已删除
        const LOCALIZED = 0x00000080;          // 本地化
        const LIGHT_MASTER = 0x00000200;       // 轻量级主文件
        const PERSISTENT = 0x00000400;         // 持久化
        const DISABLED = 0x00000800;           // 禁用
        const IGNORED = 0x00001000;            // 忽略
        const VISIBLE_DISTANT = 0x00008000;    // 远距离可见
        const COMPRESSED = 0x00040000;         // 压缩
        const _ = !0;
    }
}

/// 四字符记录类型（如 `CELL`、`NPC_`）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordType(pub [u8; 4]);

impl RecordType {
    pub const TES4: RecordType = RecordType(*b"TES4");
    pub const GRUP: RecordType = RecordType(*b"GRUP");
    pub const DIAL: RecordType = RecordType(*b"DIAL");
    pub const INFO: RecordType = RecordType(*b"INFO");
    pub const WRLD: RecordType = RecordType(*b"WRLD");
    pub const CELL: RecordType = RecordType(*b"CELL");
    pub const MGEF: RecordType = RecordType(*b"MGEF");

    /// 从字符串创建（长度必须为 4）
    pub fn parse(text: &str) -> Option<Self> {
        let bytes: [u8; 4] = text.as_bytes().try_into().ok()?;
        Some(RecordType(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl std::fmt::Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl From<[u8; 4]> for RecordType {
    fn from(bytes: [u8; 4]) -> Self {
        RecordType(bytes)
    }
}
