/// IO 抽象层 - trait 定义
///
/// 集合通过插件文件名（不含目录）访问文件，目录由实现自行决定。
use crate::utils::Result;
use memmap2::Mmap;
use std::ops::Deref;

/// 被"幽灵化"的插件文件后缀（游戏不会直接加载）
pub const GHOST_SUFFIX: &str = ".ghost";

/// 插件文件的原始字节
///
/// 文件系统实现使用内存映射，避免整文件拷贝。
#[derive(Debug)]
pub enum PluginBytes {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Deref for PluginBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            PluginBytes::Mapped(mmap) => &mmap[..],
            PluginBytes::Owned(bytes) => bytes,
        }
    }
}

/// 插件文件读写 trait
///
/// # 职责
/// - 按文件名读取插件原始字节
/// - 写入序列化后的插件（覆盖前备份已有文件）
/// - 识别幽灵化文件名、枚举目录中的插件文件
/// - 不负责解析，仅负责 IO
pub trait PluginIo: Send + Sync {
    /// 读取插件文件的原始数据
    fn read(&self, file_name: &str) -> Result<PluginBytes>;

    /// 写入插件文件
    fn write(&self, file_name: &str, bytes: &[u8]) -> Result<()>;

    /// 文件是否存在
    fn exists(&self, file_name: &str) -> bool;

    /// 枚举全部插件文件（`.esp`/`.esm`/`.esl`，含幽灵化文件）
    fn list_plugins(&self) -> Result<Vec<String>>;

    /// 解析插件的实际文件名
    ///
    /// 优先使用原名，其次是带 `.ghost` 后缀的文件名；都不存在时返回 `None`。
    fn resolve_file_name(&self, name: &str) -> Option<String> {
        if self.exists(name) {
            return Some(name.to_string());
        }
        let ghosted = format!("{}{}", name, GHOST_SUFFIX);
        self.exists(&ghosted).then_some(ghosted)
    }
}

/// 去掉 `.ghost` 后缀
pub fn strip_ghost(file_name: &str) -> &str {
    let lower = file_name.to_ascii_lowercase();
    if lower.ends_with(GHOST_SUFFIX) {
        &file_name[..file_name.len() - GHOST_SUFFIX.len()]
    } else {
        file_name
    }
}

/// 按扩展名判断是否为插件文件
pub fn is_plugin_file_name(file_name: &str) -> bool {
    let lower = strip_ghost(file_name).to_ascii_lowercase();
    crate::SUPPORTED_EXTENSIONS
        .iter()
        .any(|extension| lower.rsplit_once('.').is_some_and(|(_, found)| found == *extension))
}
