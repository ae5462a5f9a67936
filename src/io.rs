/// IO 抽象层模块
///
/// 集合只通过 [`PluginIo`] 访问插件文件，便于替换为内存实现进行测试。
///
/// # 架构设计
///
/// - **traits**: 定义 `PluginIo` trait 和 `PluginBytes`
/// - **esp_io**: 基于文件系统目录的实现（内存映射读取）
/// - **memory_io**: 基于内存的实现
///
/// # 使用示例
///
/// ```rust,ignore
/// use esp_collection::io::{FsIo, PluginIo};
///
/// let io = FsIo::new("Data");
/// let bytes = io.read("Skyrim.esm")?;
/// ```
pub mod traits;
pub mod esp_io;
pub mod memory_io;

// === 导出 trait 定义 ===
pub use traits::{PluginBytes, PluginIo, GHOST_SUFFIX};

// === 导出默认实现 ===
pub use esp_io::FsIo;
pub use memory_io::MemoryIo;
