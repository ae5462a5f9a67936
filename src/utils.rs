use thiserror::Error;
use std::path::Path;

/// 自定义错误类型
///
/// 前六个变体对应集合 API 的错误分类，其余变体来自文件格式和 IO 层。
#[derive(Error, Debug)]
pub enum EspError {
    /// 标识符或句柄无法解析
    #[error("Not found: {0}")]
    NotFound(String),

    /// 参数格式错误（路径非法、数组长度不一致等）
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// 结构上不允许的操作（卸载未保存的记录、删除必需字段等）
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// 同一插件内 EditorID 冲突
    #[error("Duplicate identifier: {0}")]
    DuplicateIdentifier(String),

    /// FormID 指向未加载或不存在的插件
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    /// 句柄所属的集合、插件或记录已被删除或卸载
    #[error("Stale handle: {0}")]
    StaleHandle(String),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Unsupported record type: {0}")]
    UnsupportedRecordType(String),

    #[error("Compression error: {0}")]
    CompressionError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// 库内统一的结果类型
pub type Result<T> = std::result::Result<T, EspError>;

impl EspError {
    /// 错误分类名称（用于追踪回调和日志）
    pub fn kind_name(&self) -> &'static str {
        match self {
            EspError::NotFound(_) => "NotFound",
            EspError::InvalidArgument(_) => "InvalidArgument",
            EspError::InvalidOperation(_) => "InvalidOperation",
            EspError::DuplicateIdentifier(_) => "DuplicateIdentifier",
            EspError::InvalidReference(_) => "InvalidReference",
            EspError::StaleHandle(_) => "StaleHandle",
            EspError::InvalidFormat(_) => "InvalidFormat",
            EspError::UnsupportedRecordType(_) => "UnsupportedRecordType",
            EspError::CompressionError(_) => "CompressionError",
            EspError::IoError(_) => "IoError",
            EspError::JsonError(_) => "JsonError",
        }
    }
}

/// 创建文件备份
///
/// 备份文件与原文件同目录，扩展名追加时间戳，例如 `Patch.2024-01-01-12-00-00.bak`。
pub fn create_backup(file_path: &Path) -> Result<std::path::PathBuf> {
    if !file_path.exists() {
        return Err(EspError::IoError(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "原文件不存在"
        )));
    }

    let timestamp = chrono::Local::now().format("%Y-%m-%d-%H-%M-%S");
    let backup_path = file_path.with_extension(format!("{}.bak", timestamp));

    std::fs::copy(file_path, &backup_path)
        .map_err(EspError::IoError)?;

    Ok(backup_path)
}

/// 不区分大小写的名称比较键（插件名、EditorID）
pub fn name_key(name: &str) -> String {
    name.to_ascii_lowercase()
}
