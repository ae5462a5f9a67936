/// 插件文件 IO 实现
///
/// 提供基于文件系统目录的默认插件读写实现
use super::traits::{is_plugin_file_name, PluginBytes, PluginIo};
use crate::utils::{create_backup, EspError, Result};
use memmap2::Mmap;
use std::path::{Path, PathBuf};

/// 文件系统目录 IO（读取使用内存映射）
#[derive(Debug, Clone)]
pub struct FsIo {
    root: PathBuf,
}

impl FsIo {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, file_name: &str) -> PathBuf {
        self.root.join(file_name)
    }
}

impl PluginIo for FsIo {
    fn read(&self, file_name: &str) -> Result<PluginBytes> {
        let path = self.path_of(file_name);
        let file = std::fs::File::open(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => EspError::NotFound(format!("插件文件不存在: {:?}", path)),
            _ => EspError::IoError(e),
        })?;

        // 空文件无法映射
        if file.metadata()?.len() == 0 {
            return Ok(PluginBytes::Owned(Vec::new()));
        }

        // 使用内存映射文件（零拷贝访问）
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(PluginBytes::Mapped(mmap))
    }

    fn write(&self, file_name: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_of(file_name);

        // 确保父目录存在
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        if path.exists() {
            let backup = create_backup(&path)?;
            tracing::info!("已创建备份文件: {:?}", backup);
        }

        std::fs::write(&path, bytes)?;
        Ok(())
    }

    fn exists(&self, file_name: &str) -> bool {
        self.path_of(file_name).is_file()
    }

    fn list_plugins(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if is_plugin_file_name(name) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_write() {
        let dir = tempfile::tempdir().unwrap();
        let io = FsIo::new(dir.path());

        io.write("Test.esp", b"TES4\x00\x00\x00\x00").unwrap();
        let bytes = io.read("Test.esp").unwrap();
        assert_eq!(&bytes[..], b"TES4\x00\x00\x00\x00");
    }

    #[test]
    fn test_write_creates_backup() {
        let dir = tempfile::tempdir().unwrap();
        let io = FsIo::new(dir.path());

        io.write("Test.esp", b"old").unwrap();
        io.write("Test.esp", b"new").unwrap();

        let backups = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".bak"))
            .count();
        assert_eq!(backups, 1);
        assert_eq!(&io.read("Test.esp").unwrap()[..], b"new");
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let io = FsIo::new(dir.path());
        assert!(matches!(io.read("Missing.esp"), Err(EspError::NotFound(_))));
    }

    #[test]
    fn test_ghosted_file_resolution() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Old.esp.ghost"), b"TES4").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"").unwrap();

        let io = FsIo::new(dir.path());
        assert_eq!(io.resolve_file_name("Old.esp").as_deref(), Some("Old.esp.ghost"));
        assert_eq!(io.resolve_file_name("New.esp"), None);
        assert_eq!(io.list_plugins().unwrap(), vec!["Old.esp.ghost".to_string()]);
    }
}
