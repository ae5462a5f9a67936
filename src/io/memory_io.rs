/// 内存 IO 实现
///
/// 以文件名（不区分大小写）为键保存插件字节，用于测试和不落盘的工具场景。
use super::traits::{is_plugin_file_name, PluginBytes, PluginIo};
use crate::utils::{name_key, EspError, Result};
use indexmap::IndexMap;
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct MemoryIo {
    files: Mutex<IndexMap<String, (String, Vec<u8>)>>,
}

impl MemoryIo {
    pub fn new() -> Self {
        Self::default()
    }

    /// 放入一个文件
    pub fn insert(&self, file_name: &str, bytes: Vec<u8>) {
        if let Ok(mut files) = self.files.lock() {
            files.insert(name_key(file_name), (file_name.to_string(), bytes));
        }
    }

    /// 取出文件内容的副本
    pub fn get(&self, file_name: &str) -> Option<Vec<u8>> {
        let files = self.files.lock().ok()?;
        files.get(&name_key(file_name)).map(|(_, bytes)| bytes.clone())
    }
}

impl PluginIo for MemoryIo {
    fn read(&self, file_name: &str) -> Result<PluginBytes> {
        self.get(file_name)
            .map(PluginBytes::Owned)
            .ok_or_else(|| EspError::NotFound(format!("插件文件不存在: {}", file_name)))
    }

    fn write(&self, file_name: &str, bytes: &[u8]) -> Result<()> {
        self.insert(file_name, bytes.to_vec());
        Ok(())
    }

    fn exists(&self, file_name: &str) -> bool {
        self.files
            .lock()
            .map(|files| files.contains_key(&name_key(file_name)))
            .unwrap_or(false)
    }

    fn list_plugins(&self) -> Result<Vec<String>> {
        let files = self
            .files
            .lock()
            .map_err(|_| EspError::InvalidOperation("memory io lock poisoned".into()))?;
        Ok(files
            .values()
            .map(|(name, _)| name.clone())
            .filter(|name| is_plugin_file_name(name))
            .collect())
    }
}
