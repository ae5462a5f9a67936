use crate::load_order::LoadOrder;
use crate::utils::{EspError, Result};

/// 未激活主文件在集合内的插件索引
pub const INVALID_MOD_INDEX: u8 = 0xFF;

/// 加载顺序相对的 FormID（高字节为插件索引，低 24 位为对象 ID）
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct FormId(pub u32);

impl FormId {
    pub const NULL: FormId = FormId(0);

    pub fn new(mod_index: u8, object_id: u32) -> Self {
        FormId(((mod_index as u32) << 24) | (object_id & 0x00FF_FFFF))
    }

    pub fn mod_index(self) -> u8 {
        (self.0 >> 24) as u8
    }

    pub fn object_id(self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn with_mod_index(self, mod_index: u8) -> Self {
        FormId::new(mod_index, self.object_id())
    }
}

impl std::fmt::Debug for FormId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FormId({:08X})", self.0)
    }
}

impl std::fmt::Display for FormId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:08X}", self.0)
    }
}

impl From<u32> for FormId {
    fn from(value: u32) -> Self {
        FormId(value)
    }
}

/// 魔法效果代码（Oblivion 中 MGEF 以四字符代码而非 FormID 引用）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MgefCode(pub [u8; 4]);

impl MgefCode {
    pub fn from_u32(value: u32) -> Self {
        MgefCode(value.to_le_bytes())
    }

    pub fn to_u32(self) -> u32 {
        u32::from_le_bytes(self.0)
    }

    pub fn as_string(&self) -> String {
        String::from_utf8_lossy(&self.0).trim_end_matches('\0').to_string()
    }
}

impl std::fmt::Display for MgefCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_string())
    }
}

/// 与加载顺序无关的长格式标识（定义插件名 + 对象 ID）
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LongFormId {
    pub plugin: String,
    pub object_id: u32,
}

impl std::fmt::Display for LongFormId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:06X}|{}", self.object_id, self.plugin)
    }
}

/// 短格式转长格式（数值模式）
///
/// 插件索引必须对应加载顺序中的某个插件。
pub fn to_long_form(load_order: &LoadOrder, form_id: FormId) -> Result<LongFormId> {
    let plugin = load_order.name_at(form_id.mod_index()).ok_or_else(|| {
        EspError::InvalidReference(format!(
            "FormID {} 的插件索引 {:02X} 不在加载顺序中", form_id, form_id.mod_index()
        ))
    })?;

    Ok(LongFormId { plugin: plugin.to_string(), object_id: form_id.object_id() })
}

/// 长格式转短格式（数值模式）
pub fn to_short_form(load_order: &LoadOrder, plugin: &str, object_id: u32) -> Result<FormId> {
    let index = load_order.index_of_name(plugin).ok_or_else(|| {
        EspError::InvalidReference(format!("插件 {} 不在加载顺序中", plugin))
    })?;

    Ok(FormId::new(index, object_id))
}

/// 文件相对 FormID 与集合相对 FormID 之间的映射表
///
/// 文件中的插件索引指向该文件的主文件列表（超出列表的索引指向文件自身），
/// 集合中的插件索引指向加载顺序。
#[derive(Debug, Clone)]
pub struct FormIdMapper {
    table: Vec<u8>,
}

impl FormIdMapper {
    /// 加载用：文件索引 -> 加载顺序索引
    ///
    /// 不在加载顺序中的主文件映射为 [`INVALID_MOD_INDEX`]。
    pub fn expanding(masters: &[String], own_name: &str, load_order: &LoadOrder) -> Self {
        let table = masters
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(own_name))
            .map(|name| load_order.index_of_name(name).unwrap_or(INVALID_MOD_INDEX))
            .collect();
        FormIdMapper { table }
    }

    /// 保存用：加载顺序索引 -> 文件索引
    ///
    /// `masters` 为写入文件的主文件列表；未出现在列表中的插件映射为 [`INVALID_MOD_INDEX`]。
    pub fn collapsing(masters: &[String], own_name: &str, load_order: &LoadOrder) -> Self {
        let mut table = vec![INVALID_MOD_INDEX; 256];
        for (file_index, name) in masters.iter().enumerate() {
            if let Some(index) = load_order.index_of_name(name) {
                table[index as usize] = file_index as u8;
            }
        }
        if let Some(index) = load_order.index_of_name(own_name) {
            table[index as usize] = masters.len() as u8;
        }
        FormIdMapper { table }
    }

    /// 映射一个 FormID（空 FormID 保持不变）
    pub fn map(&self, form_id: FormId) -> FormId {
        if form_id.is_null() {
            return form_id;
        }
        let index = form_id.mod_index() as usize;
        let mapped = match self.table.get(index) {
            Some(mapped) => *mapped,
            // 超出主文件列表的索引指向文件自身
            None => self.table.last().copied().unwrap_or(INVALID_MOD_INDEX),
        };
        form_id.with_mod_index(mapped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use proptest::prelude::*;

    fn load_order(names: &[&str]) -> LoadOrder {
        let mut arena = Arena::new();
        let mut order = LoadOrder::new();
        for name in names {
            let key = arena.insert(());
            order.push(key, name, true).unwrap();
        }
        order
    }

    #[test]
    fn test_formid_parts() {
        let id = FormId::new(0x01, 0x000ABC);
        assert_eq!(id.0, 0x0100_0ABC);
        assert_eq!(id.mod_index(), 1);
        assert_eq!(id.object_id(), 0xABC);
        assert_eq!(id.to_string(), "01000ABC");
    }

    #[test]
    fn test_long_form_display() {
        let order = load_order(&["Skyrim.esm", "Plugin.esp"]);
        let long = to_long_form(&order, FormId(0x0100_0ABC)).unwrap();
        assert_eq!(long.to_string(), "000ABC|Plugin.esp");
    }

    #[test]
    fn test_unknown_mod_index_is_invalid_reference() {
        let order = load_order(&["Skyrim.esm"]);
        assert!(matches!(to_long_form(&order, FormId(0x0500_0001)), Err(EspError::InvalidReference(_))));
        assert!(matches!(to_short_form(&order, "Missing.esp", 1), Err(EspError::InvalidReference(_))));
    }

    #[test]
    fn test_mapper_expand_and_collapse() {
        let order = load_order(&["Skyrim.esm", "Dawnguard.esm", "Patch.esp"]);
        let masters = vec!["Dawnguard.esm".to_string(), "Skyrim.esm".to_string()];

        let expand = FormIdMapper::expanding(&masters, "Patch.esp", &order);
        assert_eq!(expand.map(FormId(0x0000_0012)), FormId(0x0100_0012));
        assert_eq!(expand.map(FormId(0x0100_0012)), FormId(0x0000_0012));
        assert_eq!(expand.map(FormId(0x0200_0800)), FormId(0x0200_0800));
        assert_eq!(expand.map(FormId(0x0700_0800)), FormId(0x0200_0800));
        assert_eq!(expand.map(FormId::NULL), FormId::NULL);

        let collapse = FormIdMapper::collapsing(&masters, "Patch.esp", &order);
        for raw in [0x0000_0012u32, 0x0100_0012, 0x0200_0800] {
            assert_eq!(collapse.map(expand.map(FormId(raw))), FormId(raw));
        }
    }

    #[test]
    fn test_inactive_master_maps_to_sentinel() {
        let order = load_order(&["Patch.esp"]);
        let masters = vec!["Missing.esm".to_string()];
        let expand = FormIdMapper::expanding(&masters, "Patch.esp", &order);
        assert_eq!(expand.map(FormId(0x0000_0001)).mod_index(), INVALID_MOD_INDEX);
        assert_eq!(expand.map(FormId(0x0100_0001)).mod_index(), 0);
    }

    proptest! {
        #[test]
        fn short_then_long_round_trips(count in 1usize..40, pick in 0usize..40, object_id in 0u32..0x0100_0000) {
            let names: Vec<String> = (0..count).map(|i| format!("Plugin{}.esp", i)).collect();
            let refs: Vec<&str> = names.iter().map(String::as_str).collect();
            let order = load_order(&refs);
            let plugin = &names[pick % count];

            let short = to_short_form(&order, plugin, object_id).unwrap();
            let long = to_long_form(&order, short).unwrap();
            prop_assert_eq!(&long.plugin, plugin);
            prop_assert_eq!(long.object_id, object_id);
        }
    }
}
