use crate::datatypes::RecordType;
use crate::utils::{EspError, Result};

/// 集合对应的游戏类型
///
/// 游戏类型决定记录头部长度、HEDR 版本号以及使用哪一套记录结构定义。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Game {
    Oblivion,
    Fallout3,
    FalloutNewVegas,
    Skyrim,
}

impl Game {
    pub const ALL: [Game; 4] = [Game::Oblivion, Game::Fallout3, Game::FalloutNewVegas, Game::Skyrim];

    /// 记录头部长度（Oblivion 为 20 字节，其余为 24 字节）
    pub fn record_header_size(self) -> usize {
        match self {
            Game::Oblivion => 20,
            _ => 24,
        }
    }

    /// GRUP 头部长度，与记录头部长度一致
    pub fn group_header_size(self) -> usize {
        self.record_header_size()
    }

    /// 新建插件时写入 HEDR 的版本号
    pub fn hedr_version(self) -> f32 {
        match self {
            Game::Oblivion => 1.0,
            Game::Fallout3 => 0.94,
            Game::FalloutNewVegas => 1.34,
            Game::Skyrim => 1.7,
        }
    }

    /// 新建插件的第一个可用 ObjectID
    pub fn first_object_id(self) -> u32 {
        0x800
    }

    /// 该游戏中通过 EditorID（MGEF 代码）而非 FormID 引用的记录类型
    pub fn is_identified_by_editor_id(self, record_type: RecordType) -> bool {
        self == Game::Oblivion && record_type == RecordType::MGEF
    }

    /// 记录结构定义中使用的键
    pub fn schema_key(self) -> &'static str {
        match self {
            Game::Oblivion => "oblivion",
            Game::Fallout3 => "fallout3",
            Game::FalloutNewVegas => "falloutnv",
            Game::Skyrim => "skyrim",
        }
    }

    /// 从名称解析（不区分大小写）
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "oblivion" | "tes4" => Ok(Game::Oblivion),
            "fallout3" | "fo3" => Ok(Game::Fallout3),
            "falloutnv" | "falloutnewvegas" | "fnv" => Ok(Game::FalloutNewVegas),
            "skyrim" | "tes5" => Ok(Game::Skyrim),
            other => Err(EspError::InvalidArgument(format!("unknown game type: {}", other))),
        }
    }
}

impl TryFrom<i32> for Game {
    type Error = EspError;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            0 => Ok(Game::Oblivion),
            1 => Ok(Game::Fallout3),
            2 => Ok(Game::FalloutNewVegas),
            3 => Ok(Game::Skyrim),
            other => Err(EspError::InvalidArgument(format!("unknown game type value: {}", other))),
        }
    }
}

impl From<Game> for i32 {
    fn from(game: Game) -> i32 {
        match game {
            Game::Oblivion => 0,
            Game::Fallout3 => 1,
            Game::FalloutNewVegas => 2,
            Game::Skyrim => 3,
        }
    }
}

impl std::fmt::Display for Game {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Game::Oblivion => "Oblivion",
            Game::Fallout3 => "Fallout 3",
            Game::FalloutNewVegas => "Fallout: New Vegas",
            Game::Skyrim => "Skyrim",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_sizes() {
        assert_eq!(Game::Oblivion.record_header_size(), 20);
        assert_eq!(Game::Skyrim.record_header_size(), 24);
    }

    #[test]
    fn test_i32_roundtrip() {
        for game in Game::ALL {
            assert_eq!(Game::try_from(i32::from(game)).unwrap(), game);
        }
        assert!(Game::try_from(4).is_err());
    }

    #[test]
    fn test_mgef_identity_only_in_oblivion() {
        assert!(Game::Oblivion.is_identified_by_editor_id(RecordType::MGEF));
        assert!(!Game::Skyrim.is_identified_by_editor_id(RecordType::MGEF));
    }
}
