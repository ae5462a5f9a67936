use crate::datatypes::{read_i32, read_u16, read_u32, RecordType};
use crate::game::Game;
use crate::record::RawRecord;
use crate::utils::{EspError, Result};
use std::io::{Read, Cursor};

/// 组类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupType {
    /// 顶级组（标签为记录类型）
    Top,
    /// 世界子组（标签为 WRLD 的 FormID）
    WorldChildren,
    /// 内部单元格块
    InteriorCellBlock,
    /// 内部单元格子块
    InteriorCellSubBlock,
    /// 外部单元格块
    ExteriorCellBlock,
    /// 外部单元格子块
    ExteriorCellSubBlock,
    /// 单元格子组（标签为 CELL 的 FormID）
    CellChildren,
    /// 话题子组（标签为 DIAL 的 FormID）
    TopicChildren,
    /// 单元格持久子组
    CellPersistentChildren,
    /// 单元格临时子组
    CellTemporaryChildren,
    /// 单元格远景子组（Oblivion）
    CellVisibleDistantChildren,
    /// 未知类型
    Unknown(i32),
}

impl GroupType {
    /// 转换为i32值
    pub fn to_i32(self) -> i32 {
        match self {
            GroupType::Top => 0,
            GroupType::WorldChildren => 1,
            GroupType::InteriorCellBlock => 2,
            GroupType::InteriorCellSubBlock => 3,
            GroupType::ExteriorCellBlock => 4,
            GroupType::ExteriorCellSubBlock => 5,
            GroupType::CellChildren => 6,
            GroupType::TopicChildren => 7,
            GroupType::CellPersistentChildren => 8,
            GroupType::CellTemporaryChildren => 9,
            GroupType::CellVisibleDistantChildren => 10,
            GroupType::Unknown(value) => value,
        }
    }

    /// 标签是否为父记录的 FormID
    pub fn has_parent_label(self) -> bool {
        matches!(
            self,
            GroupType::WorldChildren
                | GroupType::CellChildren
                | GroupType::TopicChildren
                | GroupType::CellPersistentChildren
                | GroupType::CellTemporaryChildren
                | GroupType::CellVisibleDistantChildren
        )
    }
}

impl From<i32> for GroupType {
    fn from(value: i32) -> Self {
        match value {
            0 => GroupType::Top,
            1 => GroupType::WorldChildren,
            2 => GroupType::InteriorCellBlock,
            3 => GroupType::InteriorCellSubBlock,
            4 => GroupType::ExteriorCellBlock,
            5 => GroupType::ExteriorCellSubBlock,
            6 => GroupType::CellChildren,
            7 => GroupType::TopicChildren,
            8 => GroupType::CellPersistentChildren,
            9 => GroupType::CellTemporaryChildren,
            10 => GroupType::CellVisibleDistantChildren,
            _ => GroupType::Unknown(value),
        }
    }
}

/// 组结构
#[derive(Debug)]
pub struct Group {
    /// 标签
    pub label: [u8; 4],
    /// 组类型
    pub group_type: GroupType,
    /// 版本控制信息
    pub version_control: u32,
    /// 未知字段（Oblivion 没有）
    pub unknown: u32,
    /// 子元素
    pub children: Vec<GroupChild>,
}

/// 组子元素
#[derive(Debug)]
pub enum GroupChild {
    /// 子组
    Group(Box<Group>),
    /// 记录
    Record(RawRecord),
}

/// 从组层级展开后的记录，附带文件相对的父记录 FormID
#[derive(Debug)]
pub struct PlacedRecord {
    pub record: RawRecord,
    pub parent: Option<u32>,
}

impl Group {
    /// 解析组
    pub fn parse(cursor: &mut Cursor<&[u8]>, game: Game) -> Result<Self> {
        let header_size = game.group_header_size() as u32;
        // 检查是否有足够的数据读取头部
        if cursor.position() + header_size as u64 > cursor.get_ref().len() as u64 {
            return Err(EspError::InvalidFormat("Insufficient data for group header".into()));
        }

        let mut type_bytes = [0u8; 4];
        cursor.read_exact(&mut type_bytes)?;

        // 验证是否为组类型
        if &type_bytes != b"GRUP" {
            return Err(EspError::InvalidFormat(format!(
                "Expected GRUP, found {}", String::from_utf8_lossy(&type_bytes)
            )));
        }

        let size = read_u32(cursor)?;

        // 验证组大小是否合理
        if size > 200_000_000 {  // 200MB限制
            return Err(EspError::InvalidFormat(format!("组大小异常: {} bytes (可能数据损坏)", size)));
        }
        if size < header_size {
            return Err(EspError::InvalidFormat(format!(
                "组大小太小: {} bytes (最小应为{}字节)", size, header_size
            )));
        }

        let mut label = [0u8; 4];
        cursor.read_exact(&mut label)?;
        let group_type = GroupType::from(read_i32(cursor)?);
        let version_control = read_u32(cursor)?;
        let unknown = if header_size == 24 { read_u32(cursor)? } else { 0 };

        // 计算数据大小(不包含头部)
        let data_size = size - header_size;
        if cursor.position() + data_size as u64 > cursor.get_ref().len() as u64 {
            return Err(EspError::InvalidFormat(format!(
                "Insufficient data for group data: expected {} bytes", data_size
            )));
        }

        let data_end = cursor.position() + data_size as u64;

        // 解析子元素
        let mut children = Vec::new();
        while cursor.position() < data_end {
            // 预读取4字节判断类型
            let peek_pos = cursor.position();
            let mut peek_bytes = [0u8; 4];
            cursor.read_exact(&mut peek_bytes)?;
            cursor.set_position(peek_pos);

            if &peek_bytes == b"GRUP" {
                children.push(GroupChild::Group(Box::new(Group::parse(cursor, game)?)));
            } else {
                children.push(GroupChild::Record(RawRecord::parse(cursor, game)?));
            }
        }

        Ok(Group {
            label,
            group_type,
            version_control,
            unknown,
            children,
        })
    }

    /// 顶级组标签对应的记录类型
    pub fn label_record_type(&self) -> RecordType {
        RecordType(self.label)
    }

    /// 标签解释为 FormID
    pub fn label_form_id(&self) -> u32 {
        u32::from_le_bytes(self.label)
    }

    /// 统计不含任何子元素的组数量（含自身）
    pub fn empty_group_count(&self) -> usize {
        let own = usize::from(self.children.is_empty());
        own + self
            .children
            .iter()
            .map(|child| match child {
                GroupChild::Group(group) => group.empty_group_count(),
                GroupChild::Record(_) => 0,
            })
            .sum::<usize>()
    }

    /// 按文件顺序展开全部记录
    ///
    /// 子组标签给出父记录的 FormID；块组沿用外层父记录。
    pub fn into_records(self, parent: Option<u32>, records: &mut Vec<PlacedRecord>) {
        let parent = if self.group_type.has_parent_label() {
            Some(self.label_form_id())
        } else {
            parent
        };

        for child in self.children {
            match child {
                GroupChild::Group(group) => group.into_records(parent, records),
                GroupChild::Record(record) => records.push(PlacedRecord { record, parent }),
            }
        }
    }
}

/// 组写入器，写完子元素后回填组大小
pub struct GroupWriter {
    size_pos: usize,
}

impl GroupWriter {
    /// 写入组头部
    pub fn begin(output: &mut Vec<u8>, label: [u8; 4], group_type: GroupType, game: Game) -> Self {
        output.extend_from_slice(b"GRUP");

        // 临时占位符，稍后计算实际大小
        let size_pos = output.len();
        output.extend_from_slice(&[0u8; 4]);

        output.extend_from_slice(&label);
        output.extend_from_slice(&group_type.to_i32().to_le_bytes());
        output.extend_from_slice(&0u32.to_le_bytes());
        if game.group_header_size() == 24 {
            output.extend_from_slice(&0u32.to_le_bytes());
        }

        GroupWriter { size_pos }
    }

    /// 计算并写入实际大小（需要包含"GRUP"的4字节）
    pub fn finish(self, output: &mut Vec<u8>) {
        let actual_size = (output.len() - self.size_pos + 4) as u32;
        output[self.size_pos..self.size_pos + 4].copy_from_slice(&actual_size.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatypes::RecordFlags;

    fn record(kind: &[u8; 4], form_id: u32) -> RawRecord {
        RawRecord {
            record_type: RecordType(*kind),
            flags: RecordFlags::empty(),
            form_id,
            version_control: 0,
            form_version: 0,
            unknown: 0,
            data: Vec::new(),
            original_compressed_data: None,
        }
    }

    fn dial_group(game: Game) -> Vec<u8> {
        let mut output = Vec::new();
        let top = GroupWriter::begin(&mut output, *b"DIAL", GroupType::Top, game);
        record(b"DIAL", 0x0000_0A01).write(&mut output, game).unwrap();
        let children = GroupWriter::begin(&mut output, 0x0000_0A01u32.to_le_bytes(), GroupType::TopicChildren, game);
        record(b"INFO", 0x0000_0A02).write(&mut output, game).unwrap();
        record(b"INFO", 0x0000_0A03).write(&mut output, game).unwrap();
        children.finish(&mut output);
        top.finish(&mut output);
        output
    }

    #[test]
    fn test_nested_topic_children() {
        for game in [Game::Oblivion, Game::Skyrim] {
            let bytes = dial_group(game);
            let group = Group::parse(&mut Cursor::new(&bytes[..]), game).unwrap();
            assert_eq!(group.label_record_type(), RecordType::DIAL);

            let mut records = Vec::new();
            group.into_records(None, &mut records);
            assert_eq!(records.len(), 3);
            assert_eq!(records[0].parent, None);
            assert_eq!(records[1].parent, Some(0x0000_0A01));
            assert_eq!(records[2].record.form_id, 0x0000_0A03);
        }
    }

    #[test]
    fn test_empty_group_count() {
        let mut output = Vec::new();
        let top = GroupWriter::begin(&mut output, *b"GLOB", GroupType::Top, Game::Skyrim);
        top.finish(&mut output);

        let group = Group::parse(&mut Cursor::new(&output[..]), Game::Skyrim).unwrap();
        assert_eq!(group.empty_group_count(), 1);
    }

    #[test]
    fn test_group_size_too_small() {
        let mut output = Vec::new();
        output.extend_from_slice(b"GRUP");
        output.extend_from_slice(&10u32.to_le_bytes());
        output.extend_from_slice(&[0u8; 16]);
        assert!(Group::parse(&mut Cursor::new(&output[..]), Game::Skyrim).is_err());
    }
}
