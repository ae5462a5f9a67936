use crate::codec::{DecodedRecord, RecordCodec};
use crate::datatypes::read_u32;
use crate::game::Game;
use crate::group::{Group, PlacedRecord};
use crate::record::RawRecord;
use crate::utils::{EspError, Result};
use rayon::prelude::*;
use std::io::{Cursor, Read};

/// 解析后的插件文件（FormID 仍为文件相对形式）
#[derive(Debug)]
pub struct ParsedPlugin {
    pub header: RawRecord,
    /// 按文件顺序展开的记录
    pub records: Vec<PlacedRecord>,
    /// 没有任何子元素的组数量
    pub empty_groups: usize,
}

/// 只读取 TES4 头部记录
pub fn read_header(data: &[u8], game: Game) -> Result<RawRecord> {
    let mut cursor = Cursor::new(data);
    RawRecord::parse(&mut cursor, game)
}

/// 解析整个插件文件
///
/// 先扫描顶级组边界，再并行解析各组。
pub fn parse_plugin(data: &[u8], game: Game) -> Result<ParsedPlugin> {
    let mut cursor = Cursor::new(data);
    let header = RawRecord::parse(&mut cursor, game)?;

    let group_ranges = scan_group_boundaries(&mut cursor, data, game)?;
    let groups: Vec<Group> = group_ranges
        .par_iter()
        .map(|&(start, size)| -> Result<Group> {
            let group_data = &data[start..start + size];
            let mut group_cursor = Cursor::new(group_data);
            Group::parse(&mut group_cursor, game)
        })
        .collect::<Result<Vec<_>>>()?;

    let empty_groups = groups.iter().map(Group::empty_group_count).sum();
    let mut records = Vec::new();
    for group in groups {
        group.into_records(None, &mut records);
    }

    tracing::debug!("解析 {} 个顶级组，{} 条记录", group_ranges.len(), records.len());
    Ok(ParsedPlugin { header, records, empty_groups })
}

/// 扫描顶级组边界（用于并行解析）
fn scan_group_boundaries(cursor: &mut Cursor<&[u8]>, data: &[u8], game: Game) -> Result<Vec<(usize, usize)>> {
    let mut boundaries = Vec::new();
    let header_size = game.group_header_size();

    while (cursor.position() as usize) < data.len() {
        let pos = cursor.position() as usize;

        // 至少需要类型和大小两个字段
        if pos + 8 > data.len() {
            break;
        }

        let mut type_bytes = [0u8; 4];
        cursor.read_exact(&mut type_bytes)?;
        if &type_bytes != b"GRUP" {
            return Err(EspError::InvalidFormat(format!(
                "在位置 {} 期望 GRUP，但找到 {}", pos, String::from_utf8_lossy(&type_bytes)
            )));
        }

        let size = read_u32(cursor)? as usize;
        if size < header_size || size > 200_000_000 {
            return Err(EspError::InvalidFormat(format!("在位置 {} 发现异常 Group 大小: {} bytes", pos, size)));
        }
        if pos + size > data.len() {
            return Err(EspError::InvalidFormat(format!(
                "Group 边界超出数据范围: {}..{} (数据长度: {})", pos, pos + size, data.len()
            )));
        }

        boundaries.push((pos, size));
        cursor.set_position((pos + size) as u64);
    }

    Ok(boundaries)
}

/// 并行解码记录数据，结果顺序与输入一致
pub fn decode_records(codec: &dyn RecordCodec, records: &[PlacedRecord]) -> Result<Vec<DecodedRecord>> {
    records
        .par_iter()
        .map(|placed| {
            codec.decode(placed.record.record_type, &placed.record.data).map_err(|e| {
                EspError::InvalidFormat(format!(
                    "记录 {} [{:08X}] 解码失败: {}", placed.record.record_type, placed.record.form_id, e
                ))
            })
        })
        .collect()
}
