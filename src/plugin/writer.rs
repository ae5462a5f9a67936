use crate::datatypes::{RecordFlags, RecordType};
use crate::game::Game;
use crate::group::{GroupType, GroupWriter};
use crate::record::RawRecord;
use crate::utils::{EspError, Result};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};

/// 待写出的记录（FormID 已折叠为文件相对形式）
#[derive(Debug)]
pub struct OutputRecord {
    pub raw: RawRecord,
    /// 父记录的文件相对 FormID
    pub parent: Option<u32>,
}

/// 写出结果
#[derive(Debug)]
pub struct WrittenPlugin {
    pub bytes: Vec<u8>,
    /// 记录数与组数之和（写入 HEDR）
    pub record_count: u32,
}

/// 按记录层级生成组结构
///
/// 无父记录的记录按类型放入顶级组（按首次出现顺序）；
/// 子记录放入父记录之后的子组：DIAL 用话题子组，WRLD 用世界子组，
/// CELL 用单元格子组并按持久标志分为持久和临时两部分。
/// 父记录不在 `records` 中时返回 `InvalidOperation`。
pub fn write_plugin(
    header: impl Fn(u32) -> RawRecord,
    records: &[OutputRecord],
    game: Game,
) -> Result<WrittenPlugin> {
    let mut top_level: IndexMap<RecordType, Vec<usize>> = IndexMap::new();
    let mut children: HashMap<u32, Vec<usize>> = HashMap::new();
    for (index, record) in records.iter().enumerate() {
        match record.parent {
            Some(parent) => children.entry(parent).or_default().push(index),
            None => top_level.entry(record.raw.record_type).or_default().push(index),
        }
    }

    // 父记录不在输出中的记录无处安放
    let written: HashSet<u32> = records.iter().map(|record| record.raw.form_id).collect();
    if let Some((parent, orphans)) = children.iter().find(|(parent, _)| !written.contains(*parent)) {
        return Err(EspError::InvalidOperation(format!(
            "{} 条记录的父记录 {:08X} 不在插件中", orphans.len(), parent
        )));
    }

    let mut writer = PluginWriter { records, children: &children, game, body: Vec::new(), group_count: 0 };
    for (record_type, indices) in &top_level {
        let group = writer.begin(record_type.0, GroupType::Top);
        for index in indices {
            writer.write_with_children(*index)?;
        }
        group.finish(&mut writer.body);
    }

    let record_count = (records.len() + writer.group_count) as u32;
    let mut bytes = Vec::with_capacity(writer.body.len() + 256);
    header(record_count).write(&mut bytes, game)?;
    bytes.extend_from_slice(&writer.body);

    Ok(WrittenPlugin { bytes, record_count })
}

struct PluginWriter<'a> {
    records: &'a [OutputRecord],
    children: &'a HashMap<u32, Vec<usize>>,
    game: Game,
    body: Vec<u8>,
    group_count: usize,
}

impl PluginWriter<'_> {
    fn begin(&mut self, label: [u8; 4], group_type: GroupType) -> GroupWriter {
        self.group_count += 1;
        GroupWriter::begin(&mut self.body, label, group_type, self.game)
    }

    fn write_with_children(&mut self, index: usize) -> Result<()> {
        let (records, child_map) = (self.records, self.children);
        let record = &records[index].raw;
        record.write(&mut self.body, self.game)?;

        let Some(children) = child_map.get(&record.form_id) else {
            return Ok(());
        };
        let label = record.form_id.to_le_bytes();

        match record.record_type {
            RecordType::CELL => {
                let group = self.begin(label, GroupType::CellChildren);
                let (persistent, temporary): (Vec<usize>, Vec<usize>) = children
                    .iter()
                    .copied()
                    .partition(|child| records[*child].raw.flags.contains(RecordFlags::PERSISTENT));
                for (group_type, members) in [
                    (GroupType::CellPersistentChildren, persistent),
                    (GroupType::CellTemporaryChildren, temporary),
                ] {
                    if members.is_empty() {
                        continue;
                    }
                    let inner = self.begin(label, group_type);
                    for child in members {
                        self.write_with_children(child)?;
                    }
                    inner.finish(&mut self.body);
                }
                group.finish(&mut self.body);
            }
            record_type => {
                let group_type = if record_type == RecordType::WRLD {
                    GroupType::WorldChildren
                } else {
                    GroupType::TopicChildren
                };
                let group = self.begin(label, group_type);
                for child in children {
                    self.write_with_children(*child)?;
                }
                group.finish(&mut self.body);
            }
        }
        Ok(())
    }
}
