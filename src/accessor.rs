//! 字段访问器
//!
//! 按 [`FieldPath`] 读取、写入和删除字段树中任意嵌套的字段。
//! 访问器本身不认识具体记录类型，只依据记录布局检查路径结构和字段类型。

use crate::codec::{default_tree, find_field, FieldSpec, Layout};
use crate::field::{FieldKind, FieldPath, FieldTree, FieldValue};
use crate::utils::{EspError, Result};

fn invalid_path(path: &FieldPath, reason: &str) -> EspError {
    EspError::InvalidArgument(format!("InvalidPath {}: {}", path, reason))
}

/// 路径末端字段的定义（指向元素本身时返回所在列表的定义）
fn spec_at<'a>(layout: &'a [Layout], path: &FieldPath) -> Result<FieldSpec<'a>> {
    path.validate()?;
    let mut spec = find_field(layout, path.field)
        .ok_or_else(|| invalid_path(path, "未知字段"))?;

    for (_, field) in &path.levels {
        let elements = spec.elements().ok_or_else(|| invalid_path(path, "字段不是列表"))?;
        if *field == 0 {
            break;
        }
        spec = find_field(elements, *field).ok_or_else(|| invalid_path(path, "列表元素中没有该字段"))?;
    }
    Ok(spec)
}

/// 字段的声明类型
pub fn kind(layout: &[Layout], path: &FieldPath) -> Result<FieldKind> {
    if path.addresses_element() {
        return Err(invalid_path(path, "列表元素本身没有字段类型"));
    }
    Ok(spec_at(layout, path)?.kind())
}

/// 字段的声明属性
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldAttributes {
    pub kind: FieldKind,
    /// 定长字段的字节数；变长字段和列表为 `None`
    pub size: Option<usize>,
    pub required: bool,
    pub is_list: bool,
}

impl FieldAttributes {
    pub(crate) fn of_kind(kind: FieldKind, required: bool) -> Self {
        FieldAttributes { kind, size: kind.fixed_size(), required, is_list: kind == FieldKind::List }
    }
}

/// 字段的类型、字节数、是否必需和是否为列表
pub fn attributes(layout: &[Layout], path: &FieldPath) -> Result<FieldAttributes> {
    if path.addresses_element() {
        return Err(invalid_path(path, "列表元素本身没有字段属性"));
    }
    Ok(match spec_at(layout, path)? {
        FieldSpec::Scalar(def) => FieldAttributes {
            kind: def.kind,
            size: def.byte_size(),
            required: def.required,
            is_list: false,
        },
        FieldSpec::List { required, .. } => FieldAttributes::of_kind(FieldKind::List, required),
    })
}

/// 读取字段；可选字段不存在时返回 `Missing`
pub fn get(layout: &[Layout], tree: &FieldTree, path: &FieldPath) -> Result<FieldValue> {
    if path.addresses_element() {
        return Err(invalid_path(path, "只能读取列表字段或元素中的字段"));
    }
    spec_at(layout, path)?;

    let mut value = tree.get(path.field);
    for (index, field) in &path.levels {
        match value {
            Some(FieldValue::List(items)) => match items.get(*index) {
                Some(element) => value = element.get(*field),
                None => return Ok(FieldValue::Missing),
            },
            Some(FieldValue::Missing) | None => return Ok(FieldValue::Missing),
            Some(other) => {
                return Err(invalid_path(path, &format!("字段值类型为 {:?}，不是列表", other.kind())));
            }
        }
    }

    Ok(value.cloned().unwrap_or(FieldValue::Missing))
}

/// 写入字段（复制 `value`）
///
/// 路径中的索引等于列表长度时追加一个带默认值的新元素；更大的索引返回 `InvalidArgument`。
pub fn set(layout: &[Layout], tree: &mut FieldTree, path: &FieldPath, value: &FieldValue) -> Result<()> {
    if path.addresses_element() {
        return Err(invalid_path(path, "不能直接写入列表元素"));
    }
    let spec = spec_at(layout, path)?;
    if value.kind() == FieldKind::Missing || !spec.kind().accepts(value.kind()) {
        return Err(EspError::InvalidArgument(format!(
            "字段 {} 声明为 {:?}，不能写入 {:?}", path, spec.kind(), value.kind()
        )));
    }

    check_indices(tree, path)?;
    let (container, field) = container_for_write(layout, tree, path)?;
    container.insert(field, value.clone());
    Ok(())
}

/// 写入前检查路径上的列表索引，失败时字段树保持不变
fn check_indices(tree: &FieldTree, path: &FieldPath) -> Result<()> {
    let mut current = Some(tree);
    let mut field = path.field;
    for (index, next_field) in &path.levels {
        let items: &[FieldTree] = match current.and_then(|tree| tree.get(field)) {
            Some(FieldValue::List(items)) => items.as_slice(),
            Some(FieldValue::Missing) | None => &[],
            Some(other) => {
                return Err(invalid_path(path, &format!("字段值类型为 {:?}，不是列表", other.kind())));
            }
        };
        if *index > items.len() {
            return Err(invalid_path(path, &format!("索引 {} 超出列表长度 {}", index, items.len())));
        }
        // 追加的新元素中列表都为空
        current = items.get(*index);
        field = *next_field;
    }
    Ok(())
}

/// 以原始小端字节写入字段，按声明类型解析
pub fn set_bytes(layout: &[Layout], tree: &mut FieldTree, path: &FieldPath, bytes: &[u8]) -> Result<()> {
    let declared = kind(layout, path)?;
    let target = match (declared.union_alternative(), get(layout, tree, path)?) {
        // 联合类型保持当前已解析的变体
        (Some(_), FieldValue::Missing) => declared,
        (Some(_), current) => current.kind(),
        (None, _) => declared,
    };
    let value = FieldValue::from_le_bytes(target, bytes)?;
    set(layout, tree, path, &value)
}

/// 删除字段或列表元素
///
/// 删除列表元素后其后的元素索引前移；删除必需字段返回 `InvalidOperation`。
/// 返回是否确实删除了内容。
pub fn delete(layout: &[Layout], tree: &mut FieldTree, path: &FieldPath) -> Result<bool> {
    let spec = spec_at(layout, path)?;

    if path.addresses_element() {
        let depth = path.levels.len() - 1;
        let (index, _) = path.levels[depth];
        let list_field = if depth == 0 { path.field } else { path.levels[depth - 1].1 };

        let container = container_for_read(tree, path, depth)
            .ok_or_else(|| invalid_path(path, "列表元素不存在"))?;
        return match container.get_mut(list_field) {
            Some(FieldValue::List(items)) if index < items.len() => {
                items.remove(index);
                Ok(true)
            }
            _ => Err(invalid_path(path, "列表元素不存在")),
        };
    }

    if spec.required() {
        return Err(EspError::InvalidOperation(format!("字段 {} 是必需字段，不能删除", path)));
    }

    let depth = path.levels.len();
    let field = path.levels.last().map_or(path.field, |(_, field)| *field);
    Ok(container_for_read(tree, path, depth)
        .and_then(|container| container.remove(field))
        .is_some())
}

/// 沿路径前 `depth` 层找到字段所在的树（不创建元素）
fn container_for_read<'t>(tree: &'t mut FieldTree, path: &FieldPath, depth: usize) -> Option<&'t mut FieldTree> {
    let mut current = tree;
    let mut field = path.field;
    for (index, next_field) in &path.levels[..depth] {
        let FieldValue::List(items) = current.get_mut(field)? else { return None };
        current = items.get_mut(*index)?;
        field = *next_field;
    }
    Some(current)
}

/// 沿路径找到（必要时创建）末端字段所在的树
fn container_for_write<'t>(
    layout: &[Layout],
    tree: &'t mut FieldTree,
    path: &FieldPath,
) -> Result<(&'t mut FieldTree, u32)> {
    let mut current = tree;
    let mut current_layout = layout;
    let mut field = path.field;

    for (index, next_field) in &path.levels {
        let elements = find_field(current_layout, field)
            .and_then(|spec| spec.elements())
            .ok_or_else(|| invalid_path(path, "字段不是列表"))?;

        match current.get(field) {
            Some(FieldValue::List(_)) => {}
            Some(FieldValue::Missing) | None => {
                current.insert(field, FieldValue::List(Vec::new()));
            }
            Some(other) => {
                return Err(invalid_path(path, &format!("字段值类型为 {:?}，不是列表", other.kind())));
            }
        }
        let Some(FieldValue::List(items)) = current.get_mut(field) else {
            return Err(invalid_path(path, "字段不是列表"));
        };

        if *index == items.len() {
            items.push(default_tree(elements));
        } else if *index > items.len() {
            return Err(invalid_path(path, &format!("索引 {} 超出列表长度 {}", index, items.len())));
        }

        current = &mut items[*index];
        current_layout = elements;
        field = *next_field;
    }

    Ok((current, field))
}
