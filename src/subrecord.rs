use crate::datatypes::{read_u16, read_u32};
use crate::utils::{EspError, Result};
use std::io::{Read, Cursor};

/// 子记录结构
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subrecord {
    /// 4字符子记录类型（原始字节）
    pub signature: [u8; 4],
    /// 原始数据
    pub data: Vec<u8>,
}

impl Subrecord {
    pub fn new(signature: [u8; 4], data: Vec<u8>) -> Self {
        Self { signature, data }
    }

    /// 解析单个子记录
    ///
    /// `XXXX` 子记录携带下一个子记录的 32 位真实大小，这里直接合并为一个子记录返回。
    pub fn parse(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        // 检查是否有足够的数据读取头部
        if cursor.position() + 6 > cursor.get_ref().len() as u64 {
            return Err(EspError::InvalidFormat("Insufficient data for subrecord header".into()));
        }

        let mut signature = [0u8; 4];
        cursor.read_exact(&mut signature)?;
        let mut size = read_u16(cursor)? as u64;

        if &signature == b"XXXX" && size == 4 {
            let real_size = read_u32(cursor)? as u64;
            cursor.read_exact(&mut signature)?;
            let _ = read_u16(cursor)?;
            size = real_size;
        }

        if cursor.position() + size > cursor.get_ref().len() as u64 {
            return Err(EspError::InvalidFormat(format!(
                "Insufficient data for subrecord {} data: expected {} bytes",
                String::from_utf8_lossy(&signature), size
            )));
        }

        let mut data = vec![0u8; size as usize];
        cursor.read_exact(&mut data)?;

        Ok(Subrecord { signature, data })
    }

    /// 解析一段记录数据中的全部子记录
    ///
    /// 记录末尾不足 6 字节且全为 NULL 的数据视为填充并跳过。
    pub fn parse_all(data: &[u8]) -> Result<Vec<Subrecord>> {
        let mut subrecords = Vec::new();
        let mut cursor = Cursor::new(data);

        while cursor.position() < data.len() as u64 {
            let remaining = data.len() as u64 - cursor.position();

            if remaining < 6 {
                let remaining_bytes = &data[cursor.position() as usize..];
                if remaining_bytes.iter().all(|&b| b == 0) {
                    break;
                }
                return Err(EspError::InvalidFormat(format!(
                    "记录末尾有 {} 字节非 NULL 数据，无法解析为子记录: {:02X?}",
                    remaining, remaining_bytes
                )));
            }

            subrecords.push(Subrecord::parse(&mut cursor)?);
        }

        Ok(subrecords)
    }

    /// 序列化子记录（超过 u16 的数据自动写出 `XXXX` 前缀）
    pub fn write(&self, output: &mut Vec<u8>) {
        if self.data.len() > u16::MAX as usize {
            output.extend_from_slice(b"XXXX");
            output.extend_from_slice(&4u16.to_le_bytes());
            output.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
            output.extend_from_slice(&self.signature);
            output.extend_from_slice(&0u16.to_le_bytes());
        } else {
            output.extend_from_slice(&self.signature);
            output.extend_from_slice(&(self.data.len() as u16).to_le_bytes());
        }
        output.extend_from_slice(&self.data);
    }

    /// 序列化一组子记录
    pub fn write_all(subrecords: &[Subrecord]) -> Vec<u8> {
        let mut output = Vec::new();
        for subrecord in subrecords {
            subrecord.write(&mut output);
        }
        output
    }

    /// 获取子记录类型字符串
    pub fn signature_str(&self) -> String {
        String::from_utf8_lossy(&self.signature).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 测试 1 字节 NULL 填充
    #[test]
    fn test_null_padding_1byte() {
        let data = vec![
            b'E', b'D', b'I', b'D', 0x04, 0x00,
            b't', b'e', b's', b't',
            0x00,
        ];

        let subrecords = Subrecord::parse_all(&data).unwrap();
        assert_eq!(subrecords.len(), 1);
        assert_eq!(&subrecords[0].signature, b"EDID");
    }

    /// 测试多个子记录 + 填充
    #[test]
    fn test_multiple_subrecords_with_padding() {
        let data = vec![
            b'E', b'D', b'I', b'D', 0x04, 0x00,
            b't', b'e', b's', b't',
            b'F', b'U', b'L', b'L', 0x05, 0x00,
            b'S', b'w', b'o', b'r', b'd',
            0x00, 0x00,
        ];

        let subrecords = Subrecord::parse_all(&data).unwrap();
        assert_eq!(subrecords.len(), 2, "应该解析出 2 个子记录");
    }

    /// 测试非 NULL 的无效尾部数据应该报错
    #[test]
    fn test_invalid_trailing_data() {
        let data = vec![
            b'E', b'D', b'I', b'D', 0x04, 0x00,
            b't', b'e', b's', b't',
            0xFF, 0xAA,
        ];

        let err = Subrecord::parse_all(&data).unwrap_err();
        assert!(err.to_string().contains("非 NULL 数据"));
    }

    #[test]
    fn test_oversized_subrecord_uses_xxxx() {
        let big = Subrecord::new(*b"DATA", vec![7u8; 70_000]);
        let bytes = Subrecord::write_all(&[big.clone()]);
        assert_eq!(&bytes[..4], b"XXXX");

        let parsed = Subrecord::parse_all(&bytes).unwrap();
        assert_eq!(parsed, vec![big]);
    }
}
