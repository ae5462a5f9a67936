use crate::datatypes::{read_u16, read_u32, RecordFlags, RecordType};
use crate::game::Game;
use crate::subrecord::Subrecord;
use crate::utils::{EspError, Result};
use std::io::{Read, Cursor, Write};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

/// 文件中的原始记录
///
/// 只负责头部和（解）压缩，子记录到字段的映射由记录编解码器完成。
/// FormID 保持文件内的相对形式（高字节为主文件列表索引）。
#[derive(Debug, Clone)]
pub struct RawRecord {
    /// 记录类型
    pub record_type: RecordType,
    /// 标志位（原始32位数据）
    pub flags: RecordFlags,
    /// 文件相对 FormID
    pub form_id: u32,
    /// 版本控制信息
    pub version_control: u32,
    /// 内部版本（Oblivion 记录没有该字段）
    pub form_version: u16,
    /// 未知字段
    pub unknown: u16,
    /// 解压后的子记录数据
    pub data: Vec<u8>,
    /// 原始压缩数据（未修改时原样写回）
    pub original_compressed_data: Option<Vec<u8>>,
}

impl RawRecord {
    /// 解析记录
    pub fn parse(cursor: &mut Cursor<&[u8]>, game: Game) -> Result<Self> {
        let header_size = game.record_header_size() as u64;
        if cursor.position() + header_size > cursor.get_ref().len() as u64 {
            return Err(EspError::InvalidFormat("Insufficient data for record header".into()));
        }

        let mut type_bytes = [0u8; 4];
        cursor.read_exact(&mut type_bytes)?;
        let record_type = RecordType(type_bytes);

        let data_size = read_u32(cursor)?;
        Self::validate_data_size(data_size, record_type)?;

        let flags = RecordFlags::from_bits_retain(read_u32(cursor)?);
        let form_id = read_u32(cursor)?;
        let version_control = read_u32(cursor)?;
        let (form_version, unknown) = if header_size == 24 {
            (read_u16(cursor)?, read_u16(cursor)?)
        } else {
            (0, 0)
        };

        if cursor.position() + data_size as u64 > cursor.get_ref().len() as u64 {
            return Err(EspError::InvalidFormat(format!(
                "Insufficient data for record {} data: expected {} bytes",
                record_type, data_size
            )));
        }

        let mut data = vec![0u8; data_size as usize];
        cursor.read_exact(&mut data)?;

        let (data, original_compressed_data) = if flags.contains(RecordFlags::COMPRESSED) {
            let decompressed = Self::decompress_data(&data)
                .map_err(|e| EspError::CompressionError(format!("记录 {} [{:08X}]: {}", record_type, form_id, e)))?;
            (decompressed, Some(data))
        } else {
            (data, None)
        };

        Ok(RawRecord {
            record_type,
            flags,
            form_id,
            version_control,
            form_version,
            unknown,
            data,
            original_compressed_data,
        })
    }

    /// 验证数据大小
    fn validate_data_size(data_size: u32, record_type: RecordType) -> Result<()> {
        if data_size > 100_000_000 {  // 100MB限制
            return Err(EspError::InvalidFormat(format!(
                "记录 {} 数据大小异常: {} bytes (可能数据损坏)", record_type, data_size
            )));
        }
        Ok(())
    }

    /// 解压缩数据（前 4 字节为解压后大小）
    fn decompress_data(data: &[u8]) -> std::result::Result<Vec<u8>, String> {
        if data.len() < 4 {
            return Err("压缩数据太短，无法包含解压大小".into());
        }

        let mut data_cursor = Cursor::new(data);
        let decompressed_size = read_u32(&mut data_cursor).map_err(|e| e.to_string())?;
        if decompressed_size > 50_000_000 {  // 50MB限制
            return Err(format!("解压大小过大: {} bytes (可能数据损坏)", decompressed_size));
        }

        let mut decoder = ZlibDecoder::new(&data[4..]);
        let mut decompressed = Vec::with_capacity(decompressed_size as usize);
        decoder.read_to_end(&mut decompressed).map_err(|e| e.to_string())?;

        if decompressed.len() != decompressed_size as usize {
            return Err(format!("解压大小不匹配: 期望 {} bytes，实际 {} bytes",
                decompressed_size, decompressed.len()));
        }

        Ok(decompressed)
    }

    /// 压缩数据
    fn compress_data(data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data)?;
        let compressed = encoder.finish()?;

        let mut result = Vec::with_capacity(compressed.len() + 4);
        result.extend_from_slice(&(data.len() as u32).to_le_bytes());
        result.extend_from_slice(&compressed);
        Ok(result)
    }

    /// 解析子记录
    pub fn subrecords(&self) -> Result<Vec<Subrecord>> {
        Subrecord::parse_all(&self.data)
    }

    /// 替换数据（丢弃原始压缩数据，写出时按标志位重新压缩）
    pub fn set_data(&mut self, data: Vec<u8>) {
        self.data = data;
        self.original_compressed_data = None;
    }

    /// 写入记录
    pub fn write(&self, output: &mut Vec<u8>, game: Game) -> Result<()> {
        let payload = if self.flags.contains(RecordFlags::COMPRESSED) {
            match &self.original_compressed_data {
                Some(original) => original.clone(),
                None => Self::compress_data(&self.data)?,
            }
        } else {
            self.data.clone()
        };

        output.extend_from_slice(&self.record_type.0);
        output.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        output.extend_from_slice(&self.flags.bits().to_le_bytes());
        output.extend_from_slice(&self.form_id.to_le_bytes());
        output.extend_from_slice(&self.version_control.to_le_bytes());
        if game.record_header_size() == 24 {
            output.extend_from_slice(&self.form_version.to_le_bytes());
            output.extend_from_slice(&self.unknown.to_le_bytes());
        }
        output.extend_from_slice(&payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(flags: RecordFlags) -> RawRecord {
        RawRecord {
            record_type: RecordType(*b"GLOB"),
            flags,
            form_id: 0x0100_0800,
            version_control: 7,
            form_version: 44,
            unknown: 0,
            data: Subrecord::write_all(&[Subrecord::new(*b"EDID", b"Gold\0".to_vec())]),
            original_compressed_data: None,
        }
    }

    #[test]
    fn test_write_then_parse_skyrim() {
        let record = sample(RecordFlags::empty());
        let mut bytes = Vec::new();
        record.write(&mut bytes, Game::Skyrim).unwrap();
        assert_eq!(bytes.len(), 24 + record.data.len());

        let parsed = RawRecord::parse(&mut Cursor::new(&bytes[..]), Game::Skyrim).unwrap();
        assert_eq!(parsed.form_id, 0x0100_0800);
        assert_eq!(parsed.form_version, 44);
        assert_eq!(parsed.data, record.data);
    }

    #[test]
    fn test_oblivion_header_is_20_bytes() {
        let record = sample(RecordFlags::empty());
        let mut bytes = Vec::new();
        record.write(&mut bytes, Game::Oblivion).unwrap();
        assert_eq!(bytes.len(), 20 + record.data.len());

        let parsed = RawRecord::parse(&mut Cursor::new(&bytes[..]), Game::Oblivion).unwrap();
        assert_eq!(parsed.form_version, 0);
        assert_eq!(parsed.version_control, 7);
    }

    #[test]
    fn test_compressed_record_roundtrip() {
        let record = sample(RecordFlags::COMPRESSED);
        let mut bytes = Vec::new();
        record.write(&mut bytes, Game::Skyrim).unwrap();

        let parsed = RawRecord::parse(&mut Cursor::new(&bytes[..]), Game::Skyrim).unwrap();
        assert_eq!(parsed.data, record.data);
        assert!(parsed.original_compressed_data.is_some());

        let subrecords = parsed.subrecords().unwrap();
        assert_eq!(&subrecords[0].signature, b"EDID");
    }

    #[test]
    fn test_truncated_record_is_rejected() {
        let record = sample(RecordFlags::empty());
        let mut bytes = Vec::new();
        record.write(&mut bytes, Game::Skyrim).unwrap();
        bytes.truncate(bytes.len() - 2);

        assert!(RawRecord::parse(&mut Cursor::new(&bytes[..]), Game::Skyrim).is_err());
    }
}
