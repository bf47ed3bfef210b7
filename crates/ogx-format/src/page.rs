//! Ogg 页面头部解析.
//!
//! # Ogg 页面结构
//! ```text
//! Capture pattern: "OggS" (4 bytes)
//! Version:         1 byte (always 0)
//! Header type:     1 byte (flags: continued=0x01, BOS=0x02, EOS=0x04)
//! Granule pos:     8 bytes (little-endian, codec-specific)
//! Serial number:   4 bytes (identifies logical stream)
//! Page seq no:     4 bytes
//! CRC checksum:    4 bytes
//! Num segments:    1 byte
//! Segment table:   N bytes (each 1 byte, packet sizes)
//! Page data:       sum(segment_table) bytes
//! ```
//!
//! 解析失败 (截断、同步字错误、版本错误、CRC 错误) 属于软失败,
//! 以 [`ParseOutcome::NoPage`] 返回, 由重同步器吸收.

use bitflags::bitflags;
use byteorder::{ByteOrder, LittleEndian};
use log::{debug, trace};
use ogx_core::{OggCrc, OgxError, OgxResult};

use crate::io::IoContext;

/// Ogg 同步字 (capture pattern)
pub const OGG_SIGNATURE: &[u8; 4] = b"OggS";
/// 固定头部长度
pub const PAGE_HEADER_LEN: usize = 27;
/// 段表最大长度
pub const MAX_SEGMENTS: usize = 255;
/// 单页最大字节数: 头部 + 满段表 + 满载荷
pub const MAX_PAGE_SIZE: usize = PAGE_HEADER_LEN + MAX_SEGMENTS + MAX_SEGMENTS * 255;

/// 头部中 CRC 字段的位置
const CRC_FIELD: std::ops::Range<usize> = 22..26;

bitflags! {
    /// 页面头部标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PageFlags: u8 {
        /// 首个 packet 延续自上一页
        const CONTINUED = 0x01;
        /// 逻辑流的第一页 (BOS)
        const BEGIN_OF_STREAM = 0x02;
        /// 逻辑流的最后一页 (EOS)
        const END_OF_STREAM = 0x04;
    }
}

/// 已校验的 Ogg 页面头部
///
/// 只保存元数据和载荷位置, 载荷字节按需从底层流读取.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageHeader {
    /// 头部标志
    pub flags: PageFlags,
    /// 粒度位置 (-1 表示本页没有 packet 结束)
    pub granule_position: i64,
    /// 逻辑流序列号
    pub serial: u32,
    /// 页面序号
    pub sequence: u32,
    /// 头部中存储的校验和
    pub checksum: u32,
    /// 段表
    pub segment_table: Vec<u8>,
    /// 页面起始偏移 ("OggS" 所在位置)
    pub page_offset: u64,
    /// 载荷起始偏移
    pub payload_offset: u64,
    /// 载荷长度 (段表之和)
    pub payload_len: usize,
}

impl PageHeader {
    /// 头部 + 段表长度
    pub fn header_len(&self) -> usize {
        PAGE_HEADER_LEN + self.segment_table.len()
    }

    /// 整页长度
    pub fn total_len(&self) -> usize {
        self.header_len() + self.payload_len
    }

    /// 页面结束后的下一个偏移
    pub fn end_offset(&self) -> u64 {
        self.payload_offset + self.payload_len as u64
    }

    /// 是否为续延页面
    pub fn is_continued(&self) -> bool {
        self.flags.contains(PageFlags::CONTINUED)
    }

    /// 是否为 BOS 页面
    pub fn is_bos(&self) -> bool {
        self.flags.contains(PageFlags::BEGIN_OF_STREAM)
    }

    /// 是否为 EOS 页面
    pub fn is_eos(&self) -> bool {
        self.flags.contains(PageFlags::END_OF_STREAM)
    }

    /// 头部与段表消耗的比特数 (容器开销)
    pub fn overhead_bits(&self) -> u64 {
        self.header_len() as u64 * 8
    }

    /// 从解析时使用的缓冲区中取出载荷
    ///
    /// 仅在下一次解析覆盖缓冲区之前有效.
    pub fn payload<'a>(&self, scratch: &'a [u8]) -> &'a [u8] {
        let start = self.header_len();
        &scratch[start..start + self.payload_len]
    }
}

/// 页面被拒绝的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageRejection {
    /// 数据不足 (头部、段表或载荷被截断)
    Truncated,
    /// 同步字不匹配
    BadSignature,
    /// 版本号非 0
    BadVersion(u8),
    /// CRC 校验失败
    ChecksumMismatch { stored: u32, computed: u32 },
}

/// 单次解析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    /// 找到一个有效页面
    Page(PageHeader),
    /// 该位置没有有效页面
    NoPage(PageRejection),
}

/// 在绝对偏移 `offset` 处尝试解析一个完整页面
///
/// 整页 (头部 + 段表 + 载荷) 读入 `scratch`, 并用 `crc` 重新计算校验和.
/// `scratch` 长度至少为 [`MAX_PAGE_SIZE`].
///
/// 只有底层 I/O 故障会返回 `Err`; 数据问题一律返回 [`ParseOutcome::NoPage`].
pub fn parse_page_at(
    io: &mut IoContext,
    offset: u64,
    scratch: &mut [u8],
    crc: &mut OggCrc,
) -> OgxResult<ParseOutcome> {
    if scratch.len() < MAX_PAGE_SIZE {
        return Err(OgxError::InvalidArgument(format!(
            "页面缓冲区过小: {} < {MAX_PAGE_SIZE}",
            scratch.len(),
        )));
    }

    let got = io.read_at(offset, &mut scratch[..PAGE_HEADER_LEN])?;
    if got < PAGE_HEADER_LEN {
        trace!("Ogg: offset={offset} 头部不足 ({got} 字节)");
        return Ok(ParseOutcome::NoPage(PageRejection::Truncated));
    }

    let header = &scratch[..PAGE_HEADER_LEN];
    if &header[0..4] != OGG_SIGNATURE {
        trace!("Ogg: offset={offset} 同步字不匹配");
        return Ok(ParseOutcome::NoPage(PageRejection::BadSignature));
    }
    let version = header[4];
    if version != 0 {
        debug!("Ogg: offset={offset} 不支持的版本 {version}");
        return Ok(ParseOutcome::NoPage(PageRejection::BadVersion(version)));
    }

    let flags = PageFlags::from_bits_truncate(header[5]);
    let granule_position = LittleEndian::read_i64(&header[6..14]);
    let serial = LittleEndian::read_u32(&header[14..18]);
    let sequence = LittleEndian::read_u32(&header[18..22]);
    let checksum = LittleEndian::read_u32(&header[CRC_FIELD]);
    let num_segments = header[26] as usize;

    // 段表
    let lacing_end = PAGE_HEADER_LEN + num_segments;
    let got = io.read_at(
        offset + PAGE_HEADER_LEN as u64,
        &mut scratch[PAGE_HEADER_LEN..lacing_end],
    )?;
    if got < num_segments {
        trace!("Ogg: offset={offset} 段表被截断 ({got}/{num_segments})");
        return Ok(ParseOutcome::NoPage(PageRejection::Truncated));
    }
    let segment_table = scratch[PAGE_HEADER_LEN..lacing_end].to_vec();

    // 载荷
    let payload_len: usize = segment_table.iter().map(|&s| s as usize).sum();
    let page_end = lacing_end + payload_len;
    let got = io.read_at(offset + lacing_end as u64, &mut scratch[lacing_end..page_end])?;
    if got < payload_len {
        trace!("Ogg: offset={offset} 载荷被截断 ({got}/{payload_len})");
        return Ok(ParseOutcome::NoPage(PageRejection::Truncated));
    }

    // CRC 覆盖整个页面, 其中 CRC 字段本身按 0 参与计算.
    crc.reset();
    crc.update_slice(&scratch[..CRC_FIELD.start]);
    crc.update_slice(&[0u8; 4]);
    crc.update_slice(&scratch[CRC_FIELD.end..page_end]);
    if !crc.matches(checksum) {
        let computed = crc.value();
        debug!(
            "Ogg 页面 CRC 校验失败: offset={offset}, serial={serial}, 读取=0x{checksum:08X}, 计算=0x{computed:08X}",
        );
        return Ok(ParseOutcome::NoPage(PageRejection::ChecksumMismatch {
            stored: checksum,
            computed,
        }));
    }

    Ok(ParseOutcome::Page(PageHeader {
        flags,
        granule_position,
        serial,
        sequence,
        checksum,
        segment_table,
        page_offset: offset,
        payload_offset: offset + lacing_end as u64,
        payload_len,
    }))
}
