//! Ogg 页面构造.
//!
//! 生成带正确 CRC 的 Ogg 页面, 以及将 packet 序列切分为页面的 [`OggPager`].
//! 主要用于测试夹具、基准测试和其他需要合成 Ogg 数据的场景.

use ogx_core::{OgxError, OgxResult, ogg_crc32};

use crate::page::{MAX_SEGMENTS, OGG_SIGNATURE, PAGE_HEADER_LEN, PageFlags};

/// 计算完整 packet 的段表: 若干 255 加一个 < 255 的结尾段
pub fn lacing_for(len: usize) -> Vec<u8> {
    let mut segments = vec![255u8; len / 255];
    segments.push((len % 255) as u8);
    segments
}

/// 单页构造器
#[derive(Debug, Clone)]
pub struct PageBuilder {
    flags: PageFlags,
    granule_position: i64,
    serial: u32,
    sequence: u32,
    segment_table: Vec<u8>,
    payload: Vec<u8>,
}

impl PageBuilder {
    /// 创建空页面 (无段, granule = 0)
    pub fn new(serial: u32, sequence: u32) -> Self {
        Self {
            flags: PageFlags::empty(),
            granule_position: 0,
            serial,
            sequence,
            segment_table: Vec::new(),
            payload: Vec::new(),
        }
    }

    /// 设置头部标志
    pub fn flags(mut self, flags: PageFlags) -> Self {
        self.flags = flags;
        self
    }

    /// 设置粒度位置
    pub fn granule(mut self, granule_position: i64) -> Self {
        self.granule_position = granule_position;
        self
    }

    /// 追加一个在本页结束的 packet (或 packet 的最后片段)
    pub fn packet(mut self, data: &[u8]) -> Self {
        self.segment_table.extend_from_slice(&lacing_for(data.len()));
        self.payload.extend_from_slice(data);
        self
    }

    /// 追加一个延续到下一页的片段
    ///
    /// 长度必须是 255 的整数倍, 否则 [`PageBuilder::build`] 会报错.
    pub fn unterminated(mut self, data: &[u8]) -> Self {
        self.segment_table
            .extend(std::iter::repeat_n(255u8, data.len() / 255));
        self.payload.extend_from_slice(data);
        self
    }

    /// 直接指定段表与数据
    pub fn raw(mut self, segment_table: &[u8], data: &[u8]) -> Self {
        self.segment_table.extend_from_slice(segment_table);
        self.payload.extend_from_slice(data);
        self
    }

    /// 生成整页字节
    pub fn build(&self) -> OgxResult<Vec<u8>> {
        if self.segment_table.len() > MAX_SEGMENTS {
            return Err(OgxError::InvalidArgument(format!(
                "段表过长: {} > {MAX_SEGMENTS}",
                self.segment_table.len(),
            )));
        }
        let declared: usize = self.segment_table.iter().map(|&s| s as usize).sum();
        if declared != self.payload.len() {
            return Err(OgxError::InvalidArgument(format!(
                "段表之和 {declared} 与数据长度 {} 不一致",
                self.payload.len(),
            )));
        }

        let mut page =
            Vec::with_capacity(PAGE_HEADER_LEN + self.segment_table.len() + self.payload.len());
        page.extend_from_slice(OGG_SIGNATURE);
        page.push(0);
        page.push(self.flags.bits());
        page.extend_from_slice(&self.granule_position.to_le_bytes());
        page.extend_from_slice(&self.serial.to_le_bytes());
        page.extend_from_slice(&self.sequence.to_le_bytes());
        // CRC 占位 (先填 0, 稍后计算)
        page.extend_from_slice(&0u32.to_le_bytes());
        page.push(self.segment_table.len() as u8);
        page.extend_from_slice(&self.segment_table);
        page.extend_from_slice(&self.payload);

        let crc = ogg_crc32(&page);
        page[22..26].copy_from_slice(&crc.to_le_bytes());
        Ok(page)
    }
}

/// 单个逻辑流的分页器
///
/// 每个 packet 单独成页, 超过 255 段时切分到多个续延页面.
/// 第一页带 BOS 标志, `end_of_stream` 的 packet 最后一页带 EOS 标志.
#[derive(Debug)]
pub struct OggPager {
    serial: u32,
    sequence: u32,
    out: Vec<u8>,
}

impl OggPager {
    /// 创建分页器
    pub fn new(serial: u32) -> Self {
        Self {
            serial,
            sequence: 0,
            out: Vec::new(),
        }
    }

    /// 逻辑流序列号
    pub fn serial(&self) -> u32 {
        self.serial
    }

    /// 下一页的页面序号
    pub fn next_sequence(&self) -> u32 {
        self.sequence
    }

    /// 写入一个 packet
    ///
    /// 中间页面的 granule 为 -1 (没有 packet 在该页结束).
    pub fn write_packet(&mut self, data: &[u8], granule: i64, end_of_stream: bool) -> OgxResult<()> {
        let lacing = lacing_for(data.len());
        let chunks: Vec<&[u8]> = lacing.chunks(MAX_SEGMENTS).collect();
        let mut data_pos = 0usize;

        for (i, chunk) in chunks.iter().enumerate() {
            let is_first = i == 0;
            let is_last = i + 1 == chunks.len();

            let mut flags = PageFlags::empty();
            if self.sequence == 0 && is_first {
                flags |= PageFlags::BEGIN_OF_STREAM;
            }
            if !is_first {
                flags |= PageFlags::CONTINUED;
            }
            if is_last && end_of_stream {
                flags |= PageFlags::END_OF_STREAM;
            }

            let chunk_len: usize = chunk.iter().map(|&s| s as usize).sum();
            let page = PageBuilder::new(self.serial, self.sequence)
                .flags(flags)
                .granule(if is_last { granule } else { -1 })
                .raw(chunk, &data[data_pos..data_pos + chunk_len])
                .build()?;
            data_pos += chunk_len;

            self.out.extend_from_slice(&page);
            self.sequence = self.sequence.wrapping_add(1);
        }
        Ok(())
    }

    /// 已生成的字节
    pub fn bytes(&self) -> &[u8] {
        &self.out
    }

    /// 取出已生成的字节 (用于交织多个逻辑流)
    pub fn take_bytes(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.out)
    }
}
