//! Packet 描述符与完整 packet.
//!
//! 描述符只记录 packet (或其跨页片段) 在底层流中的位置, 不持有数据;
//! 数据通过容器按需读取.

use bitflags::bitflags;
use bytes::Bytes;

bitflags! {
    /// Packet 描述符标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PacketFlags: u8 {
        /// 数据延续到下一页 (段表以 255 结尾)
        const CONTINUES_ON_NEXT_PAGE = 0x01;
        /// 本片段是上一页 packet 的延续
        const CONTINUED_FROM_PREVIOUS_PAGE = 0x02;
        /// 所在页面经重同步找到, 之前可能存在数据断裂
        const FOUND_BY_RESYNC = 0x04;
        /// 逻辑流的最后一个 packet
        const END_OF_STREAM = 0x08;
        /// 所在页面的页面序号与上一页不连续
        const SEQUENCE_GAP = 0x10;
    }
}

/// Packet 描述符
///
/// 对应一页内的一段连续载荷. 跨页 packet 由多个描述符组成:
/// 除最后一个外都带 [`PacketFlags::CONTINUES_ON_NEXT_PAGE`],
/// 除第一个外都带 [`PacketFlags::CONTINUED_FROM_PREVIOUS_PAGE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketDescriptor {
    /// 所属逻辑流序列号
    pub serial: u32,
    /// 载荷在底层流中的绝对偏移
    pub offset: u64,
    /// 载荷长度
    pub length: usize,
    /// 标志
    pub flags: PacketFlags,
    /// 所在页面的粒度位置
    pub granule_position: i64,
    /// 所在页面的页面序号
    pub page_sequence: u32,
}

impl PacketDescriptor {
    /// 数据是否延续到下一页
    pub fn continues_on_next_page(&self) -> bool {
        self.flags.contains(PacketFlags::CONTINUES_ON_NEXT_PAGE)
    }

    /// 是否为上一页 packet 的延续
    pub fn is_continuation(&self) -> bool {
        self.flags.contains(PacketFlags::CONTINUED_FROM_PREVIOUS_PAGE)
    }

    /// 是否经重同步找到
    pub fn found_by_resync(&self) -> bool {
        self.flags.contains(PacketFlags::FOUND_BY_RESYNC)
    }

    /// 是否为逻辑流的最后一个 packet
    pub fn is_end_of_stream(&self) -> bool {
        self.flags.contains(PacketFlags::END_OF_STREAM)
    }

    /// 载荷结束后的下一个偏移
    pub fn end_offset(&self) -> u64 {
        self.offset + self.length as u64
    }
}

/// 已拼接完成的 packet
#[derive(Debug, Clone)]
pub struct Packet {
    /// 所属逻辑流序列号
    pub serial: u32,
    /// 完整数据
    pub data: Bytes,
    /// packet 结束页的粒度位置
    pub granule_position: i64,
    /// packet 结束页的页面序号
    pub page_sequence: u32,
    /// 各片段标志的并集 (去掉跨页标志)
    pub flags: PacketFlags,
}

impl Packet {
    /// 数据大小 (字节)
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// 是否为逻辑流的最后一个 packet
    pub fn is_end_of_stream(&self) -> bool {
        self.flags.contains(PacketFlags::END_OF_STREAM)
    }
}
