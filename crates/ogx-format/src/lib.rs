//! # ogx-format
//!
//! Ogx Ogg 容器解封装库.
//!
//! 从字节流中解析 Ogg 页面, 按逻辑流序列号拆分为 packet 描述符.
//! 损坏或缺失的数据通过重同步跳过, 丢弃的数据量计入统计.

pub mod assembler;
pub mod container;
pub mod io;
pub mod options;
pub mod packet;
pub mod page;
pub mod page_writer;
pub mod reader;
pub mod resync;

// 重导出常用类型
pub use assembler::PacketAssembler;
pub use container::{
    AcceptAll, ContainerStats, Dispatch, GatherOutcome, NewStream, OggContainer, StreamDecider,
    StreamDecision,
};
pub use io::IoContext;
pub use options::ContainerOptions;
pub use packet::{Packet, PacketDescriptor, PacketFlags};
pub use page::{PageFlags, PageHeader};
pub use page_writer::{OggPager, PageBuilder};
pub use reader::PacketReader;
pub use resync::Resynchronizer;
