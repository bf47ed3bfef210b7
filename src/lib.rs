//! # Ogx
//!
//! 纯 Rust 实现的 Ogg 容器解封装框架.
//!
//! Ogx 把一个 Ogg 字节流拆分为多个逻辑流, 每个逻辑流按顺序产出 packet:
//! - **页面解析**: 头部校验与 CRC-32 校验
//! - **重同步**: 跳过损坏或截断的数据, 统计丢弃量
//! - **多路分离**: 按序列号分发页面, 支持多线程分别拉取不同逻辑流
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use ogx::format::{IoContext, OggContainer};
//!
//! # fn main() -> ogx::core::OgxResult<()> {
//! let container = OggContainer::new(IoContext::open_read("input.ogg")?);
//! if container.initialize()? {
//!     for serial in container.active_serials()? {
//!         let reader = container.get_stream(serial)?;
//!         while let Some(packet) = reader.read_packet()? {
//!             println!("serial={serial} packet={} 字节", packet.size());
//!         }
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Crate 结构
//!
//! | Crate | 功能 |
//! |-------|------|
//! | `ogx-core` | 错误类型与 CRC-32 |
//! | `ogx-format` | 页面解析、重同步与逻辑流分离 |

/// 核心类型与工具
pub use ogx_core as core;

/// Ogg 容器解封装
pub use ogx_format as format;

/// 获取 Ogx 版本号
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// 打开文件并创建使用默认配置的容器
pub fn open(path: &str) -> ogx_core::OgxResult<ogx_format::OggContainer> {
    let io = ogx_format::IoContext::open_read(path)?;
    Ok(ogx_format::OggContainer::new(io))
}
