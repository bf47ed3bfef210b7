//! # ogx-core
//!
//! Ogx 解封装框架核心库, 提供错误类型与校验和工具.

pub mod crc;
pub mod error;

// 重导出常用类型
pub use crc::{OggCrc, ogg_crc32};
pub use error::{OgxError, OgxResult};
