//! CRC 校验和计算.
//!
//! 提供 Ogg 页面使用的 CRC-32 变体: 多项式 0x04C11DB7, 初始值 0,
//! 不做位反转, 不做最终异或. 与常见的 (zlib) CRC-32 结果不同.

/// Ogg CRC-32 多项式
const OGG_CRC_POLY: u32 = 0x04C1_1DB7;

/// Ogg CRC-32 查找表 (高位优先)
const OGG_CRC_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0u32;
    while i < 256 {
        let mut crc = i << 24;
        let mut j = 0;
        while j < 8 {
            if crc & 0x8000_0000 != 0 {
                crc = (crc << 1) ^ OGG_CRC_POLY;
            } else {
                crc <<= 1;
            }
            j += 1;
        }
        table[i as usize] = crc;
        i += 1;
    }
    table
};

/// 增量式 Ogg CRC-32 计算器
///
/// 校验页面时按顺序喂入: 头部 (校验字段替换为 4 个 0 字节)、段表、页面数据.
/// 同一实例可通过 [`OggCrc::reset`] 在多个页面间复用.
#[derive(Debug, Clone, Copy, Default)]
pub struct OggCrc {
    value: u32,
}

impl OggCrc {
    /// 创建初始状态的计算器
    pub const fn new() -> Self {
        Self { value: 0 }
    }

    /// 折入一个字节
    #[inline]
    pub fn update(&mut self, byte: u8) {
        let idx = ((self.value >> 24) ^ u32::from(byte)) & 0xFF;
        self.value = (self.value << 8) ^ OGG_CRC_TABLE[idx as usize];
    }

    /// 折入一段字节
    pub fn update_slice(&mut self, data: &[u8]) {
        for &byte in data {
            self.update(byte);
        }
    }

    /// 清空内部状态
    pub fn reset(&mut self) {
        self.value = 0;
    }

    /// 当前校验值
    pub fn value(&self) -> u32 {
        self.value
    }

    /// 当前校验值是否与期望值一致
    pub fn matches(&self, expected: u32) -> bool {
        self.value == expected
    }
}

/// 一次性计算 Ogg CRC-32
pub fn ogg_crc32(data: &[u8]) -> u32 {
    let mut crc = OggCrc::new();
    crc.update_slice(data);
    crc.value()
}
