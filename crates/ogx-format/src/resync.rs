//! 页面重同步.
//!
//! 在游标处直接解析页面; 失败时逐字节向前搜索同步字 "OggS",
//! 在每个命中位置重新解析. 搜索范围有上限, 超出范围或数据耗尽即视为
//! 容器结束.

use log::{debug, trace};
use ogx_core::{OggCrc, OgxResult};

use crate::io::IoContext;
use crate::page::{OGG_SIGNATURE, PageHeader, ParseOutcome, parse_page_at};

/// 默认搜索窗口 (字节)
pub const DEFAULT_RESYNC_WINDOW: usize = 65536;

/// 一次重同步的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResyncOutcome {
    /// 在 `offset + skipped` 处找到有效页面
    Found { page: PageHeader, skipped: u64 },
    /// 窗口内没有有效页面 (或数据已耗尽), `skipped` 为已检查过的字节数
    NotFound { skipped: u64 },
}

impl ResyncOutcome {
    /// 本次丢弃的比特数
    pub fn waste_bits(&self) -> u64 {
        match self {
            Self::Found { skipped, .. } | Self::NotFound { skipped } => skipped * 8,
        }
    }

    /// 页面是否经过重同步才找到
    pub fn is_resynced(&self) -> bool {
        matches!(self, Self::Found { skipped, .. } if *skipped > 0)
    }
}

/// 重同步器
///
/// 持有一块固定大小的搜索缓冲区, 与页面缓冲区分开, 解析候选页面时
/// 不会覆盖尚未检查的搜索数据.
pub struct Resynchronizer {
    /// 页面起点相对游标的最大偏移 (不含)
    window: usize,
    /// 搜索缓冲区: window + 3 字节, 可容纳最后一个候选位置的完整同步字
    scan_buf: Vec<u8>,
}

impl Resynchronizer {
    /// 创建重同步器, `window` 至少为 1
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            scan_buf: vec![0u8; window + OGG_SIGNATURE.len() - 1],
        }
    }

    /// 搜索窗口大小
    pub fn window(&self) -> usize {
        self.window
    }

    /// 从 `offset` 开始查找下一个有效页面
    pub fn find_page(
        &mut self,
        io: &mut IoContext,
        offset: u64,
        scratch: &mut [u8],
        crc: &mut OggCrc,
    ) -> OgxResult<ResyncOutcome> {
        match parse_page_at(io, offset, scratch, crc)? {
            ParseOutcome::Page(page) => return Ok(ResyncOutcome::Found { page, skipped: 0 }),
            ParseOutcome::NoPage(reason) => {
                trace!("Ogg: offset={offset} 无有效页面 ({reason:?}), 进入重同步");
            }
        }

        // scan_buf[i] 对应流偏移 offset + i, 候选位置 i ∈ [1, window)
        let available = io.read_at(offset, &mut self.scan_buf)?;
        let data = &self.scan_buf[..available];

        let mut from = 1usize;
        while from < self.window {
            let Some(hit) = find_signature(data.get(from..).unwrap_or_default()) else {
                break;
            };
            let candidate = from + hit;
            if candidate >= self.window {
                break;
            }
            match parse_page_at(io, offset + candidate as u64, scratch, crc)? {
                ParseOutcome::Page(page) => {
                    debug!(
                        "Ogg: 重同步成功, offset={} 跳过 {} 字节, serial={}",
                        page.page_offset, candidate, page.serial,
                    );
                    return Ok(ResyncOutcome::Found {
                        page,
                        skipped: candidate as u64,
                    });
                }
                ParseOutcome::NoPage(reason) => {
                    debug!(
                        "Ogg: 候选同步点 offset={} 无效 ({reason:?}), 继续搜索",
                        offset + candidate as u64,
                    );
                    from = candidate + 1;
                }
            }
        }

        let skipped = available.min(self.window) as u64;
        debug!("Ogg: 自 offset={offset} 起 {skipped} 字节内未找到有效页面");
        Ok(ResyncOutcome::NotFound { skipped })
    }
}

impl Default for Resynchronizer {
    fn default() -> Self {
        Self::new(DEFAULT_RESYNC_WINDOW)
    }
}

/// 查找同步字首次出现的位置
fn find_signature(data: &[u8]) -> Option<usize> {
    data.windows(OGG_SIGNATURE.len())
        .position(|w| w == OGG_SIGNATURE)
}
