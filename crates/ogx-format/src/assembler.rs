//! 逻辑流 packet 组装.
//!
//! 每个逻辑流序列号对应一个 [`PacketAssembler`], 把页面段表切分为
//! packet 描述符并按页面顺序排队.
//!
//! 段表中连续的 255 段与其后第一个 < 255 的段组合成一个 packet;
//! 若页面最后一段为 255, 该 packet 延续到下一页.

use std::collections::VecDeque;

use log::debug;

use crate::packet::{PacketDescriptor, PacketFlags};
use crate::page::PageHeader;

/// 单个逻辑流的 packet 组装器
#[derive(Debug)]
pub struct PacketAssembler {
    /// 逻辑流序列号
    serial: u32,
    /// 待消费的描述符
    queue: VecDeque<PacketDescriptor>,
    /// 是否已结束
    ended: bool,
    /// 归属本流的容器开销 (头部与段表, 单位: bit)
    overhead_bits: u64,
    /// 上一页以未结束的 packet 收尾
    pending_continuation: bool,
    /// 尚未落到任何描述符上的断裂标志 (来自没有段的页面)
    pending_lead: PacketFlags,
    /// 上一个页面序号
    last_sequence: Option<u32>,
    /// 已整合的页面数
    pages_integrated: u64,
}

impl PacketAssembler {
    /// 创建空组装器
    pub fn new(serial: u32) -> Self {
        Self {
            serial,
            queue: VecDeque::new(),
            ended: false,
            overhead_bits: 0,
            pending_continuation: false,
            pending_lead: PacketFlags::empty(),
            last_sequence: None,
            pages_integrated: 0,
        }
    }

    /// 逻辑流序列号
    pub fn serial(&self) -> u32 {
        self.serial
    }

    /// 整合一个页面, 返回新入队的描述符数量
    ///
    /// `found_by_resync` 为真时, 本页第一个描述符带 [`PacketFlags::FOUND_BY_RESYNC`].
    pub fn integrate(&mut self, page: &PageHeader, found_by_resync: bool) -> usize {
        if self.ended {
            if !page.is_bos() {
                debug!(
                    "Ogg: 流 serial={} 已结束, 忽略页面 seq={}",
                    self.serial, page.sequence,
                );
                return 0;
            }
            // 已结束的流再次出现 BOS 页, 视为逻辑流重启边界.
            debug!("Ogg: 流 serial={} 重新开始 (BOS seq={})", self.serial, page.sequence);
            self.ended = false;
            self.pending_continuation = false;
            self.last_sequence = None;
        }

        self.pages_integrated += 1;
        self.overhead_bits += page.overhead_bits();

        let mut lead_flags = std::mem::take(&mut self.pending_lead);
        if found_by_resync {
            lead_flags |= PacketFlags::FOUND_BY_RESYNC;
        }
        if let Some(prev) = self.last_sequence
            && page.sequence != prev.wrapping_add(1)
        {
            debug!(
                "Ogg: 流 serial={} 页面序号断裂: {} -> {}",
                self.serial, prev, page.sequence,
            );
            lead_flags |= PacketFlags::SEQUENCE_GAP;
            if self.pending_continuation {
                debug!(
                    "Ogg: 流 serial={} 跨页 packet 因页面丢失而中断, 丢弃其续延部分",
                    self.serial,
                );
                self.pending_continuation = false;
            }
        }
        self.last_sequence = Some(page.sequence);

        if page.is_continued() {
            lead_flags |= PacketFlags::CONTINUED_FROM_PREVIOUS_PAGE;
            if !self.pending_continuation {
                debug!(
                    "Ogg: 流 serial={} 页面 seq={} 标记为续延, 但缺少起始片段",
                    self.serial, page.sequence,
                );
            }
        } else if self.pending_continuation {
            debug!(
                "Ogg: 流 serial={} 未完成的 packet 被页面 seq={} 打断",
                self.serial, page.sequence,
            );
        }

        let first_new = self.queue.len();
        let mut run_start = page.payload_offset;
        let mut run_len = 0usize;
        let mut run_open = false;
        let mut last_closed = None;

        for &segment in &page.segment_table {
            run_len += segment as usize;
            run_open = true;
            if segment < 255 {
                last_closed = Some(self.queue.len());
                self.push(page, run_start, run_len, PacketFlags::empty());
                run_start += run_len as u64;
                run_len = 0;
                run_open = false;
            }
        }
        if run_open {
            self.push(page, run_start, run_len, PacketFlags::CONTINUES_ON_NEXT_PAGE);
        }
        self.pending_continuation = run_open;

        if let Some(first) = self.queue.get_mut(first_new) {
            first.flags |= lead_flags;
        } else {
            self.pending_lead =
                lead_flags & (PacketFlags::FOUND_BY_RESYNC | PacketFlags::SEQUENCE_GAP);
        }

        if page.is_eos() {
            if let Some(idx) = last_closed
                && let Some(desc) = self.queue.get_mut(idx)
            {
                desc.flags |= PacketFlags::END_OF_STREAM;
            }
            self.ended = true;
            debug!("Ogg: 流 serial={} 结束 (EOS seq={})", self.serial, page.sequence);
        }

        self.queue.len() - first_new
    }

    fn push(&mut self, page: &PageHeader, offset: u64, length: usize, flags: PacketFlags) {
        self.queue.push_back(PacketDescriptor {
            serial: self.serial,
            offset,
            length,
            flags,
            granule_position: page.granule_position,
            page_sequence: page.sequence,
        });
    }

    /// 取出最早的描述符
    pub fn pop(&mut self) -> Option<PacketDescriptor> {
        self.queue.pop_front()
    }

    /// 查看最早的描述符
    pub fn peek(&self) -> Option<&PacketDescriptor> {
        self.queue.front()
    }

    /// 排队中的描述符数量
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// 队列是否为空
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// 最早排队描述符的偏移
    pub fn front_offset(&self) -> Option<u64> {
        self.queue.front().map(|d| d.offset)
    }

    /// 是否已结束
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// 强制标记结束 (容器数据耗尽时使用)
    pub fn mark_end_of_stream(&mut self) {
        self.ended = true;
    }

    /// 归属本流的容器开销 (bit)
    pub fn overhead_bits(&self) -> u64 {
        self.overhead_bits
    }

    /// 已整合的页面数
    pub fn pages_integrated(&self) -> u64 {
        self.pages_integrated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::PageFlags;

    fn page(sequence: u32, flags: PageFlags, segment_table: &[u8]) -> PageHeader {
        let payload_len = segment_table.iter().map(|&s| s as usize).sum();
        PageHeader {
            flags,
            granule_position: i64::from(sequence) * 100,
            serial: 1,
            sequence,
            checksum: 0,
            segment_table: segment_table.to_vec(),
            page_offset: 1000,
            payload_offset: 1000 + 27 + segment_table.len() as u64,
            payload_len,
        }
    }

    fn drain(assembler: &mut PacketAssembler) -> Vec<PacketDescriptor> {
        std::iter::from_fn(|| assembler.pop()).collect()
    }

    #[test]
    fn test_segment_grouping() {
        // 段表 [100, 50, 255, 200]: 三个完整 packet (100, 50, 455)
        let mut asm = PacketAssembler::new(1);
        let p = page(0, PageFlags::BEGIN_OF_STREAM, &[100, 50, 255, 200]);
        assert_eq!(asm.integrate(&p, false), 3);

        let packets = drain(&mut asm);
        let base = p.payload_offset;
        assert_eq!(packets[0].offset, base);
        assert_eq!(packets[0].length, 100);
        assert_eq!(packets[1].offset, base + 100);
        assert_eq!(packets[1].length, 50);
        assert_eq!(packets[2].offset, base + 150);
        assert_eq!(packets[2].length, 455);
        assert!(packets.iter().all(|d| d.flags.is_empty()));
        assert!(packets.iter().all(|d| d.granule_position == 0 && d.page_sequence == 0));
    }

    #[test]
    fn test_lengths_sum_to_payload() {
        let tables: [&[u8]; 4] = [&[0], &[255, 255, 0, 7], &[255], &[1, 2, 255, 255]];
        for table in tables {
            let mut asm = PacketAssembler::new(1);
            let p = page(0, PageFlags::empty(), table);
            asm.integrate(&p, false);
            let total: usize = drain(&mut asm).iter().map(|d| d.length).sum();
            assert_eq!(total, p.payload_len, "段表 {table:?}");
        }
    }

    #[test]
    fn test_cross_page_packet() {
        let mut asm = PacketAssembler::new(1);
        asm.integrate(&page(0, PageFlags::empty(), &[10, 255, 255]), false);
        asm.integrate(&page(1, PageFlags::CONTINUED, &[20, 5]), false);

        let packets = drain(&mut asm);
        assert_eq!(packets.len(), 4);
        assert!(packets[0].flags.is_empty());
        assert_eq!(packets[1].length, 510);
        assert_eq!(packets[1].flags, PacketFlags::CONTINUES_ON_NEXT_PAGE);
        assert_eq!(packets[2].length, 20);
        assert_eq!(packets[2].flags, PacketFlags::CONTINUED_FROM_PREVIOUS_PAGE);
        assert!(packets[3].flags.is_empty());
    }

    #[test]
    fn test_single_run_continues_and_is_continued() {
        // 一页只包含一个跨页片段: 同时是续延又延续到下一页
        let mut asm = PacketAssembler::new(1);
        asm.integrate(&page(0, PageFlags::empty(), &[255]), false);
        asm.integrate(&page(1, PageFlags::CONTINUED, &[255]), false);
        asm.integrate(&page(2, PageFlags::CONTINUED, &[1]), false);

        let packets = drain(&mut asm);
        assert_eq!(packets[0].flags, PacketFlags::CONTINUES_ON_NEXT_PAGE);
        assert_eq!(
            packets[1].flags,
            PacketFlags::CONTINUES_ON_NEXT_PAGE | PacketFlags::CONTINUED_FROM_PREVIOUS_PAGE
        );
        assert_eq!(packets[2].flags, PacketFlags::CONTINUED_FROM_PREVIOUS_PAGE);
    }

    #[test]
    fn test_eos_marks_last_closed_packet() {
        let mut asm = PacketAssembler::new(1);
        asm.integrate(&page(0, PageFlags::END_OF_STREAM, &[3, 4, 255]), false);
        assert!(asm.is_ended());

        let packets = drain(&mut asm);
        assert!(!packets[0].is_end_of_stream());
        assert!(packets[1].is_end_of_stream());
        assert!(!packets[2].is_end_of_stream());
        assert!(packets[2].continues_on_next_page());
    }

    #[test]
    fn test_eos_page_without_segments_ends_stream() {
        let mut asm = PacketAssembler::new(1);
        asm.integrate(&page(0, PageFlags::empty(), &[3]), false);
        assert_eq!(asm.integrate(&page(1, PageFlags::END_OF_STREAM, &[]), false), 0);
        assert!(asm.is_ended());
        assert_eq!(asm.len(), 1);
    }

    #[test]
    fn test_resync_and_sequence_gap_flags_on_first_packet() {
        let mut asm = PacketAssembler::new(1);
        asm.integrate(&page(0, PageFlags::empty(), &[1]), false);
        asm.integrate(&page(5, PageFlags::empty(), &[1, 2]), true);

        let packets = drain(&mut asm);
        assert!(packets[0].flags.is_empty());
        assert_eq!(
            packets[1].flags,
            PacketFlags::FOUND_BY_RESYNC | PacketFlags::SEQUENCE_GAP
        );
        assert!(packets[2].flags.is_empty());
    }

    #[test]
    fn test_sequence_gap_breaks_pending_continuation() {
        let mut asm = PacketAssembler::new(1);
        asm.integrate(&page(0, PageFlags::empty(), &[255, 255]), false);
        assert!(asm.pending_continuation);

        // 中间页丢失, 下一页仍标记为续延
        asm.integrate(&page(2, PageFlags::CONTINUED, &[255]), true);
        let packets = drain(&mut asm);
        assert_eq!(
            packets[1].flags,
            PacketFlags::CONTINUED_FROM_PREVIOUS_PAGE
                | PacketFlags::CONTINUES_ON_NEXT_PAGE
                | PacketFlags::FOUND_BY_RESYNC
                | PacketFlags::SEQUENCE_GAP
        );
        // 本页自身以未结束片段收尾, 仍等待下一页
        assert!(asm.pending_continuation);
    }

    #[test]
    fn test_discontinuity_carried_over_empty_page() {
        let mut asm = PacketAssembler::new(1);
        asm.integrate(&page(0, PageFlags::empty(), &[1]), false);
        // 重同步找到的页面没有任何段
        assert_eq!(asm.integrate(&page(2, PageFlags::empty(), &[]), true), 0);
        asm.integrate(&page(3, PageFlags::empty(), &[4, 5]), false);

        let packets = drain(&mut asm);
        assert_eq!(packets.len(), 3);
        assert_eq!(
            packets[1].flags,
            PacketFlags::FOUND_BY_RESYNC | PacketFlags::SEQUENCE_GAP
        );
        assert!(packets[2].flags.is_empty());
    }

    #[test]
    fn test_pages_after_end_are_ignored() {
        let mut asm = PacketAssembler::new(1);
        asm.integrate(&page(0, PageFlags::END_OF_STREAM, &[1]), false);
        assert_eq!(asm.integrate(&page(1, PageFlags::empty(), &[1]), false), 0);
        assert_eq!(asm.len(), 1);

        // 同一序列号的 BOS 页重新开始该流
        assert_eq!(asm.integrate(&page(0, PageFlags::BEGIN_OF_STREAM, &[1]), false), 1);
        assert!(!asm.is_ended());
    }

    #[test]
    fn test_overhead_and_page_accounting() {
        let mut asm = PacketAssembler::new(1);
        asm.integrate(&page(0, PageFlags::empty(), &[1, 2]), false);
        asm.integrate(&page(1, PageFlags::empty(), &[]), false);
        assert_eq!(asm.pages_integrated(), 2);
        assert_eq!(asm.overhead_bits(), (29 + 27) * 8);
    }

    #[test]
    fn test_mark_end_of_stream() {
        let mut asm = PacketAssembler::new(1);
        assert!(!asm.is_ended());
        asm.mark_end_of_stream();
        assert!(asm.is_ended());
        assert!(asm.pop().is_none());
    }
}
