//! 逻辑流句柄.
//!
//! [`PacketReader`] 只持有容器内部状态的弱引用. 容器被释放 (drop 或
//! [`OggContainer::dispose`](crate::OggContainer::dispose)) 后, 所有调用都返回
//! [`OgxError::Disposed`].
//!
//! 同一逻辑流应只由一个句柄消费; 不同逻辑流的句柄可以在不同线程中并发使用.

use std::sync::{Arc, Mutex, Weak};

use bytes::{Bytes, BytesMut};
use log::debug;
use ogx_core::{OgxError, OgxResult};

use crate::container::{GatherOutcome, Shared};
use crate::packet::{Packet, PacketDescriptor, PacketFlags};

/// 逻辑流 packet 读取句柄
pub struct PacketReader {
    shared: Weak<Shared>,
    serial: u32,
    /// 已读出但尚未完整的跨页 packet, 调用出错时保留到下次调用
    partial: Mutex<Option<(BytesMut, PacketFlags)>>,
}

/// 单次加锁的结果
enum Pull {
    /// 取到一个描述符 (及按需读取的载荷)
    Descriptor(PacketDescriptor, Option<Bytes>),
    /// 逻辑流已结束且队列为空
    End,
    /// 执行了一步采集, 需要重新检查队列
    Again,
}

impl PacketReader {
    pub(crate) fn new(shared: Weak<Shared>, serial: u32) -> Self {
        Self {
            shared,
            serial,
            partial: Mutex::new(None),
        }
    }

    /// 逻辑流序列号
    pub fn serial(&self) -> u32 {
        self.serial
    }

    fn upgrade(&self) -> OgxResult<Arc<Shared>> {
        self.shared.upgrade().ok_or(OgxError::Disposed)
    }

    /// 取出下一个描述符
    ///
    /// 队列为空时逐页采集, 直到本流有新描述符或结束. 返回 `None` 表示流已结束.
    pub fn next_packet(&self) -> OgxResult<Option<PacketDescriptor>> {
        loop {
            match self.pull(false)? {
                Pull::Descriptor(desc, _) => return Ok(Some(desc)),
                Pull::End => return Ok(None),
                Pull::Again => {}
            }
        }
    }

    /// 只从队列中取描述符, 不触发采集
    pub fn try_next_packet(&self) -> OgxResult<Option<PacketDescriptor>> {
        let shared = self.upgrade()?;
        let mut state = shared.lock()?;
        state.ensure_open()?;
        let assembler = state
            .streams
            .get_mut(&self.serial)
            .ok_or(OgxError::StreamNotFound(self.serial))?;
        Ok(assembler.pop())
    }

    /// 一次加锁: 出队 (可选读取载荷), 或执行一步采集
    ///
    /// 载荷读取成功后才出队, 读取失败时描述符留在队首.
    fn pull(&self, with_payload: bool) -> OgxResult<Pull> {
        let shared = self.upgrade()?;
        let mut state = shared.lock()?;
        state.ensure_open()?;
        let assembler = state
            .streams
            .get(&self.serial)
            .ok_or(OgxError::StreamNotFound(self.serial))?;

        if let Some(&desc) = assembler.peek() {
            let payload = if with_payload {
                Some(state.read_payload(&desc)?)
            } else {
                None
            };
            if let Some(assembler) = state.streams.get_mut(&self.serial) {
                assembler.pop();
            }
            return Ok(Pull::Descriptor(desc, payload));
        }
        if assembler.is_ended() {
            return Ok(Pull::End);
        }
        match state.step(&shared)? {
            GatherOutcome::Page { .. } | GatherOutcome::Exhausted => Ok(Pull::Again),
        }
    }

    /// 按描述符读取载荷
    pub fn read_payload(&self, desc: &PacketDescriptor) -> OgxResult<Bytes> {
        let shared = self.upgrade()?;
        let mut state = shared.lock()?;
        state.read_payload(desc)
    }

    /// 读取下一个完整 packet, 自动拼接跨页片段
    ///
    /// 没有起始片段的续延片段会被丢弃; 被打断的未完成 packet 也会被丢弃,
    /// 包括后续片段来自重同步页或页序号不连续的情况.
    /// 返回错误时已读出的片段保留, 重试会从出错的描述符继续.
    pub fn read_packet(&self) -> OgxResult<Option<Packet>> {
        let mut partial = self
            .partial
            .lock()
            .map_err(|_| OgxError::Internal("packet 拼接缓冲锁已中毒".into()))?;
        loop {
            let (desc, data) = match self.pull(true)? {
                Pull::Descriptor(desc, Some(data)) => (desc, data),
                Pull::Descriptor(desc, None) => {
                    return Err(OgxError::Internal(format!(
                        "packet 载荷缺失: serial={}, offset={}",
                        self.serial, desc.offset,
                    )));
                }
                Pull::End => {
                    if let Some((buf, _)) = partial.take() {
                        debug!(
                            "Ogg: 流 serial={} 结束时丢弃未完成的 packet ({} 字节)",
                            self.serial,
                            buf.len(),
                        );
                    }
                    return Ok(None);
                }
                Pull::Again => continue,
            };

            // 中间页丢失时, 续延片段不属于缓冲中的 packet
            let broken = desc
                .flags
                .intersects(PacketFlags::FOUND_BY_RESYNC | PacketFlags::SEQUENCE_GAP);
            let pending = match partial.take() {
                Some(pending) if desc.is_continuation() && !broken => Some(pending),
                Some((buf, _)) => {
                    debug!(
                        "Ogg: 流 serial={} 未完成的 packet 被打断, 丢弃 {} 字节",
                        self.serial,
                        buf.len(),
                    );
                    None
                }
                None => None,
            };

            let (mut buf, mut flags) = match pending {
                Some(pending) => pending,
                None if desc.is_continuation() => {
                    debug!(
                        "Ogg: 流 serial={} 丢弃孤立续延片段 ({} 字节, seq={})",
                        self.serial, desc.length, desc.page_sequence,
                    );
                    if desc.is_end_of_stream() {
                        return Ok(None);
                    }
                    continue;
                }
                None => (BytesMut::new(), PacketFlags::empty()),
            };

            buf.extend_from_slice(&data);
            flags |= desc.flags;

            if desc.continues_on_next_page() {
                *partial = Some((buf, flags));
                continue;
            }

            flags.remove(
                PacketFlags::CONTINUES_ON_NEXT_PAGE | PacketFlags::CONTINUED_FROM_PREVIOUS_PAGE,
            );
            return Ok(Some(Packet {
                serial: self.serial,
                data: buf.freeze(),
                granule_position: desc.granule_position,
                page_sequence: desc.page_sequence,
                flags,
            }));
        }
    }

    /// 逻辑流是否已结束 (队列可能仍有描述符)
    pub fn is_ended(&self) -> OgxResult<bool> {
        self.with_assembler(|a| a.is_ended())
    }

    /// 排队中的描述符数量
    pub fn queued(&self) -> OgxResult<usize> {
        self.with_assembler(|a| a.len())
    }

    /// 归属本流的容器开销 (bit)
    pub fn overhead_bits(&self) -> OgxResult<u64> {
        self.with_assembler(|a| a.overhead_bits())
    }

    /// 本流已整合的页面数
    pub fn pages(&self) -> OgxResult<u64> {
        self.with_assembler(|a| a.pages_integrated())
    }

    fn with_assembler<T>(
        &self,
        f: impl FnOnce(&crate::assembler::PacketAssembler) -> T,
    ) -> OgxResult<T> {
        let shared = self.upgrade()?;
        let state = shared.lock()?;
        state.ensure_open()?;
        state
            .streams
            .get(&self.serial)
            .map(f)
            .ok_or(OgxError::StreamNotFound(self.serial))
    }
}
