//! Ogg 容器调度器.
//!
//! [`OggContainer`] 独占底层流, 持有 "序列号 → 组装器" 映射和被拒绝
//! (poisoned) 序列号集合. 每一步 "重同步 + 分发" 都在同一把互斥锁内完成,
//! 步与步之间释放锁, 因此多个线程可以分别拉取不同逻辑流的 packet,
//! 而页面始终按物理顺序分发.
//!
//! 所有调用都是阻塞的; 异步调用方应把它们放到专用的阻塞线程中执行.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use bytes::Bytes;
use log::{debug, trace};
use ogx_core::{OggCrc, OgxError, OgxResult};

use crate::assembler::PacketAssembler;
use crate::io::IoContext;
use crate::options::ContainerOptions;
use crate::packet::PacketDescriptor;
use crate::page::{MAX_PAGE_SIZE, PageFlags, PageHeader};
use crate::reader::PacketReader;
use crate::resync::{ResyncOutcome, Resynchronizer};

/// 新逻辑流的处理决定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamDecision {
    /// 保留该流
    Accept,
    /// 拒绝该流, 之后该序列号的页面全部丢弃
    Reject,
}

/// 首次出现的逻辑流
///
/// 只在回调期间有效, 可查看触发该流的第一页, 并可取得该流的句柄.
pub struct NewStream<'a> {
    page: &'a PageHeader,
    payload: &'a [u8],
    shared: &'a Weak<Shared>,
}

impl NewStream<'_> {
    /// 该逻辑流的 packet 句柄
    ///
    /// 回调期间容器锁仍被持有, 只能保存句柄, 在回调返回后再使用.
    /// 流被拒绝时句柄随即失效 (返回 [`OgxError::StreamNotFound`]).
    pub fn reader(&self) -> PacketReader {
        PacketReader::new(self.shared.clone(), self.page.serial)
    }

    /// 逻辑流序列号
    pub fn serial(&self) -> u32 {
        self.page.serial
    }

    /// 第一页的头部标志
    pub fn flags(&self) -> PageFlags {
        self.page.flags
    }

    /// 第一页的粒度位置
    pub fn granule_position(&self) -> i64 {
        self.page.granule_position
    }

    /// 第一页的页面序号
    pub fn sequence(&self) -> u32 {
        self.page.sequence
    }

    /// 第一页是否为 BOS 页 (不是则说明从流中间开始读取)
    pub fn is_bos(&self) -> bool {
        self.page.is_bos()
    }

    /// 第一页的完整载荷
    pub fn page_payload(&self) -> &[u8] {
        self.payload
    }

    /// 第一页第一个 packet (或片段) 的数据, 通常是编解码器标识头
    pub fn first_packet(&self) -> &[u8] {
        let mut len = 0usize;
        for &segment in &self.page.segment_table {
            len += segment as usize;
            if segment < 255 {
                break;
            }
        }
        &self.payload[..len]
    }
}

/// 新逻辑流决策器
///
/// 在持有容器锁时被调用. 容器锁不可重入: 回调中调用容器或任何
/// [`PacketReader`] 的方法都会死锁. 需要句柄时, 在回调中通过
/// [`NewStream::reader`] 取得并保存, 返回后再读取.
///
/// ```
/// use std::sync::{Arc, Mutex};
///
/// use ogx_format::{IoContext, NewStream, OggContainer, PacketReader, PageBuilder, StreamDecision};
///
/// # fn main() -> ogx_core::OgxResult<()> {
/// let data = PageBuilder::new(7, 0).packet(b"OpusHead").build()?;
///
/// let accepted: Arc<Mutex<Vec<PacketReader>>> = Arc::default();
/// let sink = accepted.clone();
/// let container = OggContainer::with_decider(
///     IoContext::from_bytes(data),
///     move |stream: &NewStream<'_>| {
///         if !stream.first_packet().starts_with(b"OpusHead") {
///             return StreamDecision::Reject;
///         }
///         // 只保存句柄, 不在回调中使用
///         if let Ok(mut list) = sink.lock() {
///             list.push(stream.reader());
///         }
///         StreamDecision::Accept
///     },
/// );
///
/// assert!(container.initialize()?);
/// let readers = std::mem::take(&mut *accepted.lock().map_err(|_| {
///     ogx_core::OgxError::Internal("锁已中毒".into())
/// })?);
/// assert_eq!(readers.len(), 1);
/// let packet = readers[0].read_packet()?.expect("应有一个 packet");
/// assert_eq!(&packet.data[..], b"OpusHead");
/// # Ok(())
/// # }
/// ```
pub trait StreamDecider: Send + Sync {
    /// 决定是否保留新出现的逻辑流
    fn on_new_stream(&self, stream: &NewStream<'_>) -> StreamDecision;
}

impl<F> StreamDecider for F
where
    F: Fn(&NewStream<'_>) -> StreamDecision + Send + Sync,
{
    fn on_new_stream(&self, stream: &NewStream<'_>) -> StreamDecision {
        self(stream)
    }
}

/// 接受所有逻辑流
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl StreamDecider for AcceptAll {
    fn on_new_stream(&self, _stream: &NewStream<'_>) -> StreamDecision {
        StreamDecision::Accept
    }
}

/// 单个页面的分发结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// 整合到已有逻辑流
    Integrated,
    /// 新逻辑流被接受并整合
    NewStream,
    /// 新逻辑流被拒绝, 序列号已加入拒绝集合
    Rejected,
    /// 页面属于已拒绝的序列号, 已丢弃
    Poisoned,
}

/// 单步采集结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatherOutcome {
    /// 读取并分发了一个页面
    Page { serial: u32, dispatch: Dispatch },
    /// 容器已耗尽, 所有逻辑流都已标记结束
    Exhausted,
}

/// 容器统计信息
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContainerStats {
    /// 成功解析的页面数
    pub pages: u64,
    /// 重同步丢弃的比特数
    pub waste_bits: u64,
    /// 下一个未读偏移
    pub cursor: u64,
    /// 活动逻辑流数量
    pub active_streams: usize,
    /// 被拒绝的序列号数量
    pub poisoned_streams: usize,
    /// 是否已耗尽
    pub exhausted: bool,
}

impl ContainerStats {
    /// 重同步丢弃的字节数
    pub fn waste_bytes(&self) -> u64 {
        self.waste_bits / 8
    }
}

/// 容器内部状态, 整体受一把锁保护
pub(crate) struct ContainerState {
    /// 底层流, 释放后为 None
    io: Option<IoContext>,
    /// 页面缓冲区 (MAX_PAGE_SIZE)
    scratch: Vec<u8>,
    crc: OggCrc,
    resync: Resynchronizer,
    /// 活动逻辑流
    pub(crate) streams: HashMap<u32, PacketAssembler>,
    /// 被拒绝/释放的序列号, 永久有效
    poisoned: HashSet<u32>,
    /// 下一个未读偏移
    cursor: u64,
    /// 成功解析的页面数
    page_count: u64,
    /// 重同步丢弃的比特数
    waste_bits: u64,
    /// 容器是否已耗尽
    exhausted: bool,
}

impl ContainerState {
    fn new(io: IoContext, options: &ContainerOptions) -> Self {
        Self {
            io: Some(io),
            scratch: vec![0u8; MAX_PAGE_SIZE],
            crc: OggCrc::new(),
            resync: Resynchronizer::new(options.resync_window),
            streams: HashMap::new(),
            poisoned: HashSet::new(),
            cursor: 0,
            page_count: 0,
            waste_bits: 0,
            exhausted: false,
        }
    }

    pub(crate) fn ensure_open(&self) -> OgxResult<()> {
        if self.io.is_none() {
            return Err(OgxError::Disposed);
        }
        Ok(())
    }

    /// 执行一步 "重同步 + 分发"
    ///
    /// `shared` 是持有本状态的共享结构, 用于向新流回调提供句柄.
    pub(crate) fn step(&mut self, shared: &Arc<Shared>) -> OgxResult<GatherOutcome> {
        let Some(io) = self.io.as_mut() else {
            return Err(OgxError::Disposed);
        };
        if self.exhausted {
            return Ok(GatherOutcome::Exhausted);
        }

        let outcome = self
            .resync
            .find_page(io, self.cursor, &mut self.scratch, &mut self.crc)?;
        self.waste_bits += outcome.waste_bits();
        let found_by_resync = outcome.is_resynced();

        match outcome {
            ResyncOutcome::NotFound { skipped } => {
                self.cursor += skipped;
                self.exhausted = true;
                for assembler in self.streams.values_mut() {
                    if !assembler.is_ended() {
                        assembler.mark_end_of_stream();
                    }
                }
                debug!(
                    "Ogg: 容器结束, 共 {} 页, 重同步丢弃 {} 字节",
                    self.page_count,
                    self.waste_bits / 8,
                );
                self.release_consumed();
                Ok(GatherOutcome::Exhausted)
            }
            ResyncOutcome::Found { page, .. } => {
                self.page_count += 1;
                self.cursor = page.end_offset();
                trace!(
                    "Ogg: 页面 serial={} seq={} granule={} segments={} payload={}",
                    page.serial,
                    page.sequence,
                    page.granule_position,
                    page.segment_table.len(),
                    page.payload_len,
                );
                let handle = Arc::downgrade(shared);
                let dispatch =
                    self.dispatch(&page, found_by_resync, shared.decider.as_ref(), &handle);
                self.release_consumed();
                Ok(GatherOutcome::Page {
                    serial: page.serial,
                    dispatch,
                })
            }
        }
    }

    /// 把页面分发给对应的组装器
    fn dispatch(
        &mut self,
        page: &PageHeader,
        found_by_resync: bool,
        decider: &dyn StreamDecider,
        handle: &Weak<Shared>,
    ) -> Dispatch {
        let serial = page.serial;
        if self.poisoned.contains(&serial) {
            trace!("Ogg: 丢弃已拒绝流 serial={serial} 的页面 seq={}", page.sequence);
            return Dispatch::Poisoned;
        }

        let mut dispatch = Dispatch::Integrated;
        if !self.streams.contains_key(&serial) {
            self.streams.insert(serial, PacketAssembler::new(serial));
            let view = NewStream {
                page,
                payload: page.payload(&self.scratch),
                shared: handle,
            };
            match decider.on_new_stream(&view) {
                StreamDecision::Accept => {
                    debug!(
                        "Ogg: 发现逻辑流 serial={serial} (bos={}, seq={})",
                        page.is_bos(),
                        page.sequence,
                    );
                    dispatch = Dispatch::NewStream;
                }
                StreamDecision::Reject => {
                    debug!("Ogg: 拒绝逻辑流 serial={serial}");
                    self.dispose_stream(serial);
                    return Dispatch::Rejected;
                }
            }
        }

        if let Some(assembler) = self.streams.get_mut(&serial) {
            assembler.integrate(page, found_by_resync);
        }
        dispatch
    }

    /// 释放组装器并永久拒绝该序列号
    pub(crate) fn dispose_stream(&mut self, serial: u32) -> bool {
        let removed = self.streams.remove(&serial);
        if let Some(assembler) = &removed
            && !assembler.is_empty()
        {
            debug!(
                "Ogg: 释放流 serial={serial}, 丢弃 {} 个排队描述符",
                assembler.len(),
            );
        }
        self.poisoned.insert(serial);
        removed.is_some()
    }

    /// 释放已不再需要的底层数据
    ///
    /// 不可寻址输入需要保留最早排队描述符之后的数据, 以便按需读取载荷.
    fn release_consumed(&mut self) {
        let Some(io) = self.io.as_mut() else {
            return;
        };
        let mut keep_from = self.cursor;
        if !io.is_seekable()
            && let Some(oldest) = self.streams.values().filter_map(|a| a.front_offset()).min()
        {
            keep_from = keep_from.min(oldest);
        }
        io.release_before(keep_from);
    }

    /// 按描述符读取载荷
    pub(crate) fn read_payload(&mut self, desc: &PacketDescriptor) -> OgxResult<Bytes> {
        let Some(io) = self.io.as_mut() else {
            return Err(OgxError::Disposed);
        };
        let mut data = vec![0u8; desc.length];
        let got = io.read_at(desc.offset, &mut data)?;
        if got < desc.length {
            return Err(OgxError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "packet 载荷不完整: offset={}, 期望 {} 字节, 实际 {got} 字节",
                    desc.offset, desc.length,
                ),
            )));
        }
        Ok(Bytes::from(data))
    }

    fn stats(&self) -> ContainerStats {
        ContainerStats {
            pages: self.page_count,
            waste_bits: self.waste_bits,
            cursor: self.cursor,
            active_streams: self.streams.len(),
            poisoned_streams: self.poisoned.len(),
            exhausted: self.exhausted,
        }
    }

    fn dispose(&mut self) {
        if self.io.take().is_none() {
            return;
        }
        debug!(
            "Ogg: 释放容器 ({} 个逻辑流, {} 页)",
            self.streams.len(),
            self.page_count,
        );
        self.streams.clear();
        self.poisoned.clear();
        self.cursor = 0;
        self.page_count = 0;
        self.waste_bits = 0;
        self.exhausted = false;
    }
}

/// 容器与句柄共享的内部结构
pub(crate) struct Shared {
    state: Mutex<ContainerState>,
    pub(crate) decider: Box<dyn StreamDecider>,
    seekable: bool,
}

impl Shared {
    pub(crate) fn lock(&self) -> OgxResult<MutexGuard<'_, ContainerState>> {
        self.state
            .lock()
            .map_err(|_| OgxError::Internal("容器状态锁已中毒".into()))
    }
}

/// Ogg 容器
///
/// 使用流程:
/// 1. 调用 [`OggContainer::initialize`] 读取第一页
/// 2. 通过 [`OggContainer::get_stream`] 获取逻辑流句柄
/// 3. 循环调用 [`PacketReader::next_packet`] 或 [`PacketReader::read_packet`]
///
/// 可以通过 `&OggContainer` 在多个线程间共享.
pub struct OggContainer {
    shared: Arc<Shared>,
}

impl OggContainer {
    /// 使用默认配置创建容器, 接受所有逻辑流
    pub fn new(io: IoContext) -> Self {
        Self::build(io, &ContainerOptions::default(), Box::new(AcceptAll))
    }

    /// 使用指定配置与决策器创建容器
    pub fn with_options(
        io: IoContext,
        options: ContainerOptions,
        decider: impl StreamDecider + 'static,
    ) -> OgxResult<Self> {
        options.validate()?;
        Ok(Self::build(io, &options, Box::new(decider)))
    }

    /// 使用默认配置与指定决策器创建容器
    pub fn with_decider(io: IoContext, decider: impl StreamDecider + 'static) -> Self {
        Self::build(io, &ContainerOptions::default(), Box::new(decider))
    }

    fn build(mut io: IoContext, options: &ContainerOptions, decider: Box<dyn StreamDecider>) -> Self {
        io.set_chunk_size(options.io_chunk_size);
        let seekable = io.is_seekable();
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(ContainerState::new(io, options)),
                decider,
                seekable,
            }),
        }
    }

    /// 读取第一个有效页面
    ///
    /// 找到并分发了一个页面时返回 true (无论是否经过重同步).
    pub fn initialize(&self) -> OgxResult<bool> {
        Ok(matches!(
            self.gather_one_page()?,
            GatherOutcome::Page { .. }
        ))
    }

    /// 读取并分发下一个页面
    pub fn gather_one_page(&self) -> OgxResult<GatherOutcome> {
        let mut state = self.shared.lock()?;
        state.step(&self.shared)
    }

    /// 持续读取页面, 直到读到属于 `serial` 的页面或容器耗尽
    pub fn gather_for(&self, serial: u32) -> OgxResult<()> {
        loop {
            let mut state = self.shared.lock()?;
            state.ensure_open()?;
            let Some(assembler) = state.streams.get(&serial) else {
                return Err(OgxError::StreamNotFound(serial));
            };
            if assembler.is_ended() {
                return Ok(());
            }
            match state.step(&self.shared)? {
                GatherOutcome::Page { serial: got, .. } if got == serial => return Ok(()),
                GatherOutcome::Page { .. } => {}
                GatherOutcome::Exhausted => return Ok(()),
            }
        }
    }

    /// 持续读取页面, 直到出现新的 (被接受的) 逻辑流
    ///
    /// 仅支持可寻址输入.
    pub fn find_next_new_stream(&self) -> OgxResult<bool> {
        self.require_seekable("find_next_new_stream")?;
        loop {
            match self.gather_one_page()? {
                GatherOutcome::Page {
                    dispatch: Dispatch::NewStream,
                    ..
                } => return Ok(true),
                GatherOutcome::Page { .. } => {}
                GatherOutcome::Exhausted => return Ok(false),
            }
        }
    }

    /// 读完剩余所有页面, 返回总页数
    ///
    /// 会消耗容器剩余部分, 之后只能读取已排队的 packet. 仅支持可寻址输入.
    pub fn total_page_count(&self) -> OgxResult<u64> {
        self.require_seekable("total_page_count")?;
        while self.gather_one_page()? != GatherOutcome::Exhausted {}
        Ok(self.shared.lock()?.page_count)
    }

    /// 当前活动逻辑流的序列号
    pub fn active_serials(&self) -> OgxResult<BTreeSet<u32>> {
        let state = self.shared.lock()?;
        state.ensure_open()?;
        Ok(state.streams.keys().copied().collect())
    }

    /// 获取逻辑流句柄
    pub fn get_stream(&self, serial: u32) -> OgxResult<PacketReader> {
        let state = self.shared.lock()?;
        state.ensure_open()?;
        if !state.streams.contains_key(&serial) {
            return Err(OgxError::StreamNotFound(serial));
        }
        Ok(PacketReader::new(Arc::downgrade(&self.shared), serial))
    }

    /// 释放逻辑流, 之后该序列号的页面全部丢弃
    ///
    /// 返回该序列号此前是否处于活动状态.
    pub fn dispose_stream(&self, serial: u32) -> OgxResult<bool> {
        let mut state = self.shared.lock()?;
        state.ensure_open()?;
        Ok(state.dispose_stream(serial))
    }

    /// 按描述符读取载荷
    pub fn read_payload(&self, desc: &PacketDescriptor) -> OgxResult<Bytes> {
        self.shared.lock()?.read_payload(desc)
    }

    /// 统计信息
    pub fn stats(&self) -> OgxResult<ContainerStats> {
        Ok(self.shared.lock()?.stats())
    }

    /// 底层流是否支持随机访问
    pub fn is_seekable(&self) -> bool {
        self.shared.seekable
    }

    /// 释放所有逻辑流与底层流, 可重复调用
    pub fn dispose(&self) -> OgxResult<()> {
        self.shared.lock()?.dispose();
        Ok(())
    }

    fn require_seekable(&self, operation: &str) -> OgxResult<()> {
        if !self.shared.seekable {
            return Err(OgxError::InvalidOperation(format!(
                "{operation} 需要可寻址输入"
            )));
        }
        Ok(())
    }
}
