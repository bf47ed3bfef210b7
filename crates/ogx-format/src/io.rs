//! I/O 抽象层.
//!
//! 为 Ogg 容器提供按绝对偏移读取的统一接口, 支持文件、内存缓冲区
//! 以及只能顺序读取的流 (管道、socket 等).
//!
//! 上下文内部维护一个保留窗口 (retained window): 已读入但尚未释放的字节.
//! 可寻址后端可以随时跳转到任意偏移; 不可寻址后端只能在窗口内回退,
//! 窗口由调用方通过 [`IoContext::release_before`] 逐步释放.

use std::io::{self, Read, Seek};

use ogx_core::{OgxError, OgxResult};

/// I/O 后端 trait
///
/// 实现此 trait 以支持不同的 I/O 来源 (文件、内存、管道等).
pub trait IoBackend: Send {
    /// 读取数据到缓冲区, 返回 0 表示已到末尾
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    /// 定位 (seek)
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64>;
    /// 获取当前位置
    fn position(&mut self) -> io::Result<u64>;
    /// 获取总大小 (如果可知)
    fn size(&self) -> Option<u64>;
    /// 是否支持 seek
    fn is_seekable(&self) -> bool;
}

/// 默认单次读取块大小 (32 KB)
pub const DEFAULT_CHUNK_SIZE: usize = 32 * 1024;

/// I/O 上下文
///
/// 封装底层后端, 为页面解析器提供 `read_at` 语义.
pub struct IoContext {
    /// 内部 I/O 实现
    inner: Box<dyn IoBackend>,
    /// 保留窗口数据
    window: Vec<u8>,
    /// 窗口首字节在流中的绝对偏移
    ///
    /// 不变量: 后端当前位置 == window_start + window.len()
    window_start: u64,
    /// 单次向后端请求的最小字节数
    chunk_size: usize,
}

impl IoContext {
    /// 从 I/O 后端创建上下文
    pub fn new(backend: Box<dyn IoBackend>) -> Self {
        Self::with_chunk_size(backend, DEFAULT_CHUNK_SIZE)
    }

    /// 从 I/O 后端创建上下文, 指定读取块大小
    pub fn with_chunk_size(mut backend: Box<dyn IoBackend>, chunk_size: usize) -> Self {
        let window_start = backend.position().unwrap_or(0);
        Self {
            inner: backend,
            window: Vec::new(),
            window_start,
            chunk_size: chunk_size.max(1),
        }
    }

    /// 从文件路径打开 (只读)
    pub fn open_read(path: &str) -> OgxResult<Self> {
        let file = std::fs::File::open(path)?;
        Ok(Self::new(Box::new(FileBackend::new(file))))
    }

    /// 从内存数据创建 (可寻址)
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self::new(Box::new(MemoryBackend::from_data(data)))
    }

    /// 从任意只读流创建 (不可寻址)
    pub fn from_reader<R: Read + Send + 'static>(reader: R) -> Self {
        Self::new(Box::new(ReaderBackend::new(reader)))
    }

    // ========================
    // 读取方法
    // ========================

    /// 从绝对偏移 `offset` 读取最多 `buf.len()` 字节
    ///
    /// 返回实际读取的字节数, 小于 `buf.len()` 表示数据已到末尾.
    /// 不可寻址后端请求已释放的偏移时返回 [`OgxError::InvalidOperation`].
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> OgxResult<usize> {
        self.reposition(offset)?;
        self.fill_to(offset + buf.len() as u64)?;

        let window_end = self.window_end();
        if offset >= window_end {
            return Ok(0);
        }
        let start = (offset - self.window_start) as usize;
        let available = ((window_end - offset) as usize).min(buf.len());
        buf[..available].copy_from_slice(&self.window[start..start + available]);
        Ok(available)
    }

    /// 释放 `offset` 之前的保留数据
    ///
    /// 对不可寻址后端而言, 释放后这些字节再也无法读取.
    pub fn release_before(&mut self, offset: u64) {
        if offset <= self.window_start {
            return;
        }
        let drop_len = ((offset - self.window_start) as usize).min(self.window.len());
        self.window.drain(..drop_len);
        self.window_start += drop_len as u64;
    }

    /// 修改单次读取块大小
    pub fn set_chunk_size(&mut self, chunk_size: usize) {
        self.chunk_size = chunk_size.max(1);
    }

    /// 保留窗口中的字节数
    pub fn retained_len(&self) -> usize {
        self.window.len()
    }

    /// 保留窗口起点
    pub fn retained_start(&self) -> u64 {
        self.window_start
    }

    /// 是否支持随机访问
    pub fn is_seekable(&self) -> bool {
        self.inner.is_seekable()
    }

    /// 获取总大小
    pub fn size(&self) -> Option<u64> {
        self.inner.size()
    }

    fn window_end(&self) -> u64 {
        self.window_start + self.window.len() as u64
    }

    /// 保证 `offset` 落在窗口内或恰好位于窗口末尾
    fn reposition(&mut self, offset: u64) -> OgxResult<()> {
        let window_end = self.window_end();
        if offset >= self.window_start && offset <= window_end {
            return Ok(());
        }

        if self.inner.is_seekable() {
            self.inner.seek(io::SeekFrom::Start(offset))?;
            self.window.clear();
            self.window_start = offset;
            return Ok(());
        }

        if offset < self.window_start {
            return Err(OgxError::InvalidOperation(format!(
                "不可寻址输入无法回退到已释放的偏移 {offset} (保留窗口起点 {})",
                self.window_start,
            )));
        }

        // 不可寻址输入向前跳转: 逐块读取并丢弃中间数据
        self.window.clear();
        self.window_start = window_end;
        while self.window_start < offset {
            self.fill_to(offset)?;
            if self.window.is_empty() {
                break;
            }
            self.release_before(offset);
        }
        Ok(())
    }

    /// 从后端追加数据, 直到窗口覆盖到 `end` 或后端到达末尾
    fn fill_to(&mut self, end: u64) -> OgxResult<()> {
        while self.window_end() < end {
            let old_len = self.window.len();
            let want = ((end - self.window_end()) as usize).max(self.chunk_size);
            self.window.resize(old_len + want, 0);
            let read = loop {
                match self.inner.read(&mut self.window[old_len..]) {
                    Ok(n) => break n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        self.window.truncate(old_len);
                        return Err(e.into());
                    }
                }
            };
            self.window.truncate(old_len + read);
            if read == 0 {
                break;
            }
        }
        Ok(())
    }
}

/// 文件 I/O 后端
struct FileBackend {
    file: std::fs::File,
    size: Option<u64>,
}

impl FileBackend {
    fn new(file: std::fs::File) -> Self {
        let size = file.metadata().ok().map(|m| m.len());
        Self { file, size }
    }
}

impl IoBackend for FileBackend {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }

    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }

    fn position(&mut self) -> io::Result<u64> {
        self.file.stream_position()
    }

    fn size(&self) -> Option<u64> {
        self.size
    }

    fn is_seekable(&self) -> bool {
        true
    }
}

/// 内存缓冲区 I/O 后端
///
/// 用于测试和内存中处理.
pub struct MemoryBackend {
    /// 数据缓冲区
    data: Vec<u8>,
    /// 当前位置
    pos: usize,
}

impl MemoryBackend {
    /// 从已有数据创建
    pub fn from_data(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }
}

impl IoBackend for MemoryBackend {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.data.len().saturating_sub(self.pos);
        let to_read = buf.len().min(available);
        if to_read == 0 {
            return Ok(0);
        }
        buf[..to_read].copy_from_slice(&self.data[self.pos..self.pos + to_read]);
        self.pos += to_read;
        Ok(to_read)
    }

    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let new_pos = match pos {
            io::SeekFrom::Start(offset) => offset as i64,
            io::SeekFrom::End(offset) => self.data.len() as i64 + offset,
            io::SeekFrom::Current(offset) => self.pos as i64 + offset,
        };
        if new_pos < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek 位置不能为负",
            ));
        }
        self.pos = new_pos as usize;
        Ok(self.pos as u64)
    }

    fn position(&mut self) -> io::Result<u64> {
        Ok(self.pos as u64)
    }

    fn size(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    fn is_seekable(&self) -> bool {
        true
    }
}

/// 顺序流 I/O 后端
///
/// 包装任意 [`Read`], 只能向前读取.
pub struct ReaderBackend<R> {
    reader: R,
    /// 已读取的字节数
    pos: u64,
}

impl<R: Read> ReaderBackend<R> {
    /// 包装一个只读流
    pub fn new(reader: R) -> Self {
        Self { reader, pos: 0 }
    }
}

impl<R: Read + Send> IoBackend for ReaderBackend<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.reader.read(buf)?;
        self.pos += n as u64;
        Ok(n)
    }

    fn seek(&mut self, _pos: io::SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "顺序流不支持 seek",
        ))
    }

    fn position(&mut self) -> io::Result<u64> {
        Ok(self.pos)
    }

    fn size(&self) -> Option<u64> {
        None
    }

    fn is_seekable(&self) -> bool {
        false
    }
}
