//! 统一错误类型定义.
//!
//! 所有 Ogx crate 共用的错误类型, 支持跨模块传播.
//!
//! 数据损坏 (坏页、CRC 失败、截断) 与容器结束都不会以错误形式出现,
//! 只有调用方误用和底层 I/O 故障才会传播到调用方.

use thiserror::Error;

/// Ogx 框架统一错误类型
#[derive(Debug, Error)]
pub enum OgxError {
    /// 无效参数
    #[error("无效参数: {0}")]
    InvalidArgument(String),

    /// 当前输入不支持该操作 (例如在不可寻址流上做全量扫描)
    #[error("无效操作: {0}")]
    InvalidOperation(String),

    /// 未找到指定序列号的逻辑流
    #[error("未找到逻辑流: serial={0}")]
    StreamNotFound(u32),

    /// 容器已释放, 不可再使用
    #[error("容器已释放")]
    Disposed,

    /// I/O 错误
    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// 内部错误 (不应发生)
    #[error("内部错误: {0}")]
    Internal(String),
}

/// Ogx 框架统一 Result 类型
pub type OgxResult<T> = Result<T, OgxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_not_found_message() {
        let err = OgxError::StreamNotFound(1234);
        assert_eq!(err.to_string(), "未找到逻辑流: serial=1234");
    }

    #[test]
    fn test_io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed");
        let err: OgxError = io_err.into();
        assert!(matches!(err, OgxError::Io(_)));
    }
}
