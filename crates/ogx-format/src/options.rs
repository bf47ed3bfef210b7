//! 容器配置.
//!
//! 所有字段都有默认值, 可以从 JSON 文件部分覆盖:
//! ```json
//! { "resync_window": 131072 }
//! ```

use std::path::Path;

use ogx_core::{OgxError, OgxResult};
use serde::{Deserialize, Serialize};

use crate::io::DEFAULT_CHUNK_SIZE;
use crate::resync::DEFAULT_RESYNC_WINDOW;

/// 搜索窗口上限 (16 MB)
const MAX_RESYNC_WINDOW: usize = 16 * 1024 * 1024;

/// 容器配置
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ContainerOptions {
    /// 重同步时页面起点相对游标的最大偏移
    #[serde(default = "default_resync_window")]
    pub resync_window: usize,
    /// 单次向底层流请求的字节数
    #[serde(default = "default_io_chunk_size")]
    pub io_chunk_size: usize,
}

fn default_resync_window() -> usize {
    DEFAULT_RESYNC_WINDOW
}

fn default_io_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

impl Default for ContainerOptions {
    fn default() -> Self {
        Self {
            resync_window: default_resync_window(),
            io_chunk_size: default_io_chunk_size(),
        }
    }
}

impl ContainerOptions {
    /// 校验取值范围
    pub fn validate(&self) -> OgxResult<()> {
        if self.resync_window == 0 || self.resync_window > MAX_RESYNC_WINDOW {
            return Err(OgxError::Config(format!(
                "resync_window 超出范围: {} (允许 1..={MAX_RESYNC_WINDOW})",
                self.resync_window,
            )));
        }
        if self.io_chunk_size == 0 {
            return Err(OgxError::Config("io_chunk_size 不能为 0".into()));
        }
        Ok(())
    }

    /// 从 JSON 文本解析并校验
    pub fn from_json_str(text: &str) -> OgxResult<Self> {
        let options: Self = serde_json::from_str(text)
            .map_err(|e| OgxError::Config(format!("解析配置失败: {e}")))?;
        options.validate()?;
        Ok(options)
    }

    /// 从 JSON 文件加载并校验
    pub fn from_json_file(path: impl AsRef<Path>) -> OgxResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ContainerOptions::default();
        assert_eq!(options.resync_window, 65536);
        assert_eq!(options.io_chunk_size, 32 * 1024);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let options = ContainerOptions::from_json_str(r#"{ "resync_window": 1024 }"#).unwrap();
        assert_eq!(options.resync_window, 1024);
        assert_eq!(options.io_chunk_size, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            ContainerOptions::from_json_str(r#"{ "resync_window": 0 }"#),
            Err(OgxError::Config(_))
        ));
        assert!(matches!(
            ContainerOptions::from_json_str(r#"{ "io_chunk_size": 0 }"#),
            Err(OgxError::Config(_))
        ));
        assert!(matches!(
            ContainerOptions::from_json_str("not json"),
            Err(OgxError::Config(_))
        ));
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ogx.json");
        std::fs::write(&path, r#"{ "io_chunk_size": 4096 }"#).unwrap();
        let options = ContainerOptions::from_json_file(&path).unwrap();
        assert_eq!(options.io_chunk_size, 4096);
    }
}
