use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// 流水线级别的错误
///
/// 只有 `Discovery` 会中止运行，其余错误都会被记录后继续
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("图片目录不存在: {}", .0.display())]
    Discovery(PathBuf),
    #[error("无法读取结果文件 {}: {source}", .path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: StoreError,
    },
    #[error("保存结果失败: {0}")]
    Save(#[from] StoreError),
    #[error("保存结果超时 ({0:?})")]
    SaveTimeout(Duration),
    #[error("无法注册信号处理: {0}")]
    Signal(#[source] std::io::Error),
    #[error("人脸识别后端不可用: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Codec(#[from] bincode::Error),
    #[error("保存线程异常退出: {0}")]
    Join(String),
}

/// 单个任务的处理错误，最终会被转换为 `ItemResult::Failure`
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("decode failed")]
    Decode,
    #[error("{0}")]
    Detect(String),
    #[error("panic: {0}")]
    Panic(String),
}
