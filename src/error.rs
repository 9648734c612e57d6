//! 错误类型 (Error types)
//!
//! 致命错误 (模型缺失/后端不可用) 在启动阶段向上传播;
//! 单帧/单次上传的错误在各阶段边界被吸收,只记录日志与计数。

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Model file not found: {0}")]
    ModelNotFound(String),

    #[error("Model loading failed: {0}")]
    ModelLoad(String),

    #[error("No viable inference backend: {0}")]
    BackendUnavailable(String),

    #[error("Malformed inference output: {0}")]
    MalformedOutput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown buffered record: {0}")]
    UnknownRecord(u64),

    #[error("Sink {sink} rejected record (HTTP {status})")]
    SinkStatus { sink: String, status: u16 },

    #[error("Sink {sink} transport failure: {reason}")]
    SinkTransport { sink: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),
}

impl AgentError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    pub fn malformed<S: Into<String>>(msg: S) -> Self {
        Self::MalformedOutput(msg.into())
    }

    /// 启动阶段不可恢复的错误
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ModelNotFound(_) | Self::ModelLoad(_) | Self::BackendUnavailable(_)
        )
    }
}
