/// 上传系统 (Telemetry upload)
///
/// - document: 文档存储,按时间戳幂等写入
/// - backend:  自定义后端,按上报间隔限流
/// - uploader: 从本地缓冲取记录投递,失败即停
/// - status:   摄像头在线状态心跳
pub mod backend;
pub mod document;
pub mod status;
pub mod uploader;

pub use backend::BackendSink;
pub use document::DocumentSink;
pub use status::{CameraStatus, DocumentStatusReporter, StatusReporter};
pub use uploader::{retry_delay, RetryReport, Uploader};

use crate::buffer::BufferedRecord;
use crate::error::{AgentError, Result};

/// 单次投递结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// 远端确认接收
    Acknowledged,
    /// 按策略跳过 (视同已接收)
    Skipped,
}

/// 上传目标统一接口
pub trait TelemetrySink: Send {
    fn name(&self) -> &str;

    /// 未配置的目标不参与投递,也不影响记录的送达状态
    fn is_enabled(&self) -> bool;

    fn deliver(&mut self, record: &BufferedRecord) -> Result<Delivery>;
}

pub(crate) fn http_error(sink: &str, err: ureq::Error) -> AgentError {
    match err {
        ureq::Error::Status(status, _) => AgentError::SinkStatus {
            sink: sink.to_string(),
            status,
        },
        ureq::Error::Transport(t) => AgentError::SinkTransport {
            sink: sink.to_string(),
            reason: t.to_string(),
        },
    }
}
