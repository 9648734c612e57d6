#![allow(clippy::type_complexity)]
// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod aggregation; // 时间窗口聚合
pub mod buffer; // 本地持久化缓冲
pub mod config; // 代理配置参数
pub mod counting; // 越线/区域计数
pub mod detection; // 检测数据与跟踪
pub mod error; // 错误类型
pub mod input; // 帧输入系统
pub mod models; // 推理后端
pub mod pipeline; // 多线程流水线
pub mod telemetry; // 日志
pub mod upload; // 上报与重试

pub use crate::aggregation::{AggregationSnapshot, Aggregator};
pub use crate::buffer::{BufferedRecord, DeliveryStatus, DurableBuffer};
pub use crate::config::{AgentConfig, Args};
pub use crate::counting::CountingEngine;
pub use crate::detection::{CentroidTracker, Detection, Frame, Tracker};
pub use crate::error::{AgentError, Result};
pub use crate::models::{open_backend, BackendKind, InferenceBackend};
pub use crate::pipeline::{ControlCell, Pipeline, PipelineHandle, PipelineParts, StatusSnapshot};
pub use crate::upload::{
    BackendSink, DocumentSink, DocumentStatusReporter, StatusReporter, TelemetrySink, Uploader,
};
