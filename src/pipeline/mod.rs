/// 计数流水线 (Counting Pipeline)
///
/// 四线程架构,通过有界通道通信:
/// - Capture:    帧采集 (队列满丢弃最新帧)
/// - Detector:   推理 (独立线程)
/// - Counter:    跟踪 + 计数 + 窗口聚合 + 写盘
/// - Dispatcher: 上传与重试
///
/// 配置了状态上报时另有 Heartbeat 线程定期写回在线状态。
///
/// ```text
/// FrameSource → [frames] → Detector → [detections] → Counter → DurableBuffer
///                                                        ↓ id
///                                                   [uploads] → Dispatcher → sinks
/// ```
pub mod capture;
pub mod control;
pub mod counter;
pub mod delivery;
pub mod detector;
pub mod heartbeat;
pub mod stats;

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::bounded;
use tracing::{debug, error, info, warn};

pub use capture::Capture;
pub use control::{BackendTarget, ControlCell};
pub use counter::Counter;
pub use delivery::Dispatcher;
pub use detector::Detector;
pub use heartbeat::Heartbeat;
pub use stats::{PipelineStats, StatusSnapshot};

use crate::aggregation::Aggregator;
use crate::buffer::DurableBuffer;
use crate::config::AgentConfig;
use crate::counting::CountingEngine;
use crate::detection::CentroidTracker;
use crate::error::Result;
use crate::input::FrameSource;
use crate::models::{BackendKind, InferenceBackend};
use crate::upload::{StatusReporter, TelemetrySink, Uploader};

/// 启动流水线所需的全部部件
pub struct PipelineParts {
    pub config: AgentConfig,
    pub source: Box<dyn FrameSource>,
    pub backend: Box<dyn InferenceBackend>,
    pub buffer: Arc<DurableBuffer>,
    pub sinks: Vec<Box<dyn TelemetrySink>>,
    /// 在线状态上报 (None 或未启用时不启动心跳线程)
    pub reporter: Option<Box<dyn StatusReporter>>,
    pub control: Arc<ControlCell>,
}

/// 关闭结果
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub joined: Vec<String>,
    /// 超过宽限期仍未退出、被放弃等待的线程
    pub detached: Vec<String>,
}

pub struct Pipeline;

impl Pipeline {
    pub fn start(parts: PipelineParts) -> Result<PipelineHandle> {
        let PipelineParts {
            config,
            source,
            backend,
            buffer,
            sinks,
            reporter,
            control,
        } = parts;

        let pc = &config.pipeline_config;
        let poll = pc.poll_timeout();
        let (frame_tx, frame_rx) = bounded(pc.frame_queue);
        let (det_tx, det_rx) = bounded(pc.detection_queue);
        let (up_tx, up_rx) = bounded::<u64>(pc.upload_queue);

        let backend_kind = backend.kind();
        let stats = Arc::new(PipelineStats::new());

        let tc = &config.tracker_config;
        let tracker = CentroidTracker::new(tc.max_distance, tc.max_age(), tc.history_len)
            .with_policy(tc.association);
        let engine = CountingEngine::from_config(&config.detection_config);
        let aggregator = Aggregator::new(&config, engine);
        let uploader = Uploader::new(
            buffer.clone(),
            sinks,
            config.transmission_config.retry_batch_size,
        );

        let mut capture = Capture::new(source, pc.frame_interval());
        let mut detector = Detector::new(backend, poll);
        let mut counter = Counter::new(tracker, aggregator, buffer.clone(), poll);
        let mut dispatcher = Dispatcher::new(uploader, poll);
        let heartbeat = match reporter {
            Some(r) if r.is_enabled() => Some(Heartbeat::new(
                r,
                config.transmission_config.status_update_every(),
                poll,
                buffer.clone(),
                backend_kind,
            )),
            _ => {
                debug!("status reporting disabled");
                None
            }
        };

        let mut threads = Vec::with_capacity(5);
        let spawned = (|| -> std::io::Result<()> {
            if let Some(mut heartbeat) = heartbeat {
                let (c, s) = (control.clone(), stats.clone());
                threads.push(spawn("status", move || heartbeat.run(c, s))?);
            }
            let (c, s) = (control.clone(), stats.clone());
            threads.push(spawn("uploader", move || dispatcher.run(up_rx, c, s))?);
            let (c, s) = (control.clone(), stats.clone());
            threads.push(spawn("counting", move || counter.run(det_rx, up_tx, c, s))?);
            let (c, s) = (control.clone(), stats.clone());
            threads.push(spawn("inference", move || detector.run(frame_rx, det_tx, c, s))?);
            let (c, s) = (control.clone(), stats.clone());
            threads.push(spawn("capture", move || capture.run(frame_tx, c, s))?);
            Ok(())
        })();

        let handle = PipelineHandle {
            threads,
            control,
            stats,
            buffer,
            backend_kind,
        };
        if let Err(e) = spawned {
            error!("failed to spawn pipeline thread: {}", e);
            handle.shutdown(Duration::from_secs(1));
            return Err(e.into());
        }

        info!(
            backend = %backend_kind,
            detection_active = handle.control.is_detection_active(),
            "pipeline started"
        );
        Ok(handle)
    }
}

fn spawn<F>(name: &str, f: F) -> std::io::Result<(String, JoinHandle<()>)>
where
    F: FnOnce() + Send + 'static,
{
    let handle = thread::Builder::new().name(name.into()).spawn(f)?;
    Ok((name.to_string(), handle))
}

/// 运行中的流水线
pub struct PipelineHandle {
    threads: Vec<(String, JoinHandle<()>)>,
    control: Arc<ControlCell>,
    stats: Arc<PipelineStats>,
    buffer: Arc<DurableBuffer>,
    backend_kind: BackendKind,
}

impl PipelineHandle {
    pub fn control(&self) -> &Arc<ControlCell> {
        &self.control
    }

    pub fn stats(&self) -> &Arc<PipelineStats> {
        &self.stats
    }

    pub fn is_running(&self) -> bool {
        self.control.is_running()
    }

    pub fn set_detection_active(&self, active: bool) {
        self.control.set_detection_active(active);
    }

    pub fn set_backend_target(&self, url: &str, api_key: Option<String>, report_interval: Duration) {
        self.control.set_backend_target(url, api_key, report_interval);
    }

    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot::collect(
            &self.stats,
            self.control.is_detection_active(),
            self.backend_kind,
            self.buffer.pending_count(),
        )
    }

    /// 通知所有线程退出,在宽限期内等待;超时的线程被放弃 (不再 join)
    pub fn shutdown(self, grace: Duration) -> ShutdownReport {
        info!("pipeline stopping");
        self.control.stop();

        let deadline = Instant::now() + grace;
        let mut report = ShutdownReport::default();
        for (name, handle) in self.threads {
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(20));
            }
            if handle.is_finished() {
                if handle.join().is_err() {
                    error!(thread = %name, "thread panicked");
                }
                report.joined.push(name);
            } else {
                warn!(thread = %name, "thread did not stop within grace period, detaching");
                report.detached.push(name);
            }
        }

        info!(
            joined = report.joined.len(),
            detached = report.detached.len(),
            pending = self.buffer.pending_count(),
            "pipeline stopped"
        );
        report
    }
}
