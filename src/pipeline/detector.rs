/// 检测器 (Detector)
/// 职责: 接收采集帧 → 推理后端 → 发送 DetectionBatch 到计数线程
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use tracing::{debug, error, info, warn};

use super::control::ControlCell;
use super::stats::PipelineStats;
use crate::detection::{DetectionBatch, Frame};
use crate::models::InferenceBackend;

/// 检测暂停时的轮询间隔
const INACTIVE_SLEEP: Duration = Duration::from_millis(500);

pub struct Detector {
    backend: Box<dyn InferenceBackend>,
    poll_timeout: Duration,

    // 统计
    count: u64,
    last: Instant,
    current_fps: f64,
    reported_errors: u64,
}

impl Detector {
    pub fn new(backend: Box<dyn InferenceBackend>, poll_timeout: Duration) -> Self {
        Self {
            backend,
            poll_timeout,
            count: 0,
            last: Instant::now(),
            current_fps: 0.0,
            reported_errors: 0,
        }
    }

    pub fn run(
        &mut self,
        rx: Receiver<Frame>,
        tx: Sender<DetectionBatch>,
        control: Arc<ControlCell>,
        stats: Arc<PipelineStats>,
    ) {
        info!(backend = %self.backend.kind(), "detector started");

        while control.is_running() {
            if !control.is_detection_active() {
                thread::sleep(INACTIVE_SLEEP);
                continue;
            }

            let frame = match rx.recv_timeout(self.poll_timeout) {
                Ok(f) => f,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };

            let Some(batch) = self.process(&frame, &stats) else {
                continue;
            };

            match tx.send_timeout(batch, self.poll_timeout) {
                Ok(()) => {}
                Err(SendTimeoutError::Timeout(batch)) => {
                    stats.add_errors(1);
                    warn!(sequence = batch.frame_sequence, "detection queue full, batch dropped");
                }
                Err(SendTimeoutError::Disconnected(_)) => break,
            }
        }

        info!(processed = stats.frames_processed(), "detector stopped");
    }

    /// 单帧推理;后端 panic 视为该帧失败
    fn process(&mut self, frame: &Frame, stats: &PipelineStats) -> Option<DetectionBatch> {
        let backend = &mut self.backend;
        let output = match panic::catch_unwind(AssertUnwindSafe(|| backend.infer(frame))) {
            Ok(out) => out,
            Err(_) => {
                stats.add_errors(1);
                error!(sequence = frame.sequence, "inference panicked, frame skipped");
                return None;
            }
        };

        let errors = self.backend.error_count();
        stats.add_errors(errors.saturating_sub(self.reported_errors));
        self.reported_errors = errors;

        stats.frame_processed();
        if !output.detections.is_empty() {
            stats.detection_seen(Utc::now());
        }
        self.tick_fps(stats);

        let inference_ms = output.latency.as_secs_f64() * 1000.0;
        debug!(
            sequence = frame.sequence,
            detections = output.detections.len(),
            "inference {:.1}ms",
            inference_ms
        );

        Some(DetectionBatch {
            frame_sequence: frame.sequence,
            detections: output.detections,
            observed_at: frame.captured_at,
            inference_ms,
        })
    }

    fn tick_fps(&mut self, stats: &PipelineStats) {
        self.count += 1;
        let elapsed = self.last.elapsed();
        if elapsed >= Duration::from_secs(1) {
            self.current_fps = self.count as f64 / elapsed.as_secs_f64();
            self.count = 0;
            self.last = Instant::now();
            stats.set_fps(self.current_fps);
            info!(
                fps = %format!("{:.1}", self.current_fps),
                processed = stats.frames_processed(),
                errors = stats.error_count(),
                "inference stats"
            );
        }
    }
}
