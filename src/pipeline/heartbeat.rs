//! 状态心跳线程: 定期把在线状态写回摄像头文档,失败只记录

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, warn};

use super::control::ControlCell;
use super::stats::{PipelineStats, StatusSnapshot};
use crate::buffer::DurableBuffer;
use crate::models::BackendKind;
use crate::upload::{CameraStatus, StatusReporter};

pub struct Heartbeat {
    reporter: Box<dyn StatusReporter>,
    interval: Duration,
    poll_timeout: Duration,
    buffer: Arc<DurableBuffer>,
    backend: BackendKind,
}

impl Heartbeat {
    pub fn new(
        reporter: Box<dyn StatusReporter>,
        interval: Duration,
        poll_timeout: Duration,
        buffer: Arc<DurableBuffer>,
        backend: BackendKind,
    ) -> Self {
        Self {
            reporter,
            interval,
            poll_timeout,
            buffer,
            backend,
        }
    }

    pub fn run(&mut self, control: Arc<ControlCell>, stats: Arc<PipelineStats>) {
        info!(interval_secs = self.interval.as_secs(), "heartbeat started");

        let mut next_beat = Instant::now();
        while control.is_running() {
            if Instant::now() >= next_beat {
                self.beat(&control, &stats);
                next_beat = Instant::now() + self.interval;
            }
            thread::sleep(self.poll_timeout);
        }

        info!("heartbeat stopped");
    }

    fn beat(&mut self, control: &ControlCell, stats: &PipelineStats) {
        let snapshot = StatusSnapshot::collect(
            stats,
            control.is_detection_active(),
            self.backend,
            self.buffer.pending_count(),
        );
        let status = CameraStatus::online(&snapshot, Utc::now());
        match self.reporter.report(&status) {
            Ok(()) => debug!(frames = status.frame_count, "heartbeat sent"),
            Err(e) => {
                stats.add_errors(1);
                warn!("failed to update camera status: {}", e);
            }
        }
    }
}
