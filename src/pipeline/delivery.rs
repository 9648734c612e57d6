//! 上传线程: 新记录即时投递,空闲时重试积压记录

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, info, warn};

use super::control::ControlCell;
use super::stats::PipelineStats;
use crate::upload::Uploader;

pub struct Dispatcher {
    uploader: Uploader,
    poll_timeout: Duration,
}

impl Dispatcher {
    pub fn new(uploader: Uploader, poll_timeout: Duration) -> Self {
        Self {
            uploader,
            poll_timeout,
        }
    }

    pub fn run(&mut self, rx: Receiver<u64>, control: Arc<ControlCell>, stats: Arc<PipelineStats>) {
        info!(sinks = ?self.uploader.sink_names(), "uploader started");

        // 停止后继续接收,直到计数线程完成最后一次刷新并关闭通道
        loop {
            match rx.recv_timeout(self.poll_timeout) {
                Ok(id) => self.deliver(id, &stats),
                Err(RecvTimeoutError::Timeout) => {
                    if !control.is_running() {
                        continue;
                    }
                    if let Some(report) = self.uploader.retry_if_due(Instant::now()) {
                        if report.scanned > 0 {
                            debug!(
                                scanned = report.scanned,
                                delivered = report.delivered,
                                "retry pass"
                            );
                        }
                    }
                    self.compact(&stats);
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        info!(
            pending = self.uploader.buffer().pending_count(),
            "uploader stopped"
        );
    }

    fn compact(&self, stats: &PipelineStats) {
        match self.uploader.buffer().compact_if_due() {
            Ok(Some(expired)) => debug!(expired, "buffer journal compacted"),
            Ok(None) => {}
            Err(e) => {
                stats.add_errors(1);
                warn!("buffer compaction failed: {}", e);
            }
        }
    }

    fn deliver(&mut self, id: u64, stats: &PipelineStats) {
        match self.uploader.deliver_id(id) {
            Ok(status) => debug!(id, ?status, "record delivered"),
            Err(e) => {
                stats.add_errors(1);
                warn!(id, "delivery failed, will retry: {}", e);
            }
        }
    }
}
