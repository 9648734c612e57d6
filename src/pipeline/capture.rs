//! 采集线程: 按目标帧率拉帧,队列满时丢弃最新帧

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Sender, TrySendError};
use tracing::{info, trace, warn};

use super::control::ControlCell;
use super::stats::PipelineStats;
use crate::detection::Frame;
use crate::input::FrameSource;

/// 无帧时的退避
const NO_FRAME_BACKOFF: Duration = Duration::from_millis(100);

pub struct Capture {
    source: Box<dyn FrameSource>,
    frame_interval: Duration,
}

impl Capture {
    pub fn new(source: Box<dyn FrameSource>, frame_interval: Duration) -> Self {
        Self {
            source,
            frame_interval,
        }
    }

    pub fn run(&mut self, tx: Sender<Frame>, control: Arc<ControlCell>, stats: Arc<PipelineStats>) {
        info!(source = self.source.name(), "capture started");

        while control.is_running() {
            let Some(frame) = self.source.next_frame() else {
                stats.add_errors(1);
                warn!(source = self.source.name(), "failed to capture frame");
                thread::sleep(NO_FRAME_BACKOFF);
                continue;
            };
            stats.frame_captured();

            match tx.try_send(frame) {
                Ok(()) => {}
                Err(TrySendError::Full(frame)) => {
                    stats.frame_dropped();
                    trace!(sequence = frame.sequence, "frame queue full, dropping frame");
                }
                Err(TrySendError::Disconnected(_)) => break,
            }

            thread::sleep(self.frame_interval);
        }

        info!(
            captured = stats.frames_captured(),
            dropped = stats.frames_dropped(),
            "capture stopped"
        );
    }
}
