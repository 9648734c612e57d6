//! 计数线程: 跟踪 → 计数 → 窗口聚合 → 持久化 → 通知上传线程

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use tracing::{debug, error, info};

use super::control::ControlCell;
use super::stats::PipelineStats;
use crate::aggregation::{AggregationSnapshot, Aggregator};
use crate::buffer::DurableBuffer;
use crate::detection::{CentroidTracker, DetectionBatch, Tracker};

pub struct Counter {
    tracker: CentroidTracker,
    aggregator: Aggregator,
    buffer: Arc<DurableBuffer>,
    poll_timeout: Duration,
    /// 写盘失败的快照,下次刷新时重试
    unsaved: VecDeque<AggregationSnapshot>,
}

impl Counter {
    pub fn new(
        tracker: CentroidTracker,
        aggregator: Aggregator,
        buffer: Arc<DurableBuffer>,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            tracker,
            aggregator,
            buffer,
            poll_timeout,
            unsaved: VecDeque::new(),
        }
    }

    pub fn run(
        &mut self,
        rx: Receiver<DetectionBatch>,
        tx: Sender<u64>,
        control: Arc<ControlCell>,
        stats: Arc<PipelineStats>,
    ) {
        info!("counter started");

        while control.is_running() {
            match rx.recv_timeout(self.poll_timeout) {
                Ok(batch) => self.ingest(&batch, &stats),
                Err(RecvTimeoutError::Timeout) => self.expire_tracks(Instant::now(), &stats),
                Err(RecvTimeoutError::Disconnected) => break,
            }

            let now = Instant::now();
            if self.aggregator.flush_due(now) {
                self.flush(now, &tx, &stats);
            }
        }

        // 退出前关闭当前窗口
        while let Ok(batch) = rx.try_recv() {
            self.ingest(&batch, &stats);
        }
        self.flush(Instant::now(), &tx, &stats);
        if !self.unsaved.is_empty() {
            error!(lost = self.unsaved.len(), "snapshots could not be persisted before shutdown");
        }
        info!("counter stopped");
    }

    fn ingest(&mut self, batch: &DetectionBatch, stats: &PipelineStats) {
        let tracked = self.tracker.update(&batch.detections, batch.observed_at);
        self.expire_tracks(batch.observed_at, stats);

        let crossings = self.aggregator.ingest(&tracked);
        if crossings > 0 {
            debug!(sequence = batch.frame_sequence, crossings, "line crossings");
        }
    }

    fn expire_tracks(&mut self, now: Instant, stats: &PipelineStats) {
        if self.tracker.expire(now) > 0 {
            let tracker = &self.tracker;
            self.aggregator
                .engine_mut()
                .retain_tracks(|id| tracker.track(id).is_some());
        }
        stats.set_active_tracks(self.tracker.track_count());
    }

    /// 关闭窗口并按顺序写盘;写盘成功的记录 ID 交给上传线程
    fn flush(&mut self, now: Instant, tx: &Sender<u64>, stats: &PipelineStats) {
        if let Some(snapshot) = self.aggregator.flush(now, Utc::now(), stats.runtime()) {
            info!(
                window_end = %snapshot.window_end,
                total = snapshot.totals.total_objects,
                "aggregation window closed"
            );
            self.unsaved.push_back(snapshot);
        }

        while let Some(snapshot) = self.unsaved.pop_front() {
            let id = match self.buffer.append(snapshot.clone()) {
                Ok(id) => id,
                Err(e) => {
                    stats.add_errors(1);
                    error!(pending = self.unsaved.len() + 1, "failed to persist snapshot: {}", e);
                    self.unsaved.push_front(snapshot);
                    return;
                }
            };

            match tx.send_timeout(id, self.poll_timeout) {
                Ok(()) => {}
                Err(SendTimeoutError::Timeout(id)) => {
                    stats.add_errors(1);
                    error!(id, "upload queue full; record stays buffered for retry");
                }
                // 上传线程已退出,记录留待下次启动重试
                Err(SendTimeoutError::Disconnected(id)) => {
                    debug!(id, "uploader gone, record left in buffer");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::tests::{jam_journal, unjam_journal};
    use crate::counting::{CountingEngine, LineCounter};
    use crate::detection::{BBox, Detection, ObjectClass, Point};
    use crossbeam_channel::bounded;

    fn person(x: f32, y: f32) -> Detection {
        Detection::from_bbox(
            ObjectClass::new("person"),
            0.9,
            BBox {
                x1: x - 5.0,
                y1: y - 5.0,
                x2: x + 5.0,
                y2: y + 5.0,
            },
        )
    }

    fn batch(sequence: u64, detections: Vec<Detection>, at: Instant) -> DetectionBatch {
        DetectionBatch {
            frame_sequence: sequence,
            detections,
            observed_at: at,
            inference_ms: 1.0,
        }
    }

    fn counter(dir: &std::path::Path) -> (Counter, Arc<DurableBuffer>) {
        let buffer = Arc::new(
            DurableBuffer::open(dir.join("c.journal"), Duration::from_secs(86_400)).unwrap(),
        );
        let line = LineCounter::new("door", Point::new(0.0, 100.0), Point::new(200.0, 100.0));
        let engine = CountingEngine::new(vec![ObjectClass::new("person")], vec![], vec![line]);
        let aggregator =
            Aggregator::with_interval(engine, "CAM_1", "site", "org", Duration::from_secs(60));
        let tracker = CentroidTracker::new(50.0, Duration::from_millis(100), 10);
        let counter = Counter::new(
            tracker,
            aggregator,
            buffer.clone(),
            Duration::from_millis(20),
        );
        (counter, buffer)
    }

    #[test]
    fn test_failed_persist_is_requeued_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let (mut counter, buffer) = counter(dir.path());
        let stats = PipelineStats::new();
        let (tx, rx) = bounded(10);

        counter.ingest(&batch(0, vec![person(10.0, 10.0)], Instant::now()), &stats);
        jam_journal(&buffer);
        counter.flush(Instant::now(), &tx, &stats);
        assert_eq!(counter.unsaved.len(), 1);
        assert_eq!(stats.error_count(), 1);
        assert!(rx.try_recv().is_err());

        counter.ingest(&batch(1, vec![person(10.0, 10.0)], Instant::now()), &stats);
        counter.flush(Instant::now(), &tx, &stats);
        assert_eq!(counter.unsaved.len(), 2);

        unjam_journal(&buffer);
        counter.flush(Instant::now(), &tx, &stats);
        assert!(counter.unsaved.is_empty());
        let ids: Vec<u64> = rx.try_iter().collect();
        assert_eq!(ids, vec![1, 2]);
        let first = buffer.get(1).unwrap().snapshot;
        let second = buffer.get(2).unwrap().snapshot;
        assert!(first.timestamp <= second.timestamp);
    }

    #[test]
    fn test_full_upload_queue_keeps_record_buffered() {
        let dir = tempfile::tempdir().unwrap();
        let (mut counter, buffer) = counter(dir.path());
        let stats = PipelineStats::new();
        let (tx, rx) = bounded(1);
        tx.send(99).unwrap();

        counter.ingest(&batch(0, vec![person(10.0, 10.0)], Instant::now()), &stats);
        counter.flush(Instant::now(), &tx, &stats);
        assert!(counter.unsaved.is_empty());
        assert_eq!(stats.error_count(), 1);
        assert_eq!(buffer.pending_count(), 1);
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![99]);
    }

    #[test]
    fn test_expired_tracks_leave_crossed_set() {
        let dir = tempfile::tempdir().unwrap();
        let (mut counter, _buffer) = counter(dir.path());
        let stats = PipelineStats::new();
        let t0 = Instant::now();

        counter.ingest(&batch(0, vec![person(10.0, 90.0)], t0), &stats);
        counter.ingest(&batch(1, vec![person(10.0, 110.0)], t0), &stats);
        let line = &counter.aggregator.engine().lines()[0];
        assert!(line.has_crossed(0));

        counter.expire_tracks(t0 + Duration::from_secs(1), &stats);
        let line = &counter.aggregator.engine().lines()[0];
        assert!(!line.has_crossed(0));
        assert_eq!(line.total(), 1);
        assert_eq!(stats.active_tracks(), 0);
    }
}
