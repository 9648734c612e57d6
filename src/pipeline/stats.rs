//! 运行统计与状态快照

use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::aggregation::RuntimeStats;
use crate::models::BackendKind;

/// 各工作线程共享的计数器 (无锁)
#[derive(Debug)]
pub struct PipelineStats {
    started: Instant,
    frames_captured: AtomicU64,
    frames_dropped: AtomicU64,
    frames_processed: AtomicU64,
    error_count: AtomicU64,
    active_tracks: AtomicUsize,
    fps_bits: AtomicU64,
    /// 最近一次有检测结果的时间 (毫秒时间戳, 0 表示从未)
    last_detection_ms: AtomicI64,
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineStats {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            frames_captured: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            frames_processed: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            active_tracks: AtomicUsize::new(0),
            fps_bits: AtomicU64::new(0f64.to_bits()),
            last_detection_ms: AtomicI64::new(0),
        }
    }

    pub fn frame_captured(&self) {
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_processed(&self) {
        self.frames_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_errors(&self, n: u64) {
        if n > 0 {
            self.error_count.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn set_active_tracks(&self, n: usize) {
        self.active_tracks.store(n, Ordering::Relaxed);
    }

    pub fn set_fps(&self, fps: f64) {
        self.fps_bits.store(fps.to_bits(), Ordering::Relaxed);
    }

    pub fn detection_seen(&self, at: DateTime<Utc>) {
        self.last_detection_ms
            .store(at.timestamp_millis(), Ordering::Relaxed);
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames_captured.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    pub fn active_tracks(&self) -> usize {
        self.active_tracks.load(Ordering::Relaxed)
    }

    pub fn fps(&self) -> f64 {
        f64::from_bits(self.fps_bits.load(Ordering::Relaxed))
    }

    pub fn last_detection(&self) -> Option<DateTime<Utc>> {
        match self.last_detection_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => DateTime::from_timestamp_millis(ms),
        }
    }

    pub fn uptime_seconds(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// 写入聚合快照的运行统计
    pub fn runtime(&self) -> RuntimeStats {
        RuntimeStats {
            frames_processed: self.frames_processed(),
            fps: self.fps(),
            runtime_seconds: self.uptime_seconds(),
        }
    }
}

/// 对外状态
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub fps: f64,
    pub last_detection: Option<String>,
    pub total_frames_processed: u64,
    pub frames_dropped: u64,
    pub active_tracks: usize,
    pub error_count: u64,
    pub uptime_seconds: f64,
    pub detection_active: bool,
    pub backend: BackendKind,
    pub pending_records: usize,
}

impl StatusSnapshot {
    pub fn collect(
        stats: &PipelineStats,
        detection_active: bool,
        backend: BackendKind,
        pending_records: usize,
    ) -> Self {
        Self {
            fps: stats.fps(),
            last_detection: stats
                .last_detection()
                .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true)),
            total_frames_processed: stats.frames_processed(),
            frames_dropped: stats.frames_dropped(),
            active_tracks: stats.active_tracks(),
            error_count: stats.error_count(),
            uptime_seconds: stats.uptime_seconds(),
            detection_active,
            backend,
            pending_records,
        }
    }
}
