//! 聚合器 (Aggregator)
//!
//! 在固定时间窗口内累加计数,窗口到期时扁平化为不可变快照并重置。
//! 全零窗口不产生快照。

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::config::AgentConfig;
use crate::counting::{CountingEngine, ZoneCounts};
use crate::detection::TrackedDetection;

/// 快照格式版本
pub const SCHEMA_VERSION: &str = "1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregatorState {
    Accumulating,
    Flushing,
}

/// 快照内的合计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountTotals {
    #[serde(rename = "in")]
    pub entered: u64,
    #[serde(rename = "out")]
    pub exited: u64,
    /// in + out
    pub total_objects: u64,
}

/// 刷新时刻的运行统计
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeStats {
    pub frames_processed: u64,
    pub fps: f64,
    pub runtime_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub version: String,
    /// 生成快照耗时 (毫秒)
    pub processing_time: f64,
}

/// 聚合快照 (不可变)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationSnapshot {
    pub timestamp: String,
    pub window_start: String,
    pub window_end: String,
    pub camera_id: String,
    pub site_id: String,
    pub org_id: String,
    pub aggregation_interval: u64,
    pub counts: BTreeMap<String, ZoneCounts>,
    pub totals: CountTotals,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub lines: BTreeMap<String, BTreeMap<String, u64>>,
    #[serde(default)]
    pub runtime: RuntimeStats,
    pub metadata: SnapshotMetadata,
}

impl AggregationSnapshot {
    /// 文档ID: 时间戳中的 ':' 与 '-' 替换为 '_'
    pub fn document_id(&self) -> String {
        self.timestamp.replace([':', '-'], "_")
    }

    /// 后端接口格式
    pub fn backend_payload(&self) -> serde_json::Value {
        json!({
            "camera_id": self.camera_id,
            "timestamp": self.timestamp,
            "counts": self.counts,
            "total_objects": self.totals.total_objects,
            "frames_processed": self.runtime.frames_processed,
            "fps": self.runtime.fps,
            "runtime_seconds": self.runtime.runtime_seconds,
        })
    }
}

fn iso(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub struct Aggregator {
    engine: CountingEngine,
    camera_id: String,
    site_id: String,
    org_id: String,
    interval: Duration,
    state: AggregatorState,
    window_opened: Instant,
    window_opened_wall: DateTime<Utc>,
}

impl Aggregator {
    pub fn new(config: &AgentConfig, engine: CountingEngine) -> Self {
        Self::with_interval(
            engine,
            &config.camera_id,
            &config.site_id,
            &config.org_id,
            config.transmission_config.aggregation_window(),
        )
    }

    pub fn with_interval(
        engine: CountingEngine,
        camera_id: &str,
        site_id: &str,
        org_id: &str,
        interval: Duration,
    ) -> Self {
        Self {
            engine,
            camera_id: camera_id.to_string(),
            site_id: site_id.to_string(),
            org_id: org_id.to_string(),
            interval,
            state: AggregatorState::Accumulating,
            window_opened: Instant::now(),
            window_opened_wall: Utc::now(),
        }
    }

    pub fn state(&self) -> AggregatorState {
        self.state
    }

    pub fn engine(&self) -> &CountingEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut CountingEngine {
        &mut self.engine
    }

    /// 原地累加一批跟踪结果,返回新增越线数
    pub fn ingest(&mut self, tracked: &[TrackedDetection]) -> usize {
        self.engine.process(tracked)
    }

    pub fn flush_due(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.window_opened) >= self.interval
    }

    /// 关闭当前窗口。非零则返回快照;无论如何都重置计数并开启新窗口。
    pub fn flush(
        &mut self,
        now: Instant,
        wall: DateTime<Utc>,
        runtime: RuntimeStats,
    ) -> Option<AggregationSnapshot> {
        self.state = AggregatorState::Flushing;
        let started = Instant::now();

        let counts = self.engine.flattened_counts();
        let lines = self.engine.take_line_window();
        let window_start = self.window_opened_wall;

        self.engine.reset_window();
        self.window_opened = now;
        self.window_opened_wall = wall;
        self.state = AggregatorState::Accumulating;

        if counts.is_empty() && lines.is_empty() {
            debug!("aggregation window empty, nothing to report");
            return None;
        }

        let mut totals = CountTotals::default();
        for c in counts.values() {
            totals.entered += c.entered;
            totals.exited += c.exited;
        }
        totals.total_objects = totals.entered + totals.exited;

        let snapshot = AggregationSnapshot {
            timestamp: iso(wall),
            window_start: iso(window_start),
            window_end: iso(wall),
            camera_id: self.camera_id.clone(),
            site_id: self.site_id.clone(),
            org_id: self.org_id.clone(),
            aggregation_interval: self.interval.as_secs(),
            counts,
            totals,
            lines,
            runtime,
            metadata: SnapshotMetadata {
                version: SCHEMA_VERSION.to_string(),
                processing_time: started.elapsed().as_secs_f64() * 1000.0,
            },
        };
        info!(
            total_objects = snapshot.totals.total_objects,
            keys = snapshot.counts.len(),
            "aggregated counts"
        );
        Some(snapshot)
    }
}
