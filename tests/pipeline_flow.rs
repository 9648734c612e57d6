use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{TimeZone, Utc};
use ndarray::{Array3, ArrayD};

use edge_counter::aggregation::{AggregationSnapshot, Aggregator, RuntimeStats};
use edge_counter::buffer::{BufferedRecord, DeliveryStatus, DurableBuffer};
use edge_counter::counting::{CountingEngine, Direction, LineCounter, Zone};
use edge_counter::detection::{
    BBox, CentroidTracker, Detection, Frame, ObjectClass, Point, TrackedDetection, Tracker,
};
use edge_counter::error::{AgentError, Result};
use edge_counter::input::FrameSource;
use edge_counter::models::{
    build_backend, BackendKind, ClassMapper, InputDType, InputSpec, InputTensor, LabelMap,
    TensorRunner,
};
use edge_counter::pipeline::{ControlCell, Pipeline, PipelineParts};
use edge_counter::upload::{CameraStatus, Delivery, StatusReporter, TelemetrySink, Uploader};
use edge_counter::AgentConfig;

const RETENTION: Duration = Duration::from_secs(30 * 24 * 3600);

fn det(class: &str, x: f32, y: f32) -> Detection {
    Detection::from_bbox(
        ObjectClass::new(class),
        0.9,
        BBox {
            x1: x - 10.0,
            y1: y - 10.0,
            x2: x + 10.0,
            y2: y + 10.0,
        },
    )
}

fn tracker() -> CentroidTracker {
    CentroidTracker::new(100.0, Duration::from_secs(2), 10)
}

fn classes(names: &[&str]) -> Vec<ObjectClass> {
    names.iter().map(|n| ObjectClass::new(n)).collect()
}

fn aggregator(engine: CountingEngine) -> Aggregator {
    Aggregator::with_interval(engine, "CAM_1", "site-1", "org-1", Duration::from_secs(60))
}

fn flush(agg: &mut Aggregator, minute: u32) -> Option<AggregationSnapshot> {
    let wall = Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap();
    agg.flush(Instant::now(), wall, RuntimeStats::default())
}

/// 用聚合器生成第 n 个窗口的快照 (时间戳递增)
fn window_snapshot(n: u32) -> AggregationSnapshot {
    let engine = CountingEngine::new(classes(&["person"]), Vec::new(), Vec::new());
    let mut agg = aggregator(engine);
    let mut trk = tracker();
    let tracked = trk.update(&[det("person", 10.0, 10.0)], Instant::now());
    agg.ingest(&tracked);
    flush(&mut agg, n).unwrap()
}

// ========== 跟踪 → 计数 → 聚合 ==========

#[test]
fn test_line_crossing_counted_once_per_track() {
    let line = LineCounter::new("door", Point::new(0.0, 360.0), Point::new(1280.0, 360.0));
    let engine = CountingEngine::new(classes(&["person"]), Vec::new(), vec![line]);
    let mut agg = aggregator(engine);
    let mut trk = tracker();

    let t0 = Instant::now();
    let mut crossings = 0;
    let mut ids = HashSet::new();
    for (i, y) in [350.0, 370.0, 350.0, 370.0].into_iter().enumerate() {
        let tracked = trk.update(&[det("person", 640.0, y)], t0 + Duration::from_millis(66 * i as u64));
        ids.insert(tracked[0].track_id);
        crossings += agg.ingest(&tracked);
    }
    assert_eq!(ids.len(), 1);
    assert_eq!(crossings, 1);
    assert_eq!(agg.engine().lines()[0].total(), 1);

    let snap = flush(&mut agg, 1).unwrap();
    assert_eq!(snap.lines["door"]["person"], 1);
    assert_eq!(snap.totals.total_objects, snap.totals.entered + snap.totals.exited);
}

#[test]
fn test_touching_line_is_not_a_crossing() {
    let line = LineCounter::new("door", Point::new(0.0, 360.0), Point::new(1280.0, 360.0));
    let engine = CountingEngine::new(classes(&["person"]), Vec::new(), vec![line]);
    let mut agg = aggregator(engine);
    let mut trk = tracker();

    let t0 = Instant::now();
    for (i, y) in [350.0, 360.0].into_iter().enumerate() {
        let tracked = trk.update(&[det("person", 640.0, y)], t0 + Duration::from_millis(i as u64));
        assert_eq!(agg.ingest(&tracked), 0);
    }
}

#[test]
fn test_redelivered_batch_recounts_zone_but_not_line() {
    let line = LineCounter::new("door", Point::new(0.0, 360.0), Point::new(1280.0, 360.0));
    let mut engine = CountingEngine::new(classes(&["person"]), Vec::new(), vec![line]);
    let batch = vec![TrackedDetection {
        detection: det("person", 640.0, 370.0),
        track_id: 7,
        previous: Some(Point::new(640.0, 350.0)),
    }];

    assert_eq!(engine.process(&batch), 1);
    assert_eq!(engine.process(&batch), 0);
    assert_eq!(engine.lines()[0].total(), 1);

    // 区域按帧计数: 重复投递会重复累加
    let counts = engine.flattened_counts();
    assert_eq!(counts["all_person"].entered, 2);
    assert_eq!(counts["all_person"].exited, 2);
}

#[test]
fn test_default_zone_counts_both_directions() {
    let engine = CountingEngine::new(classes(&["person", "car"]), Vec::new(), Vec::new());
    let mut agg = aggregator(engine);
    let mut trk = tracker();

    let tracked = trk.update(&[det("car", 100.0, 100.0)], Instant::now());
    agg.ingest(&tracked);

    let snap = flush(&mut agg, 2).unwrap();
    assert_eq!(snap.counts.len(), 1);
    let car = snap.counts["all_car"];
    assert_eq!((car.entered, car.exited), (1, 1));
    assert_eq!(snap.totals.total_objects, 2);
    assert_eq!(snap.timestamp, "2024-05-01T12:02:00.000Z");
    assert_eq!(snap.document_id(), "2024_05_01T12_02_00.000Z");
}

#[test]
fn test_detection_outside_every_zone_goes_unzoned() {
    let dock = Zone::new(
        "dock",
        vec![
            Point::new(0.0, 0.0),
            Point::new(100.0, 0.0),
            Point::new(100.0, 100.0),
            Point::new(0.0, 100.0),
        ],
        Direction::Out,
    );
    let engine = CountingEngine::new(classes(&["forklift"]), vec![dock], Vec::new());
    let mut agg = aggregator(engine);
    let mut trk = tracker();

    let tracked = trk.update(
        &[det("forklift", 50.0, 50.0), det("forklift", 500.0, 500.0)],
        Instant::now(),
    );
    agg.ingest(&tracked);

    let snap = flush(&mut agg, 3).unwrap();
    assert_eq!(snap.counts["dock_forklift"].exited, 1);
    assert_eq!(snap.counts["dock_forklift"].entered, 0);
    assert_eq!(snap.counts["unzoned_forklift"].entered, 1);
}

#[test]
fn test_empty_window_emits_nothing_and_resets() {
    let engine = CountingEngine::new(classes(&["person"]), Vec::new(), Vec::new());
    let mut agg = aggregator(engine);
    let mut trk = tracker();

    assert!(flush(&mut agg, 4).is_none());

    let tracked = trk.update(&[det("person", 1.0, 1.0)], Instant::now());
    agg.ingest(&tracked);
    assert!(flush(&mut agg, 5).is_some());
    // 上一窗口的计数不会带入下一窗口
    assert!(flush(&mut agg, 6).is_none());
}

// ========== 缓冲 + 上传 ==========

struct ScriptedSink {
    name: &'static str,
    fail_ids: Arc<Mutex<HashSet<u64>>>,
    received: Arc<Mutex<Vec<u64>>>,
}

impl ScriptedSink {
    fn new(name: &'static str) -> (Self, Arc<Mutex<HashSet<u64>>>, Arc<Mutex<Vec<u64>>>) {
        let fail_ids = Arc::new(Mutex::new(HashSet::new()));
        let received = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                name,
                fail_ids: fail_ids.clone(),
                received: received.clone(),
            },
            fail_ids,
            received,
        )
    }
}

impl TelemetrySink for ScriptedSink {
    fn name(&self) -> &str {
        self.name
    }

    fn is_enabled(&self) -> bool {
        true
    }

    fn deliver(&mut self, record: &BufferedRecord) -> Result<Delivery> {
        self.received.lock().unwrap().push(record.id);
        if self.fail_ids.lock().unwrap().contains(&record.id) {
            return Err(AgentError::SinkStatus {
                sink: self.name.to_string(),
                status: 503,
            });
        }
        Ok(Delivery::Acknowledged)
    }
}

#[test]
fn test_retry_stops_at_first_failure_and_resumes() {
    let dir = tempfile::tempdir().unwrap();
    let buffer = Arc::new(DurableBuffer::open(dir.path().join("cam.journal"), RETENTION).unwrap());
    let ids: Vec<u64> = (1..=3)
        .map(|n| buffer.append(window_snapshot(n)).unwrap())
        .collect();

    let (sink, fail_ids, received) = ScriptedSink::new("document");
    fail_ids.lock().unwrap().insert(ids[1]);
    let mut uploader = Uploader::new(buffer.clone(), vec![Box::new(sink)], 10);

    let report = uploader.retry_pending();
    assert_eq!(report.delivered, 1);
    assert_eq!(report.stopped_at, Some(ids[1]));
    assert_eq!(*received.lock().unwrap(), vec![ids[0], ids[1]]);

    let failed = buffer.get(ids[1]).unwrap();
    assert!(failed.is_pending());
    assert_eq!(failed.retry.attempts, 1);
    assert!(failed.retry.last_error.is_some());
    assert_eq!(buffer.get(ids[2]).unwrap().retry.attempts, 0);

    fail_ids.lock().unwrap().clear();
    let report = uploader.retry_pending();
    assert_eq!(report.delivered, 2);
    assert_eq!(buffer.pending_count(), 0);
    assert_eq!(*received.lock().unwrap(), vec![ids[0], ids[1], ids[1], ids[2]]);
}

#[test]
fn test_acknowledged_sink_is_not_sent_twice() {
    let dir = tempfile::tempdir().unwrap();
    let buffer = Arc::new(DurableBuffer::open(dir.path().join("cam.journal"), RETENTION).unwrap());
    let id = buffer.append(window_snapshot(1)).unwrap();

    let (doc, _, doc_received) = ScriptedSink::new("document");
    let (backend, backend_fail, backend_received) = ScriptedSink::new("backend");
    backend_fail.lock().unwrap().insert(id);
    let mut uploader = Uploader::new(buffer.clone(), vec![Box::new(doc), Box::new(backend)], 10);

    assert!(uploader.deliver_id(id).is_err());
    let record = buffer.get(id).unwrap();
    assert!(record.acknowledged_by("document"));
    assert!(!record.acknowledged_by("backend"));

    backend_fail.lock().unwrap().clear();
    assert_eq!(uploader.deliver_id(id).unwrap(), DeliveryStatus::Delivered);
    assert_eq!(doc_received.lock().unwrap().len(), 1);
    assert_eq!(backend_received.lock().unwrap().len(), 2);

    // 已送达的记录不会再被扫描
    let report = uploader.retry_pending();
    assert_eq!(report.scanned, 0);
    assert_eq!(doc_received.lock().unwrap().len(), 1);
}

#[test]
fn test_journal_replay_keeps_ids_and_status() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cam.journal");

    let (first, second) = {
        let buffer = DurableBuffer::open(&path, RETENTION).unwrap();
        let a = buffer.append(window_snapshot(1)).unwrap();
        let b = buffer.append(window_snapshot(2)).unwrap();
        buffer.mark_delivered(a, "document", &["document"]).unwrap();
        buffer.record_attempt(b, "document", Some("timeout".into())).unwrap();
        (a, b)
    };

    let reopened = DurableBuffer::open(&path, RETENTION).unwrap();
    assert_eq!(reopened.len(), 2);
    assert_eq!(reopened.get(first).unwrap().status, DeliveryStatus::Delivered);
    let pending = reopened.get(second).unwrap();
    assert!(pending.is_pending());
    assert_eq!(pending.retry.last_error.as_deref(), Some("timeout"));
    assert_eq!(pending.snapshot.timestamp, "2024-05-01T12:02:00.000Z");

    let again = DurableBuffer::open(&path, RETENTION).unwrap();
    assert_eq!(again.len(), 2);
    let next = again.append(window_snapshot(3)).unwrap();
    assert!(next > second);
}

// ========== 多线程流水线 ==========

/// 8x8 纯色帧,无限供应
struct SolidFrames {
    sequence: u64,
}

impl FrameSource for SolidFrames {
    fn next_frame(&mut self) -> Option<Frame> {
        let frame = Frame::new(vec![128; 8 * 8 * 3], 8, 8, self.sequence);
        self.sequence += 1;
        Some(frame)
    }
}

/// 融合输出: 一个行人,第一帧在线上方,之后在线下方
struct WalkingPerson {
    calls: usize,
}

impl TensorRunner for WalkingPerson {
    fn input_spec(&self) -> InputSpec {
        InputSpec {
            width: 8,
            height: 8,
            dtype: InputDType::U8,
        }
    }

    fn output_count(&self) -> usize {
        1
    }

    fn run(&mut self, _input: InputTensor) -> anyhow::Result<Vec<ArrayD<f32>>> {
        let yc = if self.calls == 0 { 0.25 } else { 0.75 };
        self.calls += 1;
        let out = Array3::from_shape_vec((1, 1, 6), vec![0.5, yc, 0.25, 0.25, 0.9, 0.0])?;
        Ok(vec![out.into_dyn()])
    }
}

struct CollectingSink {
    records: Arc<Mutex<Vec<AggregationSnapshot>>>,
}

impl TelemetrySink for CollectingSink {
    fn name(&self) -> &str {
        "collector"
    }

    fn is_enabled(&self) -> bool {
        true
    }

    fn deliver(&mut self, record: &BufferedRecord) -> Result<Delivery> {
        self.records.lock().unwrap().push(record.snapshot.clone());
        Ok(Delivery::Acknowledged)
    }
}

fn smoke_config(data_dir: &std::path::Path, aggregation_interval: u64) -> AgentConfig {
    let json = serde_json::json!({
        "cameraId": "CAM_SMOKE",
        "siteId": "site-1",
        "orgId": "org-1",
        "detectionConfig": {
            "modelPath": "unused.onnx",
            "objectClasses": ["person"],
            "countingLines": [{ "name": "door", "coords": [[0.0, 4.0], [8.0, 4.0]] }]
        },
        "transmissionConfig": {
            "aggregationInterval": aggregation_interval,
            "statusUpdateInterval": 1
        },
        "pipelineConfig": { "fpsTarget": 50, "pollTimeout": 50, "shutdownGrace": 5 },
        "storageConfig": { "dataDir": data_dir }
    });
    serde_json::from_value(json).unwrap()
}

fn wait_until(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    cond()
}

struct SmokeRun {
    handle: edge_counter::PipelineHandle,
    buffer: Arc<DurableBuffer>,
    records: Arc<Mutex<Vec<AggregationSnapshot>>>,
}

fn start_smoke(
    dir: &std::path::Path,
    active: bool,
    aggregation_interval: u64,
    reporter: Option<Box<dyn StatusReporter>>,
) -> SmokeRun {
    let config = smoke_config(dir, aggregation_interval);
    let buffer = Arc::new(DurableBuffer::open(config.journal_path(), RETENTION).unwrap());
    let mapper = ClassMapper::new(LabelMap::Positional, &config.detection_config.object_classes);
    let backend =
        build_backend(BackendKind::Accelerator, WalkingPerson { calls: 0 }, mapper, 0.5).unwrap();
    let records = Arc::new(Mutex::new(Vec::new()));
    let sink = CollectingSink {
        records: records.clone(),
    };

    let handle = Pipeline::start(PipelineParts {
        config,
        source: Box::new(SolidFrames { sequence: 0 }),
        backend,
        buffer: buffer.clone(),
        sinks: vec![Box::new(sink)],
        reporter,
        control: Arc::new(ControlCell::new(active)),
    })
    .unwrap();
    SmokeRun {
        handle,
        buffer,
        records,
    }
}

#[test]
fn test_pipeline_flushes_and_uploads_on_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let SmokeRun {
        handle,
        buffer,
        records,
    } = start_smoke(dir.path(), true, 300, None);

    let stats = handle.stats().clone();
    assert!(wait_until(Duration::from_secs(5), || stats.frames_processed() >= 5));
    let status = handle.status();
    assert!(status.detection_active);
    assert_eq!(status.backend, BackendKind::Accelerator);
    assert!(status.last_detection.is_some());

    let report = handle.shutdown(Duration::from_secs(5));
    assert!(report.detached.is_empty(), "detached: {:?}", report.detached);
    assert_eq!(report.joined.len(), 4);

    assert_eq!(buffer.len(), 1);
    assert_eq!(buffer.pending_count(), 0);
    let records = records.lock().unwrap();
    assert_eq!(records.len(), 1);
    let snap = &records[0];
    assert_eq!(snap.camera_id, "CAM_SMOKE");
    assert_eq!(snap.lines["door"]["person"], 1);
    assert!(snap.counts["all_person"].entered >= 5);
    assert!(snap.runtime.frames_processed >= 5);
}

#[test]
fn test_inactive_pipeline_skips_inference_until_enabled() {
    let dir = tempfile::tempdir().unwrap();
    let SmokeRun {
        handle,
        buffer,
        records,
    } = start_smoke(dir.path(), false, 300, None);

    let stats = handle.stats().clone();
    assert!(wait_until(Duration::from_secs(5), || stats.frames_dropped() > 0));
    assert_eq!(stats.frames_processed(), 0);

    handle.set_detection_active(true);
    assert!(wait_until(Duration::from_secs(5), || stats.frames_processed() > 0));

    handle.shutdown(Duration::from_secs(5));
    assert_eq!(buffer.len(), 1);
    assert_eq!(records.lock().unwrap().len(), 1);
}

#[test]
fn test_idle_window_flushes_on_timer() {
    let dir = tempfile::tempdir().unwrap();
    let SmokeRun {
        handle,
        buffer,
        records,
    } = start_smoke(dir.path(), true, 1, None);

    let stats = handle.stats().clone();
    assert!(wait_until(Duration::from_secs(5), || stats.frames_processed() >= 2));
    handle.set_detection_active(false);

    // 推理暂停后计数线程只会等到超时,窗口仍须按时关闭并上传
    assert!(wait_until(Duration::from_secs(5), || !records.lock().unwrap().is_empty()));
    assert!(handle.is_running());
    assert!(records.lock().unwrap()[0].totals.total_objects > 0);

    handle.shutdown(Duration::from_secs(5));
    assert_eq!(buffer.pending_count(), 0);
}

struct RecordingReporter {
    reports: Arc<Mutex<Vec<CameraStatus>>>,
}

impl StatusReporter for RecordingReporter {
    fn is_enabled(&self) -> bool {
        true
    }

    fn report(&mut self, status: &CameraStatus) -> Result<()> {
        self.reports.lock().unwrap().push(status.clone());
        Ok(())
    }
}

#[test]
fn test_status_heartbeat_reports_while_running() {
    let dir = tempfile::tempdir().unwrap();
    let reports = Arc::new(Mutex::new(Vec::new()));
    let reporter = RecordingReporter {
        reports: reports.clone(),
    };
    let SmokeRun { handle, .. } = start_smoke(dir.path(), true, 300, Some(Box::new(reporter)));

    assert!(wait_until(Duration::from_secs(5), || reports.lock().unwrap().len() >= 2));
    let report = handle.shutdown(Duration::from_secs(5));
    assert!(report.joined.contains(&"status".to_string()));
    assert!(report.detached.is_empty());

    let reports = reports.lock().unwrap();
    assert_eq!(reports[0].status, "online");
    assert!(reports.last().unwrap().frame_count >= reports[0].frame_count);
}
