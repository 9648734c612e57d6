//! 计数引擎: 越线 + 区域占用

use std::collections::BTreeMap;

use tracing::debug;

use super::line::LineCounter;
use super::zone::{Direction, Zone, ZoneCounts};
use crate::config::DetectionConfig;
use crate::detection::{ObjectClass, Point, TrackedDetection};

/// 未配置区域时的默认区域名
pub const DEFAULT_ZONE: &str = "all";
/// 不落在任何区域内的检测计入此桶 (只增加 in)
pub const UNZONED: &str = "unzoned";

pub struct CountingEngine {
    classes: Vec<ObjectClass>,
    lines: Vec<LineCounter>,
    zones: Vec<Zone>,
    unzoned: Zone,
}

impl CountingEngine {
    pub fn new(classes: Vec<ObjectClass>, mut zones: Vec<Zone>, lines: Vec<LineCounter>) -> Self {
        if zones.is_empty() {
            debug!("no detection zones configured, counting everything in '{}'", DEFAULT_ZONE);
            zones.push(Zone::new(DEFAULT_ZONE, Vec::new(), Direction::Bidirectional));
        }
        let mut engine = Self {
            classes,
            lines,
            zones,
            unzoned: Zone::new(UNZONED, Vec::new(), Direction::In),
        };
        engine.reset_window();
        engine
    }

    pub fn from_config(cfg: &DetectionConfig) -> Self {
        let classes = cfg
            .object_classes
            .iter()
            .map(|c| ObjectClass::new(c))
            .collect();
        let zones = cfg
            .detection_zones
            .iter()
            .map(|z| {
                Zone::new(
                    z.name.clone(),
                    z.polygon.iter().copied().map(Point::from).collect(),
                    z.direction,
                )
            })
            .collect();
        let lines = cfg
            .counting_lines
            .iter()
            .filter(|l| l.coords.len() == 2)
            .map(|l| LineCounter::new(l.name.clone(), l.coords[0].into(), l.coords[1].into()))
            .collect();
        Self::new(classes, zones, lines)
    }

    pub fn classes(&self) -> &[ObjectClass] {
        &self.classes
    }

    pub fn lines(&self) -> &[LineCounter] {
        &self.lines
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    /// 处理一帧的跟踪结果,返回本帧新增的越线次数
    pub fn process(&mut self, tracked: &[TrackedDetection]) -> usize {
        let mut crossings = 0;
        for t in tracked {
            let det = &t.detection;

            if let Some(prev) = t.previous {
                for line in &mut self.lines {
                    if line.check_crossing(t.track_id, prev, det.center, &det.class) {
                        debug!(
                            line = line.name(),
                            track_id = t.track_id,
                            class = %det.class,
                            "line crossed"
                        );
                        crossings += 1;
                    }
                }
            }

            match self.zones.iter_mut().find(|z| z.contains(det.center)) {
                Some(zone) => zone.record(&det.class),
                None => self.unzoned.record(&det.class),
            }
        }
        crossings
    }

    /// 当前窗口的非零区域计数,键为 `"{zone}_{class}"`
    pub fn flattened_counts(&self) -> BTreeMap<String, ZoneCounts> {
        self.zones
            .iter()
            .chain(std::iter::once(&self.unzoned))
            .flat_map(|zone| {
                zone.counts()
                    .iter()
                    .filter(|(_, c)| !c.is_zero())
                    .map(move |(class, c)| (format!("{}_{}", zone.name(), class), *c))
            })
            .collect()
    }

    /// 取出本窗口各线的越线计数 (只含非空)
    pub fn take_line_window(&mut self) -> BTreeMap<String, BTreeMap<String, u64>> {
        self.lines
            .iter_mut()
            .filter_map(|line| {
                let window = line.take_window();
                (!window.is_empty()).then(|| {
                    (
                        line.name().to_string(),
                        window
                            .into_iter()
                            .map(|(class, n)| (class.to_string(), n))
                            .collect(),
                    )
                })
            })
            .collect()
    }

    /// 清空区域计数 (越线累计与已越线集合不受影响)
    pub fn reset_window(&mut self) {
        for zone in &mut self.zones {
            zone.reset(&self.classes);
        }
        self.unzoned.reset(&self.classes);
    }

    /// 只保留 `live` 判定仍存活的轨迹的越线记录
    pub fn retain_tracks(&mut self, live: impl Fn(u64) -> bool) {
        for line in &mut self.lines {
            line.retain_tracks(&live);
        }
    }

    pub fn reset_lines(&mut self) {
        for line in &mut self.lines {
            line.reset();
        }
    }
}
