//! 多目标跟踪 (最近质心匹配)
//! Nearest-centroid multi-object tracking

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::types::{Detection, ObjectClass, Point};

// ========== 公共数据结构 ==========

/// 同一帧内多个检测落在同一轨迹附近时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AssociationPolicy {
    /// 每个轨迹每帧最多被一个检测认领,其余检测另建新轨迹
    #[default]
    Reserved,
    /// 多个检测可共享同一轨迹 (旧设备行为)
    Shared,
}

/// 历史位置环形缓冲 (容量固定,满时丢弃最旧)
#[derive(Clone, Debug)]
pub struct PositionHistory {
    points: VecDeque<Point>,
    capacity: usize,
}

impl PositionHistory {
    fn new(first: Point, capacity: usize) -> Self {
        let capacity = capacity.max(2);
        let mut points = VecDeque::with_capacity(capacity);
        points.push_back(first);
        Self { points, capacity }
    }

    fn push(&mut self, p: Point) {
        if self.points.len() == self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(p);
    }

    /// 最新位置 (至少有一个)
    pub fn latest(&self) -> Point {
        self.points.back().copied().unwrap_or_default()
    }

    /// 倒数第二个位置
    pub fn previous(&self) -> Option<Point> {
        let n = self.points.len();
        (n >= 2).then(|| self.points[n - 2])
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Point> {
        self.points.iter()
    }
}

/// 跟踪对象
#[derive(Clone, Debug)]
pub struct Track {
    /// 唯一跟踪ID (单调递增,不复用)
    pub id: u64,

    /// 类别 (创建后不变)
    pub class: ObjectClass,

    /// 历史轨迹 (中心点)
    pub history: PositionHistory,

    /// 最近一次匹配时间
    pub last_seen: Instant,
}

/// 带跟踪ID的检测
#[derive(Clone, Debug)]
pub struct TrackedDetection {
    pub detection: Detection,
    pub track_id: u64,
    /// 匹配前轨迹的位置 (新轨迹为 None)
    pub previous: Option<Point>,
}

/// 跟踪器统一接口
pub trait Tracker {
    /// 为每个检测分配跟踪ID,返回顺序与输入一致
    fn update(&mut self, detections: &[Detection], now: Instant) -> Vec<TrackedDetection>;

    /// 清除超时轨迹,返回被移除的数量
    fn expire(&mut self, now: Instant) -> usize;

    /// 重置跟踪器 (清除所有跟踪)
    fn reset(&mut self);

    /// 获取当前跟踪数量
    fn track_count(&self) -> usize;
}

// ========== 质心跟踪器 ==========

pub struct CentroidTracker {
    tracks: BTreeMap<u64, Track>,
    next_id: u64,
    max_distance: f32,
    max_age: Duration,
    history_len: usize,
    policy: AssociationPolicy,
}

impl CentroidTracker {
    pub fn new(max_distance: f32, max_age: Duration, history_len: usize) -> Self {
        Self {
            tracks: BTreeMap::new(),
            next_id: 0,
            max_distance,
            max_age,
            history_len,
            policy: AssociationPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: AssociationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn track(&self, id: u64) -> Option<&Track> {
        self.tracks.get(&id)
    }

    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    /// 同类别、距离最近的候选轨迹。按ID升序遍历,只有严格更近才替换,
    /// 因此距离相同取较小ID。
    fn nearest(&self, det: &Detection, claimed: &HashSet<u64>) -> Option<u64> {
        let mut best: Option<(u64, f32)> = None;
        for (id, track) in &self.tracks {
            if track.class != det.class {
                continue;
            }
            if self.policy == AssociationPolicy::Reserved && claimed.contains(id) {
                continue;
            }
            let d = track.history.latest().distance(&det.center);
            match best {
                Some((_, best_d)) if d >= best_d => {}
                _ => best = Some((*id, d)),
            }
        }
        best.filter(|(_, d)| *d < self.max_distance)
            .map(|(id, _)| id)
    }
}

impl Tracker for CentroidTracker {
    fn update(&mut self, detections: &[Detection], now: Instant) -> Vec<TrackedDetection> {
        let mut claimed = HashSet::with_capacity(detections.len());
        let mut out = Vec::with_capacity(detections.len());

        for det in detections {
            let tracked = match self.nearest(det, &claimed) {
                Some(id) => {
                    let track = match self.tracks.get_mut(&id) {
                        Some(t) => t,
                        None => continue,
                    };
                    let previous = Some(track.history.latest());
                    track.history.push(det.center);
                    track.last_seen = now;
                    TrackedDetection {
                        detection: det.clone(),
                        track_id: id,
                        previous,
                    }
                }
                None => {
                    let id = self.next_id;
                    self.next_id += 1;
                    self.tracks.insert(
                        id,
                        Track {
                            id,
                            class: det.class.clone(),
                            history: PositionHistory::new(det.center, self.history_len),
                            last_seen: now,
                        },
                    );
                    trace!(track_id = id, class = %det.class, "new track");
                    TrackedDetection {
                        detection: det.clone(),
                        track_id: id,
                        previous: None,
                    }
                }
            };
            claimed.insert(tracked.track_id);
            out.push(tracked);
        }

        out
    }

    fn expire(&mut self, now: Instant) -> usize {
        let before = self.tracks.len();
        let max_age = self.max_age;
        self.tracks
            .retain(|_, t| now.saturating_duration_since(t.last_seen) <= max_age);
        before - self.tracks.len()
    }

    fn reset(&mut self) {
        self.tracks.clear();
    }

    fn track_count(&self) -> usize {
        self.tracks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::types::BBox;

    fn det(class: &str, x: f32, y: f32) -> Detection {
        Detection::from_bbox(
            ObjectClass::new(class),
            0.9,
            BBox {
                x1: x - 5.0,
                y1: y - 5.0,
                x2: x + 5.0,
                y2: y + 5.0,
            },
        )
    }

    fn tracker() -> CentroidTracker {
        CentroidTracker::new(100.0, Duration::from_secs(2), 10)
    }

    #[test]
    fn test_stable_id_within_max_distance() {
        let mut t = tracker();
        let now = Instant::now();
        let a = t.update(&[det("person", 100.0, 100.0)], now);
        let b = t.update(&[det("person", 150.0, 130.0)], now + Duration::from_millis(66));
        let c = t.update(&[det("person", 200.0, 160.0)], now + Duration::from_millis(133));
        assert_eq!(a[0].track_id, b[0].track_id);
        assert_eq!(b[0].track_id, c[0].track_id);
        assert_eq!(c[0].previous, Some(Point::new(150.0, 130.0)));
        assert_eq!(t.track_count(), 1);
    }

    #[test]
    fn test_distance_at_threshold_creates_new_track() {
        let mut t = tracker();
        let now = Instant::now();
        let a = t.update(&[det("person", 0.0, 0.0)], now);
        let b = t.update(&[det("person", 100.0, 0.0)], now);
        assert_ne!(a[0].track_id, b[0].track_id);
        assert_eq!(b[0].previous, None);
    }

    #[test]
    fn test_class_never_crosses() {
        let mut t = tracker();
        let now = Instant::now();
        let a = t.update(&[det("person", 10.0, 10.0)], now);
        let b = t.update(&[det("car", 10.0, 10.0)], now);
        assert_ne!(a[0].track_id, b[0].track_id);
        assert_eq!(t.track(b[0].track_id).map(|tr| tr.class.as_str()), Some("car"));
    }

    #[test]
    fn test_ids_monotonic_after_expiry() {
        let mut t = tracker();
        let now = Instant::now();
        let a = t.update(&[det("person", 10.0, 10.0)], now);
        assert_eq!(t.expire(now + Duration::from_secs(3)), 1);
        let b = t.update(&[det("person", 10.0, 10.0)], now + Duration::from_secs(3));
        assert!(b[0].track_id > a[0].track_id);
    }

    #[test]
    fn test_expire_keeps_track_at_max_age() {
        let mut t = tracker();
        let now = Instant::now();
        t.update(&[det("person", 10.0, 10.0)], now);
        assert_eq!(t.expire(now + Duration::from_secs(2)), 0);
        assert_eq!(t.expire(now + Duration::from_millis(2001)), 1);
    }

    #[test]
    fn test_tie_prefers_lowest_id() {
        let mut t = tracker();
        let now = Instant::now();
        t.update(&[det("person", 0.0, 0.0), det("person", 20.0, 0.0)], now);
        let r = t.update(&[det("person", 10.0, 0.0)], now);
        assert_eq!(r[0].track_id, 0);
    }

    #[test]
    fn test_reserved_policy_one_claim_per_tick() {
        let mut t = tracker();
        let now = Instant::now();
        t.update(&[det("person", 0.0, 0.0)], now);
        let r = t.update(&[det("person", 5.0, 0.0), det("person", 8.0, 0.0)], now);
        assert_eq!(r[0].track_id, 0);
        assert_ne!(r[1].track_id, 0);
        assert_eq!(t.track_count(), 2);
    }

    #[test]
    fn test_shared_policy_allows_duplicate_claims() {
        let mut t = tracker().with_policy(AssociationPolicy::Shared);
        let now = Instant::now();
        t.update(&[det("person", 0.0, 0.0)], now);
        let r = t.update(&[det("person", 5.0, 0.0), det("person", 8.0, 0.0)], now);
        assert_eq!(r[0].track_id, 0);
        assert_eq!(r[1].track_id, 0);
        assert_eq!(t.track_count(), 1);
    }

    #[test]
    fn test_history_ring_evicts_oldest() {
        let mut t = CentroidTracker::new(100.0, Duration::from_secs(2), 3);
        let now = Instant::now();
        for i in 0..5 {
            t.update(&[det("person", i as f32, 0.0)], now);
        }
        let track = t.track(0).unwrap();
        assert_eq!(track.history.len(), 3);
        let xs: Vec<f32> = track.history.iter().map(|p| p.x).collect();
        assert_eq!(xs, vec![2.0, 3.0, 4.0]);
    }
}
