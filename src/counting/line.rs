//! 越线计数 (Line crossing)

use std::collections::{BTreeMap, HashSet};

use crate::detection::{ObjectClass, Point};

/// 计数线: 轨迹从线的一侧移动到另一侧时计数一次
///
/// 判断基于无限长直线的有向面积符号,不做线段端点裁剪。
#[derive(Debug, Clone)]
pub struct LineCounter {
    name: String,
    start: Point,
    end: Point,
    /// 已越线且仍存活的轨迹ID
    crossed_ids: HashSet<u64>,
    /// 进程生命周期累计
    lifetime: BTreeMap<ObjectClass, u64>,
    /// 当前聚合窗口内
    window: BTreeMap<ObjectClass, u64>,
}

impl LineCounter {
    pub fn new(name: impl Into<String>, start: Point, end: Point) -> Self {
        Self {
            name: name.into(),
            start,
            end,
            crossed_ids: HashSet::new(),
            lifetime: BTreeMap::new(),
            window: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 点相对于直线的有向面积 (正负号表示所在侧)
    fn side(&self, p: Point) -> f32 {
        let lx = self.end.x - self.start.x;
        let ly = self.end.y - self.start.y;
        lx * (p.y - self.start.y) - ly * (p.x - self.start.x)
    }

    /// 轨迹从 `prev` 移动到 `curr` 是否首次越过本线。
    /// 同一轨迹在同一条线上最多返回一次 true。
    pub fn check_crossing(
        &mut self,
        track_id: u64,
        prev: Point,
        curr: Point,
        class: &ObjectClass,
    ) -> bool {
        if self.crossed_ids.contains(&track_id) {
            return false;
        }
        if self.side(prev) * self.side(curr) >= 0.0 {
            return false;
        }
        self.crossed_ids.insert(track_id);
        *self.lifetime.entry(class.clone()).or_insert(0) += 1;
        *self.window.entry(class.clone()).or_insert(0) += 1;
        true
    }

    pub fn has_crossed(&self, track_id: u64) -> bool {
        self.crossed_ids.contains(&track_id)
    }

    /// 丢弃已过期轨迹的越线记录。轨迹ID不复用,过期轨迹不会再出现。
    pub fn retain_tracks(&mut self, live: impl Fn(u64) -> bool) {
        self.crossed_ids.retain(|id| live(*id));
    }

    pub fn lifetime_counts(&self) -> &BTreeMap<ObjectClass, u64> {
        &self.lifetime
    }

    pub fn total(&self) -> u64 {
        self.lifetime.values().sum()
    }

    /// 取出并清空窗口计数 (累计计数与已越线集合保留)
    pub fn take_window(&mut self) -> BTreeMap<ObjectClass, u64> {
        std::mem::take(&mut self.window)
    }

    /// 显式重置: 清空已越线集合与全部计数
    pub fn reset(&mut self) {
        self.crossed_ids.clear();
        self.lifetime.clear();
        self.window.clear();
    }
}
