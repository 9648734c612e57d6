//! 区域占用计数 (Zone occupancy)

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::detection::{ObjectClass, Point};

/// 区域方向语义
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
    #[default]
    Bidirectional,
}

/// 进/出计数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ZoneCounts {
    #[serde(rename = "in")]
    pub entered: u64,
    #[serde(rename = "out")]
    pub exited: u64,
}

impl ZoneCounts {
    pub fn is_zero(&self) -> bool {
        self.entered == 0 && self.exited == 0
    }
}

#[derive(Debug, Clone)]
pub struct Zone {
    name: String,
    polygon: Vec<Point>,
    direction: Direction,
    counts: BTreeMap<ObjectClass, ZoneCounts>,
}

impl Zone {
    pub fn new(name: impl Into<String>, polygon: Vec<Point>, direction: Direction) -> Self {
        Self {
            name: name.into(),
            polygon,
            direction,
            counts: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// 空多边形匹配任意点
    pub fn contains(&self, p: Point) -> bool {
        self.polygon.is_empty() || point_in_polygon(p, &self.polygon)
    }

    /// 按区域方向累加一次观测
    pub fn record(&mut self, class: &ObjectClass) {
        let c = self.counts.entry(class.clone()).or_default();
        match self.direction {
            Direction::In => c.entered += 1,
            Direction::Out => c.exited += 1,
            Direction::Bidirectional => {
                c.entered += 1;
                c.exited += 1;
            }
        }
    }

    pub fn counts(&self) -> &BTreeMap<ObjectClass, ZoneCounts> {
        &self.counts
    }

    /// 清零,并为每个配置类别保留一个零值计数
    pub fn reset(&mut self, classes: &[ObjectClass]) {
        self.counts.clear();
        for class in classes {
            self.counts.insert(class.clone(), ZoneCounts::default());
        }
    }
}

/// 射线法判断点是否在多边形内
pub fn point_in_polygon(p: Point, polygon: &[Point]) -> bool {
    let n = polygon.len();
    if n < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (pi, pj) = (polygon[i], polygon[j]);
        if (pi.y > p.y) != (pj.y > p.y) && p.x < (pj.x - pi.x) * (p.y - pi.y) / (pj.y - pi.y) + pi.x
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}
