use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 计数系统数据结构定义
/// Data structures for the counting pipeline

// ========== 数据结构 ==========

/// 目标类别 (Object class label)
///
/// 类别名在配置加载后不再变化,克隆只增加引用计数。
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectClass(Arc<str>);

impl ObjectClass {
    pub fn new(name: &str) -> Self {
        Self(Arc::from(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ObjectClass {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for ObjectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ObjectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

/// 像素坐标点
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

impl From<[f32; 2]> for Point {
    fn from(p: [f32; 2]) -> Self {
        Self::new(p[0], p[1])
    }
}

/// 检测框 (Detection bounding box, 像素坐标)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn center(&self) -> Point {
        Point::new((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }
}

/// 单个检测结果 (推理线程 → 计数线程)
#[derive(Clone, Debug)]
pub struct Detection {
    pub class: ObjectClass,
    pub confidence: f32,
    pub bbox: BBox,
    pub center: Point,
}

impl Detection {
    /// 以检测框中心构造
    pub fn from_bbox(class: ObjectClass, confidence: f32, bbox: BBox) -> Self {
        Self {
            class,
            confidence,
            center: bbox.center(),
            bbox,
        }
    }
}

/// 采集帧 (采集线程 → 推理线程)
#[derive(Clone)]
pub struct Frame {
    pub rgb_data: Arc<Vec<u8>>, // RGB8, 行优先
    pub width: u32,
    pub height: u32,
    pub captured_at: Instant,
    pub sequence: u64,
}

impl Frame {
    pub fn new(rgb_data: Vec<u8>, width: u32, height: u32, sequence: u64) -> Self {
        Self {
            rgb_data: Arc::new(rgb_data),
            width,
            height,
            captured_at: Instant::now(),
            sequence,
        }
    }

    /// 数据长度与尺寸一致
    pub fn is_well_formed(&self) -> bool {
        self.rgb_data.len() == (self.width as usize) * (self.height as usize) * 3
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .finish()
    }
}

/// 推理结果
#[derive(Clone, Debug, Default)]
pub struct InferenceOutput {
    pub detections: Vec<Detection>,
    pub latency: Duration,
}

impl InferenceOutput {
    /// 输出异常时的空结果 (零延迟)
    pub fn empty() -> Self {
        Self::default()
    }
}

/// 检测批次 (推理线程 → 计数线程)
#[derive(Clone, Debug)]
pub struct DetectionBatch {
    pub frame_sequence: u64,
    pub detections: Vec<Detection>,
    pub observed_at: Instant,
    pub inference_ms: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbox_center() {
        let bbox = BBox {
            x1: 10.0,
            y1: 20.0,
            x2: 30.0,
            y2: 60.0,
        };
        assert_eq!(bbox.center(), Point::new(20.0, 40.0));
    }

    #[test]
    fn test_object_class_ordering_and_display() {
        let mut classes = vec![ObjectClass::new("person"), ObjectClass::new("car")];
        classes.sort();
        assert_eq!(classes[0].as_str(), "car");
        assert_eq!(format!("{}", classes[1]), "person");
    }

    #[test]
    fn test_frame_shape() {
        let frame = Frame::new(vec![0; 4 * 2 * 3], 4, 2, 7);
        assert!(frame.is_well_formed());
        let bad = Frame::new(vec![0; 5], 4, 2, 8);
        assert!(!bad.is_well_formed());
    }

    #[test]
    fn test_empty_output_has_zero_latency() {
        let out = InferenceOutput::empty();
        assert!(out.detections.is_empty());
        assert_eq!(out.latency, Duration::ZERO);
    }
}
