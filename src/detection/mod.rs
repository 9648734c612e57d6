/// 检测数据与跟踪 (Detection data & tracking)
///
/// - types:   帧/检测/推理结果等跨线程数据
/// - tracker: 最近质心跟踪器
pub mod tracker;
pub mod types;

pub use tracker::{
    AssociationPolicy, CentroidTracker, PositionHistory, Track, TrackedDetection, Tracker,
};
pub use types::{BBox, Detection, DetectionBatch, Frame, InferenceOutput, ObjectClass, Point};
