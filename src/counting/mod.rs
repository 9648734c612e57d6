/// 计数系统 (Counting)
///
/// - line:   越线计数,每条线每个轨迹最多一次
/// - zone:   区域占用计数,按方向累加
/// - engine: 组合二者,输出扁平化的窗口计数
pub mod engine;
pub mod line;
pub mod zone;

pub use engine::{CountingEngine, DEFAULT_ZONE, UNZONED};
pub use line::LineCounter;
pub use zone::{point_in_polygon, Direction, Zone, ZoneCounts};
