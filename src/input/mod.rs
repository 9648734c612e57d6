/// 帧输入系统 (Frame input)
///
/// 采集线程按目标帧率拉取帧:
/// - FrameSource:       帧来源统一接口 (摄像头硬件由外部实现)
/// - ImageFolderSource: 循环读取目录中的图片 (台架/演示)
pub mod folder;

pub use folder::ImageFolderSource;

use crate::detection::Frame;

/// 帧来源
///
/// 返回 `None` 表示暂时无帧 (采集失败等),调用方稍后重试。
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Option<Frame>;

    fn name(&self) -> &str {
        "frame-source"
    }
}
