//! 预处理: RGB 帧 → NHWC 输入张量

use image::{imageops, RgbImage};
use ndarray::Array4;

use super::runner::{InputDType, InputSpec, InputTensor};
use crate::detection::Frame;
use crate::error::{AgentError, Result};

/// 缩放到模型输入尺寸。u8 模型直接送 0-255;浮点模型归一化到 [-1, 1]。
pub fn preprocess(frame: &Frame, spec: InputSpec) -> Result<InputTensor> {
    if !frame.is_well_formed() {
        return Err(AgentError::malformed(format!(
            "frame {} has {} bytes for {}x{}",
            frame.sequence,
            frame.rgb_data.len(),
            frame.width,
            frame.height
        )));
    }

    let resized = if frame.width == spec.width && frame.height == spec.height {
        frame.rgb_data.as_ref().clone()
    } else {
        let img = RgbImage::from_raw(frame.width, frame.height, frame.rgb_data.as_ref().clone())
            .ok_or_else(|| AgentError::malformed("RGB图像转换失败"))?;
        imageops::resize(&img, spec.width, spec.height, imageops::FilterType::Triangle).into_raw()
    };

    let shape = (1, spec.height as usize, spec.width as usize, 3);
    let tensor = match spec.dtype {
        InputDType::U8 => InputTensor::U8(
            Array4::from_shape_vec(shape, resized).map_err(|e| AgentError::malformed(e.to_string()))?,
        ),
        InputDType::F32 => {
            let data: Vec<f32> = resized.iter().map(|&v| (v as f32 - 127.5) / 127.5).collect();
            InputTensor::F32(
                Array4::from_shape_vec(shape, data)
                    .map_err(|e| AgentError::malformed(e.to_string()))?,
            )
        }
    };
    Ok(tensor)
}
