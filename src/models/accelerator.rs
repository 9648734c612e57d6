//! 加速器后端: 单一融合输出 `[batch, N, 6+]`
//!
//! 每行 `[xc, yc, w, h, conf, class_id, ...]`,坐标为归一化值。

use std::time::Instant;

use ndarray::{ArrayD, Axis};
use tracing::warn;

use super::labels::ClassMapper;
use super::preprocess::preprocess;
use super::runner::TensorRunner;
use super::{sealed, BackendKind, InferenceBackend};
use crate::detection::{BBox, Detection, Frame, InferenceOutput, Point};
use crate::error::{AgentError, Result};

pub struct AcceleratorBackend<R: TensorRunner> {
    runner: R,
    mapper: ClassMapper,
    threshold: f32,
    errors: u64,
}

impl<R: TensorRunner> AcceleratorBackend<R> {
    pub fn new(runner: R, mapper: ClassMapper, threshold: f32) -> Self {
        Self {
            runner,
            mapper,
            threshold,
            errors: 0,
        }
    }

    fn try_infer(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let input = preprocess(frame, self.runner.input_spec())?;
        let outputs = self
            .runner
            .run(input)
            .map_err(|e| AgentError::malformed(format!("{:#}", e)))?;
        let fused = outputs
            .first()
            .ok_or_else(|| AgentError::malformed("no output tensor"))?;
        parse_fused(fused, &self.mapper, self.threshold, frame.width, frame.height)
    }
}

/// 解析融合输出,坐标换算到原图像素
pub fn parse_fused(
    output: &ArrayD<f32>,
    mapper: &ClassMapper,
    threshold: f32,
    width: u32,
    height: u32,
) -> Result<Vec<Detection>> {
    let shape = output.shape();
    if shape.len() != 3 || shape[2] < 6 {
        return Err(AgentError::malformed(format!(
            "expected [batch, N, 6+], got {:?}",
            shape
        )));
    }
    if shape[0] == 0 {
        return Ok(Vec::new());
    }

    let (w, h) = (width as f32, height as f32);
    let batch = output.index_axis(Axis(0), 0);
    let mut detections = Vec::new();
    for row in batch.outer_iter() {
        let conf = row[4];
        if !(conf > threshold) {
            continue;
        }
        let Some(class) = mapper.resolve(row[5] as i64) else {
            continue;
        };

        let xc = row[0] * w;
        let yc = row[1] * h;
        let bw = row[2] * w;
        let bh = row[3] * h;
        let bbox = BBox {
            x1: (xc - bw / 2.0).max(0.0),
            y1: (yc - bh / 2.0).max(0.0),
            x2: (xc + bw / 2.0).min(w),
            y2: (yc + bh / 2.0).min(h),
        };
        detections.push(Detection {
            class,
            confidence: conf,
            bbox,
            center: Point::new(xc, yc),
        });
    }
    Ok(detections)
}

impl<R: TensorRunner> sealed::Sealed for AcceleratorBackend<R> {}

impl<R: TensorRunner> InferenceBackend for AcceleratorBackend<R> {
    fn infer(&mut self, frame: &Frame) -> InferenceOutput {
        let start = Instant::now();
        match self.try_infer(frame) {
            Ok(detections) => InferenceOutput {
                detections,
                latency: start.elapsed(),
            },
            Err(e) => {
                self.errors += 1;
                warn!(frame = frame.sequence, "accelerator inference failed: {}", e);
                InferenceOutput::empty()
            }
        }
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Accelerator
    }

    fn error_count(&self) -> u64 {
        self.errors
    }
}
