//! 软件运行时后端: 三个并列输出
//!
//! boxes `[1, N, 4]` (ymin, xmin, ymax, xmax 归一化), classes `[1, N]`, scores `[1, N]`。

use std::time::Instant;

use ndarray::{ArrayD, Axis, Ix2, Ix3};
use tracing::warn;

use super::labels::ClassMapper;
use super::preprocess::preprocess;
use super::runner::TensorRunner;
use super::{sealed, BackendKind, InferenceBackend};
use crate::detection::{BBox, Detection, Frame, InferenceOutput};
use crate::error::{AgentError, Result};

pub struct SoftwareBackend<R: TensorRunner> {
    runner: R,
    mapper: ClassMapper,
    threshold: f32,
    errors: u64,
}

impl<R: TensorRunner> SoftwareBackend<R> {
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
        if outputs.len() < 3 {
            return Err(AgentError::malformed(format!(
                "expected 3 outputs, got {}",
                outputs.len()
            )));
        }
        parse_triplet(
            &outputs[0],
            &outputs[1],
            &outputs[2],
            &self.mapper,
            self.threshold,
            frame.width,
            frame.height,
        )
    }
}

pub fn parse_triplet(
    boxes: &ArrayD<f32>,
    classes: &ArrayD<f32>,
    scores: &ArrayD<f32>,
    mapper: &ClassMapper,
    threshold: f32,
    width: u32,
    height: u32,
) -> Result<Vec<Detection>> {
    let boxes = boxes
        .view()
        .into_dimensionality::<Ix3>()
        .map_err(|e| AgentError::malformed(format!("boxes: {}", e)))?;
    let classes = classes
        .view()
        .into_dimensionality::<Ix2>()
        .map_err(|e| AgentError::malformed(format!("classes: {}", e)))?;
    let scores = scores
        .view()
        .into_dimensionality::<Ix2>()
        .map_err(|e| AgentError::malformed(format!("scores: {}", e)))?;
    if boxes.shape()[0] == 0 || scores.shape()[0] == 0 || classes.shape()[0] == 0 {
        return Ok(Vec::new());
    }
    if boxes.shape()[2] < 4 {
        return Err(AgentError::malformed("boxes need 4 coordinates"));
    }

    let boxes = boxes.index_axis(Axis(0), 0);
    let classes = classes.index_axis(Axis(0), 0);
    let scores = scores.index_axis(Axis(0), 0);
    let n = scores.len().min(classes.len()).min(boxes.shape()[0]);

    let (w, h) = (width as f32, height as f32);
    let mut detections = Vec::new();
    for i in 0..n {
        let score = scores[i];
        if !(score > threshold) {
            continue;
        }
        let Some(class) = mapper.resolve(classes[i] as i64) else {
            continue;
        };
        let b = boxes.index_axis(Axis(0), i);
        let bbox = BBox {
            x1: b[1] * w,
            y1: b[0] * h,
            x2: b[3] * w,
            y2: b[2] * h,
        };
        detections.push(Detection::from_bbox(class, score, bbox));
    }
    Ok(detections)
}

impl<R: TensorRunner> sealed::Sealed for SoftwareBackend<R> {}

impl<R: TensorRunner> InferenceBackend for SoftwareBackend<R> {
    fn infer(&mut self, frame: &Frame) -> InferenceOutput {
        let start = Instant::now();
        match self.try_infer(frame) {
            Ok(detections) => InferenceOutput {
                detections,
                latency: start.elapsed(),
            },
            Err(e) => {
                self.errors += 1;
                warn!(frame = frame.sequence, "software inference failed: {}", e);
                InferenceOutput::empty()
            }
        }
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Software
    }

    fn error_count(&self) -> u64 {
        self.errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::Point;
    use crate::models::labels::LabelMap;
    use ndarray::{Array2, Array3};

    #[test]
    fn test_parse_triplet() {
        let mapper = ClassMapper::new(LabelMap::Positional, &["person".into(), "car".into()]);
        let boxes = Array3::from_shape_vec(
            (1, 2, 4),
            vec![0.1, 0.2, 0.3, 0.4, 0.0, 0.0, 1.0, 1.0],
        )
        .unwrap()
        .into_dyn();
        let classes = Array2::from_shape_vec((1, 2), vec![0.0, 1.0]).unwrap().into_dyn();
        let scores = Array2::from_shape_vec((1, 2), vec![0.8, 0.3]).unwrap().into_dyn();

        let dets = parse_triplet(&boxes, &classes, &scores, &mapper, 0.5, 1000, 100).unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].class.as_str(), "person");
        let c = dets[0].center;
        assert!(c.distance(&Point::new(300.0, 20.0)) < 1e-3);
        assert!((dets[0].bbox.x1 - 200.0).abs() < 1e-3);
        assert!((dets[0].bbox.y1 - 10.0).abs() < 1e-3);
    }

    #[test]
    fn test_wrong_rank_is_malformed() {
        let mapper = ClassMapper::new(LabelMap::Positional, &["person".into()]);
        let flat = Array2::<f32>::zeros((1, 4)).into_dyn();
        assert!(parse_triplet(&flat, &flat, &flat, &mapper, 0.5, 10, 10).is_err());
    }
}
