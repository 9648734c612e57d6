//! 张量执行器 (ONNX Runtime)
//!
//! 后端只关心 "输入张量 → 输出张量",具体执行交给 `TensorRunner`。

use anyhow::{Context, Result};
use ndarray::{Array4, ArrayD};
use ort::execution_providers::CUDAExecutionProvider;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::tensor::TensorElementType;
use ort::value::Tensor;
use tracing::info;

use crate::error::AgentError;

/// 输入数据类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputDType {
    U8,
    F32,
}

/// 模型输入规格 (NHWC)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputSpec {
    pub width: u32,
    pub height: u32,
    pub dtype: InputDType,
}

/// NHWC 输入张量
#[derive(Debug, Clone)]
pub enum InputTensor {
    U8(Array4<u8>),
    F32(Array4<f32>),
}

/// 执行设备
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cpu,
    /// GPU 加速,注册失败即报错 (不回退到 CPU)
    Gpu(i32),
}

pub trait TensorRunner: Send {
    fn input_spec(&self) -> InputSpec;

    fn output_count(&self) -> usize;

    fn run(&mut self, input: InputTensor) -> Result<Vec<ArrayD<f32>>>;
}

pub struct OrtRunner {
    session: Session,
    input_name: String,
    output_names: Vec<String>,
    spec: InputSpec,
}

impl OrtRunner {
    pub fn new(
        model_path: &std::path::Path,
        device: Device,
        width: u32,
        height: u32,
    ) -> crate::error::Result<Self> {
        if !model_path.exists() {
            return Err(AgentError::ModelNotFound(model_path.display().to_string()));
        }

        let builder = Session::builder()
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .map_err(|e| AgentError::ModelLoad(e.to_string()))?;
        let builder = match device {
            Device::Cpu => builder,
            Device::Gpu(id) => builder
                .with_execution_providers([CUDAExecutionProvider::default()
                    .with_device_id(id)
                    .build()
                    .error_on_failure()])
                .map_err(|e| AgentError::BackendUnavailable(format!("CUDA provider: {}", e)))?,
        };
        let session = builder
            .commit_from_file(model_path)
            .map_err(|e| AgentError::ModelLoad(format!("{}: {}", model_path.display(), e)))?;

        let input = session
            .inputs
            .first()
            .ok_or_else(|| AgentError::ModelLoad("model has no inputs".into()))?;
        let dtype = match input.input_type.tensor_type() {
            Some(TensorElementType::Uint8) => InputDType::U8,
            _ => InputDType::F32,
        };
        let input_name = input.name.clone();
        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();

        info!(
            model = %model_path.display(),
            ?device,
            ?dtype,
            outputs = output_names.len(),
            "model loaded"
        );

        Ok(Self {
            session,
            input_name,
            output_names,
            spec: InputSpec {
                width,
                height,
                dtype,
            },
        })
    }
}

impl TensorRunner for OrtRunner {
    fn input_spec(&self) -> InputSpec {
        self.spec
    }

    fn output_count(&self) -> usize {
        self.output_names.len()
    }

    fn run(&mut self, input: InputTensor) -> Result<Vec<ArrayD<f32>>> {
        let outputs = match input {
            InputTensor::U8(a) => {
                let t = Tensor::from_array(a).context("failed to create u8 input tensor")?;
                self.session
                    .run(ort::inputs![self.input_name.as_str() => t])
                    .context("inference failed")?
            }
            InputTensor::F32(a) => {
                let t = Tensor::from_array(a).context("failed to create f32 input tensor")?;
                self.session
                    .run(ort::inputs![self.input_name.as_str() => t])
                    .context("inference failed")?
            }
        };

        self.output_names
            .iter()
            .map(|name| {
                let view = outputs[name.as_str()]
                    .try_extract_array::<f32>()
                    .with_context(|| format!("failed to extract output {}", name))?;
                Ok(view.into_owned())
            })
            .collect()
    }
}
