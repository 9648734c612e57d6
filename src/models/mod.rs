/// 推理后端统一接口与实现
///
/// # 架构说明
///
/// 两种后端,启动时选定其一,运行期间不切换:
/// - **Accelerator**: GPU 执行,单一融合输出 `[batch, N, 6+]`
///   - 文件: `accelerator.rs`
/// - **Software**: CPU 执行,三个并列输出 (boxes / classes / scores)
///   - 文件: `software.rs`
///
/// 张量执行由 `TensorRunner` 负责 (`runner.rs`),
/// 后端只做预处理 (`preprocess.rs`) 与输出解析。
///
/// ## 核心流程
/// ```text
/// 原始帧 → preprocess → NHWC 张量
///          ↓
///     TensorRunner::run
///          ↓
///     原始输出 → parse → 检测结果 (像素坐标)
/// ```
pub mod accelerator;
pub mod labels;
pub mod preprocess;
pub mod runner;
pub mod software;

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::info;

pub use accelerator::AcceleratorBackend;
pub use labels::{ClassMapper, LabelMap, COCO_CLASSES};
pub use runner::{Device, InputDType, InputSpec, InputTensor, OrtRunner, TensorRunner};
pub use software::SoftwareBackend;

use crate::config::DetectionConfig;
use crate::detection::{Frame, InferenceOutput};
use crate::error::{AgentError, Result};

pub(crate) mod sealed {
    pub trait Sealed {}
}

/// 后端种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Accelerator,
    Software,
}

impl BackendKind {
    /// 按模型输出个数推断: 1 个融合输出为加速器模型,3 个为软件运行时模型
    pub fn from_output_arity(n: usize) -> Option<Self> {
        match n {
            1 => Some(Self::Accelerator),
            3 => Some(Self::Software),
            _ => None,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accelerator => write!(f, "accelerator"),
            Self::Software => write!(f, "software"),
        }
    }
}

/// 配置中的后端选择
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendChoice {
    #[default]
    Auto,
    Accelerator,
    Software,
}

/// 推理后端: 一帧 → 检测列表 + 耗时
///
/// 输出异常时返回空列表与零耗时,不向上传播错误。
pub trait InferenceBackend: sealed::Sealed + Send {
    fn infer(&mut self, frame: &Frame) -> InferenceOutput;

    fn kind(&self) -> BackendKind;

    /// 累计的单帧失败次数
    fn error_count(&self) -> u64;
}

/// 用给定执行器构造指定种类的后端,输出个数不符即失败
pub fn build_backend<R: TensorRunner + 'static>(
    kind: BackendKind,
    runner: R,
    mapper: ClassMapper,
    threshold: f32,
) -> Result<Box<dyn InferenceBackend>> {
    let outputs = runner.output_count();
    match kind {
        BackendKind::Accelerator if outputs >= 1 => {
            Ok(Box::new(AcceleratorBackend::new(runner, mapper, threshold)))
        }
        BackendKind::Software if outputs >= 3 => {
            Ok(Box::new(SoftwareBackend::new(runner, mapper, threshold)))
        }
        _ => Err(AgentError::BackendUnavailable(format!(
            "{} backend cannot use a model with {} outputs",
            kind, outputs
        ))),
    }
}

/// 按配置加载模型并选定后端。失败为启动期致命错误。
pub fn open_backend(cfg: &DetectionConfig) -> Result<Box<dyn InferenceBackend>> {
    let mapper = ClassMapper::new(cfg.label_map, &cfg.object_classes);
    let (w, h) = (cfg.input_width, cfg.input_height);
    let path = cfg.model_path.as_path();

    let (kind, runner) = match cfg.backend {
        BackendChoice::Accelerator => (
            BackendKind::Accelerator,
            OrtRunner::new(path, Device::Gpu(cfg.device_id), w, h)?,
        ),
        BackendChoice::Software => (BackendKind::Software, OrtRunner::new(path, Device::Cpu, w, h)?),
        BackendChoice::Auto => {
            let probe = OrtRunner::new(path, Device::Cpu, w, h)?;
            let kind = BackendKind::from_output_arity(probe.output_count()).ok_or_else(|| {
                AgentError::BackendUnavailable(format!(
                    "cannot infer backend from {} model outputs",
                    probe.output_count()
                ))
            })?;
            match kind {
                BackendKind::Accelerator => {
                    drop(probe);
                    (kind, OrtRunner::new(path, Device::Gpu(cfg.device_id), w, h)?)
                }
                BackendKind::Software => (kind, probe),
            }
        }
    };

    let backend = build_backend(kind, runner, mapper, cfg.confidence_threshold)?;
    info!(backend = %kind, "inference backend ready");
    Ok(backend)
}
