//! 代理配置参数 (Agent configuration)
//!
//! 设备上的 `config.json` 与命令行参数。文件布局沿用设备端约定
//! (`cameraId` / `siteId` / `orgId` / `detectionConfig` / `transmissionConfig`),
//! 其余分组均有默认值。

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::counting::Direction;
use crate::detection::AssociationPolicy;
use crate::error::{AgentError, Result};
use crate::models::{BackendChoice, LabelMap};

/// 命令行参数
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "边缘目标计数代理 (edge object counter)", long_about = None)]
pub struct Args {
    /// 配置文件路径
    #[arg(short, long, default_value = "/opt/camera-agent/config/config.json")]
    pub config: PathBuf,

    /// 帧来源目录 (循环读取其中的图片)
    #[arg(short, long)]
    pub source: Option<PathBuf>,

    /// 启动后立即开始检测 (覆盖 apiConfig.autoStart)
    #[arg(long)]
    pub auto_start: bool,

    /// 日志级别 (RUST_LOG 优先)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// 状态日志间隔 (秒)
    #[arg(long, default_value_t = 60)]
    pub status_interval: u64,

    /// 自定义后端上报地址 (可选)
    #[arg(long)]
    pub backend_url: Option<String>,

    /// 后端 API Key
    #[arg(long)]
    pub backend_api_key: Option<String>,

    /// 后端上报最小间隔 (秒)
    #[arg(long, default_value_t = 60)]
    pub report_interval: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    pub camera_id: String,
    pub site_id: String,
    pub org_id: String,
    pub detection_config: DetectionConfig,
    #[serde(default)]
    pub transmission_config: TransmissionConfig,
    #[serde(default)]
    pub tracker_config: TrackerConfig,
    #[serde(default)]
    pub pipeline_config: PipelineConfig,
    #[serde(default)]
    pub storage_config: StorageConfig,
    #[serde(default)]
    pub sink_config: SinkConfig,
    #[serde(default)]
    pub api_config: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionConfig {
    pub model_path: PathBuf,
    #[serde(default = "default_object_classes")]
    pub object_classes: Vec<String>,
    #[serde(default = "default_confidence")]
    pub confidence_threshold: f32,
    #[serde(default)]
    pub detection_zones: Vec<ZoneConfig>,
    #[serde(default)]
    pub counting_lines: Vec<LineConfig>,
    #[serde(default)]
    pub backend: BackendChoice,
    #[serde(default)]
    pub label_map: LabelMap,
    #[serde(default = "default_input_size")]
    pub input_width: u32,
    #[serde(default = "default_input_size")]
    pub input_height: u32,
    /// 加速器设备编号
    #[serde(default)]
    pub device_id: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneConfig {
    pub name: String,
    #[serde(default)]
    pub polygon: Vec<[f32; 2]>,
    #[serde(default)]
    pub direction: Direction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineConfig {
    #[serde(default = "default_line_name")]
    pub name: String,
    pub coords: Vec<[f32; 2]>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransmissionConfig {
    /// 聚合窗口 (秒)
    #[serde(default = "default_aggregation_interval")]
    pub aggregation_interval: u64,
    /// 单次重试扫描的最大记录数
    #[serde(default = "default_retry_batch")]
    pub retry_batch_size: usize,
    /// 网络请求超时 (毫秒)
    #[serde(default = "default_timeout_ms")]
    pub timeout: u64,
    /// 摄像头在线状态上报间隔 (秒)
    #[serde(default = "default_status_update_interval")]
    pub status_update_interval: u64,
}

impl Default for TransmissionConfig {
    fn default() -> Self {
        Self {
            aggregation_interval: default_aggregation_interval(),
            retry_batch_size: default_retry_batch(),
            timeout: default_timeout_ms(),
            status_update_interval: default_status_update_interval(),
        }
    }
}

impl TransmissionConfig {
    pub fn aggregation_window(&self) -> Duration {
        Duration::from_secs(self.aggregation_interval.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout.max(1))
    }

    pub fn status_update_every(&self) -> Duration {
        Duration::from_secs(self.status_update_interval.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerConfig {
    #[serde(default = "default_max_distance")]
    pub max_distance: f32,
    /// 轨迹过期时间 (秒)
    #[serde(default = "default_max_age")]
    pub max_age: f64,
    #[serde(default = "default_history_len")]
    pub history_len: usize,
    #[serde(default)]
    pub association: AssociationPolicy,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_distance: default_max_distance(),
            max_age: default_max_age(),
            history_len: default_history_len(),
            association: AssociationPolicy::default(),
        }
    }
}

impl TrackerConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs_f64(self.max_age.max(0.0))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    #[serde(default = "default_frame_queue")]
    pub frame_queue: usize,
    #[serde(default = "default_detection_queue")]
    pub detection_queue: usize,
    #[serde(default = "default_upload_queue")]
    pub upload_queue: usize,
    #[serde(default = "default_fps_target")]
    pub fps_target: u32,
    /// 阻塞等待超时 (毫秒)
    #[serde(default = "default_poll_ms")]
    pub poll_timeout: u64,
    /// 关闭时等待工作线程的宽限期 (秒)
    #[serde(default = "default_grace_secs")]
    pub shutdown_grace: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_queue: default_frame_queue(),
            detection_queue: default_detection_queue(),
            upload_queue: default_upload_queue(),
            fps_target: default_fps_target(),
            poll_timeout: default_poll_ms(),
            shutdown_grace: default_grace_secs(),
        }
    }
}

impl PipelineConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout.max(1))
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps_target.max(1) as f64)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// 已送达记录的保留天数
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            retention_days: default_retention_days(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SinkConfig {
    /// 文档存储 REST 根地址 (为空则不启用)
    #[serde(default)]
    pub document_store_url: Option<String>,
    #[serde(default)]
    pub document_store_token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    #[serde(default)]
    pub auto_start: bool,
}

impl AgentConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: AgentConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("cameraId", &self.camera_id),
            ("siteId", &self.site_id),
            ("orgId", &self.org_id),
        ] {
            if value.trim().is_empty() {
                return Err(AgentError::config(format!("missing required field: {field}")));
            }
        }

        let det = &self.detection_config;
        if !(0.0..=1.0).contains(&det.confidence_threshold) {
            return Err(AgentError::config(format!(
                "confidenceThreshold out of range: {}",
                det.confidence_threshold
            )));
        }
        if det.object_classes.is_empty() {
            return Err(AgentError::config("objectClasses must not be empty"));
        }
        for zone in &det.detection_zones {
            if !zone.polygon.is_empty() && zone.polygon.len() < 3 {
                return Err(AgentError::config(format!(
                    "zone {} polygon needs at least 3 vertices",
                    zone.name
                )));
            }
        }
        for line in &det.counting_lines {
            if line.coords.len() != 2 {
                return Err(AgentError::config(format!(
                    "line {} needs exactly 2 endpoints",
                    line.name
                )));
            }
        }
        Ok(())
    }

    /// 本地缓冲日志文件 `{dataDir}/{cameraId}.journal`
    pub fn journal_path(&self) -> PathBuf {
        self.storage_config
            .data_dir
            .join(format!("{}.journal", self.camera_id))
    }
}

fn default_object_classes() -> Vec<String> {
    vec!["person".into(), "vehicle".into(), "forklift".into()]
}

fn default_confidence() -> f32 {
    0.5
}

fn default_input_size() -> u32 {
    640
}

fn default_line_name() -> String {
    "line".into()
}

fn default_aggregation_interval() -> u64 {
    300
}

fn default_retry_batch() -> usize {
    10
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_status_update_interval() -> u64 {
    60
}

fn default_max_distance() -> f32 {
    100.0
}

fn default_max_age() -> f64 {
    2.0
}

fn default_history_len() -> usize {
    10
}

fn default_frame_queue() -> usize {
    30
}

fn default_detection_queue() -> usize {
    100
}

fn default_upload_queue() -> usize {
    1000
}

fn default_fps_target() -> u32 {
    15
}

fn default_poll_ms() -> u64 {
    1000
}

fn default_grace_secs() -> u64 {
    2
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/camera_agent")
}

fn default_retention_days() -> u32 {
    30
}
