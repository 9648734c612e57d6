//! 摄像头在线状态上报 `PATCH {base}/cameras/{cameraId}`

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tracing::debug;

use super::http_error;
use crate::error::Result;
use crate::pipeline::StatusSnapshot;

const REPORTER_NAME: &str = "status";

/// 摄像头文档中由代理维护的字段
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraStatus {
    pub status: String,
    pub last_seen: String,
    pub frame_count: u64,
    pub fps: f64,
    pub detection_active: bool,
    pub pending_records: usize,
    pub error_count: u64,
    pub uptime_seconds: f64,
}

impl CameraStatus {
    pub fn online(snapshot: &StatusSnapshot, now: DateTime<Utc>) -> Self {
        Self {
            status: "online".to_string(),
            last_seen: now.to_rfc3339_opts(SecondsFormat::Millis, true),
            frame_count: snapshot.total_frames_processed,
            fps: snapshot.fps,
            detection_active: snapshot.detection_active,
            pending_records: snapshot.pending_records,
            error_count: snapshot.error_count,
            uptime_seconds: snapshot.uptime_seconds,
        }
    }
}

/// 状态上报接口。失败只记录,不重试 (下一次心跳会覆盖)
pub trait StatusReporter: Send {
    fn is_enabled(&self) -> bool;

    fn report(&mut self, status: &CameraStatus) -> Result<()>;
}

/// 通过文档存储更新摄像头文档 (合并写入)
pub struct DocumentStatusReporter {
    url: Option<String>,
    token: Option<String>,
    agent: ureq::Agent,
}

impl DocumentStatusReporter {
    pub fn new(
        base_url: Option<String>,
        token: Option<String>,
        camera_id: &str,
        timeout: Duration,
    ) -> Self {
        let url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .map(|base| Self::camera_url(&base, camera_id));
        Self {
            url,
            token: token.filter(|t| !t.is_empty()),
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }

    pub fn camera_url(base: &str, camera_id: &str) -> String {
        format!("{}/cameras/{}", base, camera_id)
    }
}

impl StatusReporter for DocumentStatusReporter {
    fn is_enabled(&self) -> bool {
        self.url.is_some()
    }

    fn report(&mut self, status: &CameraStatus) -> Result<()> {
        let Some(url) = self.url.as_deref() else {
            return Ok(());
        };
        let mut req = self.agent.request("PATCH", url);
        if let Some(token) = &self.token {
            req = req.set("Authorization", &format!("Bearer {}", token));
        }
        let body = serde_json::to_value(status)?;
        req.send_json(body)
            .map_err(|e| http_error(REPORTER_NAME, e))?;
        debug!(url, frames = status.frame_count, "camera status updated");
        Ok(())
    }
}
