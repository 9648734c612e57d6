//! 运行时控制 (检测开关 / 后端上报目标)

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use tracing::info;

/// 自定义后端上报目标
#[derive(Clone, PartialEq)]
pub struct BackendTarget {
    pub url: String,
    pub api_key: Option<String>,
    pub report_interval: Duration,
}

impl std::fmt::Debug for BackendTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendTarget")
            .field("url", &self.url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("report_interval", &self.report_interval)
            .finish()
    }
}

/// 控制单元,可在任意线程并发读写
#[derive(Debug)]
pub struct ControlCell {
    running: AtomicBool,
    detection_active: AtomicBool,
    backend: RwLock<Option<BackendTarget>>,
}

impl ControlCell {
    pub fn new(detection_active: bool) -> Self {
        Self {
            running: AtomicBool::new(true),
            detection_active: AtomicBool::new(detection_active),
            backend: RwLock::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn is_detection_active(&self) -> bool {
        self.detection_active.load(Ordering::Acquire)
    }

    pub fn set_detection_active(&self, active: bool) {
        let was = self.detection_active.swap(active, Ordering::AcqRel);
        if was != active {
            info!(active, "detection toggled");
        }
    }

    /// 设置或清除后端目标 (`url` 为空表示清除)
    pub fn set_backend_target(&self, url: &str, api_key: Option<String>, report_interval: Duration) {
        let target = (!url.trim().is_empty()).then(|| BackendTarget {
            url: url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
            report_interval,
        });
        info!(url, report_interval_secs = report_interval.as_secs(), "backend target updated");
        *self.backend.write().unwrap_or_else(PoisonError::into_inner) = target;
    }

    pub fn backend_target(&self) -> Option<BackendTarget> {
        self.backend
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
