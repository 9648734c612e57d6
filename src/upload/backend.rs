//! 自定义后端上报 `POST {url}/api/detection/counts`

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use super::{http_error, Delivery, TelemetrySink};
use crate::buffer::BufferedRecord;
use crate::error::Result;
use crate::pipeline::control::{BackendTarget, ControlCell};

pub const SINK_NAME: &str = "backend";

pub struct BackendSink {
    control: Arc<ControlCell>,
    agent: ureq::Agent,
    last_report: Option<Instant>,
}

impl BackendSink {
    pub fn new(control: Arc<ControlCell>, timeout: Duration) -> Self {
        Self {
            control,
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            last_report: None,
        }
    }

    /// 距上次成功上报不足 `report_interval` 时限流
    fn throttled(&self, target: &BackendTarget, now: Instant) -> bool {
        self.last_report
            .is_some_and(|last| now.saturating_duration_since(last) < target.report_interval)
    }
}

impl TelemetrySink for BackendSink {
    fn name(&self) -> &str {
        SINK_NAME
    }

    fn is_enabled(&self) -> bool {
        self.control.backend_target().is_some()
    }

    fn deliver(&mut self, record: &BufferedRecord) -> Result<Delivery> {
        let Some(target) = self.control.backend_target() else {
            return Ok(Delivery::Skipped);
        };
        let now = Instant::now();
        if self.throttled(&target, now) {
            debug!(id = record.id, "backend report throttled");
            return Ok(Delivery::Skipped);
        }

        let url = format!("{}/api/detection/counts", target.url);
        let mut req = self
            .agent
            .post(&url)
            .set("Content-Type", "application/json");
        if let Some(key) = &target.api_key {
            req = req
                .set("Authorization", &format!("Bearer {}", key))
                .set("X-API-Key", key);
        }
        req.send_json(record.snapshot.backend_payload())
            .map_err(|e| http_error(SINK_NAME, e))?;
        self.last_report = Some(now);
        debug!(id = record.id, url, "sent counts to backend");
        Ok(Delivery::Acknowledged)
    }
}
