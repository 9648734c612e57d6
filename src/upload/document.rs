//! 文档存储上传 `PUT {base}/cameras/{cameraId}/counts/{docId}`

use std::time::Duration;

use tracing::debug;

use super::{http_error, Delivery, TelemetrySink};
use crate::buffer::BufferedRecord;
use crate::error::Result;

pub const SINK_NAME: &str = "document";

pub struct DocumentSink {
    base_url: Option<String>,
    token: Option<String>,
    agent: ureq::Agent,
}

impl DocumentSink {
    pub fn new(base_url: Option<String>, token: Option<String>, timeout: Duration) -> Self {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty());
        Self {
            base_url,
            token: token.filter(|t| !t.is_empty()),
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }

    /// 同一时间戳总是写到同一文档
    pub fn document_url(base: &str, record: &BufferedRecord) -> String {
        format!(
            "{}/cameras/{}/counts/{}",
            base,
            record.snapshot.camera_id,
            record.snapshot.document_id()
        )
    }
}

impl TelemetrySink for DocumentSink {
    fn name(&self) -> &str {
        SINK_NAME
    }

    fn is_enabled(&self) -> bool {
        self.base_url.is_some()
    }

    fn deliver(&mut self, record: &BufferedRecord) -> Result<Delivery> {
        let Some(base) = self.base_url.as_deref() else {
            return Ok(Delivery::Skipped);
        };
        let url = Self::document_url(base, record);
        let mut req = self.agent.put(&url);
        if let Some(token) = &self.token {
            req = req.set("Authorization", &format!("Bearer {}", token));
        }
        let body = serde_json::to_value(&record.snapshot)?;
        req.send_json(body).map_err(|e| http_error(SINK_NAME, e))?;
        debug!(id = record.id, url, "document written");
        Ok(Delivery::Acknowledged)
    }
}
