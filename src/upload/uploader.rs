//! 上传器: 新记录优先,空闲时按时间顺序重试,遇到第一次失败即停止本轮扫描

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::{Delivery, TelemetrySink};
use crate::buffer::{BufferedRecord, DeliveryStatus, DurableBuffer};
use crate::error::Result;

/// 连续失败后的重试间隔: 1s, 2s, 4s ... 最长 60s
pub fn retry_delay(consecutive_failures: u32) -> Duration {
    let secs = 1u64 << consecutive_failures.min(6);
    Duration::from_secs(secs.min(60))
}

/// 一轮重试扫描的结果
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RetryReport {
    pub scanned: usize,
    pub delivered: usize,
    /// 导致本轮中止的记录
    pub stopped_at: Option<u64>,
}

pub struct Uploader {
    buffer: Arc<DurableBuffer>,
    sinks: Vec<Box<dyn TelemetrySink>>,
    retry_batch: usize,
    consecutive_failures: u32,
    next_retry_at: Option<Instant>,
}

impl Uploader {
    pub fn new(
        buffer: Arc<DurableBuffer>,
        sinks: Vec<Box<dyn TelemetrySink>>,
        retry_batch: usize,
    ) -> Self {
        Self {
            buffer,
            sinks,
            retry_batch: retry_batch.max(1),
            consecutive_failures: 0,
            next_retry_at: None,
        }
    }

    pub fn buffer(&self) -> &Arc<DurableBuffer> {
        &self.buffer
    }

    pub fn sink_names(&self) -> Vec<String> {
        self.sinks.iter().map(|s| s.name().to_string()).collect()
    }

    /// 投递一条记录到所有已启用且尚未确认的目标。
    /// 任一目标失败即返回错误 (失败已记入重试元数据)。
    pub fn deliver(&mut self, record: &BufferedRecord) -> Result<DeliveryStatus> {
        if !record.is_pending() {
            return Ok(DeliveryStatus::Delivered);
        }
        let required: Vec<String> = self
            .sinks
            .iter()
            .filter(|s| s.is_enabled())
            .map(|s| s.name().to_string())
            .collect();
        if required.is_empty() {
            debug!(id = record.id, "no sink enabled, record stays pending");
            return Ok(DeliveryStatus::Pending);
        }
        let required_refs: Vec<&str> = required.iter().map(String::as_str).collect();

        let mut status = DeliveryStatus::Pending;
        for sink in self.sinks.iter_mut() {
            if !sink.is_enabled() || record.acknowledged_by(sink.name()) {
                continue;
            }
            match sink.deliver(record) {
                Ok(outcome) => {
                    if outcome == Delivery::Skipped {
                        debug!(id = record.id, sink = sink.name(), "delivery skipped by policy");
                    }
                    status = self
                        .buffer
                        .mark_delivered(record.id, sink.name(), &required_refs)?;
                }
                Err(e) => {
                    self.buffer
                        .record_attempt(record.id, sink.name(), Some(e.to_string()))?;
                    return Err(e);
                }
            }
        }
        // 没有需要投递的目标: 剩余目标此前都已确认
        if status == DeliveryStatus::Pending {
            status = self.buffer.complete_if_acked(record.id, &required_refs)?;
            if status == DeliveryStatus::Delivered {
                debug!(id = record.id, "all enabled sinks had acknowledged");
            }
        }
        Ok(status)
    }

    /// 投递新入队的记录
    pub fn deliver_id(&mut self, id: u64) -> Result<DeliveryStatus> {
        match self.buffer.get(id) {
            Some(record) => {
                let status = self.deliver(&record);
                self.note_outcome(status.is_ok());
                status
            }
            None => Err(crate::error::AgentError::UnknownRecord(id)),
        }
    }

    /// 按时间顺序重试最早的待送达记录,遇到第一次失败停止
    pub fn retry_pending(&mut self) -> RetryReport {
        let mut report = RetryReport::default();
        for record in self.buffer.oldest_pending(self.retry_batch) {
            report.scanned += 1;
            match self.deliver(&record) {
                Ok(DeliveryStatus::Delivered) => report.delivered += 1,
                Ok(DeliveryStatus::Pending) => {}
                Err(e) => {
                    warn!(id = record.id, "retry failed, stopping scan: {}", e);
                    report.stopped_at = Some(record.id);
                    break;
                }
            }
        }
        self.note_outcome(report.stopped_at.is_none());
        if report.delivered > 0 {
            info!(delivered = report.delivered, "uploaded buffered records");
        }
        report
    }

    /// 空闲时调用: 退避期内不扫描
    pub fn retry_if_due(&mut self, now: Instant) -> Option<RetryReport> {
        if self.next_retry_at.is_some_and(|t| now < t) {
            return None;
        }
        Some(self.retry_pending())
    }

    fn note_outcome(&mut self, ok: bool) {
        if ok {
            self.consecutive_failures = 0;
            self.next_retry_at = None;
        } else {
            let delay = retry_delay(self.consecutive_failures);
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            self.next_retry_at = Some(Instant::now() + delay);
        }
    }
}
