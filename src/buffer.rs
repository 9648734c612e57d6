//! 本地持久缓冲 (Durable buffer)
//!
//! 追加式 JSON Lines 日志 `{dataDir}/{cameraId}.journal`。
//! 每个快照在任何网络请求之前落盘 (write-ahead),每次追加后 `sync_data`。
//! 内存索引由日志重放得到;打开时以及运行中每追加一定条数后压缩日志,
//! 并清除超过保留期的已送达记录。

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::aggregation::AggregationSnapshot;
use crate::error::{AgentError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Delivered => write!(f, "delivered"),
        }
    }
}

/// 重试元数据
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryMeta {
    pub attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferedRecord {
    pub id: u64,
    pub created_at: DateTime<Utc>,
    pub snapshot: AggregationSnapshot,
    pub status: DeliveryStatus,
    #[serde(default)]
    pub retry: RetryMeta,
    /// 已确认接收的上传目标
    #[serde(default)]
    pub delivered_to: BTreeSet<String>,
}

impl BufferedRecord {
    pub fn is_pending(&self) -> bool {
        self.status == DeliveryStatus::Pending
    }

    pub fn acknowledged_by(&self, sink: &str) -> bool {
        self.delivered_to.contains(sink)
    }
}

/// 日志条目
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
enum JournalEntry {
    /// 压缩时写入的ID高水位,保证删除记录后ID仍不复用
    Sequence {
        next_id: u64,
    },
    Insert {
        record: BufferedRecord,
    },
    Attempt {
        id: u64,
        sink: String,
        at: DateTime<Utc>,
        error: Option<String>,
    },
    Ack {
        id: u64,
        sink: String,
        at: DateTime<Utc>,
        complete: bool,
    },
    /// 所有必需目标均已确认 (确认发生在之前的条目中)
    Complete {
        id: u64,
        at: DateTime<Utc>,
    },
}

/// 运行中两次压缩之间允许追加的日志条数
pub const DEFAULT_COMPACT_EVERY: usize = 4096;

struct BufferInner {
    journal: File,
    records: BTreeMap<u64, BufferedRecord>,
    next_id: u64,
    /// 末尾留有无法回滚的残缺行,下一次写入先补换行
    torn: bool,
    since_compaction: usize,
    compact_every: usize,
}

impl BufferInner {
    /// 追加一行并落盘。失败时把文件截回写入前的长度,
    /// 保证日志中只有完整的行,且内存索引与磁盘一致。
    fn append(&mut self, entry: &JournalEntry) -> Result<()> {
        let mut line = Vec::with_capacity(512);
        if self.torn {
            line.push(b'\n');
        }
        serde_json::to_writer(&mut line, entry)?;
        line.push(b'\n');

        let start = self.journal.metadata()?.len();
        let written = self
            .journal
            .write_all(&line)
            .and_then(|_| self.journal.sync_data());
        if let Err(e) = written {
            self.rollback(start);
            return Err(e.into());
        }
        self.torn = false;
        self.since_compaction += 1;
        Ok(())
    }

    fn rollback(&mut self, len: u64) {
        if let Err(e) = self.journal.set_len(len) {
            warn!(len, "failed to roll back partial journal write: {}", e);
            self.torn = true;
        }
    }

    fn apply(&mut self, entry: JournalEntry) {
        self.next_id = apply_entry(&mut self.records, entry).max(self.next_id);
    }
}

/// 应用一条日志到内存索引,返回由该条目推出的下一个可用ID
fn apply_entry(records: &mut BTreeMap<u64, BufferedRecord>, entry: JournalEntry) -> u64 {
    match entry {
        JournalEntry::Sequence { next_id } => next_id,
        JournalEntry::Insert { record } => {
            let next = record.id + 1;
            records.insert(record.id, record);
            next
        }
        JournalEntry::Attempt { id, at, error, .. } => {
            if let Some(r) = records.get_mut(&id) {
                r.retry.attempts += 1;
                r.retry.last_attempt_at = Some(at);
                r.retry.last_error = error;
            }
            0
        }
        JournalEntry::Ack {
            id, sink, complete, ..
        } => {
            if let Some(r) = records.get_mut(&id) {
                r.delivered_to.insert(sink);
                if complete {
                    r.status = DeliveryStatus::Delivered;
                }
            }
            0
        }
        JournalEntry::Complete { id, .. } => {
            if let Some(r) = records.get_mut(&id) {
                r.status = DeliveryStatus::Delivered;
            }
            0
        }
    }
}

/// 丢弃早于保留期的已送达记录,返回丢弃数量
fn prune_expired(records: &mut BTreeMap<u64, BufferedRecord>, retention: chrono::Duration) -> usize {
    let cutoff = Utc::now() - retention;
    let before = records.len();
    records.retain(|_, r| r.is_pending() || r.created_at >= cutoff);
    before - records.len()
}

pub struct DurableBuffer {
    path: PathBuf,
    retention: chrono::Duration,
    inner: Mutex<BufferInner>,
}

impl DurableBuffer {
    /// 打开 (或创建) 日志,重放并压缩。
    /// 已送达且早于 `retention` 的记录被丢弃;待送达记录永不丢弃。
    pub fn open(path: impl AsRef<Path>, retention: Duration) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }

        let (mut records, next_id, tidy) = Self::replay(&path)?;
        let retention = chrono::Duration::from_std(retention)
            .unwrap_or_else(|_| chrono::Duration::days(36500));
        let expired = prune_expired(&mut records, retention);

        let journal = if !tidy || expired > 0 {
            let journal = Self::compact(&path, &records, next_id)?;
            debug!(
                journal = %path.display(),
                kept = records.len(),
                expired,
                "journal compacted"
            );
            journal
        } else {
            OpenOptions::new().create(true).append(true).open(&path)?
        };
        let pending = records.values().filter(|r| r.is_pending()).count();
        info!(
            journal = %path.display(),
            records = records.len(),
            pending,
            "durable buffer opened"
        );

        Ok(Self {
            path,
            retention,
            inner: Mutex::new(BufferInner {
                journal,
                records,
                next_id,
                torn: false,
                since_compaction: 0,
                compact_every: DEFAULT_COMPACT_EVERY,
            }),
        })
    }

    /// 运行中压缩的触发条数
    pub fn with_compaction_threshold(self, entries: usize) -> Self {
        self.lock().compact_every = entries.max(1);
        self
    }

    /// 重放日志。第三个返回值表示日志已是压缩形态
    /// (首行为高水位,其后只有完整的插入条目)。
    /// 无法解析的行 (断电截断、写入失败留下的残片) 跳过并告警。
    fn replay(path: &Path) -> Result<(BTreeMap<u64, BufferedRecord>, u64, bool)> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok((BTreeMap::new(), 1, false));
            }
            Err(e) => return Err(e.into()),
        };

        let lines: Vec<String> = BufReader::new(file)
            .lines()
            .collect::<std::io::Result<_>>()?;
        let mut records = BTreeMap::new();
        let mut next_id = 1;
        let mut tidy = true;
        let mut skipped = 0usize;
        for (i, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                tidy = false;
                continue;
            }
            match serde_json::from_str::<JournalEntry>(line) {
                Ok(entry) => {
                    tidy &= match &entry {
                        JournalEntry::Sequence { .. } => i == 0,
                        JournalEntry::Insert { .. } => i > 0,
                        _ => false,
                    };
                    next_id = apply_entry(&mut records, entry).max(next_id);
                }
                Err(e) => {
                    warn!(line = i + 1, "skipping unreadable journal line: {}", e);
                    skipped += 1;
                    tidy = false;
                }
            }
        }
        if skipped > 0 {
            warn!(journal = %path.display(), skipped, "journal had unreadable lines");
        }
        Ok((records, next_id, tidy && !lines.is_empty()))
    }

    /// 写临时文件后原子替换日志,返回指向新日志的追加句柄
    fn compact(path: &Path, records: &BTreeMap<u64, BufferedRecord>, next_id: u64) -> Result<File> {
        let tmp = path.with_extension("journal.tmp");
        {
            let file = File::create(&tmp)?;
            let mut w = BufWriter::new(file);
            serde_json::to_writer(&mut w, &JournalEntry::Sequence { next_id })?;
            w.write_all(b"\n")?;
            for record in records.values() {
                let entry = JournalEntry::Insert {
                    record: record.clone(),
                };
                serde_json::to_writer(&mut w, &entry)?;
                w.write_all(b"\n")?;
            }
            let file = w.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
        }
        // 句柄跟随 inode,重命名后仍指向新日志
        let journal = OpenOptions::new().append(true).open(&tmp)?;
        fs::rename(&tmp, path)?;
        Ok(journal)
    }

    /// 自上次压缩以来追加超过阈值时压缩日志并清除过期的已送达记录。
    /// 返回 `Some(清除数量)` 表示执行了压缩。
    pub fn compact_if_due(&self) -> Result<Option<usize>> {
        let mut inner = self.lock();
        if inner.since_compaction < inner.compact_every {
            return Ok(None);
        }
        // 失败后等下一批追加再试
        inner.since_compaction = 0;
        let mut records = inner.records.clone();
        let expired = prune_expired(&mut records, self.retention);
        let journal = Self::compact(&self.path, &records, inner.next_id)?;
        inner.journal = journal;
        inner.records = records;
        inner.torn = false;
        debug!(
            journal = %self.path.display(),
            kept = inner.records.len(),
            expired,
            "journal compacted"
        );
        Ok(Some(expired))
    }

    fn lock(&self) -> MutexGuard<'_, BufferInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 持久化快照,返回记录ID。函数返回即已落盘。
    pub fn append(&self, snapshot: AggregationSnapshot) -> Result<u64> {
        let mut inner = self.lock();
        let record = BufferedRecord {
            id: inner.next_id,
            created_at: Utc::now(),
            snapshot,
            status: DeliveryStatus::Pending,
            retry: RetryMeta::default(),
            delivered_to: BTreeSet::new(),
        };
        let id = record.id;
        let entry = JournalEntry::Insert { record };
        inner.append(&entry)?;
        inner.apply(entry);
        Ok(id)
    }

    /// 记录一次投递尝试 (`error` 为 None 表示成功)
    pub fn record_attempt(&self, id: u64, sink: &str, error: Option<String>) -> Result<()> {
        let mut inner = self.lock();
        if !inner.records.contains_key(&id) {
            return Err(AgentError::UnknownRecord(id));
        }
        let entry = JournalEntry::Attempt {
            id,
            sink: sink.to_string(),
            at: Utc::now(),
            error,
        };
        inner.append(&entry)?;
        inner.apply(entry);
        Ok(())
    }

    /// 记录 `sink` 已确认接收。所有 `required` 目标都确认后记录变为已送达。
    pub fn mark_delivered(&self, id: u64, sink: &str, required: &[&str]) -> Result<DeliveryStatus> {
        let mut inner = self.lock();
        let record = inner.records.get(&id).ok_or(AgentError::UnknownRecord(id))?;
        if record.status == DeliveryStatus::Delivered {
            return Ok(DeliveryStatus::Delivered);
        }
        let complete = required
            .iter()
            .all(|s| *s == sink || record.delivered_to.contains(*s));
        let entry = JournalEntry::Ack {
            id,
            sink: sink.to_string(),
            at: Utc::now(),
            complete,
        };
        inner.append(&entry)?;
        inner.apply(entry);
        Ok(if complete {
            DeliveryStatus::Delivered
        } else {
            DeliveryStatus::Pending
        })
    }

    /// 所有 `required` 目标此前都已确认时把记录标记为已送达。
    /// 用于目标集合缩小 (例如后端目标被清除) 后收尾的记录。
    pub fn complete_if_acked(&self, id: u64, required: &[&str]) -> Result<DeliveryStatus> {
        let mut inner = self.lock();
        let record = inner.records.get(&id).ok_or(AgentError::UnknownRecord(id))?;
        if record.status == DeliveryStatus::Delivered {
            return Ok(DeliveryStatus::Delivered);
        }
        if required.is_empty() || !required.iter().all(|s| record.delivered_to.contains(*s)) {
            return Ok(DeliveryStatus::Pending);
        }
        let entry = JournalEntry::Complete { id, at: Utc::now() };
        inner.append(&entry)?;
        inner.apply(entry);
        Ok(DeliveryStatus::Delivered)
    }

    pub fn get(&self, id: u64) -> Option<BufferedRecord> {
        self.lock().records.get(&id).cloned()
    }

    /// 最早的 `limit` 条待送达记录 (按时间戳升序)
    pub fn oldest_pending(&self, limit: usize) -> Vec<BufferedRecord> {
        let inner = self.lock();
        let mut pending: Vec<&BufferedRecord> =
            inner.records.values().filter(|r| r.is_pending()).collect();
        pending.sort_by(|a, b| {
            a.snapshot
                .timestamp
                .cmp(&b.snapshot.timestamp)
                .then(a.id.cmp(&b.id))
        });
        pending.into_iter().take(limit).cloned().collect()
    }

    pub fn pending_count(&self) -> usize {
        self.lock().records.values().filter(|r| r.is_pending()).count()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
