//! Append-only audit log with rotation and redaction

use crate::Result;
use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info};

/// Detail keys whose values are redacted before the record is written
const SENSITIVE_KEYS: &[&str] = &["token", "password", "secret", "key", "private_key"];
/// Longest user agent kept verbatim
const MAX_USER_AGENT: usize = 256;

/// One audit event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Event time
    pub timestamp: DateTime<Utc>,
    /// Acting subject
    pub subject: String,
    /// Action attempted
    pub action: String,
    /// Resource acted on
    pub resource: String,
    /// Outcome ("allowed", "denied", "error")
    pub result: String,
    /// Caller IP
    pub ip_address: Option<String>,
    /// Caller user agent, truncated
    pub user_agent: Option<String>,
    /// Request correlation id
    pub request_id: Option<String>,
    /// Free-form context, sensitive keys redacted
    pub details: BTreeMap<String, String>,
}

impl AuditRecord {
    /// Create a record stamped now
    pub fn new(
        subject: impl Into<String>,
        action: impl Into<String>,
        resource: impl Into<String>,
        result: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            subject: subject.into(),
            action: action.into(),
            resource: resource.into(),
            result: result.into(),
            ip_address: None,
            user_agent: None,
            request_id: None,
            details: BTreeMap::new(),
        }
    }

    /// Attach a detail entry
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// Audit log filter
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditQuery {
    /// Exact subject match
    pub subject: Option<String>,
    /// Exact action match
    pub action: Option<String>,
    /// Exact resource match
    pub resource: Option<String>,
    /// Exact result match
    pub result: Option<String>,
    /// Exact IP match
    pub ip_address: Option<String>,
    /// Exact request id match
    pub request_id: Option<String>,
    /// Events at or after this time
    pub from: Option<DateTime<Utc>>,
    /// Events at or before this time
    pub to: Option<DateTime<Utc>>,
    /// Most records returned (default 100)
    pub limit: Option<usize>,
}

/// Audit logger configuration
#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// Disabled loggers drop records silently
    pub enabled: bool,
    /// Current log file path
    pub path: PathBuf,
    /// Rotate once the file exceeds this size
    pub max_size_bytes: u64,
    /// Gzip rotated files
    pub compress_rotated: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from("audit/queueforge-audit.log"),
            max_size_bytes: 16 * 1024 * 1024,
            compress_rotated: false,
        }
    }
}

impl AuditConfig {
    /// Validate all fields
    pub fn validate(&self) -> Result<()> {
        if self.max_size_bytes == 0 {
            return Err(crate::AuthError::Config {
                field: "audit.max_size_bytes",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.path.as_os_str().is_empty() {
            return Err(crate::AuthError::Config {
                field: "audit.path",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Append-only JSON-lines audit logger
///
/// Writes serialize behind one async mutex so concurrent events never
/// interleave within a line.
pub struct AuditLogger {
    config: AuditConfig,
    write_lock: tokio::sync::Mutex<()>,
}

impl AuditLogger {
    /// Create a logger; configuration errors are fatal here
    pub fn new(config: AuditConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Append one event, redacting sensitive details first
    pub async fn log(&self, mut record: AuditRecord) {
        if !self.config.enabled {
            return;
        }
        redact(&mut record);

        if let Err(e) = self.write(&record).await {
            error!(error = %e, "failed to write audit record");
        }
    }

    async fn write(&self, record: &AuditRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.config.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let line = serde_json::to_string(record)?;
        let current_size = tokio::fs::metadata(&self.config.path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        if current_size > 0 && current_size + line.len() as u64 + 1 > self.config.max_size_bytes {
            self.rotate().await?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.config.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        Ok(())
    }

    async fn rotate(&self) -> Result<()> {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3f");
        let rotated = self.config.path.with_extension(format!("log.{}", stamp));
        tokio::fs::rename(&self.config.path, &rotated).await?;

        if self.config.compress_rotated {
            let data = tokio::fs::read(&rotated).await?;
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&data)?;
            let compressed = encoder.finish()?;
            let gz_path = rotated.with_extension(
                rotated
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| format!("{}.gz", e))
                    .unwrap_or_else(|| "gz".to_string()),
            );
            tokio::fs::write(&gz_path, compressed).await?;
            tokio::fs::remove_file(&rotated).await?;
            info!(path = %gz_path.display(), "audit log rotated and compressed");
        } else {
            info!(path = %rotated.display(), "audit log rotated");
        }
        Ok(())
    }

    /// Query the current log file: filter, newest first, limited
    pub async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>> {
        let content = match tokio::fs::read_to_string(&self.config.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records: Vec<AuditRecord> = content
            .lines()
            .filter_map(|line| {
                serde_json::from_str::<AuditRecord>(line)
                    .map_err(|e| debug!(error = %e, "skipping bad audit line"))
                    .ok()
            })
            .filter(|record| matches(record, query))
            .collect();

        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        records.truncate(query.limit.unwrap_or(100));
        Ok(records)
    }
}

fn matches(record: &AuditRecord, query: &AuditQuery) -> bool {
    let eq = |filter: &Option<String>, value: &str| {
        filter.as_deref().is_none_or(|wanted| wanted == value)
    };
    eq(&query.subject, &record.subject)
        && eq(&query.action, &record.action)
        && eq(&query.resource, &record.resource)
        && eq(&query.result, &record.result)
        && query
            .ip_address
            .as_deref()
            .is_none_or(|ip| record.ip_address.as_deref() == Some(ip))
        && query
            .request_id
            .as_deref()
            .is_none_or(|id| record.request_id.as_deref() == Some(id))
        && query.from.is_none_or(|from| record.timestamp >= from)
        && query.to.is_none_or(|to| record.timestamp <= to)
}

fn redact(record: &mut AuditRecord) {
    for (key, value) in record.details.iter_mut() {
        let lowered = key.to_ascii_lowercase();
        if SENSITIVE_KEYS.iter().any(|sensitive| lowered.contains(sensitive)) {
            *value = "[REDACTED]".to_string();
        }
    }
    if let Some(user_agent) = &mut record.user_agent {
        if user_agent.len() > MAX_USER_AGENT {
            user_agent.truncate(MAX_USER_AGENT);
        }
    }
}
