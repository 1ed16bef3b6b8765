//! Mail log and queue monitoring.
//!
//! The log is a read-only input: lines are pattern-matched for
//! delivery status keywords. Queue operations shell out through the
//! `QueueTool` capability.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tracing::info;

use crate::error::{RelayError, Result};
use crate::system::QueueTool;

/// Classification of one mail.log line. Every line gets exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Delivered,
    Deferred,
    Bounced,
    Unknown,
}

/// One classified log line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub status: DeliveryStatus,
    pub queue_id: Option<String>,
    pub timestamp: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub line: String,
}

/// One message sitting in the Postfix queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub queue_id: String,
    pub size: Option<u64>,
    pub arrival: Option<String>,
    pub sender: Option<String>,
    pub recipients: Vec<String>,
    pub reason: Option<String>,
}

pub struct Monitor {
    log_path: PathBuf,
    queue: Arc<dyn QueueTool>,
}

impl Monitor {
    pub fn new(log_path: PathBuf, queue: Arc<dyn QueueTool>) -> Self {
        Monitor { log_path, queue }
    }

    /// Last `n` lines of the mail log, oldest first. A missing log is
    /// reported as NotFound rather than an empty tail.
    pub async fn tail(&self, n: usize) -> Result<Vec<String>> {
        let content = fs::read_to_string(&self.log_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RelayError::NotFound(format!("mail log {}", self.log_path.display()))
            } else {
                RelayError::Io(e)
            }
        })?;
        let lines: Vec<&str> = content.lines().collect();
        let start = lines.len().saturating_sub(n);
        Ok(lines[start..].iter().map(|l| l.to_string()).collect())
    }

    /// Tail the log and classify each line.
    pub async fn delivery_records(&self, n: usize) -> Result<Vec<DeliveryRecord>> {
        Ok(parse_statuses(&self.tail(n).await?))
    }

    /// Parsed queue listing. An empty queue yields an empty list.
    pub async fn list_queue(&self) -> Result<Vec<QueueEntry>> {
        let raw = self.queue.list().await?;
        Ok(parse_queue_listing(&raw))
    }

    /// Force retry of all deferred messages.
    pub async fn flush_queue(&self) -> Result<()> {
        info!("Flushing mail queue");
        self.queue.flush().await
    }
}

/// Classify log lines. Total: every line maps to exactly one status
/// and none are dropped, so parsing two chunks and concatenating the
/// results equals parsing the concatenation.
pub fn parse_statuses(lines: &[String]) -> Vec<DeliveryRecord> {
    lines.iter().map(|line| classify_line(line)).collect()
}

/// Collapse records to the latest status seen per queue id. Lines
/// without an id are skipped here; they stay visible in the record
/// stream.
pub fn statuses_by_id(records: &[DeliveryRecord]) -> BTreeMap<String, DeliveryStatus> {
    let mut map = BTreeMap::new();
    for record in records {
        if let Some(id) = &record.queue_id {
            map.insert(id.clone(), record.status);
        }
    }
    map
}

fn classify_line(line: &str) -> DeliveryRecord {
    let status = if line.contains("status=sent") || line.contains("status=delivered") {
        DeliveryStatus::Delivered
    } else if line.contains("status=deferred") {
        DeliveryStatus::Deferred
    } else if line.contains("status=bounced") || line.contains("status=expired") {
        DeliveryStatus::Bounced
    } else {
        DeliveryStatus::Unknown
    };

    DeliveryRecord {
        status,
        queue_id: extract_queue_id(line),
        timestamp: extract_timestamp(line),
        from: extract_field(line, "from="),
        to: extract_field(line, "to="),
        line: line.to_string(),
    }
}

/// Queue id is the uppercase hex token between the process tag and the
/// first detail, e.g. `postfix/smtp[91]: 4F3A21C0B7: to=<...>`.
fn extract_queue_id(line: &str) -> Option<String> {
    let after = line.split("]: ").nth(1)?;
    let token = after.split(':').next()?.trim();
    let valid = !token.is_empty()
        && token.len() >= 6
        && token
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit());
    if valid {
        Some(token.to_string())
    } else {
        None
    }
}

/// Syslog-style leading `Mon DD HH:MM:SS`.
fn extract_timestamp(line: &str) -> Option<String> {
    let parts: Vec<&str> = line.split_whitespace().take(3).collect();
    if parts.len() == 3 && parts[2].contains(':') {
        Some(parts.join(" "))
    } else {
        None
    }
}

/// Pull `key=<value>` or `key=value,` fields out of a log line,
/// skipping prefixed variants like `orig_to=`.
fn extract_field(line: &str, key: &str) -> Option<String> {
    for part in line.split_whitespace() {
        if let Some(rest) = part.strip_prefix(key) {
            let value = rest
                .trim_start_matches('<')
                .trim_end_matches(',')
                .trim_end_matches('>');
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// Parse `postqueue -p` output. Format:
///
/// ```text
/// -Queue ID-  --Size-- ----Arrival Time---- -Sender/Recipient-------
/// 4F3A21C0B7*     4523 Tue Feb  6 12:00:01  sender@example.com
///                          (connect to relay timed out)
///                                           rcpt@example.com
///
/// -- 4 Kbytes in 1 Request.
/// ```
pub fn parse_queue_listing(raw: &str) -> Vec<QueueEntry> {
    let mut entries = Vec::new();

    for line in raw.lines() {
        if line.trim().is_empty()
            || line.starts_with("-Queue ID-")
            || line.starts_with("--")
            || line.contains("Mail queue is empty")
        {
            continue;
        }

        if !line.starts_with(char::is_whitespace) {
            // Header line of a new entry.
            let mut parts = line.split_whitespace();
            let Some(id_token) = parts.next() else { continue };
            let queue_id = id_token.trim_end_matches(['*', '!']).to_string();
            let size = parts.next().and_then(|s| s.parse::<u64>().ok());
            let rest: Vec<&str> = parts.collect();
            // Arrival is day-of-week + month + day + time; sender trails.
            let (arrival, sender) = if rest.len() >= 5 {
                (
                    Some(rest[..4].join(" ")),
                    Some(rest[rest.len() - 1].to_string()),
                )
            } else {
                (None, rest.last().map(|s| s.to_string()))
            };
            entries.push(QueueEntry {
                queue_id,
                size,
                arrival,
                sender,
                recipients: Vec::new(),
                reason: None,
            });
        } else if let Some(entry) = entries.last_mut() {
            let detail = line.trim();
            if detail.starts_with('(') {
                entry.reason = Some(detail.trim_matches(['(', ')']).to_string());
            } else {
                entry.recipients.push(detail.to_string());
            }
        }
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::mock::MockQueueTool;
    use tempfile::TempDir;

    const SENT_LINE: &str = "Feb  6 12:00:02 relay postfix/smtp[91]: 4F3A21C0B7: \
        to=<rcpt@example.com>, relay=smtp.gmail.com[64.2.3.4]:587, delay=1.2, \
        status=sent (250 2.0.0 OK)";
    const DEFERRED_LINE: &str = "Feb  6 12:01:02 relay postfix/smtp[92]: 5A1B22D0C8: \
        to=<late@example.com>, status=deferred (connect timed out)";
    const BOUNCED_LINE: &str = "Feb  6 12:02:02 relay postfix/smtp[93]: 6B2C33E1D9: \
        to=<gone@example.com>, status=bounced (550 user unknown)";
    const NOISE_LINE: &str = "Feb  6 12:03:02 relay postfix/pickup[11]: \
        starting up";

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|l| l.to_string()).collect()
    }

    #[test]
    fn test_classification_is_total() {
        let records = parse_statuses(&lines(&[SENT_LINE, DEFERRED_LINE, BOUNCED_LINE, NOISE_LINE, ""]));
        assert_eq!(records.len(), 5);
        assert_eq!(records[0].status, DeliveryStatus::Delivered);
        assert_eq!(records[1].status, DeliveryStatus::Deferred);
        assert_eq!(records[2].status, DeliveryStatus::Bounced);
        assert_eq!(records[3].status, DeliveryStatus::Unknown);
        assert_eq!(records[4].status, DeliveryStatus::Unknown);
    }

    #[test]
    fn test_chunked_parse_equals_whole() {
        let all = lines(&[SENT_LINE, DEFERRED_LINE, BOUNCED_LINE, NOISE_LINE]);
        let whole = parse_statuses(&all);

        let mut merged = parse_statuses(&all[..2]);
        merged.extend(parse_statuses(&all[2..]));

        assert_eq!(whole.len(), merged.len());
        for (a, b) in whole.iter().zip(merged.iter()) {
            assert_eq!(a.status, b.status);
            assert_eq!(a.queue_id, b.queue_id);
            assert_eq!(a.line, b.line);
        }
    }

    #[test]
    fn test_field_extraction() {
        let record = classify_line(SENT_LINE);
        assert_eq!(record.queue_id.as_deref(), Some("4F3A21C0B7"));
        assert_eq!(record.timestamp.as_deref(), Some("Feb 6 12:00:02"));
        assert_eq!(record.to.as_deref(), Some("rcpt@example.com"));
    }

    #[test]
    fn test_statuses_by_id_takes_latest() {
        let early = DEFERRED_LINE.replace("5A1B22D0C8", "4F3A21C0B7");
        let records = parse_statuses(&lines(&[&early, SENT_LINE]));
        let map = statuses_by_id(&records);
        assert_eq!(map.get("4F3A21C0B7"), Some(&DeliveryStatus::Delivered));
    }

    #[test]
    fn test_parse_queue_listing() {
        let raw = "\
-Queue ID-  --Size-- ----Arrival Time---- -Sender/Recipient-------
4F3A21C0B7*     4523 Tue Feb  6 12:00:01  sender@example.com
                         (connect to relay timed out)
                                          rcpt@example.com

-- 4 Kbytes in 1 Request.
";
        let entries = parse_queue_listing(raw);
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.queue_id, "4F3A21C0B7");
        assert_eq!(entry.size, Some(4523));
        assert_eq!(entry.arrival.as_deref(), Some("Tue Feb 6 12:00:01"));
        assert_eq!(entry.sender.as_deref(), Some("sender@example.com"));
        assert_eq!(entry.recipients, vec!["rcpt@example.com".to_string()]);
        assert_eq!(entry.reason.as_deref(), Some("connect to relay timed out"));
    }

    #[test]
    fn test_parse_empty_queue() {
        assert!(parse_queue_listing("Mail queue is empty\n").is_empty());
        assert!(parse_queue_listing("").is_empty());
    }

    #[tokio::test]
    async fn test_tail_returns_last_n() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("mail.log");
        std::fs::write(&log, "one\ntwo\nthree\n").unwrap();

        let monitor = Monitor::new(log, Arc::new(MockQueueTool::empty()));
        let tail = monitor.tail(2).await.unwrap();
        assert_eq!(tail, vec!["two".to_string(), "three".to_string()]);

        let all = monitor.tail(100).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_tail_missing_log_is_not_found() {
        let monitor = Monitor::new(
            PathBuf::from("/nonexistent/mail.log"),
            Arc::new(MockQueueTool::empty()),
        );
        let err = monitor.tail(10).await.unwrap_err();
        assert!(matches!(err, RelayError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_flush_empty_queue_succeeds() {
        let dir = TempDir::new().unwrap();
        let monitor = Monitor::new(dir.path().join("mail.log"), Arc::new(MockQueueTool::empty()));
        monitor.flush_queue().await.unwrap();
        assert!(monitor.list_queue().await.unwrap().is_empty());
    }
}
