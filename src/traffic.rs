//! In-memory traffic log exposed through the admin API.
//!
//! [`TrafficLog`] is a fixed-capacity ring-buffer: once full, the oldest entry
//! is evicted to make room for the newest. This gives a bounded, O(1) memory
//! footprint regardless of request volume. The core request path never reads
//! it back — it exists purely for operator introspection via `GET
//! /admin/traffic`.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Fixed-capacity ring-buffer of recent [`TrafficEntry`] records.
///
/// Safe to share across threads via `Arc<TrafficLog>`. [`push`][Self::push] uses
/// a non-blocking `try_lock` so it never delays request handling; in the
/// unlikely event of lock contention the entry is silently dropped.
pub struct TrafficLog {
    capacity: usize,
    entries: Mutex<VecDeque<TrafficEntry>>,
}

impl TrafficLog {
    /// Create a new log with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self { capacity, entries: Mutex::new(VecDeque::with_capacity(capacity)) }
    }

    /// Record a completed request.
    ///
    /// Best-effort, non-blocking: if the mutex is contended the entry is
    /// dropped rather than delaying the response to the client.
    pub fn push(&self, entry: TrafficEntry) {
        if let Ok(mut entries) = self.entries.try_lock() {
            if entries.len() == self.capacity {
                entries.pop_front();
            }
            entries.push_back(entry);
        }
    }

    /// Return up to `limit` recent entries, newest first.
    pub async fn recent(&self, limit: usize) -> Vec<TrafficEntry> {
        let entries = self.entries.lock().await;
        entries.iter().rev().take(limit).cloned().collect()
    }
}

/// A single request record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficEntry {
    /// Unique request ID — matches the `X-Request-ID` the client received.
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub path: String,
    pub status: u16,
    pub latency_ms: u64,
    pub stream: bool,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub error: Option<String>,
}

impl TrafficEntry {
    pub fn new(id: String, path: String, status: u16, latency_ms: u64, stream: bool) -> Self {
        Self {
            id,
            timestamp: Utc::now(),
            path,
            status,
            latency_ms,
            stream,
            input_tokens: None,
            output_tokens: None,
            error: None,
        }
    }

    pub fn with_usage(mut self, input_tokens: u64, output_tokens: u64) -> Self {
        self.input_tokens = Some(input_tokens);
        self.output_tokens = Some(output_tokens);
        self
    }

    pub fn with_error(mut self, err: impl Into<String>) -> Self {
        self.error = Some(err.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_entry(id: &str, latency_ms: u64) -> TrafficEntry {
        TrafficEntry::new(id.into(), "/v1/messages".into(), 200, latency_ms, false)
    }

    #[tokio::test]
    async fn push_and_retrieve_single_entry() {
        let log = TrafficLog::new(10);
        log.push(make_entry("a", 42));

        let recent = log.recent(10).await;
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, "a");
        assert_eq!(recent[0].latency_ms, 42);
    }

    #[tokio::test]
    async fn recent_returns_entries_newest_first() {
        let log = TrafficLog::new(10);
        log.push(make_entry("1", 1));
        log.push(make_entry("2", 2));
        log.push(make_entry("3", 3));

        let recent = log.recent(10).await;
        assert_eq!(recent[0].id, "3");
        assert_eq!(recent[1].id, "2");
        assert_eq!(recent[2].id, "1");
    }

    #[tokio::test]
    async fn recent_limits_result_count() {
        let log = TrafficLog::new(20);
        for i in 0..10u64 {
            log.push(make_entry(&i.to_string(), i));
        }
        assert_eq!(log.recent(3).await.len(), 3);
    }

    #[tokio::test]
    async fn oldest_entry_evicted_when_capacity_exceeded() {
        let log = TrafficLog::new(3);
        log.push(make_entry("oldest", 1));
        log.push(make_entry("middle", 2));
        log.push(make_entry("newest", 3));
        log.push(make_entry("extra", 4));

        let all = log.recent(100).await;
        assert_eq!(all.len(), 3);
        assert!(!all.iter().any(|e| e.id == "oldest"));
        assert!(all.iter().any(|e| e.id == "extra"));
    }

    #[test]
    fn entry_has_unique_ids_when_generated() {
        let a = TrafficEntry::new(Uuid::new_v4().to_string(), "/v1/messages".into(), 200, 1, false);
        let b = TrafficEntry::new(Uuid::new_v4().to_string(), "/v1/messages".into(), 200, 1, false);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn with_usage_and_with_error_set_optional_fields() {
        let entry = make_entry("a", 1).with_usage(10, 5).with_error("boom");
        assert_eq!(entry.input_tokens, Some(10));
        assert_eq!(entry.output_tokens, Some(5));
        assert_eq!(entry.error, Some("boom".to_string()));
    }
}
