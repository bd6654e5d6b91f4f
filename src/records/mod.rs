//! Records module
//!
//! Retains every finalized exchange in arrival-of-finalization order and
//! delivers each one to the subscribers present when it is published.

use crate::capture::ExchangeRecord;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;

/// A finalized record, shared read-only between all consumers
pub type SharedRecord = Arc<ExchangeRecord>;

/// Receiving half of a record subscription
pub type RecordReceiver = mpsc::UnboundedReceiver<SharedRecord>;

/// Response time buckets
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct DurationDistribution {
    /// Under 100ms
    pub fast: u64,
    /// 100ms to 500ms
    pub normal: u64,
    /// 500ms to 1s
    pub slow: u64,
    /// Over 1s
    pub very_slow: u64,
}

impl DurationDistribution {
    fn add(&mut self, duration_ms: f64) {
        if duration_ms < 100.0 {
            self.fast += 1;
        } else if duration_ms < 500.0 {
            self.normal += 1;
        } else if duration_ms <= 1000.0 {
            self.slow += 1;
        } else {
            self.very_slow += 1;
        }
    }
}

/// Aggregated view over the retained records
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RecordSummary {
    /// Total number of records
    pub total_records: u64,
    /// 2xx responses without an error
    pub successful: u64,
    /// Status >= 400 or a transport error
    pub failed: u64,
    /// Records carrying a transport error
    pub errored: u64,
    pub avg_duration_ms: f64,
    pub min_duration_ms: f64,
    pub max_duration_ms: f64,
    pub status_distribution: HashMap<u16, u64>,
    pub duration_distribution: DurationDistribution,
    /// Records per second over the last minute
    pub records_per_second: f64,
}

/// Append-only log of finalized exchanges with subscriber fan-out
#[derive(Debug)]
pub struct RecordLog {
    records: RwLock<VecDeque<SharedRecord>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<SharedRecord>>>,
    /// Oldest records are evicted past this many. `None` keeps everything.
    max_records: Option<usize>,
}

impl RecordLog {
    /// Create a new record log
    pub fn new(max_records: Option<usize>) -> Self {
        Self {
            records: RwLock::new(VecDeque::new()),
            subscribers: Mutex::new(Vec::new()),
            max_records: max_records.filter(|max| *max > 0),
        }
    }

    /// Register for records published from now on.
    ///
    /// Earlier records are not replayed; read them with [`RecordLog::get_all`].
    pub fn subscribe(&self) -> RecordReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }

    /// Retain a finalized record and deliver it to every current subscriber.
    ///
    /// Never blocks on a subscriber: delivery queues are unbounded.
    pub fn publish(&self, record: ExchangeRecord) -> SharedRecord {
        let record = Arc::new(record);

        {
            let mut records = self.records.write();
            if let Some(max) = self.max_records {
                while records.len() >= max {
                    records.pop_front();
                }
            }
            records.push_back(record.clone());
        }

        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(record.clone()).is_ok());

        record
    }

    /// All retained records, oldest first
    pub fn get_all(&self) -> Vec<SharedRecord> {
        self.records.read().iter().cloned().collect()
    }

    /// Look up a retained record by id
    pub fn get(&self, id: &str) -> Option<SharedRecord> {
        self.records.read().iter().find(|r| r.id == id).cloned()
    }

    /// Records whose request arrived in the last N seconds
    ///
    /// Returns `None` when the window is negative or does not fit a timestamp.
    pub fn get_recent(&self, seconds: i64) -> Option<Vec<SharedRecord>> {
        if seconds < 0 {
            return None;
        }
        let cutoff = Utc::now().checked_sub_signed(chrono::Duration::try_seconds(seconds)?)?;
        Some(
            self.records
                .read()
                .iter()
                .filter(|r| r.request.timestamp > cutoff)
                .cloned()
                .collect(),
        )
    }

    /// Get aggregated summary
    pub fn get_summary(&self) -> RecordSummary {
        let records = self.records.read();

        if records.is_empty() {
            return RecordSummary::default();
        }

        let total_records = records.len() as u64;
        let mut successful = 0u64;
        let mut failed = 0u64;
        let mut errored = 0u64;
        let mut total_duration = 0.0;
        let mut min_duration = f64::MAX;
        let mut max_duration = 0.0f64;
        let mut status_distribution = HashMap::new();
        let mut duration_distribution = DurationDistribution::default();

        for record in records.iter() {
            let duration = record.timing.total;
            total_duration += duration;
            min_duration = min_duration.min(duration);
            max_duration = max_duration.max(duration);
            duration_distribution.add(duration);

            if record.is_error() {
                errored += 1;
            }
            if record.is_success() {
                successful += 1;
            } else if record.is_error() || record.status().is_some_and(|s| s >= 400) {
                failed += 1;
            }
            if let Some(status) = record.status() {
                *status_distribution.entry(status).or_insert(0) += 1;
            }
        }

        let one_minute_ago = Utc::now() - chrono::Duration::minutes(1);
        let recent_count = records
            .iter()
            .filter(|r| r.request.timestamp > one_minute_ago)
            .count() as f64;

        RecordSummary {
            total_records,
            successful,
            failed,
            errored,
            avg_duration_ms: total_duration / total_records as f64,
            min_duration_ms: if min_duration == f64::MAX {
                0.0
            } else {
                min_duration
            },
            max_duration_ms: max_duration,
            status_distribution,
            duration_distribution,
            records_per_second: recent_count / 60.0,
        }
    }

    /// Drop all retained records. Subscribers are kept.
    pub fn clear(&self) {
        self.records.write().clear();
    }

    /// Number of retained records
    pub fn count(&self) -> usize {
        self.records.read().len()
    }
}

/// Record log shared across tasks
pub type SharedRecordLog = Arc<RecordLog>;

/// Create a new shared record log
pub fn create_shared_log(max_records: Option<usize>) -> SharedRecordLog {
    Arc::new(RecordLog::new(max_records))
}
