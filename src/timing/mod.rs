//! Timing module
//!
//! Wall-clock stopwatch shared by the proxy and the direct request runner,
//! plus the fixed-ratio timing breakdown stored on every record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Share of the total attributed to waiting for the first byte.
///
/// The body is fully read before size and formatting are known, so the real
/// time-to-first-byte is never observed. The split is an approximation.
pub const WAITING_RATIO: f64 = 0.7;

/// Share of the total attributed to downloading the content.
pub const CONTENT_DOWNLOAD_RATIO: f64 = 1.0 - WAITING_RATIO;

/// Monotonic stopwatch started when an exchange is first observed
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    started: Instant,
    started_at: DateTime<Utc>,
}

impl Stopwatch {
    /// Start a new stopwatch
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            started_at: Utc::now(),
        }
    }

    /// Wall-clock time the stopwatch was started
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Milliseconds elapsed since start. Never negative.
    pub fn elapsed_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }
}

/// Timing breakdown of one exchange, in milliseconds
///
/// The DNS/TCP/TLS phases are part of the shape but are not measured.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestTiming {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_lookup: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_connect: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_handshake: Option<f64>,
    pub request_sent: f64,
    /// Approximated time to first byte
    pub waiting: f64,
    pub content_download: f64,
    /// End-to-end elapsed time
    pub total: f64,
}

impl RequestTiming {
    /// Breakdown for an exchange that produced a response
    pub fn split(total: f64) -> Self {
        let total = total.max(0.0);
        let waiting = total * WAITING_RATIO;
        Self {
            waiting,
            content_download: total - waiting,
            total,
            ..Default::default()
        }
    }

    /// Breakdown for an exchange that failed: only the total is known
    pub fn total_only(total: f64) -> Self {
        Self {
            total: total.max(0.0),
            ..Default::default()
        }
    }
}
