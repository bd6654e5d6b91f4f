//! API DevTools - observe and replay HTTP traffic
//!
//! A Rust application providing:
//! - A capture proxy that relays traffic to a target origin and records
//!   every request/response pair with sizes and timings
//! - A direct request runner producing the same records
//! - Named request storage and code/test generation from records
//! - A terminal UI and an inspection API over captured traffic

pub mod api;
pub mod capture;
pub mod client;
pub mod codegen;
pub mod config;
pub mod display;
pub mod proxy;
pub mod records;
pub mod server;
pub mod storage;
pub mod timing;
pub mod tui;

pub use capture::{ExchangeRecord, ExchangeRecorder};
pub use config::{AppConfig, SharedConfig};
pub use records::{create_shared_log, RecordSummary, SharedRecordLog};
pub use server::{CaptureProxy, ProxyHandle};

/// Application result type
pub type Result<T> = anyhow::Result<T>;
