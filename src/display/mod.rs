//! Human-readable formatting for records

use crate::capture::ExchangeRecord;
use std::fmt::Write;

/// Byte count as `B`, `KB` or `MB`
pub fn format_size(bytes: usize) -> String {
    const KB: f64 = 1024.0;
    let value = bytes as f64;
    if value < KB {
        format!("{}B", bytes)
    } else if value < KB * KB {
        format!("{:.1}KB", value / KB)
    } else {
        format!("{:.1}MB", value / (KB * KB))
    }
}

/// Milliseconds as `Nms` below one second, seconds above
pub fn format_duration(ms: f64) -> String {
    if ms < 1000.0 {
        format!("{}ms", ms.round() as u64)
    } else {
        format!("{:.2}s", ms / 1000.0)
    }
}

/// Status code prefixed with a badge for its class
pub fn format_status(status: u16) -> String {
    match status {
        200..=299 => format!("✓ {}", status),
        300..=399 => format!("↪ {}", status),
        400..=499 => format!("⚠ {}", status),
        500..=u16::MAX => format!("✗ {}", status),
        _ => status.to_string(),
    }
}

/// Short explanation of common error statuses
pub fn status_description(status: u16) -> Option<&'static str> {
    let description = match status {
        400 => "Bad Request - the request is malformed or carries invalid data",
        401 => "Unauthorized - authentication is required (missing or expired token)",
        402 => "Payment Required - rarely used",
        403 => "Forbidden - authenticated but not allowed to access this resource",
        404 => "Not Found - the resource does not exist (wrong URL or deleted)",
        500 => "Internal Server Error - the server failed while handling the request",
        501 => "Not Implemented - the server does not support this functionality",
        502 => "Bad Gateway - a gateway or proxy received an invalid upstream response",
        503 => "Service Unavailable - the server is temporarily overloaded or down",
        504 => "Gateway Timeout - a gateway or proxy did not hear back from upstream in time",
        _ => return None,
    };
    Some(description)
}

/// One-line summary of a record, as printed by the headless proxy
pub fn record_line(record: &ExchangeRecord) -> String {
    let outcome = match (&record.response, &record.error) {
        (Some(response), Some(error)) => format!("{} ({})", format_status(response.status), error),
        (Some(response), None) => {
            format!("{} {}", format_status(response.status), format_size(response.size))
        }
        (None, Some(error)) => format!("error: {}", error),
        (None, None) => "pending".to_string(),
    };
    format!(
        "{} {} -> {} in {}",
        record.request.method,
        record.request.url,
        outcome,
        format_duration(record.timing.total)
    )
}

/// Plain-text rendering of a record for non-interactive output
pub fn render_record(record: &ExchangeRecord) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} {}", record.request.method, record.request.url);
    let _ = writeln!(out, "{}", "─".repeat(60));

    if let Some(response) = &record.response {
        let _ = writeln!(out, "{} {}", format_status(response.status), response.status_text);
        if let Some(description) = status_description(response.status) {
            let _ = writeln!(out, "  {}", description);
        }
        let _ = writeln!(out, "Time: {}", format_duration(response.duration));
        let _ = writeln!(out, "Size: {}", format_size(response.size));
        let _ = writeln!(out, "\nResponse:");
        let _ = writeln!(out, "{}", response.body);
    }

    if let Some(error) = &record.error {
        let _ = writeln!(out, "Error: {}", error);
        if record.response.is_none() {
            let _ = writeln!(out, "Time: {}", format_duration(record.timing.total));
        }
    }

    out
}
