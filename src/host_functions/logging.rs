//! Logging host functions.
//!
//! Guest code logs through the bridge's `tracing` output. Logging is always
//! allowed and never fails on bad arguments; unknown levels log at info.

use super::HostResult;
use crate::guest::{GuestEngine, GuestValue};
use serde::{Deserialize, Serialize};

/// Log level accepted by `log(level, message)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// 0
    Debug,
    /// 1
    Info,
    /// 2
    Warn,
    /// 3
    Error,
}

impl From<i32> for LogLevel {
    fn from(level: i32) -> Self {
        match level {
            0 => LogLevel::Debug,
            2 => LogLevel::Warn,
            3 => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

/// Log a message
///
/// # Arguments
/// * `level` - The log level (0=debug, 1=info, 2=warn, 3=error)
/// * `message` - The message; non-string values are stringified
///
/// # Returns
/// * `Ok(undefined)` - Always succeeds
pub fn log(_engine: &mut GuestEngine, args: &[GuestValue]) -> HostResult<GuestValue> {
    let level = args
        .first()
        .and_then(GuestValue::as_number)
        .map_or(LogLevel::Info, |n| LogLevel::from(n as i32));
    let message = args
        .get(1)
        .map(GuestValue::to_display_string)
        .unwrap_or_default();

    match level {
        LogLevel::Debug => tracing::debug!(target: "gcbridge::guest", "{}", message),
        LogLevel::Info => tracing::info!(target: "gcbridge::guest", "{}", message),
        LogLevel::Warn => tracing::warn!(target: "gcbridge::guest", "{}", message),
        LogLevel::Error => tracing::error!(target: "gcbridge::guest", "{}", message),
    }

    Ok(GuestValue::Undefined)
}

/// Current time in milliseconds since the Unix epoch
pub fn now(_engine: &mut GuestEngine, _args: &[GuestValue]) -> HostResult<GuestValue> {
    use std::time::{SystemTime, UNIX_EPOCH};

    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| crate::error::error_codes::INTERNAL_ERROR)?;

    Ok(GuestValue::Number(duration.as_millis() as f64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_from_code() {
        assert_eq!(LogLevel::from(0), LogLevel::Debug);
        assert_eq!(LogLevel::from(1), LogLevel::Info);
        assert_eq!(LogLevel::from(2), LogLevel::Warn);
        assert_eq!(LogLevel::from(3), LogLevel::Error);
        assert_eq!(LogLevel::from(42), LogLevel::Info);
    }

    #[test]
    fn test_log_accepts_any_arguments() {
        let mut engine = GuestEngine::new();
        assert_eq!(log(&mut engine, &[]), Ok(GuestValue::Undefined));
        assert!(log(&mut engine, &[1.into(), "hello".into()]).is_ok());
        assert!(log(&mut engine, &["x".into(), true.into()]).is_ok());
    }

    #[test]
    fn test_now() {
        let mut engine = GuestEngine::new();
        let timestamp = now(&mut engine, &[]).unwrap().as_number().unwrap();

        // Should be a reasonable timestamp (after year 2020)
        assert!(timestamp > 1577836800000.0);
    }
}
