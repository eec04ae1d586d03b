//! Syslog integration for audit logging.
//!
//! Audit events are logged to syslog with the `FETCH_RELAY` tag, separate
//! from the `tracing` output on stderr.

use std::sync::Mutex;

use syslog::{Facility, Formatter3164};
use tracing::{debug, error};

use super::error::TelemetryError;
use super::events::AuditEvent;

/// Syslog tag for all audit events.
pub const SYSLOG_TAG: &str = "FETCH_RELAY";

/// Audit logger that writes structured JSON events to syslog.
pub struct AuditLogger {
    /// None indicates a null logger.
    writer: Option<Mutex<syslog::Logger<syslog::LoggerBackend, Formatter3164>>>,
}

impl AuditLogger {
    /// Create a new audit logger connected to the local syslog daemon.
    pub fn new() -> Result<Self, TelemetryError> {
        let formatter = Formatter3164 {
            facility: Facility::LOG_USER,
            hostname: None,
            process: SYSLOG_TAG.to_string(),
            pid: std::process::id(),
        };

        let writer = syslog::unix(formatter).map_err(|e| {
            TelemetryError::SyslogConnection(format!("Failed to connect to syslog: {}", e))
        })?;

        debug!("Connected to syslog with tag '{}'", SYSLOG_TAG);
        Ok(Self {
            writer: Some(Mutex::new(writer)),
        })
    }

    /// Create a null audit logger that discards all events.
    pub fn new_null() -> Self {
        Self { writer: None }
    }

    /// Log an audit event to syslog.
    ///
    /// If this is a null logger, the event is silently discarded.
    pub fn log(&self, event: AuditEvent) {
        let Some(ref writer) = self.writer else {
            return;
        };

        match serde_json::to_string(&event.with_timestamp()) {
            Ok(json) => {
                match writer.lock() {
                    Ok(mut writer) => {
                        if let Err(e) = writer.info(&json) {
                            error!("Failed to write to syslog: {}", e);
                        }
                    }
                    Err(e) => {
                        error!("Failed to acquire syslog writer lock: {}", e);
                    }
                }
                debug!("Logged audit event: {}", json);
            }
            Err(e) => {
                error!("Failed to serialize audit event: {}", e);
            }
        }
    }

    /// Check if this is a null logger.
    pub fn is_null(&self) -> bool {
        self.writer.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syslog_tag() {
        assert_eq!(SYSLOG_TAG, "FETCH_RELAY");
    }

    #[test]
    fn test_null_logger_discards() {
        let logger = AuditLogger::new_null();
        assert!(logger.is_null());
        logger.log(AuditEvent::RelayInstalled);
    }

    #[test]
    #[ignore = "Requires running syslog daemon"]
    fn test_logger_creation() {
        let logger = AuditLogger::new();
        assert!(logger.is_ok());
    }
}
