//! Structured logging module for Tandem
//!
//! Writes daily log files to the configured directory (default
//! ~/.tandem/logs/) with categories:
//! - TOPIC: Topic detection and transition signals
//! - FLOW: Nudge timing decisions
//! - NUDGE: Parent nudge queue lifecycle
//! - PERSONA: Persona responses, switches and recommendations
//! - SESSION: Startup and session lifecycle
//! - ERROR: Errors swallowed into safe defaults

use crate::config::{bounded_days, LogConfig};
use chrono::{Local, Utc};
use once_cell::sync::Lazy;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Log categories for structured logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogCategory {
    Topic,   // Topic detection and transition signals
    Flow,    // Nudge timing decisions
    Nudge,   // Queue submissions, attempts, expiry
    Persona, // Persona responses and switches
    Session, // Startup and session lifecycle
    Error,   // Errors swallowed into safe defaults
}

impl LogCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogCategory::Topic => "TOPIC",
            LogCategory::Flow => "FLOW",
            LogCategory::Nudge => "NUDGE",
            LogCategory::Persona => "PERSONA",
            LogCategory::Session => "SESSION",
            LogCategory::Error => "ERROR",
        }
    }
}

struct LogTarget {
    directory: PathBuf,
    echo_stdout: bool,
}

/// Global log target, unset until `init_logging` runs
static LOG_TARGET: Lazy<Mutex<Option<LogTarget>>> = Lazy::new(|| Mutex::new(None));

/// Default log directory when none is configured
fn default_log_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".tandem/logs")
}

fn log_file_path(directory: &Path) -> PathBuf {
    let today = Local::now().format("%Y-%m-%d").to_string();
    directory.join(format!("tandem-{}.log", today))
}

/// Initialize the logging system - creates log directory if needed
pub fn init_logging(config: &LogConfig) -> std::io::Result<PathBuf> {
    let directory = config.directory.clone().unwrap_or_else(default_log_dir);

    if !directory.exists() {
        fs::create_dir_all(&directory)?;
    }

    if let Ok(mut target) = LOG_TARGET.lock() {
        *target = Some(LogTarget {
            directory: directory.clone(),
            echo_stdout: config.echo_stdout,
        });
    }

    log(LogCategory::Session, None, "Tandem logging initialized");

    Ok(directory)
}

/// Format a single log line. The child id is shortened to 8 characters.
pub fn format_line(category: LogCategory, child_id: Option<&str>, message: &str) -> String {
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let child_context = child_id
        .map(|id| {
            let short: String = id.chars().take(8).collect();
            format!("child={} | ", short)
        })
        .unwrap_or_default();

    format!("[{}] [{}] {}{}\n", timestamp, category.as_str(), child_context, message)
}

/// Log a message with category and optional child context
pub fn log(category: LogCategory, child_id: Option<&str>, message: &str) {
    let line = format_line(category, child_id, message);

    let (directory, echo) = match LOG_TARGET.lock() {
        Ok(target) => match target.as_ref() {
            Some(t) => (Some(t.directory.clone()), t.echo_stdout),
            None => (None, true),
        },
        Err(_) => (None, true),
    };

    if echo {
        print!("{}", line);
    }

    if let Some(directory) = directory {
        if let Ok(mut file) = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file_path(&directory))
        {
            let _ = file.write_all(line.as_bytes());
        }
    }
}

/// Log a topic detection event
pub fn log_topic(child_id: Option<&str>, message: &str) {
    log(LogCategory::Topic, child_id, message);
}

/// Log a nudge timing decision (confidence, timing, reasons)
pub fn log_flow(child_id: Option<&str>, message: &str) {
    log(LogCategory::Flow, child_id, message);
}

/// Log a nudge queue event
pub fn log_nudge(child_id: Option<&str>, message: &str) {
    log(LogCategory::Nudge, child_id, message);
}

/// Log a persona event
pub fn log_persona(child_id: Option<&str>, message: &str) {
    log(LogCategory::Persona, child_id, message);
}

/// Log a session lifecycle event
pub fn log_session(child_id: Option<&str>, message: &str) {
    log(LogCategory::Session, child_id, message);
}

/// Log an error
pub fn log_error(child_id: Option<&str>, message: &str) {
    log(LogCategory::Error, child_id, message);
}

/// Clean up old log files (keep the last `retention_days` days)
pub fn cleanup_old_logs(retention_days: i64) -> std::io::Result<usize> {
    let directory = match LOG_TARGET.lock() {
        Ok(target) => match target.as_ref() {
            Some(t) => t.directory.clone(),
            None => return Ok(0),
        },
        Err(_) => return Ok(0),
    };
    let mut deleted = 0;

    if !directory.exists() {
        return Ok(0);
    }

    let cutoff = Utc::now() - bounded_days(retention_days);

    for entry in fs::read_dir(&directory)? {
        let entry = entry?;
        let path = entry.path();
        let is_log = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with("tandem-") && n.ends_with(".log"))
            .unwrap_or(false);
        if !is_log {
            continue;
        }

        if let Ok(metadata) = entry.metadata() {
            if let Ok(modified) = metadata.modified() {
                let modified_time: chrono::DateTime<Utc> = modified.into();
                if modified_time < cutoff && fs::remove_file(&path).is_ok() {
                    deleted += 1;
                }
            }
        }
    }

    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_line_shortens_child_id() {
        let line = format_line(LogCategory::Nudge, Some("child-1234567890"), "queued");
        assert!(line.contains("[NUDGE]"));
        assert!(line.contains("child=child-12 | queued"));
        assert!(line.ends_with('\n'));
    }

    #[test]
    fn format_line_without_child() {
        let line = format_line(LogCategory::Session, None, "started");
        assert!(line.contains("[SESSION] started"));
        assert!(!line.contains("child="));
    }

    #[test]
    fn init_writes_daily_file() {
        let dir = std::env::temp_dir().join(format!("tandem-logs-{}", uuid::Uuid::new_v4()));
        let config = LogConfig {
            directory: Some(dir.clone()),
            retention_days: 7,
            echo_stdout: false,
        };
        let created = init_logging(&config).unwrap();
        assert_eq!(created, dir);
        log_topic(Some("abc"), "topic=school");

        let contents = fs::read_to_string(log_file_path(&dir)).unwrap();
        assert!(contents.contains("[TOPIC] child=abc | topic=school"));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn log_file_is_dated_inside_directory() {
        let path = log_file_path(Path::new("/var/log/tandem"));
        assert_eq!(path.parent(), Some(Path::new("/var/log/tandem")));
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("tandem-") && name.ends_with(".log"));
    }

    #[test]
    fn cleanup_with_huge_retention_does_not_panic() {
        assert!(cleanup_old_logs(i64::MAX).is_ok());
    }
}
