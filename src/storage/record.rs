//! Stored values and their on-disk form.
//!
//! A [`Record`] is what the engine keeps in memory for each key. The log
//! stores [`LogEntry`] lines instead, where a deletion is an explicit
//! [`LogRecord::Tombstone`] rather than a magic empty value.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A value with an optional absolute expiration instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// The stored payload
    pub value: String,
    /// When this record stops being visible (None = never expires)
    pub expires_at: Option<DateTime<Utc>>,
}

impl Record {
    /// Creates a record that never expires.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            expires_at: None,
        }
    }

    /// Creates a record that expires at `expires_at`.
    pub fn expiring(value: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            value: value.into(),
            expires_at: Some(expires_at),
        }
    }

    /// Checks if this record has expired as of `now`.
    ///
    /// The deadline itself counts as expired.
    #[inline]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| now >= exp).unwrap_or(false)
    }
}

/// The persisted state of a key at one point in the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogRecord {
    /// The key holds a value.
    Value {
        value: String,
        #[serde(default)]
        expires_at: Option<DateTime<Utc>>,
    },
    /// The key was deleted.
    Tombstone,
}

impl From<Record> for LogRecord {
    fn from(record: Record) -> Self {
        LogRecord::Value {
            value: record.value,
            expires_at: record.expires_at,
        }
    }
}

/// One line of the append-only log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub key: String,
    pub record: LogRecord,
}

impl LogEntry {
    pub fn new(key: impl Into<String>, record: LogRecord) -> Self {
        Self {
            key: key.into(),
            record,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_non_expiring_record_never_expires() {
        let record = Record::new("v");
        assert!(!record.is_expired_at(at(0)));
        assert!(!record.is_expired_at(at(i32::MAX as i64)));
    }

    #[test]
    fn test_expiry_is_inclusive_at_deadline() {
        let record = Record::expiring("v", at(100));
        assert!(!record.is_expired_at(at(100) - Duration::milliseconds(1)));
        assert!(record.is_expired_at(at(100)));
        assert!(record.is_expired_at(at(101)));
    }

    #[test]
    fn test_log_entry_json_shape() {
        let entry = LogEntry::new("a", Record::expiring("1", at(60)).into());
        let line = serde_json::to_string(&entry).unwrap();
        assert_eq!(
            line,
            r#"{"key":"a","record":{"kind":"value","value":"1","expires_at":"1970-01-01T00:01:00Z"}}"#
        );

        let tombstone = LogEntry::new("a", LogRecord::Tombstone);
        let line = serde_json::to_string(&tombstone).unwrap();
        assert_eq!(line, r#"{"key":"a","record":{"kind":"tombstone"}}"#);
    }

    #[test]
    fn test_empty_value_is_not_a_tombstone() {
        let line = r#"{"key":"a","record":{"kind":"value","value":""}}"#;
        let entry: LogEntry = serde_json::from_str(line).unwrap();
        assert_eq!(
            entry.record,
            LogRecord::Value {
                value: String::new(),
                expires_at: None
            }
        );
    }
}
