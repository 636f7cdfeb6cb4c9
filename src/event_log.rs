//! Day-partitioned event log.
//!
//! One JSON array per calendar day (`connections_YYYYMMDD.json`). Appending
//! loads the day's array, pushes the new record, and rewrites the file, so
//! the log stays a single well-formed document readable by any JSON tool.
//! Single-writer only.

use crate::record::ConnectionRecord;
use chrono::{DateTime, Local};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LogError {
    #[error("could not create log directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("could not read event log {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("could not write event log {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("event log {path} is not valid JSON: {source}")]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },
}

pub struct EventLog {
    dir: PathBuf,
}

impl EventLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        EventLog { dir: dir.into() }
    }

    pub fn ensure_dir(&self) -> Result<(), LogError> {
        fs::create_dir_all(&self.dir).map_err(|source| LogError::CreateDir {
            path: self.dir.clone(),
            source,
        })
    }

    pub fn path_for_day(&self, day: &DateTime<Local>) -> PathBuf {
        self.dir
            .join(format!("connections_{}.json", day.format("%Y%m%d")))
    }

    pub fn today_path(&self) -> PathBuf {
        self.path_for_day(&Local::now())
    }

    /// Appends a record to the log of the day it was captured on. A
    /// successful return means the file now holds every previously
    /// persisted record plus this one, in insertion order.
    pub fn append(&self, record: &ConnectionRecord) -> Result<(), LogError> {
        let path = self.path_for_day(&record.timestamp);

        let mut records = if path.exists() {
            load_records(&path)?
        } else {
            Vec::new()
        };
        records.push(record.clone());

        let json = serde_json::to_string_pretty(&records).map_err(|source| LogError::Malformed {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, json).map_err(|source| LogError::Write { path, source })
    }
}

/// Loads a full day's records. Used by the writer's read-modify-write cycle
/// and by the analyzer.
pub fn load_records(path: &Path) -> Result<Vec<ConnectionRecord>, LogError> {
    let contents = fs::read_to_string(path).map_err(|source| LogError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| LogError::Malformed {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{DnsInfo, Lookup, WhoisInfo};
    use tempfile::TempDir;

    fn record(local_port: u16) -> ConnectionRecord {
        ConnectionRecord {
            timestamp: Local::now(),
            remote_ip: "93.184.216.34".parse().unwrap(),
            remote_port: 443,
            local_port,
            process: None,
            dns_info: Lookup::Resolved(DnsInfo {
                hostname: "example.com".into(),
                aliases: vec![],
                ip_addresses: vec!["93.184.216.34".parse().unwrap()],
            }),
            whois_info: Lookup::Resolved(WhoisInfo::default()),
        }
    }

    #[test]
    fn append_then_load_round_trips_in_order() {
        let dir = TempDir::new().unwrap();
        let log = EventLog::new(dir.path());
        log.ensure_dir().unwrap();

        for port in [51000u16, 51001, 51002] {
            log.append(&record(port)).unwrap();
        }

        let loaded = load_records(&log.today_path()).unwrap();
        assert_eq!(loaded.len(), 3);
        let ports: Vec<u16> = loaded.iter().map(|r| r.local_port).collect();
        assert_eq!(ports, vec![51000, 51001, 51002]);
    }

    #[test]
    fn first_append_creates_the_day_file() {
        let dir = TempDir::new().unwrap();
        let log = EventLog::new(dir.path().join("logs"));
        log.ensure_dir().unwrap();

        let rec = record(51000);
        let path = log.path_for_day(&rec.timestamp);
        assert!(!path.exists());
        log.append(&rec).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn day_file_is_a_plain_json_array() {
        let dir = TempDir::new().unwrap();
        let log = EventLog::new(dir.path());
        log.append(&record(51000)).unwrap();

        let contents = fs::read_to_string(log.today_path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert!(value.is_array());
        assert_eq!(value[0]["remote_ip"], "93.184.216.34");
    }

    #[test]
    fn corrupt_log_is_reported_not_clobbered() {
        let dir = TempDir::new().unwrap();
        let log = EventLog::new(dir.path());
        let rec = record(51000);
        let path = log.path_for_day(&rec.timestamp);
        fs::write(&path, "not json").unwrap();

        assert!(matches!(
            log.append(&rec),
            Err(LogError::Malformed { .. })
        ));
        assert_eq!(fs::read_to_string(&path).unwrap(), "not json");
    }

    #[test]
    fn log_path_carries_the_day_key() {
        let log = EventLog::new("logs");
        let day = "2026-08-07T12:00:00+00:00"
            .parse::<DateTime<Local>>()
            .unwrap();
        let name = log.path_for_day(&day);
        let name = name.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("connections_2026"));
        assert!(name.ends_with(".json"));
    }
}
