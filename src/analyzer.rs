//! Batch analysis of a day's event log.
//!
//! Pure read-only pass: loads the persisted array and computes frequency
//! summaries. Runs independently of the live monitor.

use crate::event_log::{self, LogError};
use crate::record::ConnectionRecord;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;

const TOP_N: usize = 10;

#[derive(Debug, Default)]
pub struct Report {
    pub total_connections: usize,
    pub unique_ips: usize,
    pub top_processes: Vec<(String, usize)>,
    pub top_hostnames: Vec<(String, usize)>,
    pub top_organizations: Vec<(String, usize)>,
}

/// Summarizes the log at `path`. An absent file is not an error: it yields
/// an all-zero report.
pub fn analyze(path: &Path) -> Result<Report, LogError> {
    if !path.exists() {
        return Ok(Report::default());
    }
    let records = event_log::load_records(path)?;
    Ok(summarize(&records))
}

pub fn summarize(records: &[ConnectionRecord]) -> Report {
    let unique_ips: HashSet<_> = records.iter().map(|r| r.remote_ip).collect();

    // Only records whose process lookup actually succeeded contribute here.
    let mut processes = FrequencyTable::new();
    for record in records {
        if let Some(details) = record.process.as_ref().and_then(|p| p.resolved()) {
            processes.tally(details.name.clone());
        }
    }

    let mut hostnames = FrequencyTable::new();
    let mut organizations = FrequencyTable::new();
    for record in records {
        let hostname = record
            .dns_info
            .resolved()
            .map(|dns| dns.hostname.clone())
            .unwrap_or_else(|| "Unknown".to_string());
        hostnames.tally(hostname);

        let org = record
            .whois_info
            .resolved()
            .and_then(|whois| whois.org.clone())
            .unwrap_or_else(|| "Unknown".to_string());
        organizations.tally(org);
    }

    Report {
        total_connections: records.len(),
        unique_ips: unique_ips.len(),
        top_processes: processes.top(TOP_N),
        top_hostnames: hostnames.top(TOP_N),
        top_organizations: organizations.top(TOP_N),
    }
}

/// Counter that remembers insertion order so ties rank by first appearance.
struct FrequencyTable {
    order: Vec<String>,
    counts: HashMap<String, usize>,
}

impl FrequencyTable {
    fn new() -> Self {
        FrequencyTable {
            order: Vec::new(),
            counts: HashMap::new(),
        }
    }

    fn tally(&mut self, key: String) {
        match self.counts.get_mut(&key) {
            Some(count) => *count += 1,
            None => {
                self.counts.insert(key.clone(), 1);
                self.order.push(key);
            }
        }
    }

    fn top(self, n: usize) -> Vec<(String, usize)> {
        let mut rows: Vec<(String, usize)> = self
            .order
            .into_iter()
            .map(|key| {
                let count = self.counts[&key];
                (key, count)
            })
            .collect();
        // Stable sort keeps first-seen order among equal counts.
        rows.sort_by(|a, b| b.1.cmp(&a.1));
        rows.truncate(n);
        rows
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\nConnection Analysis Report")?;
        writeln!(f, "{}", "=".repeat(50))?;
        writeln!(f, "Total connections logged: {}", self.total_connections)?;
        writeln!(f, "Unique IP addresses: {}", self.unique_ips)?;

        let sections = [
            ("Processes making connections", &self.top_processes),
            ("Domains contacted", &self.top_hostnames),
            ("Organizations (from WHOIS)", &self.top_organizations),
        ];
        for (title, rows) in sections {
            writeln!(f, "\nTop {TOP_N} {title}:")?;
            writeln!(f, "{}", "-".repeat(50))?;
            for (name, count) in rows {
                writeln!(f, "{name}: {count} connections")?;
            }
        }
        Ok(())
    }
}
