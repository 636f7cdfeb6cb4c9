//! Monitoring loop: sample, de-duplicate, enrich, persist.

use crate::config::Config;
use crate::dedup::DedupTracker;
use crate::dns::DnsResolver;
use crate::event_log::{EventLog, LogError};
use crate::process_info::ProcessResolver;
use crate::record::{ConnectionRecord, Lookup, RawConnection};
use crate::sampler::Sampler;
use crate::whois::WhoisResolver;
use log::{debug, error, info};
use std::sync::Arc;
use std::time::Duration;

pub struct Monitor {
    sampler: Arc<Sampler>,
    dedup: DedupTracker,
    processes: ProcessResolver,
    dns: DnsResolver,
    whois: WhoisResolver,
    event_log: EventLog,
    interval: Duration,
}

impl Monitor {
    pub fn new(config: &Config) -> Self {
        Self::with_sampler(config, Sampler::new())
    }

    pub fn with_sampler(config: &Config, sampler: Sampler) -> Self {
        Monitor {
            sampler: Arc::new(sampler),
            dedup: DedupTracker::new(),
            processes: ProcessResolver::new(Duration::from_secs(
                config.lookups.process_cache_seconds,
            )),
            dns: DnsResolver::new(
                Duration::from_secs(config.lookups.dns_cache_seconds),
                Duration::from_millis(config.lookups.dns_timeout_ms),
            ),
            whois: WhoisResolver::new(
                config.lookups.whois_server.as_str(),
                Duration::from_millis(config.lookups.whois_timeout_ms),
            ),
            event_log: EventLog::new(config.monitoring.log_dir.as_str()),
            interval: Duration::from_millis(config.monitoring.poll_interval_ms),
        }
    }

    /// Runs the sample/enrich/append loop until Ctrl-C. One cycle completes
    /// before the next tick's sample is taken.
    pub async fn run(&mut self) -> Result<(), LogError> {
        self.event_log.ensure_dir()?;

        let mut interval = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.cycle().await;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }
        Ok(())
    }

    async fn cycle(&mut self) {
        let sampler = Arc::clone(&self.sampler);
        let sampled = tokio::task::spawn_blocking(move || sampler.sample()).await;
        let connections = match sampled {
            Ok(Ok(connections)) => connections,
            // Fatal to this cycle only; the next tick samples again.
            Ok(Err(e)) => {
                error!("Error monitoring connections: {e}");
                return;
            }
            Err(e) => {
                error!("connection sampling task failed: {e}");
                return;
            }
        };

        for conn in connections {
            let Some(record) = self.enrich(&conn).await else {
                continue;
            };
            announce(&record);
            info!(
                "new connection {}:{} from local port {}",
                record.remote_ip, record.remote_port, record.local_port
            );
            if let Err(e) = self.event_log.append(&record) {
                // The record is lost; surface it and keep the loop alive.
                error!("failed to persist connection record: {e}");
            }
        }
        debug!("dedup set holds {} identities", self.dedup.len());
    }

    /// Enriches a sampled connection, or returns `None` if its identity has
    /// already been recorded this process lifetime. The record is assembled
    /// in full — every lookup finished, successfully or not — before it is
    /// returned.
    async fn enrich(&mut self, conn: &RawConnection) -> Option<ConnectionRecord> {
        let identity = conn.identity();
        if self.dedup.seen(&identity) {
            return None;
        }
        self.dedup.mark(identity);

        let process = conn
            .pid
            .map(|pid| Lookup::from_result(self.processes.resolve(pid)));
        let (dns_info, whois_info) = tokio::join!(
            self.dns.resolve(conn.remote_addr),
            self.whois.resolve(conn.remote_addr),
        );

        Some(ConnectionRecord::assemble(
            conn,
            process,
            Lookup::from_result(dns_info),
            Lookup::from_result(whois_info),
        ))
    }
}

/// Console notice for a newly recorded connection.
fn announce(record: &ConnectionRecord) {
    println!("\nNew connection detected:");
    println!("Remote: {}:{}", record.remote_ip, record.remote_port);
    let process_name = record
        .process
        .as_ref()
        .and_then(|p| p.resolved())
        .map(|details| details.name.as_str())
        .unwrap_or("Unknown");
    println!("Process: {process_name}");
    if let Some(hostname) = record
        .whois_info
        .resolved()
        .and_then(|whois| whois.hostname.as_deref())
    {
        println!("WHOIS Hostname: {hostname}");
    } else if let Some(dns) = record.dns_info.resolved() {
        println!("DNS Hostname: {}", dns.hostname);
    }
    println!("{}", "-".repeat(50));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_log::load_records;
    use crate::record::TcpState;
    use std::fs;
    use std::net::IpAddr;
    use tempfile::TempDir;

    /// Config whose lookups fail fast without network access: DNS gets a 1ms
    /// timeout and WHOIS points at localhost, where nothing listens on 43.
    fn offline_config(log_dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.monitoring.log_dir = log_dir.display().to_string();
        config.lookups.dns_timeout_ms = 1;
        config.lookups.whois_server = "127.0.0.1".to_string();
        config.lookups.whois_timeout_ms = 200;
        config
    }

    fn raw(local_port: u16, pid: Option<u32>) -> RawConnection {
        RawConnection {
            local_addr: "10.0.0.2".parse().unwrap(),
            local_port,
            remote_addr: "192.0.2.10".parse::<IpAddr>().unwrap(),
            remote_port: 443,
            state: TcpState::ESTABLISHED,
            pid,
        }
    }

    #[tokio::test]
    async fn enrich_emits_once_per_identity() {
        let dir = TempDir::new().unwrap();
        let mut monitor = Monitor::new(&offline_config(dir.path()));

        let conn = raw(51000, None);
        let record = monitor.enrich(&conn).await.expect("first sighting");
        assert_eq!(record.remote_ip, conn.remote_addr);
        assert_eq!(record.local_port, 51000);

        assert!(monitor.enrich(&conn).await.is_none());
        assert!(monitor.enrich(&raw(51001, None)).await.is_some());
    }

    #[tokio::test]
    async fn enrich_survives_failing_lookups() {
        let dir = TempDir::new().unwrap();
        let mut monitor = Monitor::new(&offline_config(dir.path()));

        let record = monitor
            .enrich(&raw(51000, Some(std::process::id())))
            .await
            .unwrap();

        // Both network lookups failed, yet the record carries error markers
        // and the process field resolved from our own PID.
        assert!(record.dns_info.is_failed());
        assert!(record.whois_info.is_failed());
        let process = record.process.as_ref().unwrap().resolved().unwrap();
        assert!(!process.name.is_empty());
    }

    #[tokio::test]
    async fn cycle_appends_new_connections_exactly_once() {
        let proc_root = TempDir::new().unwrap();
        fs::create_dir_all(proc_root.path().join("net")).unwrap();
        fs::write(
            proc_root.path().join("net/tcp"),
            "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode\n   1: 0200000A:C738 0A02000A:01BB 01 00000000:00000000 02:000004A7 00000000  1000        0 54321 2 0000000000000000 20 4 30 10 -1\n",
        )
        .unwrap();

        let log_dir = TempDir::new().unwrap();
        let config = offline_config(log_dir.path());
        let mut monitor = Monitor::with_sampler(&config, Sampler::with_root(proc_root.path()));
        monitor.event_log.ensure_dir().unwrap();

        monitor.cycle().await;
        let path = monitor.event_log.today_path();
        assert_eq!(load_records(&path).unwrap().len(), 1);

        // Same table on the next tick: nothing new to append.
        monitor.cycle().await;
        assert_eq!(load_records(&path).unwrap().len(), 1);
    }
}
