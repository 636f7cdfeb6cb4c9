//! Reverse-DNS lookup with caching.
//!
//! Resolves a remote IP to its PTR name plus any additional names, then
//! forward-resolves the primary name to fill the address list. Failures are
//! cached briefly so unresolvable peers do not stall every cycle.

use crate::record::DnsInfo;
use log::debug;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;
use trust_dns_resolver::TokioAsyncResolver;

const FAILURE_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Error)]
pub enum DnsError {
    #[error("reverse DNS lookup for {ip} timed out after {timeout_ms}ms")]
    Timeout { ip: IpAddr, timeout_ms: u64 },
    #[error("could not perform reverse DNS lookup for {ip}: {reason}")]
    Lookup { ip: IpAddr, reason: String },
}

struct CacheEntry {
    result: Result<DnsInfo, DnsError>,
    cached_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn fresh(&self) -> bool {
        self.cached_at.elapsed() < self.ttl
    }
}

pub struct DnsResolver {
    cache: Arc<RwLock<HashMap<IpAddr, CacheEntry>>>,
    cache_ttl: Duration,
    timeout: Duration,
    resolver: TokioAsyncResolver,
}

impl DnsResolver {
    pub fn new(cache_ttl: Duration, timeout: Duration) -> Self {
        // System resolver config, falling back to Google DNS if unreadable.
        let resolver = TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|_| {
            use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
            TokioAsyncResolver::tokio(ResolverConfig::google(), ResolverOpts::default())
        });

        DnsResolver {
            cache: Arc::new(RwLock::new(HashMap::new())),
            cache_ttl,
            timeout,
            resolver,
        }
    }

    pub async fn resolve(&self, ip: IpAddr) -> Result<DnsInfo, DnsError> {
        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(&ip) {
                if entry.fresh() {
                    debug!("DNS cache hit for {ip}");
                    return entry.result.clone();
                }
            }
        }

        let result = self.lookup(ip).await;
        let ttl = if result.is_ok() {
            self.cache_ttl
        } else {
            FAILURE_TTL
        };
        let mut cache = self.cache.write().await;
        cache.insert(
            ip,
            CacheEntry {
                result: result.clone(),
                cached_at: Instant::now(),
                ttl,
            },
        );
        result
    }

    async fn lookup(&self, ip: IpAddr) -> Result<DnsInfo, DnsError> {
        let reverse = tokio::time::timeout(self.timeout, self.resolver.reverse_lookup(ip))
            .await
            .map_err(|_| DnsError::Timeout {
                ip,
                timeout_ms: self.timeout.as_millis() as u64,
            })?
            .map_err(|e| DnsError::Lookup {
                ip,
                reason: e.to_string(),
            })?;

        let names: Vec<String> = reverse
            .into_iter()
            .map(|name| name.to_string().trim_end_matches('.').to_string())
            .collect();
        let Some(hostname) = names.first().cloned() else {
            return Err(DnsError::Lookup {
                ip,
                reason: "no PTR record".to_string(),
            });
        };

        // Best effort: forward-resolve the primary name so the record carries
        // the full address list; fall back to the queried address.
        let ip_addresses = match tokio::time::timeout(
            self.timeout,
            self.resolver.lookup_ip(hostname.as_str()),
        )
        .await
        {
            Ok(Ok(lookup)) => {
                let addrs: Vec<IpAddr> = lookup.iter().collect();
                if addrs.is_empty() {
                    vec![ip]
                } else {
                    addrs
                }
            }
            _ => vec![ip],
        };

        debug!("DNS resolved {ip} -> {hostname}");
        Ok(DnsInfo {
            hostname,
            aliases: names.into_iter().skip(1).collect(),
            ip_addresses,
        })
    }

    #[cfg(test)]
    async fn cache_size(&self) -> usize {
        self.cache.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn failures_are_cached() {
        let resolver = DnsResolver::new(Duration::from_secs(300), Duration::from_millis(500));
        let ip: IpAddr = "93.184.216.34".parse().unwrap();
        let failure = DnsError::Lookup {
            ip,
            reason: "no PTR record".to_string(),
        };
        {
            let mut cache = resolver.cache.write().await;
            cache.insert(
                ip,
                CacheEntry {
                    result: Err(failure),
                    cached_at: Instant::now(),
                    ttl: FAILURE_TTL,
                },
            );
        }

        let err = resolver.resolve(ip).await.unwrap_err();
        assert!(err.to_string().contains("no PTR record"));
        assert_eq!(resolver.cache_size().await, 1);
    }

    #[tokio::test]
    #[ignore = "requires network access"]
    async fn resolves_a_well_known_address() {
        let resolver = DnsResolver::new(Duration::from_secs(300), Duration::from_secs(2));
        let info = resolver.resolve("8.8.8.8".parse().unwrap()).await.unwrap();
        assert_eq!(info.hostname, "dns.google");
        assert!(!info.ip_addresses.is_empty());
    }
}
