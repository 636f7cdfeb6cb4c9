use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub monitoring: MonitoringConfig,
    pub lookups: LookupConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MonitoringConfig {
    /// How often the OS connection table is sampled.
    pub poll_interval_ms: u64,
    /// Directory holding the per-day event logs.
    pub log_dir: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LookupConfig {
    pub dns_timeout_ms: u64,
    pub dns_cache_seconds: u64,
    /// Directory server queried first; referrals are followed from here.
    pub whois_server: String,
    pub whois_timeout_ms: u64,
    pub process_cache_seconds: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LoggingConfig {
    pub log_file: Option<String>,
    pub log_level: String,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            monitoring: MonitoringConfig {
                poll_interval_ms: 1000,
                log_dir: "logs".to_string(),
            },
            lookups: LookupConfig {
                dns_timeout_ms: 500,
                dns_cache_seconds: 600,
                whois_server: "whois.iana.org".to_string(),
                whois_timeout_ms: 5000,
                process_cache_seconds: 60,
            },
            logging: LoggingConfig {
                log_file: Some("logs/connwatch.log".to_string()),
                log_level: "info".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_sample_once_per_second() {
        let config = Config::default();
        assert_eq!(config.monitoring.poll_interval_ms, 1000);
        assert_eq!(config.monitoring.log_dir, "logs");
        assert_eq!(config.lookups.whois_server, "whois.iana.org");
    }

    #[test]
    fn loads_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            "monitoring:\n  poll_interval_ms: 2000\n  log_dir: /var/log/connwatch\n\
             lookups:\n  dns_timeout_ms: 250\n  dns_cache_seconds: 300\n  whois_server: whois.arin.net\n  whois_timeout_ms: 3000\n  process_cache_seconds: 30\n\
             logging:\n  log_file: null\n  log_level: debug\n"
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.monitoring.poll_interval_ms, 2000);
        assert_eq!(config.lookups.whois_server, "whois.arin.net");
        assert_eq!(config.logging.log_file, None);
        assert_eq!(config.logging.log_level, "debug");
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(Config::load(Path::new("/nonexistent/config.yaml")).is_err());
    }
}
