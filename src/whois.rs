//! Registration (WHOIS) lookup.
//!
//! Plain RFC 3912: send the query on TCP port 43, read until EOF. The first
//! query goes to a configurable directory server (IANA by default), and a
//! single `refer:` / `ReferralServer:` hop is followed to the regional
//! registry that actually holds the allocation. Registry responses are
//! loosely structured key/value text, so every parsed field is optional.

use crate::record::WhoisInfo;
use log::debug;
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[derive(Debug, Error)]
pub enum WhoisError {
    #[error("WHOIS query for {ip} to {server} timed out")]
    Timeout { ip: IpAddr, server: String },
    #[error("could not perform WHOIS lookup for {ip}: {reason}")]
    Query { ip: IpAddr, reason: String },
}

pub struct WhoisResolver {
    server: String,
    timeout: Duration,
}

impl WhoisResolver {
    pub fn new(server: impl Into<String>, timeout: Duration) -> Self {
        WhoisResolver {
            server: server.into(),
            timeout,
        }
    }

    pub async fn resolve(&self, ip: IpAddr) -> Result<WhoisInfo, WhoisError> {
        let mut response = self.query(&self.server, ip).await?;

        if let Some(referred) = referral_server(&response) {
            if referred != self.server {
                match self.query(&referred, ip).await {
                    Ok(referred_response) => response = referred_response,
                    // Keep whatever the directory server gave us.
                    Err(e) => debug!("WHOIS referral for {ip} failed: {e}"),
                }
            }
        }

        Ok(parse_response(&response))
    }

    async fn query(&self, server: &str, ip: IpAddr) -> Result<String, WhoisError> {
        let exchange = async {
            let mut stream = TcpStream::connect((server, 43)).await?;
            stream.write_all(format!("{ip}\r\n").as_bytes()).await?;
            let mut raw = Vec::new();
            stream.read_to_end(&mut raw).await?;
            Ok::<_, std::io::Error>(String::from_utf8_lossy(&raw).into_owned())
        };

        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| WhoisError::Timeout {
                ip,
                server: server.to_string(),
            })?
            .map_err(|e| WhoisError::Query {
                ip,
                reason: e.to_string(),
            })
    }
}

/// Extracts the registry a directory server points at, if any.
fn referral_server(response: &str) -> Option<String> {
    for line in response.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        if key == "refer" || key == "referralserver" {
            let value = value
                .trim()
                .trim_start_matches("whois://")
                .trim_start_matches("rwhois://");
            // Referrals may carry an explicit port; we only speak 43.
            let host = value.split(':').next().unwrap_or(value);
            if !host.is_empty() {
                return Some(host.to_string());
            }
        }
    }
    None
}

/// Pulls the fields we persist out of a registry response. Registries name
/// the same data differently (ARIN `OrgName`, RIPE `org-name`, APNIC
/// `descr`), so each field accepts several keys; the first match wins.
fn parse_response(response: &str) -> WhoisInfo {
    let mut info = WhoisInfo::default();

    for line in response.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('%') || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        let key = key.trim().to_ascii_lowercase();

        match key.as_str() {
            "domain" | "domain name" => set_once(&mut info.domain_name, value),
            "registrar" => set_once(&mut info.registrar, value),
            "created" | "regdate" | "creation date" => set_once(&mut info.creation_date, value),
            "orgname" | "org-name" | "org" | "organisation" | "organization" | "owner"
            | "descr" => set_once(&mut info.org, value),
            "country" => set_once(&mut info.country, value),
            "netname" | "name" => set_once(&mut info.hostname, value),
            _ => {}
        }
    }

    info
}

fn set_once(field: &mut Option<String>, value: &str) {
    if field.is_none() {
        *field = Some(value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARIN_RESPONSE: &str = "\
#
# ARIN WHOIS data and services are subject to the Terms of Use
#

NetRange:       93.184.216.0 - 93.184.216.255
NetName:        EDGECAST-NETBLK-03
Organization:   Edgecast Inc. (EDGEC-20)
OrgName:        Edgecast Inc.
RegDate:        2008-06-02
Updated:        2012-01-09
Country:        US
";

    const IANA_RESPONSE: &str = "\
% IANA WHOIS server

refer:        whois.arin.net

inetnum:      93.0.0.0 - 93.255.255.255
organisation: RIPE NCC
status:       ALLOCATED
";

    #[test]
    fn parses_registry_fields() {
        let info = parse_response(ARIN_RESPONSE);
        assert_eq!(info.hostname.as_deref(), Some("EDGECAST-NETBLK-03"));
        // Organization appears before OrgName; first match wins.
        assert_eq!(info.org.as_deref(), Some("Edgecast Inc. (EDGEC-20)"));
        assert_eq!(info.creation_date.as_deref(), Some("2008-06-02"));
        assert_eq!(info.country.as_deref(), Some("US"));
        assert_eq!(info.domain_name, None);
        assert_eq!(info.registrar, None);
    }

    #[test]
    fn extracts_referral_target() {
        assert_eq!(
            referral_server(IANA_RESPONSE).as_deref(),
            Some("whois.arin.net")
        );
        assert_eq!(referral_server(ARIN_RESPONSE), None);
    }

    #[test]
    fn referral_strips_scheme_and_port() {
        let response = "ReferralServer: rwhois://rwhois.example.net:4321\n";
        assert_eq!(
            referral_server(response).as_deref(),
            Some("rwhois.example.net")
        );
    }

    #[test]
    fn sparse_responses_yield_sparse_info() {
        let info = parse_response("% nothing useful here\n");
        assert_eq!(info, WhoisInfo::default());
    }
}
