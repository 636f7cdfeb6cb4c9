//! Record types shared by the monitor pipeline and the analyzer.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// TCP state as reported by the OS connection table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpState(pub u8);

impl TcpState {
    pub const ESTABLISHED: TcpState = TcpState(0x01);
}

/// Key used to decide whether a connection has already been recorded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionIdentity {
    pub remote_ip: IpAddr,
    pub remote_port: u16,
    pub local_port: u16,
}

/// One row of the OS connection table.
#[derive(Debug, Clone)]
pub struct RawConnection {
    pub local_addr: IpAddr,
    pub local_port: u16,
    pub remote_addr: IpAddr,
    pub remote_port: u16,
    pub state: TcpState,
    pub pid: Option<u32>,
}

impl RawConnection {
    pub fn identity(&self) -> ConnectionIdentity {
        ConnectionIdentity {
            remote_ip: self.remote_addr,
            remote_port: self.remote_port,
            local_port: self.local_port,
        }
    }
}

/// Outcome of a single metadata lookup.
///
/// Persisted either as the populated object or as `{"error": "..."}`; a
/// failed lookup is data inside the record, not a pipeline error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Lookup<T> {
    Failed(LookupFailure),
    Resolved(T),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupFailure {
    pub error: String,
}

impl<T> Lookup<T> {
    pub fn from_result<E: fmt::Display>(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Lookup::Resolved(value),
            Err(e) => Lookup::Failed(LookupFailure {
                error: e.to_string(),
            }),
        }
    }

    pub fn resolved(&self) -> Option<&T> {
        match self {
            Lookup::Resolved(value) => Some(value),
            Lookup::Failed(_) => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Lookup::Failed(_))
    }
}

/// Attributes of the process owning a connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessDetails {
    pub name: String,
    pub executable_path: String,
    pub command_line: Vec<String>,
    pub username: String,
    pub created_at: DateTime<Local>,
}

/// Reverse-DNS result for a remote address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsInfo {
    pub hostname: String,
    pub aliases: Vec<String>,
    pub ip_addresses: Vec<IpAddr>,
}

/// Registration metadata for a remote address.
///
/// Registry responses are loosely structured; every field may be absent even
/// when the query itself succeeded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhoisInfo {
    pub domain_name: Option<String>,
    pub registrar: Option<String>,
    pub creation_date: Option<String>,
    pub org: Option<String>,
    pub country: Option<String>,
    pub hostname: Option<String>,
}

/// The unit of persisted state: one enriched connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub timestamp: DateTime<Local>,
    pub remote_ip: IpAddr,
    pub remote_port: u16,
    pub local_port: u16,
    /// `None` when the sampled entry carried no owning PID.
    pub process: Option<Lookup<ProcessDetails>>,
    pub dns_info: Lookup<DnsInfo>,
    pub whois_info: Lookup<WhoisInfo>,
}

impl ConnectionRecord {
    /// Assembles a record from a sampled connection and its three lookup
    /// outcomes. The timestamp is taken here, at enrichment time.
    pub fn assemble(
        conn: &RawConnection,
        process: Option<Lookup<ProcessDetails>>,
        dns_info: Lookup<DnsInfo>,
        whois_info: Lookup<WhoisInfo>,
    ) -> Self {
        ConnectionRecord {
            timestamp: Local::now(),
            remote_ip: conn.remote_addr,
            remote_port: conn.remote_port,
            local_port: conn.local_port,
            process,
            dns_info,
            whois_info,
        }
    }
}
