//! Connection table sampling via procfs.
//!
//! Reads `/proc/net/tcp` and `/proc/net/tcp6`, maps socket inodes to owning
//! PIDs through `/proc/<pid>/fd`, and keeps only established entries with a
//! real remote address. Everything else (listening, closing, unspecified
//! peers) is dropped.

use crate::record::{RawConnection, TcpState};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SampleError {
    #[error("failed to read connection table {path}: {source}")]
    Table { path: String, source: io::Error },
}

pub struct Sampler {
    proc_root: PathBuf,
}

impl Sampler {
    pub fn new() -> Self {
        Self::with_root("/proc")
    }

    /// Sampler rooted at an alternate procfs path. Used by tests.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Sampler {
            proc_root: root.into(),
        }
    }

    /// Reads the current connection table. A read failure of the IPv4 table
    /// is fatal for the cycle; the IPv6 table is optional (not all hosts
    /// have one).
    pub fn sample(&self) -> Result<Vec<RawConnection>, SampleError> {
        let owners = self.socket_owners();

        let tcp_path = self.proc_root.join("net/tcp");
        let contents = fs::read_to_string(&tcp_path).map_err(|source| SampleError::Table {
            path: tcp_path.display().to_string(),
            source,
        })?;
        let mut connections = parse_table(&contents, false, &owners);

        let tcp6_path = self.proc_root.join("net/tcp6");
        if let Ok(contents) = fs::read_to_string(&tcp6_path) {
            connections.extend(parse_table(&contents, true, &owners));
        }

        Ok(connections)
    }

    /// Maps socket inodes to owning PIDs by walking `/proc/<pid>/fd`.
    /// Entries we cannot read (other users' processes, raced exits) are
    /// skipped; those connections surface with no PID.
    fn socket_owners(&self) -> HashMap<u64, u32> {
        let mut owners = HashMap::new();
        let Ok(entries) = fs::read_dir(&self.proc_root) else {
            return owners;
        };
        for entry in entries.flatten() {
            let Some(pid) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<u32>().ok())
            else {
                continue;
            };
            let Ok(fds) = fs::read_dir(entry.path().join("fd")) else {
                continue;
            };
            for fd in fds.flatten() {
                let Ok(target) = fs::read_link(fd.path()) else {
                    continue;
                };
                if let Some(inode) = target
                    .to_str()
                    .and_then(|t| t.strip_prefix("socket:["))
                    .and_then(|t| t.strip_suffix(']'))
                    .and_then(|t| t.parse::<u64>().ok())
                {
                    owners.insert(inode, pid);
                }
            }
        }
        owners
    }
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses one procfs table, keeping established remote-addressed rows.
/// Malformed lines are skipped rather than failing the whole sample.
fn parse_table(contents: &str, v6: bool, owners: &HashMap<u64, u32>) -> Vec<RawConnection> {
    contents
        .lines()
        .skip(1)
        .filter_map(|line| parse_row(line, v6, owners))
        .filter(|conn| conn.state == TcpState::ESTABLISHED && !conn.remote_addr.is_unspecified())
        .collect()
}

fn parse_row(line: &str, v6: bool, owners: &HashMap<u64, u32>) -> Option<RawConnection> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 10 {
        return None;
    }

    let (local_addr, local_port) = parse_endpoint(fields[1], v6)?;
    let (remote_addr, remote_port) = parse_endpoint(fields[2], v6)?;
    let state = TcpState(u8::from_str_radix(fields[3], 16).ok()?);
    let inode = fields[9].parse::<u64>().ok()?;
    // Inode 0 means the socket is in a state with no open fd (e.g. TIME_WAIT).
    let pid = (inode != 0)
        .then(|| owners.get(&inode).copied())
        .flatten();

    Some(RawConnection {
        local_addr,
        local_port,
        remote_addr,
        remote_port,
        state,
        pid,
    })
}

/// Parses a procfs `ADDR:PORT` endpoint. Addresses are hex dumps of the
/// kernel's in-memory representation, so each 32-bit group is byte-swapped.
fn parse_endpoint(field: &str, v6: bool) -> Option<(IpAddr, u16)> {
    let (addr, port) = field.split_once(':')?;
    let port = u16::from_str_radix(port, 16).ok()?;
    let addr = if v6 {
        if addr.len() != 32 {
            return None;
        }
        let mut octets = [0u8; 16];
        for (i, chunk) in octets.chunks_exact_mut(4).enumerate() {
            let word = u32::from_str_radix(&addr[i * 8..(i + 1) * 8], 16).ok()?;
            chunk.copy_from_slice(&word.swap_bytes().to_be_bytes());
        }
        IpAddr::V6(Ipv6Addr::from(octets))
    } else {
        let word = u32::from_str_radix(addr, 16).ok()?;
        IpAddr::V4(Ipv4Addr::from(word.swap_bytes()))
    };
    Some((addr, port))
}
