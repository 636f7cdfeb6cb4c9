//! Process metadata lookup backed by sysinfo.

use crate::record::ProcessDetails;
use chrono::{DateTime, Local};
use log::debug;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use sysinfo::{Pid, PidExt, ProcessExt, System, SystemExt, UserExt};
use thiserror::Error;

/// Lookup failures are recoverable: a process exiting between sampling and
/// enrichment is expected and common, and both kinds end up as error data
/// inside the record.
#[derive(Debug, Clone, Error)]
pub enum ProcessLookupError {
    #[error("could not access process info for PID {0}: no such process")]
    NoSuchProcess(u32),
    #[error("could not access process info for PID {0}: access denied")]
    AccessDenied(u32),
}

pub struct ProcessResolver {
    system: System,
    cache: HashMap<u32, (ProcessDetails, Instant)>,
    cache_ttl: Duration,
}

impl ProcessResolver {
    pub fn new(cache_ttl: Duration) -> Self {
        let mut system = System::new();
        system.refresh_users_list();
        ProcessResolver {
            system,
            cache: HashMap::new(),
            cache_ttl,
        }
    }

    pub fn resolve(&mut self, pid: u32) -> Result<ProcessDetails, ProcessLookupError> {
        if let Some((details, cached_at)) = self.cache.get(&pid) {
            if cached_at.elapsed() < self.cache_ttl {
                debug!("process cache hit for PID {pid}");
                return Ok(details.clone());
            }
        }

        let sys_pid = Pid::from_u32(pid);
        if !self.system.refresh_process(sys_pid) {
            return Err(ProcessLookupError::NoSuchProcess(pid));
        }
        let process = self
            .system
            .process(sys_pid)
            .ok_or(ProcessLookupError::NoSuchProcess(pid))?;

        // /proc/<pid>/exe is only readable for our own processes unless we
        // run privileged; sysinfo reports an unreadable link as empty.
        let executable = process.exe();
        if executable.as_os_str().is_empty() {
            return Err(ProcessLookupError::AccessDenied(pid));
        }

        let username = process
            .user_id()
            .and_then(|uid| {
                self.system
                    .users()
                    .iter()
                    .find(|user| user.id() == uid)
                    .map(|user| user.name().to_string())
            })
            .unwrap_or_else(|| "unknown".to_string());

        let created_at = DateTime::from_timestamp(process.start_time() as i64, 0)
            .unwrap_or(DateTime::UNIX_EPOCH)
            .with_timezone(&Local);

        let details = ProcessDetails {
            name: process.name().to_string(),
            executable_path: executable.display().to_string(),
            command_line: process.cmd().to_vec(),
            username,
            created_at,
        };
        self.cache.insert(pid, (details.clone(), Instant::now()));
        Ok(details)
    }
}
