//! Memory watchdog
//!
//! Polls process memory usage and fires the global shutdown once it goes
//! over the configured limit, so zones still get exported instead of the
//! process being killed with everything in memory.

use crate::shutdown::{ShutdownHandle, ShutdownReason};
use log::{debug, warn};
use std::time::Duration;
use tokio::task::JoinHandle;

pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

pub trait MemoryProbe: Send + Sync + 'static {
    /// Bytes currently in use, or `None` if they cannot be determined.
    fn used_bytes(&self) -> Option<u64>;
}

/// Reads the resident set size from `/proc/self/status`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessMemoryProbe;

impl MemoryProbe for ProcessMemoryProbe {
    fn used_bytes(&self) -> Option<u64> {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        parse_vm_rss(&status)
    }
}

fn parse_vm_rss(status: &str) -> Option<u64> {
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kib: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kib * 1024)
}

/// Spawns the watchdog. It exits after firing shutdown once.
pub fn spawn_memory_watchdog<P: MemoryProbe>(
    probe: P,
    limit: u64,
    poll: Duration,
    shutdown: ShutdownHandle,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(poll);
        let mut warned_unavailable = false;

        loop {
            timer.tick().await;

            let Some(used) = probe.used_bytes() else {
                if !warned_unavailable {
                    debug!("Memory usage unavailable, watchdog idle");
                    warned_unavailable = true;
                }
                continue;
            };

            if used > limit {
                warn!("Out of memory limit: total {} bytes", used);
                shutdown.trigger(ShutdownReason::MemoryLimit { used, limit });
                break;
            }
        }
    })
}
