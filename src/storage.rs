//! Storage-medium probing for worker-count tuning.
//!
//! Solid-state storage tolerates far more concurrent readers than spinning
//! disks, so the worker pool is sized from the CPU count and a best-effort
//! guess at the medium under the scanned paths. The guess comes from a
//! platform diagnostic command run with a short timeout. Any failure there
//! just means the rotational default is used: the hint only affects
//! parallelism, never which files are found.

use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Upper bound on workers when storage is solid-state (or probed but unclassified).
pub const MAX_SOLID_STATE_WORKERS: usize = 64;
/// Upper bound on workers for rotational disks and failed probes.
pub const MAX_ROTATIONAL_WORKERS: usize = 8;

const SOLID_STATE_CPU_FACTOR: usize = 8;
const ROTATIONAL_CPU_FACTOR: usize = 2;
const FALLBACK_CPU_COUNT: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMedium {
    SolidState,
    Rotational,
    /// The probe ran but its output did not say either way.
    Unknown,
}

/// Worker-count suggestion plus what it was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageHint {
    pub workers: usize,
    pub medium: StorageMedium,
    /// True when the diagnostic command ran to completion.
    pub probed: bool,
}

impl StorageHint {
    /// Hint used when probing is skipped or fails.
    pub fn rotational_default(cpus: usize) -> Self {
        Self {
            workers: rotational_workers(cpus),
            medium: StorageMedium::Unknown,
            probed: false,
        }
    }

    /// Hint for a probe that completed and classified the medium (or not).
    pub fn from_probe(cpus: usize, medium: StorageMedium) -> Self {
        let workers = match medium {
            StorageMedium::Rotational => rotational_workers(cpus),
            StorageMedium::SolidState | StorageMedium::Unknown => solid_state_workers(cpus),
        };
        Self {
            workers,
            medium,
            probed: true,
        }
    }
}

fn solid_state_workers(cpus: usize) -> usize {
    (cpus * SOLID_STATE_CPU_FACTOR).clamp(1, MAX_SOLID_STATE_WORKERS)
}

fn rotational_workers(cpus: usize) -> usize {
    (cpus * ROTATIONAL_CPU_FACTOR).clamp(1, MAX_ROTATIONAL_WORKERS)
}

/// Hardware concurrency, or a conservative guess if it cannot be read.
pub fn cpu_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(FALLBACK_CPU_COUNT)
}

/// Run the platform probe and turn the answer into a worker-count hint.
pub async fn probe_storage(timeout: Duration) -> StorageHint {
    let cpus = cpu_count();

    let Some((mut command, parse)) = probe_command() else {
        debug!("no storage probe for this platform");
        return StorageHint::rotational_default(cpus);
    };

    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    match tokio::time::timeout(timeout, command.output()).await {
        Ok(Ok(output)) if output.status.success() => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let medium = parse(&stdout);
            debug!(?medium, cpus, "storage probe completed");
            StorageHint::from_probe(cpus, medium)
        }
        Ok(Ok(output)) => {
            debug!(status = %output.status, "storage probe exited with failure");
            StorageHint::rotational_default(cpus)
        }
        Ok(Err(e)) => {
            debug!(error = %e, "storage probe could not start");
            StorageHint::rotational_default(cpus)
        }
        Err(_) => {
            debug!(?timeout, "storage probe timed out");
            StorageHint::rotational_default(cpus)
        }
    }
}

type ProbeParser = fn(&str) -> StorageMedium;

#[cfg(target_os = "linux")]
fn probe_command() -> Option<(Command, ProbeParser)> {
    let mut cmd = Command::new("lsblk");
    cmd.args(["-d", "-n", "-o", "NAME,ROTA"]);
    Some((cmd, parse_lsblk))
}

#[cfg(target_os = "macos")]
fn probe_command() -> Option<(Command, ProbeParser)> {
    let mut cmd = Command::new("diskutil");
    cmd.args(["info", "/"]);
    Some((cmd, parse_diskutil))
}

#[cfg(windows)]
fn probe_command() -> Option<(Command, ProbeParser)> {
    let mut cmd = Command::new("powershell");
    cmd.args([
        "-NoProfile",
        "-Command",
        "Get-PhysicalDisk | Select-Object MediaType",
    ]);
    Some((cmd, parse_physical_disk))
}

#[cfg(not(any(target_os = "linux", target_os = "macos", windows)))]
fn probe_command() -> Option<(Command, ProbeParser)> {
    None
}

/// `lsblk -d -n -o NAME,ROTA`: one disk per line, ROTA `0` means non-rotational.
pub fn parse_lsblk(output: &str) -> StorageMedium {
    let mut saw_rotational = false;
    for line in output.lines() {
        match line.split_whitespace().last() {
            Some("0") => return StorageMedium::SolidState,
            Some("1") => saw_rotational = true,
            _ => {}
        }
    }
    if saw_rotational {
        StorageMedium::Rotational
    } else {
        StorageMedium::Unknown
    }
}

/// `diskutil info /`: looks for the `Solid State: Yes|No` line.
pub fn parse_diskutil(output: &str) -> StorageMedium {
    for line in output.lines() {
        let line = line.trim();
        if let Some(value) = line.strip_prefix("Solid State:") {
            return match value.trim() {
                "Yes" => StorageMedium::SolidState,
                "No" => StorageMedium::Rotational,
                _ => StorageMedium::Unknown,
            };
        }
    }
    StorageMedium::Unknown
}

/// `Get-PhysicalDisk | Select-Object MediaType`: a table of `SSD` / `HDD` rows.
pub fn parse_physical_disk(output: &str) -> StorageMedium {
    let kinds: Vec<&str> = output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if kinds.iter().any(|k| k.eq_ignore_ascii_case("SSD")) {
        StorageMedium::SolidState
    } else if kinds.iter().any(|k| k.eq_ignore_ascii_case("HDD")) {
        StorageMedium::Rotational
    } else {
        StorageMedium::Unknown
    }
}
