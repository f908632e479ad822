//! Parsers for the `/proc` files that `sysinfo` does not cover: per-device
//! block I/O counters and the thread/stack fields of the process status.

use std::fs;

use compact_str::CompactString;

use crate::error::{CollectorError, CollectorResult};

use super::DiskIoCounters;

const DISKSTATS_PATH: &str = "/proc/diskstats";
const SELF_STATUS_PATH: &str = "/proc/self/status";

// ----------------------------------------------------------------------------
// /proc/diskstats
// ----------------------------------------------------------------------------

/// One line of /proc/diskstats, reduced to the byte counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiskStatLine {
    pub device: CompactString,
    pub sectors_read: u64,
    pub sectors_written: u64,
}

impl DiskStatLine {
    /// Sector size in bytes (fixed by the kernel for this file).
    const SECTOR_SIZE: u64 = 512;

    /// Parse a line from /proc/diskstats.
    /// Format: "   8       0 sda 12345 678 901234 5678 ..."
    pub fn parse(line: &str) -> Option<Self> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 14 {
            return None;
        }

        let device = CompactString::from(parts[2]);
        if device.starts_with("loop") || device.starts_with("ram") || device.starts_with("dm-") {
            return None;
        }

        Some(Self {
            device,
            sectors_read: parts[5].parse().ok()?,
            sectors_written: parts[9].parse().ok()?,
        })
    }

    /// Whole disks only; partitions would double count.
    pub fn is_whole_disk(&self) -> bool {
        let name = self.device.as_str();
        // nvme0n1 is a disk, nvme0n1p1 a partition
        if let Some(rest) = name.strip_prefix("nvme").or_else(|| name.strip_prefix("mmcblk")) {
            !rest.contains('p')
        } else {
            !name.ends_with(|c: char| c.is_ascii_digit())
        }
    }

    pub fn into_counters(self) -> DiskIoCounters {
        DiskIoCounters {
            device: self.device.into(),
            read_bytes: self.sectors_read.saturating_mul(Self::SECTOR_SIZE),
            write_bytes: self.sectors_written.saturating_mul(Self::SECTOR_SIZE),
        }
    }
}

/// Parse the whole-disk counters out of /proc/diskstats content.
pub fn parse_diskstats(content: &str) -> Vec<DiskIoCounters> {
    content
        .lines()
        .filter_map(DiskStatLine::parse)
        .filter(DiskStatLine::is_whole_disk)
        .map(DiskStatLine::into_counters)
        .collect()
}

pub fn read_diskstats() -> CollectorResult<Vec<DiskIoCounters>> {
    let content = fs::read_to_string(DISKSTATS_PATH)
        .map_err(|e| CollectorError::unavailable(DISKSTATS_PATH, e.to_string()))?;
    Ok(parse_diskstats(&content))
}

// ----------------------------------------------------------------------------
// /proc/self/status
// ----------------------------------------------------------------------------

/// Fields of /proc/self/status used by the collector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessStatus {
    pub threads: u64,
    /// Stack size in bytes
    pub stack_bytes: u64,
}

pub fn parse_status(content: &str) -> CollectorResult<ProcessStatus> {
    let mut status = ProcessStatus::default();
    let mut saw_threads = false;

    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();

        match key.trim() {
            "Threads" => {
                status.threads = value
                    .parse()
                    .map_err(|_| CollectorError::parse_failed(SELF_STATUS_PATH, format!("Threads: {value}")))?;
                saw_threads = true;
            }
            "VmStk" => {
                // "132 kB"
                let kb: u64 = value
                    .split_whitespace()
                    .next()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0);
                status.stack_bytes = kb * 1024;
            }
            _ => {}
        }
    }

    if !saw_threads {
        return Err(CollectorError::parse_failed(SELF_STATUS_PATH, "missing Threads field"));
    }
    Ok(status)
}

pub fn read_self_status() -> CollectorResult<ProcessStatus> {
    let content = fs::read_to_string(SELF_STATUS_PATH)
        .map_err(|e| CollectorError::unavailable(SELF_STATUS_PATH, e.to_string()))?;
    parse_status(&content)
}

/// Value of the `Threads:` line, scanning no further than needed.
pub fn parse_threads(content: &[u8]) -> Option<u64> {
    content
        .split(|b| *b == b'\n')
        .find_map(|line| line.strip_prefix(b"Threads:"))
        .and_then(|value| std::str::from_utf8(value).ok())
        .and_then(|value| value.trim().parse().ok())
}

/// Thread count of this process, for the profiler's per-call probe.
///
/// The status file is opened once and re-read from offset 0 with `pread`,
/// so a call costs one syscall and a line scan instead of open + read +
/// full parse.
#[cfg(target_os = "linux")]
pub fn read_self_threads() -> CollectorResult<u64> {
    use std::fs::File;
    use std::os::unix::fs::FileExt;

    use once_cell::sync::OnceCell;

    static STATUS: OnceCell<File> = OnceCell::new();

    let file = STATUS
        .get_or_try_init(|| File::open(SELF_STATUS_PATH))
        .map_err(|e| CollectorError::unavailable(SELF_STATUS_PATH, e.to_string()))?;

    let mut buf = [0u8; 4096];
    let mut len = 0;
    while len < buf.len() {
        match file.read_at(&mut buf[len..], len as u64) {
            Ok(0) => break,
            Ok(n) => len += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CollectorError::unavailable(SELF_STATUS_PATH, e.to_string())),
        }
    }

    match parse_threads(&buf[..len]) {
        Some(threads) => Ok(threads),
        // Threads sits in the first few hundred bytes; a miss means an
        // unexpected layout, so take the full parser's answer.
        None => read_self_status().map(|s| s.threads),
    }
}

#[cfg(not(target_os = "linux"))]
pub fn read_self_threads() -> CollectorResult<u64> {
    read_self_status().map(|s| s.threads)
}
