use std::fs;
use std::process::Command;

use camino::Utf8Path;

use crate::error::HelixError;

/// Scratch-space measurement for admission control.
pub trait DiskMonitor: Send + Sync {
    fn free_bytes(&self, path: &Utf8Path) -> Result<u64, HelixError>;
}

#[derive(Debug, Clone, Default)]
pub struct SystemDiskMonitor;

impl DiskMonitor for SystemDiskMonitor {
    fn free_bytes(&self, path: &Utf8Path) -> Result<u64, HelixError> {
        let output = Command::new("df")
            .arg("--output=avail")
            .arg("-B1")
            .arg(path.as_str())
            .output()
            .map_err(|err| HelixError::Filesystem(format!("df {path}: {err}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(HelixError::Filesystem(format!("df {path}: {stderr}")));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .lines()
            .nth(1)
            .and_then(|line| line.trim().parse::<u64>().ok())
            .ok_or_else(|| HelixError::Filesystem(format!("unparseable df output for {path}")))
    }
}

/// Bytes currently on disk under `path`, zero if the directory is absent.
pub fn dir_size(path: &Utf8Path) -> u64 {
    let mut total = 0u64;
    let mut stack = vec![path.as_std_path().to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let entry_path = entry.path();
            if entry_path.is_dir() {
                stack.push(entry_path);
            } else if let Ok(metadata) = entry.metadata() {
                total += metadata.len();
            }
        }
    }
    total
}

/// Declared size of a set of source files; unreadable files count zero and
/// fail later at encryption time instead.
pub fn declared_size(paths: &[&str]) -> u64 {
    paths
        .iter()
        .filter_map(|path| fs::metadata(path).ok())
        .map(|metadata| metadata.len())
        .sum()
}

/// Single ledger for the admit/reserve arithmetic, so both pipelines and
/// their tests share one quota model. Admission never drives the running
/// balance below the configured floor.
#[derive(Debug, Clone)]
pub struct ReservationLedger {
    available: u64,
    floor: u64,
}

impl ReservationLedger {
    pub fn new(available: u64, floor: u64) -> Self {
        Self { available, floor }
    }

    pub fn available(&self) -> u64 {
        self.available
    }

    /// Admits a request only if the balance stays strictly above the floor
    /// afterwards; on success the balance is decremented.
    pub fn try_reserve(&mut self, bytes: u64) -> bool {
        let Some(remaining) = self.available.checked_sub(bytes) else {
            return false;
        };
        if remaining <= self.floor {
            return false;
        }
        self.available = remaining;
        true
    }

    pub fn release(&mut self, bytes: u64) {
        self.available = self.available.saturating_add(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TB: u64 = 1024 * 1024 * 1024 * 1024;

    #[test]
    fn reserve_respects_floor() {
        // 15 TB free, 5 TB floor: two 10 TB requests admit at most one.
        let mut ledger = ReservationLedger::new(15 * TB, 5 * TB);
        assert!(!ledger.try_reserve(10 * TB), "10 TB would land on the floor");
        assert!(ledger.try_reserve(9 * TB));
        assert!(!ledger.try_reserve(9 * TB));
        assert_eq!(ledger.available(), 6 * TB);
    }

    #[test]
    fn reserve_rejects_oversized_request() {
        let mut ledger = ReservationLedger::new(TB, 0);
        assert!(!ledger.try_reserve(2 * TB));
        assert_eq!(ledger.available(), TB);
    }

    #[test]
    fn release_restores_balance() {
        let mut ledger = ReservationLedger::new(10 * TB, TB);
        assert!(ledger.try_reserve(5 * TB));
        ledger.release(5 * TB);
        assert_eq!(ledger.available(), 10 * TB);
    }

    #[test]
    fn dir_size_of_missing_directory_is_zero() {
        let temp = tempfile::tempdir().unwrap();
        let path =
            camino::Utf8PathBuf::from_path_buf(temp.path().join("nope")).unwrap();
        assert_eq!(dir_size(&path), 0);
    }

    #[test]
    fn dir_size_sums_nested_files() {
        let temp = tempfile::tempdir().unwrap();
        let root = camino::Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        std::fs::create_dir_all(temp.path().join("sub")).unwrap();
        std::fs::write(temp.path().join("a.bin"), vec![0u8; 100]).unwrap();
        std::fs::write(temp.path().join("sub").join("b.bin"), vec![0u8; 50]).unwrap();
        assert_eq!(dir_size(&root), 150);
    }
}
