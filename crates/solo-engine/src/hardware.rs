//! Hardware probing for placement decisions
//!
//! Detection uses filesystem checks and `nvidia-smi` rather than linking to
//! GPU libraries, so it works the same with or without the `cuda` feature.

use crate::device::DeviceClass;
use serde::{Deserialize, Serialize};
use std::path::Path;
use sysinfo::{MemoryRefreshKind, RefreshKind, System};

/// Snapshot of the host's compute resources
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareInfo {
    /// Whether an NVIDIA device node is present
    pub cuda_available: bool,
    /// VRAM of the first CUDA device in bytes (0 if unknown or absent)
    pub vram_bytes: u64,
    /// Total system RAM in bytes
    pub total_ram_bytes: u64,
    /// Available system RAM in bytes at detection time
    pub available_ram_bytes: u64,
    /// Number of logical CPU cores
    pub cpu_cores: usize,
}

impl HardwareInfo {
    /// Probe the host. Runs synchronously (spawns `nvidia-smi`).
    pub fn detect() -> Self {
        let cuda_vram = detect_cuda();
        Self {
            cuda_available: cuda_vram.is_some(),
            vram_bytes: cuda_vram.unwrap_or(0),
            total_ram_bytes: 0,
            available_ram_bytes: 0,
            cpu_cores: num_cpus(),
        }
        .with_memory()
    }

    fn with_memory(mut self) -> Self {
        let (total, available) = memory_snapshot();
        self.total_ram_bytes = total;
        self.available_ram_bytes = available;
        self
    }

    /// Device an `auto` placement should start from.
    pub fn preferred_device(&self) -> DeviceClass {
        if self.cuda_available {
            DeviceClass::Gpu(0)
        } else {
            DeviceClass::Cpu
        }
    }
}

/// Current `(total, available)` system RAM in bytes.
///
/// sysinfo reports 0 available on platforms where it cannot tell; callers
/// should treat 0 as "unknown".
pub fn memory_snapshot() -> (u64, u64) {
    let mut sys = System::new_with_specifics(
        RefreshKind::new().with_memory(MemoryRefreshKind::everything()),
    );
    sys.refresh_memory();
    (sys.total_memory(), sys.available_memory())
}

/// Returns estimated VRAM in bytes if CUDA is available, None otherwise.
///
/// Checks for the `/dev/nvidia0` device node first, then asks `nvidia-smi`
/// for the memory size.
fn detect_cuda() -> Option<u64> {
    if !Path::new("/dev/nvidia0").exists() {
        return None;
    }

    let output = std::process::Command::new("nvidia-smi")
        .args(["--query-gpu=memory.total", "--format=csv,noheader,nounits"])
        .output()
        .ok();

    let Some(output) = output.filter(|o| o.status.success()) else {
        // Device node exists but nvidia-smi is missing or failed.
        return Some(0);
    };

    // nvidia-smi returns MiB
    let stdout = String::from_utf8_lossy(&output.stdout);
    let mib = stdout
        .lines()
        .next()
        .and_then(|l| l.trim().parse::<u64>().ok())
        .unwrap_or(0);
    Some(mib * 1024 * 1024)
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_ram_nonzero() {
        let info = HardwareInfo::detect();
        assert!(info.total_ram_bytes > 0, "total RAM must be > 0");
        assert!(info.cpu_cores > 0, "cpu cores must be > 0");
    }

    #[test]
    fn test_preferred_device_follows_cuda() {
        let mut info = HardwareInfo::detect();
        info.cuda_available = false;
        assert_eq!(info.preferred_device(), DeviceClass::Cpu);
        info.cuda_available = true;
        assert_eq!(info.preferred_device(), DeviceClass::Gpu(0));
    }

    #[test]
    fn test_hardware_info_serde_roundtrip() {
        let info = HardwareInfo::detect();
        let json = serde_json::to_string(&info).expect("serialize");
        let back: HardwareInfo = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(info.cuda_available, back.cuda_available);
        assert_eq!(info.total_ram_bytes, back.total_ram_bytes);
    }
}
