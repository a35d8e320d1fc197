//! Host-wide sampling via sysinfo

use super::HostSampler;
use crate::models::{utc_now, HostMetric};
use std::path::Path;
use std::sync::Mutex;
use sysinfo::{Disks, Networks, System};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Samples CPU, memory, disk and network usage of the local host
///
/// The `System` handle is kept between samples: CPU usage is computed from
/// the delta against the previous refresh, so the first sample after
/// construction may read low.
pub struct SysinfoHostSampler {
    system: Mutex<System>,
}

impl SysinfoHostSampler {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new_all()),
        }
    }
}

impl Default for SysinfoHostSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl HostSampler for SysinfoHostSampler {
    fn sample(&self) -> HostMetric {
        let mut sys = self.system.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        sys.refresh_cpu_usage();
        sys.refresh_memory();

        let (cpu_model, cpu_speed_mhz) = sys
            .cpus()
            .first()
            .map(|cpu| {
                let model = format!("{} {}", cpu.vendor_id(), cpu.brand());
                (model.trim().to_string(), cpu.frequency() as f64)
            })
            .unwrap_or_default();

        let mem_total_gb = sys.total_memory() as f64 / BYTES_PER_GB;
        let mem_used_gb = sys.used_memory() as f64 / BYTES_PER_GB;

        let disks = Disks::new_with_refreshed_list();
        let (disk_used_percent, disk_total_gb) = root_disk_usage(
            disks
                .list()
                .iter()
                .map(|d| (d.mount_point(), d.total_space(), d.available_space())),
        );

        let networks = Networks::new_with_refreshed_list();
        let (received, transmitted) = networks
            .list()
            .values()
            .fold((0u64, 0u64), |(rx, tx), data| {
                (
                    rx.saturating_add(data.total_received()),
                    tx.saturating_add(data.total_transmitted()),
                )
            });

        HostMetric {
            timestamp: utc_now(),
            cpu: sys.global_cpu_usage() as f64,
            cpu_model,
            cpu_cores: sys.cpus().len() as u32,
            cpu_speed_mhz,
            os: System::long_os_version().unwrap_or_else(|| std::env::consts::OS.to_string()),
            distro: System::distribution_id(),
            kernel: System::kernel_version().unwrap_or_default(),
            arch: std::env::consts::ARCH.to_string(),
            mem_used_percent: percent(mem_used_gb, mem_total_gb),
            mem_used_gb,
            mem_total_gb,
            uptime_secs: System::uptime(),
            disk_used_percent,
            disk_total_gb,
            network_in_mb: received as f64 / BYTES_PER_MB,
            network_out_mb: transmitted as f64 / BYTES_PER_MB,
        }
    }
}

fn percent(part: f64, whole: f64) -> f64 {
    if whole > 0.0 {
        part / whole * 100.0
    } else {
        0.0
    }
}

/// Usage of the `/` mount, or of the largest disk when `/` is not listed.
/// Returns (used percent, total GB).
fn root_disk_usage<'a>(disks: impl Iterator<Item = (&'a Path, u64, u64)>) -> (f64, f64) {
    let mut root = None;
    let mut largest: Option<(u64, u64)> = None;

    for (mount, total, available) in disks {
        if mount == Path::new("/") {
            root = Some((total, available));
            break;
        }
        if largest.map_or(true, |(t, _)| total > t) {
            largest = Some((total, available));
        }
    }

    match root.or(largest) {
        Some((total, available)) => {
            let used = total.saturating_sub(available) as f64;
            (percent(used, total as f64), total as f64 / BYTES_PER_GB)
        }
        None => (0.0, 0.0),
    }
}
