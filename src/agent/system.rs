//! Host system snapshot for worker registration
//!
//! Collects the hardware picture the coordinator stores alongside each
//! worker: core count, OS, memory, load averages, and per-filesystem
//! disk usage.

use std::net::UdpSocket;

use sysinfo::{Disks, System};

use crate::db::schemas::{DiskUsage, LoadAverage, SystemInfo};

const GIB: f64 = 1_073_741_824.0;
const MIB: u64 = 1024 * 1024;

/// Collect a system snapshot for registration
pub fn snapshot() -> SystemInfo {
    let mut system = System::new_all();
    system.refresh_all();
    let disks = Disks::new_with_refreshed_list();
    let load = System::load_average();

    SystemInfo {
        cpu_cores: num_cpus::get() as i32,
        os_type: System::long_os_version().unwrap_or_else(|| "unknown".to_string()),
        memory_mb: (system.total_memory() / MIB) as i64,
        architecture: std::env::consts::ARCH.to_string(),
        load_average: LoadAverage {
            one: load.one,
            five: load.five,
            fifteen: load.fifteen,
        },
        disk_usage: collect_disk_usage(&disks),
    }
}

fn collect_disk_usage(disks: &Disks) -> Vec<DiskUsage> {
    disks
        .list()
        .iter()
        .map(|disk| {
            let total = disk.total_space();
            let used = total.saturating_sub(disk.available_space());
            DiskUsage {
                name: disk.mount_point().to_string_lossy().to_string(),
                total_gb: total as f64 / GIB,
                used_gb: used as f64 / GIB,
            }
        })
        .collect()
}

/// Hostname reported to the coordinator
pub fn local_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Best-effort LAN IPv4 discovery
///
/// Connecting a UDP socket never sends a packet; it only asks the kernel
/// which source address it would pick for that destination.
pub fn lan_ip_v4() -> String {
    fn probe() -> Option<String> {
        let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
        socket.connect("8.8.8.8:80").ok()?;
        Some(socket.local_addr().ok()?.ip().to_string())
    }

    probe().unwrap_or_else(|| "127.0.0.1".to_string())
}
