use parking_lot::Mutex;
use sysinfo::{Disks, Pid, System};

use crate::gateway::{ResourceProbe, SystemUsage};

/// Samples this process and the machine it runs on.
pub struct SysinfoProbe {
    pid: Option<Pid>,
    system: Mutex<System>,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        let mut system = System::new();
        // cpu usage is a delta between refreshes; prime it so the first sample is meaningful
        system.refresh_cpu();
        system.refresh_memory();
        Self {
            pid: sysinfo::get_current_pid().ok(),
            system: Mutex::new(system),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceProbe for SysinfoProbe {
    fn sample(&self) -> SystemUsage {
        let mut system = self.system.lock();
        system.refresh_cpu();
        system.refresh_memory();

        let total_memory = system.total_memory();
        let cpu_count = system.cpus().len().max(1) as f64;
        let process = self.pid.and_then(|pid| {
            system.refresh_process(pid);
            system
                .process(pid)
                .map(|p| (f64::from(p.cpu_usage()), p.memory()))
        });

        SystemUsage {
            cpu: process.map(|(cpu, _)| round1(cpu / cpu_count)),
            system_cpu: Some(round1(f64::from(system.global_cpu_info().cpu_usage()))),
            memory: process.and_then(|(_, bytes)| percent(bytes, total_memory)),
            system_memory: percent(system.used_memory(), total_memory),
            disk: disk_usage(),
        }
    }
}

fn disk_usage() -> Option<f64> {
    let disks = Disks::new_with_refreshed_list();
    let (total, available) = disks.list().iter().fold((0u64, 0u64), |(t, a), disk| {
        (t + disk.total_space(), a + disk.available_space())
    });
    percent(total.saturating_sub(available), total)
}

fn percent(part: u64, whole: u64) -> Option<f64> {
    (whole > 0).then(|| round1(part as f64 * 100.0 / whole as f64))
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
