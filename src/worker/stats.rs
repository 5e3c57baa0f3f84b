use std::{sync::Arc, time::Duration};
use sysinfo::{Disks, System};
use tracing::debug;

use super::types::{SystemStats, Worker};
use crate::tasks::engine::ContainerEngine;

const MB: u64 = 1024 * 1024;

pub fn get_stats(sysinfo: &System, task_count: u64) -> SystemStats {
    SystemStats {
        cpu_usage: (sysinfo.global_cpu_usage() * 100.0).round() / 100.0,
        total_memory_mb: sysinfo.total_memory() / MB,
        used_memory_mb: sysinfo.used_memory() / MB,
        total_swap_mb: sysinfo.total_swap() / MB,
        used_swap_mb: sysinfo.used_swap() / MB,
        system_name: System::name().unwrap_or_else(|| "Unknown".to_string()),
        hostname: System::host_name().unwrap_or_else(|| "Unknown".to_string()),
        total_cpus: sysinfo.cpus().len() as u64,
        disk_usage: disk_usage(&Disks::new_with_refreshed_list()),
        task_count,
    }
}

fn disk_usage(disks: &Disks) -> f32 {
    let (used, total) = disks.iter().fold((0u64, 0u64), |(used, total), disk| {
        (
            used + disk.total_space().saturating_sub(disk.available_space()),
            total + disk.total_space(),
        )
    });
    if total == 0 {
        0.0
    } else {
        (used as f64 / total as f64 * 100.0) as f32
    }
}

impl<E> Worker<E> {
    pub async fn latest_stats(&self) -> Option<SystemStats> {
        self.stats.read().await.clone()
    }
}

/// Samples host statistics every `interval` and stores the latest on the
/// worker.
pub async fn collect_stats<E: ContainerEngine>(worker: Arc<Worker<E>>, interval: Duration) {
    let mut sysinfo = System::new();
    loop {
        sysinfo.refresh_cpu_usage();
        sysinfo.refresh_memory();

        let task_count = worker.task_count().await as u64;
        let stats = get_stats(&sysinfo, task_count);
        debug!(
            cpu_usage = stats.cpu_usage,
            used_memory_mb = stats.used_memory_mb,
            task_count,
            "collected stats"
        );
        *worker.stats.write().await = Some(stats);

        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_carry_the_task_count() {
        let mut sysinfo = System::new();
        sysinfo.refresh_memory();

        let stats = get_stats(&sysinfo, 7);

        assert_eq!(stats.task_count, 7);
        assert!(stats.used_memory_mb <= stats.total_memory_mb);
        assert!((0.0..=100.0).contains(&stats.disk_usage));
        assert!(!stats.hostname.is_empty());
    }
}
