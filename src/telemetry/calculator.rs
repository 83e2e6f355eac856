// Per-record metric derivation (CPU %, memory %, network totals)

use crate::models::UsageSnapshot;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Metrics {
    pub cpu_percent: f64,
    pub mem_percent: f64,
    pub net_rx: u64,
    pub net_tx: u64,
}

/// Derive metrics from a single snapshot. Needs no state from earlier records.
///
/// CPU is the container's share of elapsed system CPU time, scaled by online
/// cores (100% per core). No elapsed system time yields 0. A counter that
/// went backwards counts as no usage.
pub fn calculate(s: &UsageSnapshot) -> Metrics {
    let cpu_delta = s.cpu_total.saturating_sub(s.precpu_total) as f64;
    let system_delta = s.system_cpu.saturating_sub(s.presystem_cpu) as f64;
    let online = s.online_cpus as f64;

    let cpu_percent = if system_delta > 0.0 && online > 0.0 {
        (cpu_delta / system_delta) * online * 100.0
    } else if system_delta > 0.0 {
        (cpu_delta / system_delta) * 100.0
    } else {
        0.0
    };
    let cpu_percent = cpu_percent.clamp(0.0, online.max(1.0) * 100.0);

    let mem_percent = if s.mem_limit > 0 {
        (s.mem_usage as f64 / s.mem_limit as f64) * 100.0
    } else {
        0.0
    };

    let (net_rx, net_tx) = s.networks.values().fold((0u64, 0u64), |(rx, tx), n| {
        (rx.saturating_add(n.rx_bytes), tx.saturating_add(n.tx_bytes))
    });

    Metrics {
        cpu_percent,
        mem_percent,
        net_rx,
        net_tx,
    }
}
