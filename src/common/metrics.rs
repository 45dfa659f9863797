//! Coordinator metrics
//!
//! Lock-free counters, gauges and latency histograms, rendered in the
//! Prometheus text format. One registry per coordinator instance.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Histogram bucket boundaries for latency measurements (in milliseconds)
const LATENCY_BUCKETS: [f64; 11] = [
    1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0,
];

/// A simple histogram implementation for latency tracking
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<AtomicU64>,
    boundaries: Vec<f64>,
    sum: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    /// Create a new histogram with default latency buckets
    pub fn new() -> Self {
        Self::with_buckets(&LATENCY_BUCKETS)
    }

    /// Create a histogram with custom bucket boundaries
    pub fn with_buckets(boundaries: &[f64]) -> Self {
        Self {
            buckets: (0..=boundaries.len()).map(|_| AtomicU64::new(0)).collect(),
            boundaries: boundaries.to_vec(),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Record a value in the histogram
    pub fn observe(&self, value: f64) {
        let bucket_idx = self
            .boundaries
            .iter()
            .position(|&boundary| value <= boundary)
            .unwrap_or(self.boundaries.len());

        self.buckets[bucket_idx].fetch_add(1, Ordering::Relaxed);
        // Stored as microseconds
        self.sum
            .fetch_add((value * 1000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Cumulative bucket counts, ending with the +Inf bucket
    pub fn get_buckets(&self) -> Vec<(f64, u64)> {
        let mut cumulative = 0u64;
        let mut result = Vec::with_capacity(self.boundaries.len() + 1);

        for (i, &boundary) in self.boundaries.iter().enumerate() {
            cumulative += self.buckets[i].load(Ordering::Relaxed);
            result.push((boundary, cumulative));
        }

        cumulative += self.buckets[self.boundaries.len()].load(Ordering::Relaxed);
        result.push((f64::INFINITY, cumulative));

        result
    }

    pub fn sum(&self) -> f64 {
        self.sum.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, v: u64) {
        self.value.store(v, Ordering::Relaxed);
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Per admin command metrics
#[derive(Debug, Default)]
pub struct CommandMetrics {
    pub total: Counter,
    pub failed: Counter,
    pub latency: Histogram,
}

/// Metrics registry owned by a coordinator
#[derive(Debug)]
pub struct CoordinatorMetrics {
    commands: Mutex<BTreeMap<&'static str, Arc<CommandMetrics>>>,

    pub cas_conflicts: Counter,
    pub topology_refreshes: Counter,
    pub watch_resyncs: Counter,
    pub elections_started: Counter,
    pub elections_won: Counter,
    pub leaders_lost: Counter,
    pub waits_timed_out: Counter,
    pub active_waiters: Gauge,

    start_time: Instant,
}

impl CoordinatorMetrics {
    pub fn new() -> Self {
        Self {
            commands: Mutex::new(BTreeMap::new()),
            cas_conflicts: Counter::new(),
            topology_refreshes: Counter::new(),
            watch_resyncs: Counter::new(),
            elections_started: Counter::new(),
            elections_won: Counter::new(),
            leaders_lost: Counter::new(),
            waits_timed_out: Counter::new(),
            active_waiters: Gauge::new(),
            start_time: Instant::now(),
        }
    }

    /// Get or create metrics for a command
    pub fn command(&self, name: &'static str) -> Arc<CommandMetrics> {
        let mut commands = self.commands.lock().unwrap_or_else(|e| e.into_inner());
        commands.entry(name).or_default().clone()
    }

    /// Record one admin command execution
    pub fn record_command(&self, name: &'static str, duration: Duration, success: bool) {
        let command = self.command(name);
        command.total.inc();
        command.latency.observe(duration.as_secs_f64() * 1000.0);
        if !success {
            command.failed.inc();
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-compatible metrics output
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();

        let counters: [(&str, &str, u64); 7] = [
            ("cas_conflicts_total", "Conditional writes rejected by a version check", self.cas_conflicts.get()),
            ("topology_refreshes_total", "Collection re-fetches from the metadata store", self.topology_refreshes.get()),
            ("watch_resyncs_total", "Full resyncs after dropped store events", self.watch_resyncs.get()),
            ("elections_started_total", "Shard elections entering the pending phase", self.elections_started.get()),
            ("elections_won_total", "Committed leader elections", self.elections_won.get()),
            ("leaders_lost_total", "Leaders lost through removal or node loss", self.leaders_lost.get()),
            ("waits_timed_out_total", "Convergence waits that hit their deadline", self.waits_timed_out.get()),
        ];
        for (name, help, value) in counters {
            metric_header(&mut out, name, help, "counter");
            let _ = writeln!(out, "shardkeeper_{} {}", name, value);
        }

        metric_header(&mut out, "active_waiters", "Pending convergence waits", "gauge");
        let _ = writeln!(out, "shardkeeper_active_waiters {}", self.active_waiters.get());

        metric_header(&mut out, "uptime_seconds", "Coordinator uptime in seconds", "gauge");
        let _ = writeln!(out, "shardkeeper_uptime_seconds {}", self.uptime_seconds());

        let commands = self.commands.lock().unwrap_or_else(|e| e.into_inner());

        metric_header(&mut out, "commands_total", "Admin commands executed", "counter");
        for (name, metrics) in commands.iter() {
            let _ = writeln!(
                out,
                "shardkeeper_commands_total{{command=\"{}\"}} {}",
                name,
                metrics.total.get()
            );
        }

        metric_header(&mut out, "commands_failed_total", "Admin commands that failed", "counter");
        for (name, metrics) in commands.iter() {
            let _ = writeln!(
                out,
                "shardkeeper_commands_failed_total{{command=\"{}\"}} {}",
                name,
                metrics.failed.get()
            );
        }

        metric_header(&mut out, "command_duration_ms", "Admin command duration in milliseconds", "histogram");
        for (name, metrics) in commands.iter() {
            for (le, count) in metrics.latency.get_buckets() {
                let le = if le.is_infinite() {
                    "+Inf".to_string()
                } else {
                    le.to_string()
                };
                let _ = writeln!(
                    out,
                    "shardkeeper_command_duration_ms_bucket{{command=\"{}\",le=\"{}\"}} {}",
                    name, le, count
                );
            }
            let _ = writeln!(
                out,
                "shardkeeper_command_duration_ms_sum{{command=\"{}\"}} {}",
                name,
                metrics.latency.sum()
            );
            let _ = writeln!(
                out,
                "shardkeeper_command_duration_ms_count{{command=\"{}\"}} {}",
                name,
                metrics.latency.count()
            );
        }

        out
    }
}

impl Default for CoordinatorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn metric_header(out: &mut String, name: &str, help: &str, kind: &str) {
    let _ = writeln!(out, "# HELP shardkeeper_{} {}", name, help);
    let _ = writeln!(out, "# TYPE shardkeeper_{} {}", name, kind);
}
