use prometheus::{
    Encoder, GaugeVec, Gauge, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
    register_gauge_vec_with_registry, register_gauge_with_registry,
    register_int_counter_with_registry, register_int_counter_vec_with_registry,
};
use lazy_static::lazy_static;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::System;

use crate::models::{KillOutcome, KillTarget, ProcessType, Record};

pub struct MetricsRegistry {
    registry: Registry,
    hostname: String,

    // 单条记录
    pub record_cpu_usage: GaugeVec,
    pub record_memory_bytes: GaugeVec,
    pub record_listening_ports: GaugeVec,

    // 汇总
    pub records: GaugeVec,
    pub scan_duration: Gauge,
    pub scans_total: IntCounter,
    pub scan_failures_total: IntCounter,
    pub terminations_total: IntCounterVec,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        let registry = Registry::new();

        let record_labels = &["kind", "app", "id", "hostname"];

        let record_cpu_usage = register_gauge_vec_with_registry!(
            Opts::new("devtool_cpu_usage_percent", "CPU usage percentage of a discovered dev process"),
            record_labels,
            registry
        ).unwrap();

        let record_memory_bytes = register_gauge_vec_with_registry!(
            Opts::new("devtool_memory_bytes", "Resident memory of a discovered dev process in bytes"),
            record_labels,
            registry
        ).unwrap();

        let record_listening_ports = register_gauge_vec_with_registry!(
            Opts::new("devtool_listening_ports", "Number of TCP ports a discovered dev process listens on"),
            record_labels,
            registry
        ).unwrap();

        let records = register_gauge_vec_with_registry!(
            Opts::new("devtool_records", "Discovered records per process type"),
            &["kind"],
            registry
        ).unwrap();

        let scan_duration = register_gauge_with_registry!(
            Opts::new("devtool_scan_duration_seconds", "Duration of the last discovery cycle"),
            registry
        ).unwrap();

        let scans_total = register_int_counter_with_registry!(
            Opts::new("devtool_scans_total", "Discovery cycles run"),
            registry
        ).unwrap();

        let scan_failures_total = register_int_counter_with_registry!(
            Opts::new("devtool_scan_failures_total", "Discovery cycles that failed"),
            registry
        ).unwrap();

        let terminations_total = register_int_counter_vec_with_registry!(
            Opts::new("devtool_terminations_total", "Termination attempts by target and result"),
            &["target", "result"],
            registry
        ).unwrap();

        Self {
            registry,
            hostname: System::host_name().unwrap_or_else(|| "unknown".to_string()),
            record_cpu_usage,
            record_memory_bytes,
            record_listening_ports,
            records,
            scan_duration,
            scans_total,
            scan_failures_total,
            terminations_total,
        }
    }

    pub fn render(&self) -> Result<String, Box<dyn std::error::Error>> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// 清空单条记录的指标，已消失的进程不会残留
    pub fn reset_records(&self) {
        self.record_cpu_usage.reset();
        self.record_memory_bytes.reset();
        self.record_listening_ports.reset();
        self.records.reset();
    }

    /// 用最近一次成功扫描的记录集重建 gauge
    pub fn observe_records(&self, records: &[Record]) {
        self.reset_records();

        for kind in ProcessType::ALL {
            self.records.with_label_values(&[kind.label()]).set(0.0);
        }

        for record in records {
            let kind = record.kind();
            let app = record.app_name().unwrap_or("");
            let id = record.identity();
            let labels = &[kind.label(), app, id.as_str(), self.hostname.as_str()];

            self.record_cpu_usage.with_label_values(labels).set(record.cpu() as f64);
            self.record_memory_bytes
                .with_label_values(labels)
                .set((record.rss() * 1024) as f64);
            self.record_listening_ports
                .with_label_values(labels)
                .set(record.ports().len() as f64);
            self.records.with_label_values(&[kind.label()]).inc();
        }
    }

    pub fn observe_scan(&self, elapsed: Duration, ok: bool) {
        self.scans_total.inc();
        self.scan_duration.set(elapsed.as_secs_f64());
        if !ok {
            self.scan_failures_total.inc();
        }
    }

    pub fn observe_termination(&self, outcome: &KillOutcome) {
        let target = match outcome.target {
            KillTarget::Pid { .. } => "process",
            KillTarget::Container { .. } => "container",
        };
        let result = if outcome.ok { "success" } else { "failure" };
        self.terminations_total.with_label_values(&[target, result]).inc();
    }
}

lazy_static! {
    pub static ref METRICS: Arc<MetricsRegistry> = Arc::new(MetricsRegistry::new());
}
