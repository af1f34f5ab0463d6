//! The fixed set of camera metric series and their text exposition.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::Arc;

use parking_lot::RwLock;

/// Content type of the text exposition format.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// A gauge family with `N` labels.
///
/// Label values are the sole identity of a series: setting the same labels
/// again overwrites the previous value.
#[derive(Debug)]
pub struct GaugeFamily<const N: usize> {
    name: &'static str,
    help: &'static str,
    label_names: [&'static str; N],
    series: RwLock<BTreeMap<[String; N], f64>>,
}

impl<const N: usize> GaugeFamily<N> {
    pub fn new(name: &'static str, help: &'static str, label_names: [&'static str; N]) -> Self {
        Self {
            name,
            help,
            label_names,
            series: RwLock::new(BTreeMap::new()),
        }
    }

    /// Set the value of the series identified by `labels`.
    pub fn set(&self, labels: [&str; N], value: f64) {
        self.series.write().insert(labels.map(str::to_owned), value);
    }

    /// Remove the series identified by `labels`.
    pub fn remove(&self, labels: [&str; N]) -> bool {
        self.series.write().remove(&labels.map(str::to_owned)).is_some()
    }

    /// Current value of the series identified by `labels`.
    pub fn get(&self, labels: [&str; N]) -> Option<f64> {
        self.series.read().get(&labels.map(str::to_owned)).copied()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn len(&self) -> usize {
        self.series.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.read().is_empty()
    }

    fn encode(&self, output: &mut String) {
        writeln!(output, "# HELP {} {}", self.name, escape_help(self.help)).ok();
        writeln!(output, "# TYPE {} gauge", self.name).ok();

        for (values, value) in self.series.read().iter() {
            let labels: Vec<(&str, &str)> = self
                .label_names
                .iter()
                .copied()
                .zip(values.iter().map(String::as_str))
                .collect();
            writeln!(
                output,
                "{}{} {}",
                self.name,
                format_labels(&labels),
                format_value(*value)
            )
            .ok();
        }
    }
}

/// An info family labeled by camera name.
///
/// Each camera carries one string attribute, exposed as a `_info` gauge with
/// value 1 and the attribute as an extra label.
#[derive(Debug)]
pub struct InfoFamily {
    name: &'static str,
    help: &'static str,
    attribute: &'static str,
    series: RwLock<BTreeMap<String, String>>,
}

impl InfoFamily {
    pub fn new(name: &'static str, help: &'static str, attribute: &'static str) -> Self {
        Self {
            name,
            help,
            attribute,
            series: RwLock::new(BTreeMap::new()),
        }
    }

    /// Set the attribute for the camera `name`, replacing any previous value.
    pub fn set(&self, name: &str, value: &str) {
        self.series
            .write()
            .insert(name.to_string(), value.to_string());
    }

    /// Current attribute for the camera `name`.
    pub fn get(&self, name: &str) -> Option<String> {
        self.series.read().get(name).cloned()
    }

    /// Exposed metric name, including the `_info` suffix.
    pub fn exposed_name(&self) -> String {
        format!("{}_info", self.name)
    }

    pub fn len(&self) -> usize {
        self.series.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.read().is_empty()
    }

    fn encode(&self, output: &mut String) {
        let name = self.exposed_name();
        writeln!(output, "# HELP {} {}", name, escape_help(self.help)).ok();
        writeln!(output, "# TYPE {} gauge", name).ok();

        for (camera, value) in self.series.read().iter() {
            let labels = [("name", camera.as_str()), (self.attribute, value.as_str())];
            writeln!(output, "{}{} 1", name, format_labels(&labels)).ok();
        }
    }
}

/// Every series the exporter maintains, one field per metric.
#[derive(Debug)]
pub struct MetricSet {
    pub name_available: GaugeFamily<1>,
    pub model: InfoFamily,
    pub cpu_load: GaugeFamily<1>,
    pub memory_used: GaugeFamily<1>,
    pub memory_total: GaugeFamily<1>,
    pub host: InfoFamily,
    pub mac: InfoFamily,
    pub firmware_version: InfoFamily,
    pub managed: GaugeFamily<1>,
    pub last_seen: GaugeFamily<1>,
    pub state: GaugeFamily<2>,
    pub last_recording_start_time: GaugeFamily<1>,
}

impl MetricSet {
    pub fn new() -> Self {
        Self {
            name_available: GaugeFamily::new(
                "camera_name_available",
                "Is Camera Name available",
                ["name"],
            ),
            model: InfoFamily::new("camera_model", "Camera Model", "camera_model"),
            cpu_load: GaugeFamily::new("camera_cpu_load", "Camera CPU Load Percentage", ["name"]),
            memory_used: GaugeFamily::new(
                "camera_memory_used_bytes",
                "Camera Memory Used in Bytes",
                ["name"],
            ),
            memory_total: GaugeFamily::new(
                "camera_memory_total_bytes",
                "Camera Total Memory in Bytes",
                ["name"],
            ),
            host: InfoFamily::new("camera_host", "Camera Host", "camera_host"),
            mac: InfoFamily::new("camera_mac", "Camera MAC address", "camera_mac"),
            firmware_version: InfoFamily::new(
                "camera_firmware_version",
                "Camera Firmware Version",
                "camera_firmware_version",
            ),
            managed: GaugeFamily::new("camera_managed", "Is Camera Managed", ["name"]),
            last_seen: GaugeFamily::new(
                "camera_last_seen_timestamp",
                "Camera Last Seen Timestamp",
                ["name"],
            ),
            state: GaugeFamily::new("camera_state", "Camera State", ["name", "state"]),
            last_recording_start_time: GaugeFamily::new(
                "camera_last_recording_start_time",
                "Camera Last Recording Start Time",
                ["name"],
            ),
        }
    }

    /// Total number of series across all families.
    pub fn series_count(&self) -> usize {
        [
            &self.name_available,
            &self.cpu_load,
            &self.memory_used,
            &self.memory_total,
            &self.managed,
            &self.last_seen,
            &self.last_recording_start_time,
        ]
        .iter()
        .map(|family| family.len())
        .sum::<usize>()
            + self.state.len()
            + [&self.model, &self.host, &self.mac, &self.firmware_version]
                .iter()
                .map(|family| family.len())
                .sum::<usize>()
    }

    /// Render every family in the text exposition format.
    pub fn render(&self) -> String {
        let mut output = String::with_capacity(4096);

        self.name_available.encode(&mut output);
        self.model.encode(&mut output);
        self.cpu_load.encode(&mut output);
        self.memory_used.encode(&mut output);
        self.memory_total.encode(&mut output);
        self.host.encode(&mut output);
        self.mac.encode(&mut output);
        self.firmware_version.encode(&mut output);
        self.managed.encode(&mut output);
        self.last_seen.encode(&mut output);
        self.state.encode(&mut output);
        self.last_recording_start_time.encode(&mut output);

        output
    }
}

impl Default for MetricSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Shareable handle to the metric set.
pub type SharedMetrics = Arc<MetricSet>;

/// Escape special characters in label values.
fn escape_label_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

/// Escape special characters in HELP text.
fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}

/// Format a floating point value for Prometheus.
fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}

/// Format labels for Prometheus exposition format.
fn format_labels(labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return String::new();
    }

    let parts: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect();

    format!("{{{}}}", parts.join(","))
}
