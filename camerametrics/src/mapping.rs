//! Mapping from camera records to metric updates.

use tracing::{debug, info};

use crate::camera::CameraRecord;
use crate::metrics::{GaugeFamily, MetricSet};

/// Convert a flag to a gauge value.
pub fn flag(value: bool) -> f64 {
    if value { 1.0 } else { 0.0 }
}

/// Apply one camera record to the metric set.
///
/// Every series is labeled by the camera name, so a later record with the
/// same name overwrites these values.
pub fn apply_record(metrics: &MetricSet, camera: &CameraRecord) {
    let name = camera.name();

    metrics.name_available.set([name], flag(!name.is_empty()));

    metrics.model.set(name, camera.model());
    metrics.host.set(name, camera.host());
    metrics.mac.set(name, camera.mac());
    metrics
        .firmware_version
        .set(name, camera.firmware_version());

    metrics.cpu_load.set([name], camera.cpu_load());
    metrics.memory_used.set([name], camera.memory_used());
    metrics.memory_total.set([name], camera.memory_total());

    metrics.managed.set([name], flag(camera.is_managed()));

    // Timestamps stay in epoch milliseconds.
    set_timestamp(&metrics.last_seen, name, camera.last_seen);
    set_timestamp(
        &metrics.last_recording_start_time,
        name,
        camera.last_recording_start_time,
    );

    metrics
        .state
        .set([name, camera.state()], flag(camera.is_connected()));

    info!(camera = %name, "Updated metrics for camera");
}

/// Apply every record in order. Returns the number of records applied.
pub fn apply_records(metrics: &MetricSet, cameras: &[CameraRecord]) -> usize {
    for camera in cameras {
        apply_record(metrics, camera);
    }
    cameras.len()
}

fn set_timestamp(gauge: &GaugeFamily<1>, name: &str, value: Option<f64>) {
    match value {
        Some(millis) => gauge.set([name], millis),
        None => {
            if gauge.remove([name]) {
                debug!(camera = %name, metric = gauge.name(), "Timestamp absent, series removed");
            }
        }
    }
}
