//! Camera records returned by the camera API.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::warn;

/// One camera entry from the `data` list of the camera API response.
///
/// Every field is optional and decoded on its own: a field with an
/// unexpected shape reads as absent instead of rejecting the record.
/// Accessors resolve the defaults used when mapping to metrics.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraRecord {
    #[serde(default, deserialize_with = "lenient_text")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub model: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub host: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub mac: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub firmware_version: Option<String>,
    /// Kept as raw JSON since it is string-coerced rather than parsed.
    pub managed: Option<Value>,
    /// Epoch milliseconds.
    #[serde(default, deserialize_with = "lenient")]
    pub last_seen: Option<f64>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub state: Option<String>,
    /// Epoch milliseconds.
    #[serde(default, deserialize_with = "lenient")]
    pub last_recording_start_time: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub system_info: Option<SystemInfo>,
}

/// The `systemInfo` object of a camera record.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    #[serde(default, deserialize_with = "lenient")]
    pub cpu_load: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub memory: Option<MemoryInfo>,
}

/// The `systemInfo.memory` object of a camera record, in bytes.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MemoryInfo {
    #[serde(default, deserialize_with = "lenient")]
    pub used: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub total: Option<f64>,
}

/// Decode a field, treating a value of the wrong shape as absent.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// Decode a text field. Numbers and booleans are rendered as text; other
/// shapes read as absent.
fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    })
}

impl CameraRecord {
    /// Camera name, empty when absent.
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }

    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or_default()
    }

    pub fn host(&self) -> &str {
        self.host.as_deref().unwrap_or_default()
    }

    pub fn mac(&self) -> &str {
        self.mac.as_deref().unwrap_or_default()
    }

    pub fn firmware_version(&self) -> &str {
        self.firmware_version.as_deref().unwrap_or_default()
    }

    /// Raw state string, empty when absent.
    pub fn state(&self) -> &str {
        self.state.as_deref().unwrap_or_default()
    }

    /// CPU load percentage, 0.0 when absent.
    pub fn cpu_load(&self) -> f64 {
        self.system_info
            .as_ref()
            .and_then(|info| info.cpu_load)
            .unwrap_or(0.0)
    }

    /// Memory used in bytes, 0 when absent.
    pub fn memory_used(&self) -> f64 {
        self.memory().and_then(|m| m.used).unwrap_or(0.0)
    }

    /// Total memory in bytes, 0 when absent.
    pub fn memory_total(&self) -> f64 {
        self.memory().and_then(|m| m.total).unwrap_or(0.0)
    }

    fn memory(&self) -> Option<&MemoryInfo> {
        self.system_info.as_ref().and_then(|info| info.memory.as_ref())
    }

    /// The `managed` value coerced to lowercase text.
    ///
    /// Absent or null values coerce to an empty string. Booleans coerce to
    /// `"true"`/`"false"`, so a literal `false` is still non-empty.
    pub fn managed_text(&self) -> String {
        match &self.managed {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.to_lowercase(),
            Some(other) => other.to_string().to_lowercase(),
        }
    }

    /// Whether the coerced `managed` text is non-empty.
    pub fn is_managed(&self) -> bool {
        !self.managed_text().is_empty()
    }

    /// Whether the state equals `CONNECTED`, ignoring case.
    pub fn is_connected(&self) -> bool {
        self.state().to_uppercase() == "CONNECTED"
    }
}

/// Extract camera records from a camera API response body.
///
/// Returns `None` when the body has no `data` list. Entries that do not
/// decode as a camera record are skipped.
pub fn records_from_body(body: Value) -> Option<Vec<CameraRecord>> {
    let Value::Object(mut body) = body else {
        return None;
    };
    let Some(Value::Array(entries)) = body.remove("data") else {
        return None;
    };

    let records = entries
        .into_iter()
        .enumerate()
        .filter_map(|(index, entry)| match serde_json::from_value(entry) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(index, error = %e, "Skipping undecodable camera record");
                None
            }
        })
        .collect();

    Some(records)
}
