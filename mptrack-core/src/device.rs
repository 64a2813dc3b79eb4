//! Device metadata attached to every hit

use crate::config::DeviceConfig;
use crate::encoder::EventParams;

/// Fallback for device fields the host cannot report
pub const UNKNOWN_DEVICE_FIELD: &str = "unknown";

/// Platform, OS and model reported as `ep.*` parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub platform: String,
    pub os_name: String,
    pub os_version: String,
    pub device_model: String,
}

impl DeviceInfo {
    /// Resolve device fields: config override, then host report, then literal
    pub fn detect(config: &DeviceConfig) -> Self {
        let host_os = Some(std::env::consts::OS).filter(|os| !os.is_empty());

        Self {
            platform: config.platform.clone(),
            os_name: pick(config.os_name.as_deref(), host_os),
            os_version: pick(config.os_version.as_deref(), None),
            device_model: pick(config.device_model.as_deref(), None),
        }
    }

    /// Parameters merged ahead of caller params, so callers can override them
    pub fn to_params(&self) -> EventParams {
        EventParams::new()
            .with("platform", self.platform.as_str())
            .with("os_name", self.os_name.as_str())
            .with("os_version", self.os_version.as_str())
            .with("device_model", self.device_model.as_str())
    }
}

fn pick(configured: Option<&str>, reported: Option<&str>) -> String {
    configured
        .filter(|v| !v.is_empty())
        .or(reported)
        .unwrap_or(UNKNOWN_DEVICE_FIELD)
        .to_string()
}
