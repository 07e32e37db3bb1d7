//! Device classes, device maps and placement requests

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Device-map key that stands for the whole model.
pub const WHOLE_MODEL: &str = "";

/// Assignment of submodule paths to devices. The [`WHOLE_MODEL`] key covers
/// every submodule that has no more specific entry.
pub type DeviceMap = BTreeMap<String, DeviceClass>;

/// Label that could not be parsed as a device
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognised device '{0}' (expected auto, cpu, cuda, cuda:N or disk)")]
pub struct DeviceParseError(pub String);

/// Compute device a submodule lives on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum DeviceClass {
    /// Host memory
    Cpu,
    /// CUDA device with the given ordinal
    Gpu(usize),
    /// Offloaded to disk, paged in on demand
    Disk,
}

impl DeviceClass {
    pub fn is_cpu(&self) -> bool {
        matches!(self, DeviceClass::Cpu)
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceClass::Cpu => write!(f, "cpu"),
            DeviceClass::Gpu(ordinal) => write!(f, "cuda:{ordinal}"),
            DeviceClass::Disk => write!(f, "disk"),
        }
    }
}

impl FromStr for DeviceClass {
    type Err = DeviceParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let label = s.trim().to_ascii_lowercase();
        match label.as_str() {
            "cpu" => return Ok(DeviceClass::Cpu),
            "disk" => return Ok(DeviceClass::Disk),
            "cuda" | "gpu" => return Ok(DeviceClass::Gpu(0)),
            _ => {}
        }
        // Accelerate-style maps use bare ordinals for GPUs.
        if let Ok(ordinal) = label.parse::<usize>() {
            return Ok(DeviceClass::Gpu(ordinal));
        }
        label
            .strip_prefix("cuda:")
            .or_else(|| label.strip_prefix("gpu:"))
            .and_then(|n| n.parse::<usize>().ok())
            .map(DeviceClass::Gpu)
            .ok_or_else(|| DeviceParseError(s.to_string()))
    }
}

impl From<DeviceClass> for String {
    fn from(device: DeviceClass) -> Self {
        device.to_string()
    }
}

impl TryFrom<String> for DeviceClass {
    type Error = DeviceParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Where a caller wants the model placed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum DeviceRequest {
    /// Let the runtime spread the model across whatever devices it finds
    #[default]
    Auto,
    /// Pin the whole model to one device
    Pinned(DeviceClass),
}

impl fmt::Display for DeviceRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceRequest::Auto => write!(f, "auto"),
            DeviceRequest::Pinned(device) => write!(f, "{device}"),
        }
    }
}

impl FromStr for DeviceRequest {
    type Err = DeviceParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "auto" | "balanced" => Ok(DeviceRequest::Auto),
            _ => s.parse().map(DeviceRequest::Pinned),
        }
    }
}

impl From<DeviceRequest> for String {
    fn from(request: DeviceRequest) -> Self {
        request.to_string()
    }
}

impl TryFrom<String> for DeviceRequest {
    type Error = DeviceParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Device map placing the whole model on `device`.
pub fn whole_model(device: DeviceClass) -> DeviceMap {
    let mut map = DeviceMap::new();
    map.insert(WHOLE_MODEL.to_string(), device);
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_labels() {
        assert_eq!("cpu".parse::<DeviceClass>().unwrap(), DeviceClass::Cpu);
        assert_eq!("CUDA".parse::<DeviceClass>().unwrap(), DeviceClass::Gpu(0));
        assert_eq!("cuda:3".parse::<DeviceClass>().unwrap(), DeviceClass::Gpu(3));
        assert_eq!("1".parse::<DeviceClass>().unwrap(), DeviceClass::Gpu(1));
        assert_eq!("disk".parse::<DeviceClass>().unwrap(), DeviceClass::Disk);
        assert!("tpu".parse::<DeviceClass>().is_err());
        assert!("cuda:x".parse::<DeviceClass>().is_err());
    }

    #[test]
    fn test_parse_device_request() {
        assert_eq!("auto".parse::<DeviceRequest>().unwrap(), DeviceRequest::Auto);
        assert_eq!("balanced".parse::<DeviceRequest>().unwrap(), DeviceRequest::Auto);
        assert_eq!(
            "cuda".parse::<DeviceRequest>().unwrap(),
            DeviceRequest::Pinned(DeviceClass::Gpu(0))
        );
        assert_eq!(DeviceRequest::Pinned(DeviceClass::Cpu).to_string(), "cpu");
    }

    #[test]
    fn test_device_map_serializes_as_labels() {
        let mut map = whole_model(DeviceClass::Gpu(0));
        map.insert("model.layers.31".to_string(), DeviceClass::Cpu);
        let json = serde_json::to_value(&map).unwrap();
        assert_eq!(json[""], "cuda:0");
        assert_eq!(json["model.layers.31"], "cpu");

        let back: DeviceMap = serde_json::from_value(json).unwrap();
        assert_eq!(back, map);
    }
}
