//! Human-readable placement status derived from a device map.

use crate::device::{DeviceMap, WHOLE_MODEL};

/// Describe where `model_name` lives according to `device_map`.
///
/// A whole-model CPU entry wins over the mixed check, so a model that sits
/// entirely in host memory is never reported as partial.
pub fn classify(device_map: &DeviceMap, model_name: &str) -> String {
    if device_map.get(WHOLE_MODEL).is_some_and(|d| d.is_cpu()) {
        format!("Model {model_name} is fully loaded on CPU.")
    } else if device_map.values().any(|d| d.is_cpu()) {
        format!("Some layers of model {model_name} are loaded on CPU.")
    } else {
        format!("Model {model_name} is fully loaded on GPU.")
    }
}
