//! Friendly display names for capture devices

use std::collections::HashMap;

/// Generic driver names and their friendlier replacements
const REPLACEMENTS: &[(&str, &str)] = &[
    ("USB Video Device", "USB Webcam"),
    ("USB2.0 Camera", "USB Camera"),
    ("Integrated Camera", "Built-in Camera"),
    ("FaceTime HD Camera", "FaceTime Camera"),
    ("USB Camera-B4.04.27.1", "USB Camera"),
];

/// Names this short are discarded after cleaning
const MIN_NAME_LEN: usize = 4;

/// Collapse whitespace and rewrite generic driver names.
///
/// Returns `None` when nothing useful is left.
pub fn clean_device_name(raw: &str) -> Option<String> {
    let mut name = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    for (generic, friendly) in REPLACEMENTS {
        if name.contains(generic) {
            name = name.replace(generic, friendly);
        }
    }
    if name.chars().count() >= MIN_NAME_LEN {
        Some(name)
    } else {
        None
    }
}

/// Display name for a device index, preferring the platform name when known
pub fn display_name(index: u32, names: &HashMap<u32, String>) -> String {
    match names.get(&index).and_then(|raw| clean_device_name(raw)) {
        Some(name) => format!("{} (Camera {})", name, index),
        None if index == 0 => "Default camera (Camera 0)".to_string(),
        None => format!("Camera {}", index),
    }
}
