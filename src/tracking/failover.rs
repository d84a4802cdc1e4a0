//! Device failover: preferred device first, then the rest in list order

use crate::camera::{CaptureBackend, CaptureDevice, CaptureDeviceManager};
use crate::error::DeviceError;

/// Indices to try, in order, for a preferred index over an enumerated list.
///
/// The preferred index comes first only if it was enumerated.
pub fn failover_order(devices: &[CaptureDevice], preferred: u32) -> Vec<u32> {
    let mut order = Vec::with_capacity(devices.len());
    if devices.iter().any(|d| d.index == preferred) {
        order.push(preferred);
    }
    order.extend(devices.iter().map(|d| d.index).filter(|&index| index != preferred));
    order
}

/// Open the first working device following [`failover_order`].
///
/// Uses the manager's last enumeration and never re-enumerates.
pub fn open_with_failover<B: CaptureBackend>(
    manager: &mut CaptureDeviceManager<B>,
    preferred: u32,
) -> Result<u32, DeviceError> {
    let order = failover_order(manager.devices(), preferred);
    if order.is_empty() {
        return Err(DeviceError::NoDevices);
    }

    let mut tried = Vec::with_capacity(order.len());
    for index in order {
        tried.push(index);
        if index != preferred {
            tracing::info!("Fallback: starting camera {}", index);
        }
        match manager.open(index) {
            Ok(()) => return Ok(index),
            Err(e) => tracing::warn!("Camera {} failed: {}", index, e),
        }
    }

    tracing::error!("No working camera found (tried {:?})", tried);
    Err(DeviceError::FailoverExhausted { tried })
}
