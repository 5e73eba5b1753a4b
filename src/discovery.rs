/*!
 # Device discovery

 Scans the default Bluetooth adapter and reports every nearby peripheral
 that advertises a local name. The reported address can be passed straight
 to [`crate::Light::new`].
*/

use std::time::Duration;

use btleplug::api::{Central, CentralEvent, Peripheral as _, ScanFilter};
use btleplug::platform::Manager;
use futures::StreamExt;
use tokio::time;
use tracing::{debug, info, instrument};

use crate::transport::get_central;
use crate::Result;

/// A peripheral seen during a discovery scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    /// Device address, usable with [`crate::Light::new`]
    pub address: String,
    /// Advertised local name
    pub name: String,
}

/// Scan for nearby Bluetooth devices for the given duration.
///
/// Peripherals that never advertise a local name are skipped; name-less
/// scan results are not actionable for light control.
#[instrument]
pub async fn discover(timeout: Duration) -> Result<Vec<DiscoveredDevice>> {
    let manager = Manager::new().await?;
    let central = get_central(&manager).await?;

    info!("Scanning for nearby devices for {:?}", timeout);
    let mut events = central.events().await?;
    central.start_scan(ScanFilter::default()).await?;

    let deadline = time::sleep(timeout);
    tokio::pin!(deadline);

    // Names often arrive in advertisement updates after the initial
    // discovery event, so drive the event stream for the full window and
    // enumerate the scan results at the end.
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            Some(event) = events.next() => {
                if let CentralEvent::DeviceDiscovered(id) = event {
                    debug!("Discovered peripheral {:?}", id);
                }
            }
        }
    }

    central.stop_scan().await?;

    let mut devices = Vec::new();
    for peripheral in central.peripherals().await? {
        if let Ok(Some(properties)) = peripheral.properties().await {
            if let Some(name) = properties.local_name {
                debug!("Found device: {} ({})", name, peripheral.address());
                devices.push(DiscoveredDevice {
                    address: peripheral.address().to_string(),
                    name,
                });
            }
        }
    }

    info!("Discovery finished, found {} named devices", devices.len());
    Ok(devices)
}
