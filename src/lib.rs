/*!
 # Kuler Sky Bluetooth LE Light Controller Library

 A Rust library for controlling Brightech Kuler Sky Bluetooth LE smart bulbs.
 The bulbs expose a single GATT characteristic carrying a 5-byte command
 frame that encodes the on/off mode and the four RGBW channel intensities.

 ## Features

 * Power on/off control
 * RGBW color control
 * State readback (on/off flag and current color)
 * Device discovery
 * Pluggable transport, so the BLE stack can be swapped out in tests

 ## Example

 ```no_run
 use std::sync::Arc;
 use kulersky_light::{BtleplugTransport, Light};

 #[tokio::main]
 async fn main() -> Result<(), kulersky_light::Error> {
     // Initialize tracing for logs
     tracing_subscriber::fmt::init();

     let transport = Arc::new(BtleplugTransport::default());
     let mut light = Light::new("AA:BB:CC:11:22:33", transport);

     light.connect().await?;
     light.turn_on().await?;
     light.set_color(255, 0, 0, 0).await?; // Set to red
     light.disconnect().await?;

     Ok(())
 }
 ```
*/

use thiserror::Error;

/// Custom error types for the Kuler Sky light controller library
#[derive(Error, Debug)]
pub enum Error {
    /// The underlying BLE transport reported a failure
    #[error("bluetooth transport error")]
    Transport(#[from] Box<dyn std::error::Error + Send + Sync>),

    /// A read or write was attempted without an active connection
    #[error("light {0} is not connected")]
    NotConnected(String),

    /// The device returned a state frame of the wrong length
    #[error("unexpected state frame length {0}, expected 5 bytes")]
    InvalidFrame(usize),

    /// No Bluetooth adapters found
    #[error("no Bluetooth adapters found")]
    NoBluetoothAdapters,

    /// No device with the requested address showed up during the scan
    #[error("no device found with address {0}")]
    DeviceNotFound(String),

    /// Failed to find the command characteristic after service discovery
    #[error("could not find required BLE characteristic: {0}")]
    CharacteristicNotFound(String),
}

pub type Result<T> = std::result::Result<T, Error>;

// Re-export modules
pub mod discovery;
pub mod light;
pub mod transport;

// Re-export key types
pub use discovery::{discover, DiscoveredDevice};
pub use light::{Light, LightState, CHARACTERISTIC_COMMAND_COLOR};
pub use transport::{BtleplugTransport, Connection, Transport};
