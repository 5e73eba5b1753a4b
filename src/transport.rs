/*!
 # BLE transport layer

 Abstracts the Bluetooth stack behind object-safe [`Transport`] and
 [`Connection`] traits so the light controller never talks to `btleplug`
 directly. The production implementation is [`BtleplugTransport`]; tests
 substitute an in-memory fake.
*/

use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use tokio::time;
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::{Error, Result};

impl From<btleplug::Error> for Error {
    fn from(err: btleplug::Error) -> Self {
        Error::Transport(Box::new(err))
    }
}

/// Opens connections to BLE peripherals by address.
///
/// An address is either a MAC-style string (`AA:BB:CC:11:22:33`) or a
/// platform peripheral id, compared case-insensitively.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish a connection to the peripheral with the given address.
    async fn connect(&self, address: &str) -> Result<Box<dyn Connection>>;
}

/// An active connection to one BLE peripheral.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Read the current value of a characteristic.
    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>>;

    /// Write a value to a characteristic.
    async fn write(&self, characteristic: Uuid, value: &[u8]) -> Result<()>;

    /// Close the connection.
    async fn disconnect(&mut self) -> Result<()>;
}

/// Gets the default Bluetooth adapter
pub(crate) async fn get_central(manager: &Manager) -> Result<Adapter> {
    debug!("Getting default Bluetooth adapter");
    let adapters = manager.adapters().await?;
    adapters.into_iter().next().ok_or(Error::NoBluetoothAdapters)
}

/// Production [`Transport`] backed by `btleplug`.
#[derive(Debug, Clone)]
pub struct BtleplugTransport {
    /// How long to scan for the target peripheral before giving up
    discovery_timeout: Duration,
}

impl BtleplugTransport {
    pub fn new(discovery_timeout: Duration) -> Self {
        Self { discovery_timeout }
    }

    /// Poll the scan results until the target address shows up or the
    /// discovery window closes.
    async fn find_peripheral(&self, central: &Adapter, address: &str) -> Result<Peripheral> {
        let start_time = std::time::Instant::now();
        while start_time.elapsed() < self.discovery_timeout {
            let peripherals = central.peripherals().await?;
            debug!("Found {} BLE peripherals so far", peripherals.len());

            for peripheral in peripherals {
                if peripheral.address().to_string().eq_ignore_ascii_case(address)
                    || peripheral.id().to_string().eq_ignore_ascii_case(address)
                {
                    return Ok(peripheral);
                }
            }

            time::sleep(Duration::from_millis(500)).await;
        }

        Err(Error::DeviceNotFound(address.to_string()))
    }
}

impl Default for BtleplugTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl Transport for BtleplugTransport {
    async fn connect(&self, address: &str) -> Result<Box<dyn Connection>> {
        let manager = Manager::new().await?;
        let central = get_central(&manager).await?;

        info!("Scanning for {}", address);
        central.start_scan(ScanFilter::default()).await?;
        let found = self.find_peripheral(&central, address).await;
        central.stop_scan().await?;
        let peripheral = found?;

        if !peripheral.is_connected().await? {
            peripheral.connect().await?;
        }

        debug!("Discovering services of {}", address);
        peripheral.discover_services().await?;

        Ok(Box::new(BtleplugConnection { peripheral }))
    }
}

/// [`Connection`] over a connected `btleplug` peripheral.
struct BtleplugConnection {
    peripheral: Peripheral,
}

impl BtleplugConnection {
    fn find_characteristic(&self, uuid: Uuid) -> Result<Characteristic> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or_else(|| Error::CharacteristicNotFound(uuid.to_string()))
    }
}

#[async_trait]
impl Connection for BtleplugConnection {
    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>> {
        let target = self.find_characteristic(characteristic)?;
        let value = self.peripheral.read(&target).await?;
        trace!("Read {:02x?} from characteristic {}", value, characteristic);
        Ok(value)
    }

    async fn write(&self, characteristic: Uuid, value: &[u8]) -> Result<()> {
        let target = self.find_characteristic(characteristic)?;

        // Prefer WriteWithResponse when the characteristic supports it
        let write_type = if target.properties.contains(CharPropFlags::WRITE) {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };

        trace!("Writing {:02x?} to characteristic {}", value, characteristic);
        self.peripheral.write(&target, value, write_type).await?;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.peripheral.disconnect().await?;
        Ok(())
    }
}
