/*!
 # Kuler Sky light controller

 The bulb exposes one GATT characteristic that serves as both the command
 sink and the state source. Its value is always a 5-byte frame: a mode
 marker followed by the four RGBW channel intensities.

 ```text
 ┌────────┬─────┬─────┬─────┬─────┐
 │ Mode   │  R  │  G  │  B  │  W  │
 │ (1B)   │(1B) │(1B) │(1B) │(1B) │
 └────────┴─────┴─────┴─────┴─────┘
 ```

 Mode `0x02` means "on, color in the next four bytes"; mode `0x32` means
 "off", with the channel bytes carrying `0xFF` filler.
*/

use std::sync::Arc;

use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::transport::{Connection, Transport};
use crate::{Error, Result};

/// The single characteristic used for both state reads and command writes
pub const CHARACTERISTIC_COMMAND_COLOR: Uuid =
    Uuid::from_u128(0x8d96b002_0002_64c2_0001_9acc4838521c);

/// Mode marker for "on, explicit color follows"
const MODE_COLOR: u8 = 0x02;
/// Mode marker for "off"
const MODE_OFF: u8 = 0x32;
/// State frames are always mode byte + four channel bytes
const FRAME_LEN: usize = 5;

/// Command to turn the bulb on (white channel only)
const COMMAND_ON: [u8; FRAME_LEN] = [MODE_COLOR, 0x00, 0x00, 0x00, 0xFF];
/// Command to turn the bulb off; the channel bytes are fixed filler
const COMMAND_OFF: [u8; FRAME_LEN] = [MODE_OFF, 0xFF, 0xFF, 0xFF, 0xFF];

/// Decoded state of the light
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LightState {
    /// `None` when the device reported a mode byte matching neither the
    /// on nor the off marker
    pub is_on: Option<bool>,
    /// Raw channel bytes `(r, g, b, w)`; only meaningful while the light
    /// is on
    pub color: (u8, u8, u8, u8),
}

impl LightState {
    /// Decode a raw state frame read from the device.
    pub fn decode(frame: &[u8]) -> Result<Self> {
        if frame.len() != FRAME_LEN {
            return Err(Error::InvalidFrame(frame.len()));
        }

        let is_on = match frame[0] {
            MODE_COLOR => Some(true),
            MODE_OFF => Some(false),
            _ => None,
        };

        Ok(Self {
            is_on,
            color: (frame[1], frame[2], frame[3], frame[4]),
        })
    }
}

/// Represents one physical light and its connection lifecycle.
///
/// A `Light` is created disconnected; [`Light::connect`] and
/// [`Light::disconnect`] are idempotent, so calling them repeatedly in the
/// same state issues no transport calls. All other operations require an
/// active connection and fail with [`Error::NotConnected`] otherwise.
pub struct Light {
    /// Device address, immutable once constructed
    address: String,
    /// Optional display name, not used by the protocol
    name: Option<String>,
    transport: Arc<dyn Transport>,
    connection: Option<Box<dyn Connection>>,
}

impl Light {
    /// Create a handle for the light at `address`. No connection is made
    /// until [`Light::connect`] is called.
    pub fn new(address: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            address: address.into(),
            name: None,
            transport,
            connection: None,
        }
    }

    /// Attach a display name to this handle.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Whether this handle currently holds a connection.
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Connect to this light.
    ///
    /// Returns immediately when already connected. On failure the handle
    /// stays disconnected.
    #[instrument(skip(self), fields(address = %self.address))]
    pub async fn connect(&mut self) -> Result<()> {
        if self.connection.is_some() {
            debug!("Already connected to {}", self.address);
            return Ok(());
        }

        info!("Connecting to {}", self.address);
        let connection = self.transport.connect(&self.address).await?;
        self.connection = Some(connection);
        debug!("Connected to {}", self.address);
        Ok(())
    }

    /// Disconnect from this light.
    ///
    /// Returns immediately when not connected. When the transport fails to
    /// close the connection the error propagates and the handle keeps its
    /// connection, so a later `disconnect` can retry the close.
    #[instrument(skip(self), fields(address = %self.address))]
    pub async fn disconnect(&mut self) -> Result<()> {
        let Some(connection) = self.connection.as_mut() else {
            debug!("Already disconnected from {}", self.address);
            return Ok(());
        };

        info!("Disconnecting from {}", self.address);
        connection.disconnect().await?;
        self.connection = None;
        debug!("Disconnected from {}", self.address);
        Ok(())
    }

    /// Turn on the light.
    #[instrument(skip(self), fields(address = %self.address))]
    pub async fn turn_on(&mut self) -> Result<()> {
        info!("Turning on {}", self.address);
        self.write(&COMMAND_ON).await?;
        debug!("Turned on {}", self.address);
        Ok(())
    }

    /// Turn off the light.
    #[instrument(skip(self), fields(address = %self.address))]
    pub async fn turn_off(&mut self) -> Result<()> {
        info!("Turning off {}", self.address);
        self.write(&COMMAND_OFF).await?;
        debug!("Turned off {}", self.address);
        Ok(())
    }

    /// Set the color of the light.
    ///
    /// An all-zero color is sent as the off command instead of an explicit
    /// all-zero frame.
    #[instrument(skip(self), fields(address = %self.address))]
    pub async fn set_color(&mut self, r: u8, g: u8, b: u8, w: u8) -> Result<()> {
        info!(
            "Changing color of {} to #{:02x}{:02x}{:02x}{:02x}",
            self.address, r, g, b, w
        );

        if r == 0 && g == 0 && b == 0 && w == 0 {
            return self.turn_off().await;
        }

        let state = self.get_state().await?;
        let was_off = state.is_on == Some(false);

        // The firmware drops the white channel when a single write moves
        // the bulb out of the off state together with nonzero RGB. Stage
        // the color without white first, then send the full frame.
        if was_off && w > 0 && (r > 0 || g > 0 || b > 0) {
            self.write(&[MODE_COLOR, r, g, b, 0x00]).await?;
        }

        self.write(&[MODE_COLOR, r, g, b, w]).await?;
        debug!("Changed color of {}", self.address);
        Ok(())
    }

    /// Read and decode the current state of the light.
    #[instrument(skip(self), fields(address = %self.address))]
    pub async fn get_state(&self) -> Result<LightState> {
        let frame = self.read().await?;
        let state = LightState::decode(&frame)?;
        info!("Got state of {}: {:?}", self.address, state);
        Ok(state)
    }

    /// Read the current color of the light.
    ///
    /// A light that is known to be off reports `(0, 0, 0, 0)` because the
    /// channel bytes of an off frame carry no meaning.
    #[instrument(skip(self), fields(address = %self.address))]
    pub async fn get_color(&self) -> Result<(u8, u8, u8, u8)> {
        let state = self.get_state().await?;
        if state.is_on == Some(false) {
            Ok((0, 0, 0, 0))
        } else {
            Ok(state.color)
        }
    }

    fn connection(&self) -> Result<&dyn Connection> {
        match &self.connection {
            Some(connection) => Ok(connection.as_ref()),
            None => Err(Error::NotConnected(self.address.clone())),
        }
    }

    async fn read(&self) -> Result<Vec<u8>> {
        let connection = self.connection()?;
        debug!(
            "Reading from characteristic {}",
            CHARACTERISTIC_COMMAND_COLOR
        );
        connection.read(CHARACTERISTIC_COMMAND_COLOR).await
    }

    async fn write(&self, value: &[u8]) -> Result<()> {
        let connection = self.connection()?;
        debug!(
            "Writing {:02x?} to characteristic {}",
            value, CHARACTERISTIC_COMMAND_COLOR
        );
        connection.write(CHARACTERISTIC_COMMAND_COLOR, value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct FakeState {
        connects: usize,
        disconnects: usize,
        writes: Vec<Vec<u8>>,
        read_value: Vec<u8>,
        fail_connect: bool,
        fail_disconnect: bool,
        fail_read: bool,
        fail_write: bool,
    }

    #[derive(Clone, Default)]
    struct FakeTransport {
        state: Arc<Mutex<FakeState>>,
    }

    struct FakeConnection {
        state: Arc<Mutex<FakeState>>,
    }

    fn radio_error() -> Error {
        Error::Transport("simulated radio failure".into())
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn connect(&self, _address: &str) -> Result<Box<dyn Connection>> {
            let mut state = self.state.lock();
            if state.fail_connect {
                return Err(radio_error());
            }
            state.connects += 1;
            Ok(Box::new(FakeConnection {
                state: self.state.clone(),
            }))
        }
    }

    #[async_trait]
    impl Connection for FakeConnection {
        async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>> {
            assert_eq!(characteristic, CHARACTERISTIC_COMMAND_COLOR);
            let state = self.state.lock();
            if state.fail_read {
                return Err(radio_error());
            }
            Ok(state.read_value.clone())
        }

        async fn write(&self, characteristic: Uuid, value: &[u8]) -> Result<()> {
            assert_eq!(characteristic, CHARACTERISTIC_COMMAND_COLOR);
            let mut state = self.state.lock();
            if state.fail_write {
                return Err(radio_error());
            }
            state.writes.push(value.to_vec());
            Ok(())
        }

        async fn disconnect(&mut self) -> Result<()> {
            let mut state = self.state.lock();
            if state.fail_disconnect {
                return Err(radio_error());
            }
            state.disconnects += 1;
            Ok(())
        }
    }

    async fn connected_light(transport: &FakeTransport) -> Light {
        let mut light = Light::new("00:11:22:33:44:55", Arc::new(transport.clone()));
        light.connect().await.unwrap();
        light
    }

    #[test]
    fn decode_on_frame() {
        let state = LightState::decode(&[0x02, 0x00, 0x00, 0x00, 0xFF]).unwrap();
        assert_eq!(
            state,
            LightState {
                is_on: Some(true),
                color: (0, 0, 0, 255),
            }
        );
    }

    #[test]
    fn decode_off_frame() {
        let state = LightState::decode(&[0x32, 0xFF, 0xFF, 0xFF, 0x00]).unwrap();
        assert_eq!(state.is_on, Some(false));
    }

    #[test]
    fn decode_unknown_mode_marker() {
        let state = LightState::decode(&[0x99, 1, 2, 3, 4]).unwrap();
        assert_eq!(state.is_on, None);
        assert_eq!(state.color, (1, 2, 3, 4));
    }

    #[test]
    fn decode_rejects_wrong_length() {
        let err = LightState::decode(&[0x02, 0x00]).unwrap_err();
        assert!(matches!(err, Error::InvalidFrame(2)));
    }

    #[tokio::test]
    async fn connect_is_idempotent() {
        let transport = FakeTransport::default();
        let mut light = connected_light(&transport).await;

        light.connect().await.unwrap();
        assert_eq!(transport.state.lock().connects, 1);
        assert!(light.is_connected());
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let transport = FakeTransport::default();
        let mut light = connected_light(&transport).await;

        light.disconnect().await.unwrap();
        light.disconnect().await.unwrap();
        assert_eq!(transport.state.lock().disconnects, 1);
        assert!(!light.is_connected());
    }

    #[tokio::test]
    async fn disconnect_without_connection_is_a_noop() {
        let transport = FakeTransport::default();
        let mut light = Light::new("00:11:22:33:44:55", Arc::new(transport.clone()));

        light.disconnect().await.unwrap();
        assert_eq!(transport.state.lock().disconnects, 0);
    }

    #[tokio::test]
    async fn connect_failure_leaves_handle_disconnected() {
        let transport = FakeTransport::default();
        transport.state.lock().fail_connect = true;
        let mut light = Light::new("00:11:22:33:44:55", Arc::new(transport.clone()));

        let err = light.connect().await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert!(!light.is_connected());
    }

    #[tokio::test]
    async fn failed_disconnect_keeps_the_handle_connected() {
        let transport = FakeTransport::default();
        let mut light = connected_light(&transport).await;

        transport.state.lock().fail_disconnect = true;
        let err = light.disconnect().await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert!(light.is_connected());

        // Once the transport recovers, the close goes through
        transport.state.lock().fail_disconnect = false;
        light.disconnect().await.unwrap();
        assert_eq!(transport.state.lock().disconnects, 1);
        assert!(!light.is_connected());
    }

    #[tokio::test]
    async fn operations_require_a_connection() {
        let transport = FakeTransport::default();
        let mut light = Light::new("00:11:22:33:44:55", Arc::new(transport.clone()));

        assert!(matches!(
            light.turn_on().await.unwrap_err(),
            Error::NotConnected(address) if address == "00:11:22:33:44:55"
        ));
        assert!(matches!(
            light.get_state().await.unwrap_err(),
            Error::NotConnected(_)
        ));
        assert!(transport.state.lock().writes.is_empty());
    }

    #[tokio::test]
    async fn turn_on_writes_the_white_channel_frame() {
        let transport = FakeTransport::default();
        let mut light = connected_light(&transport).await;

        light.turn_on().await.unwrap();
        assert_eq!(
            transport.state.lock().writes,
            vec![vec![0x02, 0x00, 0x00, 0x00, 0xFF]]
        );
    }

    #[tokio::test]
    async fn turn_off_writes_the_off_frame() {
        let transport = FakeTransport::default();
        let mut light = connected_light(&transport).await;

        light.turn_off().await.unwrap();
        assert_eq!(
            transport.state.lock().writes,
            vec![vec![0x32, 0xFF, 0xFF, 0xFF, 0xFF]]
        );
    }

    #[tokio::test]
    async fn set_color_writes_a_single_frame_while_on() {
        let transport = FakeTransport::default();
        let mut light = connected_light(&transport).await;
        transport.state.lock().read_value = vec![0x02, 0xFF, 0xFF, 0xFF, 0x00];

        light.set_color(64, 128, 192, 0).await.unwrap();
        assert_eq!(
            transport.state.lock().writes,
            vec![vec![0x02, 0x40, 0x80, 0xC0, 0x00]]
        );
    }

    #[tokio::test]
    async fn all_zero_color_turns_the_light_off() {
        // No read value is configured, so an unexpected state read here
        // would fail the test with a decode error.
        let transport = FakeTransport::default();
        let mut light = connected_light(&transport).await;

        light.set_color(0, 0, 0, 0).await.unwrap();
        assert_eq!(
            transport.state.lock().writes,
            vec![vec![0x32, 0xFF, 0xFF, 0xFF, 0xFF]]
        );
    }

    #[tokio::test]
    async fn white_with_rgb_from_off_is_staged_in_two_writes() {
        let transport = FakeTransport::default();
        let mut light = connected_light(&transport).await;
        transport.state.lock().read_value = vec![0x32, 0xFF, 0xFF, 0xFF, 0xFF];

        light.set_color(255, 255, 255, 255).await.unwrap();
        assert_eq!(
            transport.state.lock().writes,
            vec![
                vec![0x02, 0xFF, 0xFF, 0xFF, 0x00],
                vec![0x02, 0xFF, 0xFF, 0xFF, 0xFF],
            ]
        );
    }

    #[tokio::test]
    async fn rgb_only_from_off_is_a_single_write() {
        let transport = FakeTransport::default();
        let mut light = connected_light(&transport).await;
        transport.state.lock().read_value = vec![0x32, 0xFF, 0xFF, 0xFF, 0xFF];

        light.set_color(255, 255, 255, 0).await.unwrap();
        assert_eq!(
            transport.state.lock().writes,
            vec![vec![0x02, 0xFF, 0xFF, 0xFF, 0x00]]
        );
    }

    #[tokio::test]
    async fn white_only_from_off_is_a_single_write() {
        let transport = FakeTransport::default();
        let mut light = connected_light(&transport).await;
        transport.state.lock().read_value = vec![0x32, 0xFF, 0xFF, 0xFF, 0xFF];

        light.set_color(0, 0, 0, 255).await.unwrap();
        assert_eq!(
            transport.state.lock().writes,
            vec![vec![0x02, 0x00, 0x00, 0x00, 0xFF]]
        );
    }

    #[tokio::test]
    async fn get_color_reports_zero_while_off() {
        let transport = FakeTransport::default();
        let light = connected_light(&transport).await;
        transport.state.lock().read_value = vec![0x32, 0xFF, 0xFF, 0xFF, 0x00];

        assert_eq!(light.get_color().await.unwrap(), (0, 0, 0, 0));
    }

    #[tokio::test]
    async fn get_color_reports_the_decoded_channels_while_on() {
        let transport = FakeTransport::default();
        let light = connected_light(&transport).await;
        transport.state.lock().read_value = vec![0x02, 0xFF, 0xFF, 0x00, 0x00];

        assert_eq!(light.get_color().await.unwrap(), (255, 255, 0, 0));
    }

    #[tokio::test]
    async fn transport_failures_surface_as_the_domain_error() {
        let transport = FakeTransport::default();
        let mut light = connected_light(&transport).await;
        transport.state.lock().read_value = vec![0x02, 0x00, 0x00, 0x00, 0x00];

        transport.state.lock().fail_write = true;
        assert!(matches!(
            light.set_color(255, 255, 255, 255).await.unwrap_err(),
            Error::Transport(_)
        ));

        transport.state.lock().fail_read = true;
        assert!(matches!(
            light.get_state().await.unwrap_err(),
            Error::Transport(_)
        ));
    }

    #[tokio::test]
    async fn short_state_frame_is_rejected() {
        let transport = FakeTransport::default();
        let light = connected_light(&transport).await;
        transport.state.lock().read_value = vec![0x02, 0x00];

        let err = light.get_state().await.unwrap_err();
        assert!(matches!(err, Error::InvalidFrame(2)));
    }
}
