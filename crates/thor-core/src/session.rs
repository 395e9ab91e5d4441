//! Session manager: handshake, capability negotiation and session-level
//! device commands.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::ThorError;
use crate::exchange::request;
use crate::protocol::{
    Command, DEFAULT_CHUNK_TIMEOUT, DEFAULT_COMMAND_TIMEOUT, DEFAULT_END_SEQUENCE_TIMEOUT,
    DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_LONG_COMMAND_TIMEOUT, HANDSHAKE_REPLY, HANDSHAKE_REQUEST,
    LARGE_PACKET_SIZE, LARGE_SEQUENCE_SIZE, LEGACY_PACKET_SIZE, LEGACY_SEQUENCE_SIZE,
    MAX_PACKET_SIZE, MAX_RESPONSE_READ, PACKET_ALIGNMENT, Response,
};
use crate::transport::UsbTransport;

/// Lifecycle of a download-mode session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Closed,
    Handshaking,
    Active,
    /// Terminal. The device only accepts reboot or shutdown from here.
    Ended,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Closed => write!(f, "CLOSED"),
            SessionState::Handshaking => write!(f, "HANDSHAKING"),
            SessionState::Active => write!(f, "ACTIVE"),
            SessionState::Ended => write!(f, "ENDED"),
        }
    }
}

/// Features agreed with the bootloader during `begin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities(u32);

impl Capabilities {
    /// 1 MiB packets announced with `FilePartSize`.
    pub const LARGE_PACKETS: Self = Self(1 << 0);
    /// PIT upload is accepted.
    pub const WRITE_PIT: Self = Self(1 << 1);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Capabilities implied by a protocol version.
    pub fn for_version(version: u8) -> Self {
        let mut caps = Self::empty();
        if version >= 1 {
            caps.insert(Self::WRITE_PIT);
        }
        if version >= 2 {
            caps.insert(Self::LARGE_PACKETS);
        }
        caps
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(Self::LARGE_PACKETS) {
            names.push("LARGE_PACKETS");
        }
        if self.contains(Self::WRITE_PIT) {
            names.push("WRITE_PIT");
        }
        if names.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

/// Configuration for a Thor session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Wait for `LOKE` after sending `ODIN`.
    pub handshake_timeout_ms: u64,
    /// Control command acknowledgments.
    pub command_timeout_ms: u64,
    /// Per data packet acknowledgment.
    pub chunk_timeout_ms: u64,
    /// End-of-sequence acknowledgment; the device commits the data here.
    pub end_sequence_timeout_ms: u64,
    /// Erase and T-Flash commands.
    pub long_command_timeout_ms: u64,
    /// Packet size override in bytes. Must be a multiple of 512.
    pub packet_size: Option<u32>,
    /// Skip the ODIN/LOKE exchange on a device that already completed it.
    pub resume: bool,
    /// Ask the device to clear EFS with the last AP sequence.
    pub efs_clear: bool,
    /// Ask the device to update its bootloader with the last AP sequence.
    pub update_bootloader: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT.as_millis() as u64,
            command_timeout_ms: DEFAULT_COMMAND_TIMEOUT.as_millis() as u64,
            chunk_timeout_ms: DEFAULT_CHUNK_TIMEOUT.as_millis() as u64,
            end_sequence_timeout_ms: DEFAULT_END_SEQUENCE_TIMEOUT.as_millis() as u64,
            long_command_timeout_ms: DEFAULT_LONG_COMMAND_TIMEOUT.as_millis() as u64,
            packet_size: None,
            resume: false,
            efs_clear: false,
            update_bootloader: false,
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ThorError> {
        if let Some(size) = self.packet_size
            && (size == 0 || size % PACKET_ALIGNMENT != 0)
        {
            return Err(ThorError::InvalidConfig(format!(
                "packet_size {size} is not a non-zero multiple of {PACKET_ALIGNMENT}"
            )));
        }
        if let Some(size) = self.packet_size
            && size > MAX_PACKET_SIZE
        {
            return Err(ThorError::InvalidConfig(format!(
                "packet_size {size} exceeds the {MAX_PACKET_SIZE} byte limit"
            )));
        }
        let timeouts = [
            ("handshake_timeout_ms", self.handshake_timeout_ms),
            ("command_timeout_ms", self.command_timeout_ms),
            ("chunk_timeout_ms", self.chunk_timeout_ms),
            ("end_sequence_timeout_ms", self.end_sequence_timeout_ms),
            ("long_command_timeout_ms", self.long_command_timeout_ms),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                return Err(ThorError::InvalidConfig(format!("{name} must be non-zero")));
            }
        }
        Ok(())
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_millis(self.chunk_timeout_ms)
    }

    pub fn end_sequence_timeout(&self) -> Duration {
        Duration::from_millis(self.end_sequence_timeout_ms)
    }

    pub fn long_command_timeout(&self) -> Duration {
        Duration::from_millis(self.long_command_timeout_ms)
    }
}

/// Negotiated session parameters. Only the methods below mutate it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    state: SessionState,
    protocol_version: u8,
    packet_size: u32,
    sequence_size: u32,
    capabilities: Capabilities,
    t_flash: bool,
    declared_total: Option<u64>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: SessionState::Closed,
            protocol_version: 0,
            packet_size: LEGACY_PACKET_SIZE,
            sequence_size: LEGACY_SEQUENCE_SIZE,
            capabilities: Capabilities::empty(),
            t_flash: false,
            declared_total: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn protocol_version(&self) -> u8 {
        self.protocol_version
    }

    /// Bytes per data packet.
    pub fn packet_size(&self) -> u32 {
        self.packet_size
    }

    /// Packets per transfer sequence.
    pub fn sequence_size(&self) -> u32 {
        self.sequence_size
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn t_flash(&self) -> bool {
        self.t_flash
    }

    /// Total announced with `declare_total_bytes`, if any.
    pub fn declared_total(&self) -> Option<u64> {
        self.declared_total
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    pub fn require_active(&self) -> Result<(), ThorError> {
        if self.is_active() {
            Ok(())
        } else {
            Err(ThorError::SessionNotActive { state: self.state })
        }
    }

    /// Forget everything negotiated. Used after a failed handshake or when
    /// the device disappears.
    pub fn reset(&mut self) {
        if self.state != SessionState::Closed {
            debug!(from = %self.state, "Session reset");
        }
        *self = Self::new();
    }

    /// Handshake and negotiate. Requires `Closed`.
    #[instrument(skip_all)]
    pub fn begin<T: UsbTransport>(
        &mut self,
        transport: &T,
        config: &SessionConfig,
    ) -> Result<(), ThorError> {
        if self.state != SessionState::Closed {
            return Err(ThorError::InvalidTransition {
                operation: "begin",
                state: self.state,
            });
        }
        config.validate()?;

        self.state = SessionState::Handshaking;
        let result = self.negotiate(transport, config);
        if result.is_err() {
            self.reset();
        }
        result
    }

    fn negotiate<T: UsbTransport>(
        &mut self,
        transport: &T,
        config: &SessionConfig,
    ) -> Result<(), ThorError> {
        if config.resume {
            info!("Resuming, handshake skipped");
        } else {
            handshake(transport, config.handshake_timeout())?;
        }

        let timeout = config.command_timeout();
        let data = negotiation_request(transport, Command::BeginSession, timeout)?;
        let version = Response::protocol_version(data);
        let capabilities = Capabilities::for_version(version);

        let (mut packet_size, sequence_size) = if capabilities.contains(Capabilities::LARGE_PACKETS)
        {
            (LARGE_PACKET_SIZE, LARGE_SEQUENCE_SIZE)
        } else {
            (LEGACY_PACKET_SIZE, LEGACY_SEQUENCE_SIZE)
        };
        if let Some(size) = config.packet_size {
            debug!(negotiated = packet_size, configured = size, "Packet size override");
            packet_size = size;
        }

        if capabilities.contains(Capabilities::LARGE_PACKETS) {
            negotiation_request(transport, Command::FilePartSize(packet_size), timeout)?;
        }

        self.protocol_version = version;
        self.packet_size = packet_size;
        self.sequence_size = sequence_size;
        self.capabilities = capabilities;
        self.state = SessionState::Active;

        info!(
            version,
            packet_size,
            sequence_size,
            capabilities = %capabilities,
            "Session active"
        );
        Ok(())
    }

    /// Close the session. A no-op once `Ended`.
    #[instrument(skip_all)]
    pub fn end<T: UsbTransport>(
        &mut self,
        transport: &T,
        config: &SessionConfig,
    ) -> Result<(), ThorError> {
        match self.state {
            SessionState::Ended => {
                debug!("Session already ended");
                return Ok(());
            }
            SessionState::Active => {}
            state => return Err(ThorError::SessionNotActive { state }),
        }

        let timeout = config.command_timeout();
        let result = request(transport, Command::EndSession, timeout, timeout);
        self.settle(result)?;
        self.state = SessionState::Ended;
        info!("Session ended");
        Ok(())
    }

    /// End the session if needed, then reboot the device.
    #[instrument(skip_all)]
    pub fn reboot<T: UsbTransport>(
        &mut self,
        transport: &T,
        config: &SessionConfig,
    ) -> Result<(), ThorError> {
        self.finish_with(transport, config, Command::Reboot)
    }

    /// End the session if needed, then power the device off.
    #[instrument(skip_all)]
    pub fn shutdown<T: UsbTransport>(
        &mut self,
        transport: &T,
        config: &SessionConfig,
    ) -> Result<(), ThorError> {
        self.finish_with(transport, config, Command::Shutdown)
    }

    fn finish_with<T: UsbTransport>(
        &mut self,
        transport: &T,
        config: &SessionConfig,
        command: Command,
    ) -> Result<(), ThorError> {
        if self.state == SessionState::Active {
            self.end(transport, config)?;
        }
        if self.state != SessionState::Ended {
            return Err(ThorError::SessionNotActive { state: self.state });
        }

        let timeout = config.command_timeout();
        let result = request(transport, command, timeout, timeout);
        self.settle(result)?;
        info!(command = %command, "Device acknowledged");
        Ok(())
    }

    /// Wipe user data. Can take minutes.
    #[instrument(skip_all)]
    pub fn erase_user_data<T: UsbTransport>(
        &mut self,
        transport: &T,
        config: &SessionConfig,
    ) -> Result<(), ThorError> {
        self.require_active()?;
        warn!("Erasing user data");
        let result = request(
            transport,
            Command::EraseUserData,
            config.command_timeout(),
            config.long_command_timeout(),
        );
        self.settle(result)?;
        info!("User data erased");
        Ok(())
    }

    /// Switch flashing to the external T-Flash card.
    #[instrument(skip_all)]
    pub fn enable_t_flash<T: UsbTransport>(
        &mut self,
        transport: &T,
        config: &SessionConfig,
    ) -> Result<(), ThorError> {
        self.require_active()?;
        let result = request(
            transport,
            Command::EnableTFlash,
            config.command_timeout(),
            config.long_command_timeout(),
        );
        self.settle(result)?;
        self.t_flash = true;
        info!("T-Flash enabled");
        Ok(())
    }

    /// Announce the number of bytes the following transfers will carry.
    #[instrument(skip(self, transport, config))]
    pub fn declare_total_bytes<T: UsbTransport>(
        &mut self,
        transport: &T,
        config: &SessionConfig,
        total: u64,
    ) -> Result<(), ThorError> {
        self.require_active()?;
        let timeout = config.command_timeout();
        let result = request(transport, Command::TotalBytes(total), timeout, timeout);
        self.settle(result)?;
        self.declared_total = Some(total);
        Ok(())
    }

    /// Reset on device loss, pass everything through otherwise.
    pub(crate) fn settle<R>(&mut self, result: Result<R, ThorError>) -> Result<R, ThorError> {
        if let Err(e) = &result
            && e.is_disconnect()
        {
            warn!("Device disconnected, session closed");
            self.reset();
        }
        result
    }

    #[cfg(test)]
    pub(crate) fn force_active_for_tests(&mut self, version: u8) {
        let caps = Capabilities::for_version(version);
        let (packet_size, sequence_size) = if caps.contains(Capabilities::LARGE_PACKETS) {
            (LARGE_PACKET_SIZE, LARGE_SEQUENCE_SIZE)
        } else {
            (LEGACY_PACKET_SIZE, LEGACY_SEQUENCE_SIZE)
        };
        self.state = SessionState::Active;
        self.protocol_version = version;
        self.capabilities = caps;
        self.packet_size = packet_size;
        self.sequence_size = sequence_size;
    }

    #[cfg(test)]
    pub(crate) fn set_geometry_for_tests(&mut self, packet_size: u32, sequence_size: u32) {
        self.packet_size = packet_size;
        self.sequence_size = sequence_size;
    }
}

/// A negotiation step the device did not acknowledge fails the handshake.
/// Device loss and other transport faults pass through.
fn negotiation_request<T: UsbTransport>(
    transport: &T,
    command: Command,
    timeout: Duration,
) -> Result<u32, ThorError> {
    request(transport, command, timeout, timeout).map_err(|e| match e {
        ThorError::Transport(t) if t.is_timeout() => ThorError::HandshakeFailed {
            reason: format!("{command} not acknowledged within {} ms", timeout.as_millis()),
        },
        ThorError::Codec(c) => ThorError::HandshakeFailed {
            reason: format!("{command} refused: {c}"),
        },
        other => other,
    })
}

/// Raw `ODIN` / `LOKE` exchange.
fn handshake<T: UsbTransport>(transport: &T, timeout: Duration) -> Result<(), ThorError> {
    debug!("Sending handshake");
    transport.write(HANDSHAKE_REQUEST, timeout)?;

    match transport.read(MAX_RESPONSE_READ, timeout) {
        Ok(reply) if reply.starts_with(HANDSHAKE_REPLY) => {
            info!("Handshake complete");
            Ok(())
        }
        Ok(reply) => Err(ThorError::HandshakeFailed {
            reason: format!("unexpected reply {:02X?}", &reply[..reply.len().min(16)]),
        }),
        Err(e) if e.is_timeout() => Err(ThorError::HandshakeFailed {
            reason: format!("no reply within {} ms", timeout.as_millis()),
        }),
        Err(e) => Err(e.into()),
    }
}
