//! Thor - high-level orchestrator for a download-mode session.
//!
//! Owns the transport for the lifetime of the session and enforces the
//! legal ordering of operations:
//!
//! ```text
//! begin() -> [read_pit()] -> [write_pit() | flash()]* -> end() -> [reboot() | shutdown()]
//! ```

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::error::ThorError;
use crate::events::{PacketDirection, ThorEvent, ThorObserver, ThorPhase, TracingObserver};
use crate::pit::{self, PartitionSelector, PitTable};
use crate::session::{Session, SessionConfig, SessionState};
use crate::transfer::{
    CancelToken, FlashOptions, FlashTarget, TransferEngine, TransferError, TransferReport,
};
use crate::transport::{TransportError, UsbTransport};

/// A Thor session over one exclusively owned transport.
pub struct Thor<T: UsbTransport, O: ThorObserver = TracingObserver> {
    transport: T,
    config: SessionConfig,
    observer: Arc<O>,
    session: Session,
    pit: Option<PitTable>,
    phase: ThorPhase,
}

impl<T: UsbTransport> Thor<T, TracingObserver> {
    /// Create an orchestrator with the default tracing observer.
    pub fn new(transport: T, config: SessionConfig) -> Self {
        Self::with_observer(transport, config, Arc::new(TracingObserver))
    }
}

impl<T: UsbTransport, O: ThorObserver + 'static> Thor<T, O> {
    pub fn with_observer(transport: T, config: SessionConfig, observer: Arc<O>) -> Self {
        Self {
            transport,
            config,
            observer,
            session: Session::new(),
            pit: None,
            phase: ThorPhase::Idle,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// PIT read in the current session, if any.
    pub fn pit(&self) -> Option<&PitTable> {
        self.pit.as_ref()
    }

    pub fn phase(&self) -> ThorPhase {
        self.phase
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Handshake and negotiate packet size.
    #[instrument(skip(self))]
    pub fn begin(&mut self) -> Result<(), ThorError> {
        self.set_phase(ThorPhase::Handshake);
        self.pit = None;

        let transport = ObservableTransport::new(&self.transport, self.observer.as_ref());
        let result = self.session.begin(&transport, &self.config);
        self.settle(result)?;

        self.observer.on_event(&ThorEvent::SessionStarted {
            protocol_version: self.session.protocol_version(),
            packet_size: self.session.packet_size(),
        });
        self.set_phase(ThorPhase::Active);
        Ok(())
    }

    /// Download and parse the device PIT. The table is kept for `flash`.
    #[instrument(skip(self))]
    pub fn read_pit(&mut self) -> Result<&PitTable, ThorError> {
        self.session.require_active()?;
        self.set_phase(ThorPhase::PitDownload);

        let transport = ObservableTransport::new(&self.transport, self.observer.as_ref());
        let result = pit::download(&transport, &self.session, &self.config)
            .and_then(|bytes| PitTable::parse(&bytes).map_err(ThorError::from));
        let table = self.settle(result)?;

        info!(partitions = table.len(), "PIT read");
        self.set_phase(ThorPhase::Active);
        Ok(self.pit.insert(table))
    }

    /// Replace the device PIT.
    #[instrument(skip_all, fields(partitions = table.len()))]
    pub fn write_pit(&mut self, table: &PitTable) -> Result<(), ThorError> {
        self.session.require_active()?;
        let bytes = table.to_bytes()?;
        self.set_phase(ThorPhase::PitUpload);

        let transport = ObservableTransport::new(&self.transport, self.observer.as_ref());
        let result = TransferEngine::new(&transport, &self.config, self.observer.as_ref())
            .send_pit(&self.session, &bytes);
        self.settle(result)?;

        self.pit = Some(table.clone());
        self.set_phase(ThorPhase::Active);
        Ok(())
    }

    /// Flash `size` bytes from `source` to the selected partition.
    pub fn flash<R: Read>(
        &mut self,
        selector: &PartitionSelector,
        source: R,
        size: u64,
    ) -> Result<TransferReport, ThorError> {
        self.flash_with_cancel(selector, source, size, &CancelToken::new())
    }

    /// As [`Thor::flash`], stopping between chunks once `cancel` fires.
    ///
    /// A cancelled flash ends the session (best effort) and returns
    /// [`ThorError::Cancelled`].
    #[instrument(skip(self, source, cancel), fields(partition = %selector))]
    pub fn flash_with_cancel<R: Read>(
        &mut self,
        selector: &PartitionSelector,
        source: R,
        size: u64,
        cancel: &CancelToken,
    ) -> Result<TransferReport, ThorError> {
        self.session.require_active()?;
        let target = self.resolve(selector)?;
        if size == 0 {
            return Err(ThorError::UnsupportedOperation(format!(
                "refusing to flash an empty image to {}",
                target.name
            )));
        }

        if self.session.declared_total().is_none() {
            self.declare_total_bytes(size)?;
        }

        self.set_phase(ThorPhase::Flashing);
        let transport = ObservableTransport::new(&self.transport, self.observer.as_ref());
        let result = TransferEngine::new(&transport, &self.config, self.observer.as_ref()).send(
            &self.session,
            source,
            size,
            &target,
            FlashOptions::from(&self.config),
            cancel,
        );

        match result {
            Ok(report) => {
                self.observer.on_event(&ThorEvent::FlashComplete {
                    partition: target.name,
                    bytes: report.bytes_sent,
                });
                self.set_phase(ThorPhase::Active);
                Ok(report)
            }
            Err(ThorError::Transfer(TransferError::Cancelled { progress })) => {
                if let Err(e) = self.end() {
                    warn!(error = %e, "Could not end session after cancellation");
                }
                Err(ThorError::Cancelled { progress })
            }
            Err(e) => self.settle(Err(e)),
        }
    }

    /// Close the session. Safe to call again once ended.
    #[instrument(skip(self))]
    pub fn end(&mut self) -> Result<(), ThorError> {
        let transport = ObservableTransport::new(&self.transport, self.observer.as_ref());
        let result = self.session.end(&transport, &self.config);
        self.settle(result)?;
        self.set_phase(ThorPhase::Ended);
        Ok(())
    }

    /// Reboot the device, ending the session first if still active.
    #[instrument(skip(self))]
    pub fn reboot(&mut self) -> Result<(), ThorError> {
        let transport = ObservableTransport::new(&self.transport, self.observer.as_ref());
        let result = self.session.reboot(&transport, &self.config);
        self.settle(result)?;
        self.set_phase(ThorPhase::Ended);
        Ok(())
    }

    /// Power the device off, ending the session first if still active.
    #[instrument(skip(self))]
    pub fn shutdown(&mut self) -> Result<(), ThorError> {
        let transport = ObservableTransport::new(&self.transport, self.observer.as_ref());
        let result = self.session.shutdown(&transport, &self.config);
        self.settle(result)?;
        self.set_phase(ThorPhase::Ended);
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn erase_user_data(&mut self) -> Result<(), ThorError> {
        let transport = ObservableTransport::new(&self.transport, self.observer.as_ref());
        let result = self.session.erase_user_data(&transport, &self.config);
        self.settle(result)
    }

    #[instrument(skip(self))]
    pub fn enable_t_flash(&mut self) -> Result<(), ThorError> {
        let transport = ObservableTransport::new(&self.transport, self.observer.as_ref());
        let result = self.session.enable_t_flash(&transport, &self.config);
        self.settle(result)
    }

    /// Announce the combined size of the images about to be flashed.
    /// Without this, `flash` announces the size of its own image.
    #[instrument(skip(self))]
    pub fn declare_total_bytes(&mut self, total: u64) -> Result<(), ThorError> {
        let transport = ObservableTransport::new(&self.transport, self.observer.as_ref());
        let result = self.session.declare_total_bytes(&transport, &self.config, total);
        self.settle(result)
    }

    fn resolve(&self, selector: &PartitionSelector) -> Result<FlashTarget, ThorError> {
        if let PartitionSelector::Raw(raw) = selector {
            return Ok(FlashTarget::from(*raw));
        }
        let table = self.pit.as_ref().ok_or_else(|| {
            ThorError::UnknownPartition(format!("{selector} (no PIT read in this session)"))
        })?;
        table
            .lookup(selector)
            .map(FlashTarget::from)
            .ok_or_else(|| ThorError::UnknownPartition(selector.to_string()))
    }

    fn set_phase(&mut self, to: ThorPhase) {
        if self.phase != to {
            self.observer.on_event(&ThorEvent::PhaseChanged {
                from: self.phase,
                to,
            });
            self.phase = to;
        }
    }

    /// Report failures and drop everything negotiated when the device is gone.
    fn settle<R>(&mut self, result: Result<R, ThorError>) -> Result<R, ThorError> {
        if let Err(e) = &result {
            if e.is_disconnect() {
                self.session.reset();
                self.pit = None;
                self.observer.on_event(&ThorEvent::DeviceDisconnected);
            }
            self.observer.on_event(&ThorEvent::Error {
                code: e.exit_code(),
                message: e.to_string(),
            });
            let phase = match self.session.state() {
                SessionState::Active => ThorPhase::Active,
                SessionState::Ended => ThorPhase::Ended,
                SessionState::Closed | SessionState::Handshaking => ThorPhase::Error,
            };
            self.set_phase(phase);
        }
        result
    }
}

/// Transport wrapper that emits packet events.
struct ObservableTransport<'a, T: UsbTransport> {
    inner: &'a T,
    observer: &'a dyn ThorObserver,
}

impl<'a, T: UsbTransport> ObservableTransport<'a, T> {
    fn new(inner: &'a T, observer: &'a dyn ThorObserver) -> Self {
        Self { inner, observer }
    }
}

impl<T: UsbTransport> UsbTransport for ObservableTransport<'_, T> {
    fn write(&self, data: &[u8], timeout: Duration) -> Result<usize, TransportError> {
        let res = self.inner.write(data, timeout);
        if res.is_ok() {
            self.observer.on_event(&ThorEvent::Packet {
                direction: PacketDirection::Tx,
                length: data.len(),
                data: Some(data.iter().take(32).cloned().collect()),
            });
        }
        res
    }

    fn read(&self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let res = self.inner.read(max_len, timeout);
        if let Ok(data) = &res {
            self.observer.on_event(&ThorEvent::Packet {
                direction: PacketDirection::Rx,
                length: data.len(),
                data: Some(data.iter().take(32).cloned().collect()),
            });
        }
        res
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn vendor_id(&self) -> u16 {
        self.inner.vendor_id()
    }

    fn product_id(&self) -> u16 {
        self.inner.product_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::exit_code;
    use crate::events::{CancelOnProgress, RecordingObserver};
    use crate::pit::fixtures::two_entry_table;
    use crate::pit::{BinaryType, DeviceType, RawPartition};
    use crate::protocol::{
        END_SESSION, LEGACY_PACKET_SIZE, Opcode, Response, SESSION_TOTAL_BYTES, TRANSFER_END,
    };
    use crate::transport::MockTransport;

    fn config() -> SessionConfig {
        SessionConfig {
            handshake_timeout_ms: 10,
            command_timeout_ms: 10,
            chunk_timeout_ms: 10,
            end_sequence_timeout_ms: 10,
            ..SessionConfig::default()
        }
    }

    fn thor(mock: &MockTransport) -> Thor<MockTransport, RecordingObserver> {
        Thor::with_observer(mock.clone(), config(), Arc::new(RecordingObserver::new()))
    }

    fn queue_begin(mock: &MockTransport) {
        mock.queue_loke();
        mock.queue_response(Response::Session { data: 1 << 16 });
    }

    fn queue_pit(mock: &MockTransport) {
        let bytes = two_entry_table().to_bytes().unwrap();
        mock.queue_response(Response::Pit {
            data: bytes.len() as u32,
        });
        mock.queue_bytes(&bytes);
        mock.queue_zlp();
        mock.queue_response(Response::Pit { data: 0 });
    }

    /// Total-bytes declaration plus a single-packet transfer.
    fn queue_small_flash(mock: &MockTransport) {
        mock.queue_response(Response::Session { data: 0 });
        for _ in 0..4 {
            mock.queue_response(Response::FileTransfer { data: 0 });
        }
    }

    #[test]
    fn test_operations_require_active_session() {
        let mock = MockTransport::new();
        let mut thor = thor(&mock);
        let boot = PartitionSelector::Name("BOOT".into());

        assert!(matches!(
            thor.read_pit(),
            Err(ThorError::SessionNotActive { .. })
        ));
        assert!(matches!(
            thor.flash(&boot, &[0u8; 4][..], 4),
            Err(ThorError::SessionNotActive { .. })
        ));

        queue_begin(&mock);
        thor.begin().unwrap();
        mock.queue_response(Response::EndSession { data: 0 });
        thor.end().unwrap();

        let err = thor.flash(&boot, &[0u8; 4][..], 4).unwrap_err();
        assert!(matches!(
            err,
            ThorError::SessionNotActive {
                state: SessionState::Ended
            }
        ));
        assert_eq!(err.exit_code(), exit_code::SESSION);
        assert!(thor.read_pit().is_err());
    }

    #[test]
    fn test_read_pit_then_flash_by_name() {
        let mock = MockTransport::new();
        let mut thor = thor(&mock);
        queue_begin(&mock);
        thor.begin().unwrap();

        queue_pit(&mock);
        let table = thor.read_pit().unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.find_by_name("BOOT").unwrap().partition_id, 11);
        assert_eq!(table.find_by_id(17).unwrap().name(), "RADIO");

        mock.clear_writes();
        queue_small_flash(&mock);
        let report = thor
            .flash(&"BOOT".parse().unwrap(), &[9u8; 10][..], 10)
            .unwrap();
        assert_eq!(report.bytes_sent, 10);
        assert_eq!(report.chunks, 1);

        let commands = mock.command_writes();
        assert_eq!(commands[0].opcode(), Opcode::Session);
        assert_eq!(commands[0].sub_opcode(), SESSION_TOTAL_BYTES);
        assert_eq!(commands[0].arg(0), Some(10));
        let end = commands
            .iter()
            .find(|c| c.sub_opcode() == TRANSFER_END && c.opcode() == Opcode::FileTransfer)
            .unwrap();
        assert_eq!(end.arg(4), Some(11));

        let data: Vec<_> = mock
            .get_writes()
            .into_iter()
            .filter(|w| w.len() == LEGACY_PACKET_SIZE as usize)
            .collect();
        assert_eq!(data.len(), 1);
        assert_eq!(&data[0][..10], &[9u8; 10]);
        assert_eq!(mock.pending_replies(), 0);

        // Total bytes are declared once per session.
        for _ in 0..4 {
            mock.queue_response(Response::FileTransfer { data: 0 });
        }
        mock.clear_writes();
        thor.flash(&PartitionSelector::Id(17), &[1u8; 3][..], 3)
            .unwrap();
        assert!(
            mock.command_writes()
                .iter()
                .all(|c| c.opcode() == Opcode::FileTransfer)
        );
    }

    #[test]
    fn test_name_selector_needs_pit() {
        let mock = MockTransport::new();
        let mut thor = thor(&mock);
        queue_begin(&mock);
        thor.begin().unwrap();
        mock.clear_writes();

        let err = thor
            .flash(&PartitionSelector::Name("BOOT".into()), &[0u8; 4][..], 4)
            .unwrap_err();
        assert!(matches!(err, ThorError::UnknownPartition(_)));
        assert!(mock.get_writes().is_empty());

        queue_pit(&mock);
        thor.read_pit().unwrap();
        let err = thor
            .flash(&PartitionSelector::Id(99), &[0u8; 4][..], 4)
            .unwrap_err();
        assert!(matches!(err, ThorError::UnknownPartition(_)));
    }

    #[test]
    fn test_raw_selector_skips_pit() {
        let mock = MockTransport::new();
        let mut thor = thor(&mock);
        queue_begin(&mock);
        thor.begin().unwrap();

        queue_small_flash(&mock);
        let raw = PartitionSelector::Raw(RawPartition {
            partition_id: 3,
            binary_type: BinaryType::ApplicationProcessor,
            device_type: DeviceType::Mmc,
        });
        thor.flash(&raw, &[1u8; 4][..], 4).unwrap();
        assert!(thor.pit().is_none());
    }

    #[test]
    fn test_explicit_total_bytes_not_redeclared() {
        let mock = MockTransport::new();
        let mut thor = thor(&mock);
        queue_begin(&mock);
        thor.begin().unwrap();

        mock.queue_response(Response::Session { data: 0 });
        thor.declare_total_bytes(1 << 20).unwrap();
        mock.clear_writes();

        for _ in 0..4 {
            mock.queue_response(Response::FileTransfer { data: 0 });
        }
        let raw = PartitionSelector::Raw(RawPartition {
            partition_id: 3,
            binary_type: BinaryType::ApplicationProcessor,
            device_type: DeviceType::Mmc,
        });
        thor.flash(&raw, &[1u8; 4][..], 4).unwrap();
        assert!(
            mock.command_writes()
                .iter()
                .all(|c| c.opcode() != Opcode::Session)
        );
    }

    #[test]
    fn test_empty_image_does_not_declare_total() {
        let mock = MockTransport::new();
        let mut thor = thor(&mock);
        queue_begin(&mock);
        thor.begin().unwrap();
        mock.clear_writes();

        let raw = PartitionSelector::Raw(RawPartition {
            partition_id: 3,
            binary_type: BinaryType::ApplicationProcessor,
            device_type: DeviceType::Mmc,
        });
        let err = thor.flash(&raw, &[][..], 0).unwrap_err();
        assert!(matches!(err, ThorError::UnsupportedOperation(_)));
        assert!(mock.get_writes().is_empty());
        assert_eq!(thor.session().declared_total(), None);
        assert!(thor.session().is_active());

        queue_small_flash(&mock);
        thor.flash(&raw, &[1u8; 4][..], 4).unwrap();
        let commands = mock.command_writes();
        assert_eq!(commands[0].opcode(), Opcode::Session);
        assert_eq!(commands[0].sub_opcode(), SESSION_TOTAL_BYTES);
        assert_eq!(commands[0].arg(0), Some(4));
    }

    #[test]
    fn test_cancel_between_chunks_ends_session() {
        let mock = MockTransport::new();
        let cancel = CancelToken::new();
        let observer = Arc::new(CancelOnProgress(cancel.clone()));
        let mut thor = Thor::with_observer(mock.clone(), config(), observer);
        queue_begin(&mock);
        thor.begin().unwrap();

        // Total bytes, transfer start, sequence start, first chunk, end session.
        mock.queue_response(Response::Session { data: 0 });
        mock.queue_response(Response::FileTransfer { data: 0 });
        mock.queue_response(Response::FileTransfer { data: 0 });
        mock.queue_response(Response::FileTransfer { data: 0 });
        mock.queue_response(Response::EndSession { data: 0 });
        mock.clear_writes();

        let raw = PartitionSelector::Raw(RawPartition {
            partition_id: 3,
            binary_type: BinaryType::ApplicationProcessor,
            device_type: DeviceType::Mmc,
        });
        let image = vec![7u8; LEGACY_PACKET_SIZE as usize + 1];
        let err = thor
            .flash_with_cancel(&raw, &image[..], image.len() as u64, &cancel)
            .unwrap_err();

        let ThorError::Cancelled { progress } = &err else {
            panic!("expected cancellation, got {err:?}");
        };
        assert_eq!(progress.bytes_sent, u64::from(LEGACY_PACKET_SIZE));
        assert_eq!(err.exit_code(), exit_code::CANCELLED);
        assert_eq!(thor.session().state(), SessionState::Ended);

        let data = mock
            .get_writes()
            .into_iter()
            .filter(|w| w.len() == LEGACY_PACKET_SIZE as usize)
            .count();
        assert_eq!(data, 1);
        let last = mock.command_writes().pop().unwrap();
        assert_eq!(last.opcode(), Opcode::EndSession);
        assert_eq!(last.sub_opcode(), END_SESSION);
        assert_eq!(mock.pending_replies(), 0);
    }

    #[test]
    fn test_cancel_ends_session() {
        let mock = MockTransport::new();
        let mut thor = thor(&mock);
        queue_begin(&mock);
        thor.begin().unwrap();
        queue_pit(&mock);
        thor.read_pit().unwrap();

        mock.queue_response(Response::Session { data: 0 });
        mock.queue_response(Response::FileTransfer { data: 0 });
        mock.queue_response(Response::FileTransfer { data: 0 });
        mock.queue_response(Response::EndSession { data: 0 });
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = thor
            .flash_with_cancel(&"BOOT".parse().unwrap(), &[0u8; 4][..], 4, &cancel)
            .unwrap_err();
        assert!(matches!(err, ThorError::Cancelled { .. }));
        assert_eq!(err.exit_code(), exit_code::CANCELLED);
        assert_eq!(thor.session().state(), SessionState::Ended);

        let last = mock.command_writes().pop().unwrap();
        assert_eq!(last.opcode(), Opcode::EndSession);
        assert_eq!(last.sub_opcode(), END_SESSION);
    }

    #[test]
    fn test_disconnect_mid_flash_closes_session() {
        let mock = MockTransport::new();
        let mut thor = thor(&mock);
        queue_begin(&mock);
        thor.begin().unwrap();
        queue_pit(&mock);
        thor.read_pit().unwrap();

        mock.queue_response(Response::Session { data: 0 });
        mock.queue_response(Response::FileTransfer { data: 0 });
        mock.queue_response(Response::FileTransfer { data: 0 });
        mock.queue_disconnect();

        let err = thor
            .flash(&"BOOT".parse().unwrap(), &[0u8; 4][..], 4)
            .unwrap_err();
        assert_eq!(err.exit_code(), exit_code::TRANSPORT);
        assert!(err.is_disconnect());
        assert_eq!(thor.session().state(), SessionState::Closed);
        assert!(thor.pit().is_none());
        assert_eq!(thor.phase(), ThorPhase::Error);
    }

    #[test]
    fn test_aborted_transfer_keeps_session_active() {
        let mock = MockTransport::new();
        let mut thor = thor(&mock);
        queue_begin(&mock);
        thor.begin().unwrap();
        queue_pit(&mock);
        thor.read_pit().unwrap();

        mock.queue_response(Response::Session { data: 0 });
        mock.queue_response(Response::FileTransfer { data: 0 });
        mock.queue_response(Response::FileTransfer { data: 0 });
        mock.queue_timeout();
        mock.queue_timeout();

        let err = thor
            .flash(&"BOOT".parse().unwrap(), &[0u8; 4][..], 4)
            .unwrap_err();
        assert_eq!(err.exit_code(), exit_code::TRANSFER);
        assert!(thor.session().is_active());
        assert!(thor.pit().is_some());
    }

    #[test]
    fn test_write_pit_on_legacy_device() {
        let mock = MockTransport::new();
        let mut thor = thor(&mock);
        mock.queue_loke();
        mock.queue_response(Response::Session { data: 0 });
        thor.begin().unwrap();

        let err = thor.write_pit(&two_entry_table()).unwrap_err();
        assert!(matches!(err, ThorError::UnsupportedOperation(_)));
    }

    #[test]
    fn test_write_pit_replaces_cached_table() {
        let mock = MockTransport::new();
        let mut thor = thor(&mock);
        queue_begin(&mock);
        thor.begin().unwrap();

        for _ in 0..4 {
            mock.queue_response(Response::Pit { data: 0 });
        }
        let table = two_entry_table();
        thor.write_pit(&table).unwrap();
        assert_eq!(thor.pit(), Some(&table));
    }

    #[test]
    fn test_events_follow_the_session() {
        let mock = MockTransport::new();
        let observer = Arc::new(RecordingObserver::new());
        let mut thor = Thor::with_observer(mock.clone(), config(), observer.clone());
        queue_begin(&mock);
        thor.begin().unwrap();
        mock.queue_response(Response::EndSession { data: 0 });
        thor.end().unwrap();

        let events = observer.events();
        assert!(events.contains(&ThorEvent::SessionStarted {
            protocol_version: 1,
            packet_size: LEGACY_PACKET_SIZE,
        }));
        assert!(events.contains(&ThorEvent::PhaseChanged {
            from: ThorPhase::Active,
            to: ThorPhase::Ended,
        }));
        let tx = events
            .iter()
            .filter(|e| {
                matches!(
                    e,
                    ThorEvent::Packet {
                        direction: PacketDirection::Tx,
                        ..
                    }
                )
            })
            .count();
        assert_eq!(tx, 3); // ODIN, begin, end
    }

    #[test]
    fn test_handshake_failure_reports_error_phase() {
        let mock = MockTransport::new();
        let mut thor = thor(&mock);
        let err = thor.begin().unwrap_err();
        assert_eq!(err.exit_code(), exit_code::HANDSHAKE);
        assert_eq!(thor.phase(), ThorPhase::Error);

        queue_begin(&mock);
        thor.begin().unwrap();
        assert_eq!(thor.phase(), ThorPhase::Active);
    }
}
