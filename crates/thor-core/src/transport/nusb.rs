//! nusb-based USB transport implementation.

use nusb::io::{EndpointRead, EndpointWrite};
use nusb::transfer::{Bulk, In, Out};
use nusb::{MaybeFuture, list_devices};
use std::io::{Read, Write};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, instrument, trace};

use super::traits::{TransportError, UsbTransport};
use crate::protocol::constants::{DOWNLOAD_MODE_PIDS, MAX_RESPONSE_READ, SAMSUNG_VENDOR_ID};

/// Interface carrying the CDC data endpoints in download mode.
const DATA_INTERFACE: u8 = 1;

/// nusb-based USB transport.
pub struct NusbTransport {
    reader: Mutex<EndpointRead<Bulk>>,
    writer: Mutex<EndpointWrite<Bulk>>,
    vid: u16,
    pid: u16,
}

impl NusbTransport {
    /// Open the first Samsung device in download mode.
    #[instrument(level = "info")]
    pub fn open() -> Result<Self, TransportError> {
        let devices = list_devices()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        for device_info in devices {
            if device_info.vendor_id() == SAMSUNG_VENDOR_ID
                && DOWNLOAD_MODE_PIDS.contains(&device_info.product_id())
            {
                return Self::open_device_info(device_info);
            }
        }

        Err(TransportError::DeviceNotFound {
            vid: SAMSUNG_VENDOR_ID,
            pid: 0,
        })
    }

    /// Open a device with specific VID/PID.
    #[instrument(level = "info", fields(vid = format!("{:04X}", vid), pid = format!("{:04X}", pid)))]
    pub fn open_with_ids(vid: u16, pid: u16) -> Result<Self, TransportError> {
        let device_info = list_devices()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?
            .find(|d| d.vendor_id() == vid && d.product_id() == pid)
            .ok_or(TransportError::DeviceNotFound { vid, pid })?;

        Self::open_device_info(device_info)
    }

    fn open_device_info(device_info: nusb::DeviceInfo) -> Result<Self, TransportError> {
        let vid = device_info.vendor_id();
        let pid = device_info.product_id();

        info!(
            vendor_id = %format!("{:04X}", vid),
            product_id = %format!("{:04X}", pid),
            "Found device"
        );

        let device = device_info
            .open()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        // Download mode exposes a CDC ACM pair; the bulk endpoints live on
        // the data interface, which is not always number 1.
        let mut in_endpoint: u8 = 0;
        let mut out_endpoint: u8 = 0;
        let mut interface_number = DATA_INTERFACE;

        for config in device.configurations() {
            for iface in config.interfaces() {
                for alt in iface.alt_settings() {
                    let mut bulk_in = 0;
                    let mut bulk_out = 0;
                    for ep in alt.endpoints() {
                        if ep.transfer_type() == nusb::descriptors::TransferType::Bulk {
                            if ep.direction() == nusb::transfer::Direction::In {
                                bulk_in = ep.address();
                            } else {
                                bulk_out = ep.address();
                            }
                        }
                    }
                    if bulk_in != 0 && bulk_out != 0 && in_endpoint == 0 {
                        in_endpoint = bulk_in;
                        out_endpoint = bulk_out;
                        interface_number = iface.interface_number();
                    }
                }
            }
        }

        if in_endpoint == 0 {
            return Err(TransportError::EndpointNotFound {
                ep_type: "Bulk".into(),
                direction: "In".into(),
            });
        }
        if out_endpoint == 0 {
            return Err(TransportError::EndpointNotFound {
                ep_type: "Bulk".into(),
                direction: "Out".into(),
            });
        }

        let interface = device.claim_interface(interface_number).wait().map_err(|e| {
            TransportError::ClaimInterfaceFailed {
                interface: interface_number,
                message: e.to_string(),
            }
        })?;

        let reader = interface
            .endpoint::<Bulk, In>(in_endpoint)
            .map_err(|e| TransportError::ReadFailed(e.to_string()))?
            .reader(MAX_RESPONSE_READ);
        let writer = interface
            .endpoint::<Bulk, Out>(out_endpoint)
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?
            .writer(MAX_RESPONSE_READ);

        info!(
            interface = interface_number,
            in_ep = %format!("0x{:02X}", in_endpoint),
            out_ep = %format!("0x{:02X}", out_endpoint),
            "Device opened successfully"
        );

        Ok(Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            vid,
            pid,
        })
    }

    fn reader(&self) -> MutexGuard<'_, EndpointRead<Bulk>> {
        self.reader.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn writer(&self) -> MutexGuard<'_, EndpointWrite<Bulk>> {
        self.writer.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl UsbTransport for NusbTransport {
    #[instrument(level = "trace", skip(self, data), fields(len = data.len()))]
    fn write(&self, data: &[u8], timeout: Duration) -> Result<usize, TransportError> {
        let mut writer = self.writer();
        writer.set_write_timeout(timeout);
        writer
            .write_all(data)
            .map_err(|e| TransportError::from_io(e, timeout, true))?;
        writer
            .flush()
            .map_err(|e| TransportError::from_io(e, timeout, true))?;

        trace!(bytes_written = data.len(), "Write complete");
        Ok(data.len())
    }

    #[instrument(level = "trace", skip(self), fields(max_len))]
    fn read(&self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let mut reader = self.reader();
        reader.set_read_timeout(timeout);
        let mut buf = vec![0u8; max_len];

        let n = reader
            .read(&mut buf)
            .map_err(|e| TransportError::from_io(e, timeout, false))?;

        buf.truncate(n);
        debug!(bytes_read = n, "Read complete");
        Ok(buf)
    }

    fn is_connected(&self) -> bool {
        // nusb reports removal through failed transfers only.
        true
    }

    fn vendor_id(&self) -> u16 {
        self.vid
    }

    fn product_id(&self) -> u16 {
        self.pid
    }
}
