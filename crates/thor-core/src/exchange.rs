//! Single command/response exchanges over a transport.

use std::time::Duration;
use tracing::{debug, trace};

use crate::error::ThorError;
use crate::protocol::{Command, MAX_RESPONSE_READ, Response};
use crate::transport::{TransportError, UsbTransport};

pub(crate) fn send_command<T: UsbTransport>(
    transport: &T,
    command: &Command,
    timeout: Duration,
) -> Result<(), TransportError> {
    debug!(command = %command, "Sending command");
    transport.write(&command.encode(), timeout)?;
    Ok(())
}

/// Read and decode one response frame. Nothing is trusted before decoding.
pub(crate) fn receive_response<T: UsbTransport>(
    transport: &T,
    timeout: Duration,
) -> Result<Response, ThorError> {
    let bytes = transport.read(MAX_RESPONSE_READ, timeout)?;
    let response = Response::decode(&bytes)?;
    trace!(response = %response, "Received response");
    Ok(response)
}

/// Send `command`, wait for its answer and check it belongs to the same
/// command family. Returns the response data word.
pub(crate) fn request<T: UsbTransport>(
    transport: &T,
    command: Command,
    write_timeout: Duration,
    read_timeout: Duration,
) -> Result<u32, ThorError> {
    send_command(transport, &command, write_timeout)?;
    let data = receive_response(transport, read_timeout)?.expect(command.opcode())?;
    debug!(command = %command, data = %format!("0x{:08X}", data), "Command acknowledged");
    Ok(data)
}
