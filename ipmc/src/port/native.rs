//! Native serial port implementation using the `serialport` crate.

use {
    crate::{
        error::{Error, Result},
        port::{
            BridgeKind, DataBits, FlowControl, Parity, Port, PortEnumerator, PortInfo, PortOpener,
            SerialConfig, StopBits,
        },
    },
    log::{debug, trace},
    serialport::ClearBuffer,
    std::{
        io::{Read, Write},
        time::Duration,
    },
};

/// Native serial port implementation.
///
/// On Unix the underlying TTY is opened in exclusive mode, so a second open
/// of the same device fails instead of silently sharing it.
pub struct NativePort {
    port: Option<Box<dyn serialport::SerialPort>>,
    name: String,
    timeout: Duration,
    baud_rate: u32,
}

impl NativePort {
    /// Open a serial port with the given configuration.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let port = serialport::new(&config.port_name, config.baud_rate)
            .timeout(config.timeout)
            .data_bits(config.data_bits.into())
            .parity(config.parity.into())
            .stop_bits(config.stop_bits.into())
            .flow_control(config.flow_control.into())
            .open()
            .map_err(|e| Error::PortUnavailable {
                port: config.port_name.clone(),
                reason: e.to_string(),
            })?;

        debug!(
            "Opened {} at {} baud (timeout {:?})",
            config.port_name, config.baud_rate, config.timeout
        );

        Ok(Self {
            port: Some(port),
            name: config.port_name.clone(),
            timeout: config.timeout,
            baud_rate: config.baud_rate,
        })
    }

    fn closed_error() -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::NotConnected, "port closed")
    }
}

impl Port for NativePort {
    fn name(&self) -> &str {
        &self.name
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        if let Some(ref mut p) = self.port {
            p.set_timeout(timeout)?;
        }
        self.timeout = timeout;
        Ok(())
    }

    fn bytes_available(&mut self) -> Result<usize> {
        match self.port {
            Some(ref p) => Ok(p.bytes_to_read()? as usize),
            None => Err(Error::Io(Self::closed_error())),
        }
    }

    fn clear_input(&mut self) -> Result<()> {
        if let Some(ref p) = self.port {
            p.clear(ClearBuffer::Input)?;
        }
        Ok(())
    }

    fn close(&mut self) {
        // Dropping the handle releases the device
        if self.port.take().is_some() {
            trace!("Closed {}", self.name);
        }
    }
}

impl Drop for NativePort {
    fn drop(&mut self) {
        self.close();
    }
}

impl Read for NativePort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.port
            .as_mut()
            .ok_or_else(Self::closed_error)
            .and_then(|p| p.read(buf))
    }
}

impl Write for NativePort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.port
            .as_mut()
            .ok_or_else(Self::closed_error)
            .and_then(|p| p.write(buf))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.port
            .as_mut()
            .ok_or_else(Self::closed_error)
            .and_then(std::io::Write::flush)
    }
}

/// Host serial ports, enumerated and opened through `serialport`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeSerial;

impl PortEnumerator for NativeSerial {
    fn list_ports(&self) -> Result<Vec<PortInfo>> {
        let ports = serialport::available_ports().map_err(Error::Serial)?;

        Ok(ports
            .into_iter()
            .map(|p| {
                let mut info = PortInfo::named(p.port_name);
                if let serialport::SerialPortType::UsbPort(usb) = p.port_type {
                    info.bridge = BridgeKind::from_vid_pid(usb.vid, usb.pid);
                    trace!(
                        "Found USB port: {} (VID: {:04X}, PID: {:04X}, Bridge: {:?})",
                        info.name, usb.vid, usb.pid, info.bridge
                    );
                    info.vid = Some(usb.vid);
                    info.pid = Some(usb.pid);
                    info.manufacturer = usb.manufacturer;
                    info.product = usb.product;
                    info.serial_number = usb.serial_number;
                }
                info
            })
            .collect())
    }
}

impl PortOpener for NativeSerial {
    type Port = NativePort;

    fn open(&self, config: &SerialConfig) -> Result<NativePort> {
        NativePort::open(config)
    }
}

// Type conversions from our types to serialport types

impl From<DataBits> for serialport::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Seven => Self::Seven,
            DataBits::Eight => Self::Eight,
        }
    }
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => Self::None,
            Parity::Odd => Self::Odd,
            Parity::Even => Self::Even,
        }
    }
}

impl From<StopBits> for serialport::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => Self::One,
            StopBits::Two => Self::Two,
        }
    }
}

impl From<FlowControl> for serialport::FlowControl {
    fn from(flow: FlowControl) -> Self {
        match flow {
            FlowControl::None => Self::None,
            FlowControl::Hardware => Self::Hardware,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_ports() {
        // Only checks that enumeration doesn't panic on this host
        let _ = NativeSerial.list_ports();
    }

    #[test]
    fn test_open_missing_port_is_unavailable() {
        let config = SerialConfig::new("/dev/ipmc-does-not-exist", 115_200);
        match NativeSerial.open(&config) {
            Err(Error::PortUnavailable { port, .. }) => {
                assert_eq!(port, "/dev/ipmc-does-not-exist");
            },
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("opening a missing port must fail"),
        }
    }

    #[test]
    fn test_conversions_to_serialport() {
        assert_eq!(
            serialport::DataBits::from(DataBits::Eight),
            serialport::DataBits::Eight
        );
        assert_eq!(serialport::Parity::from(Parity::None), serialport::Parity::None);
        assert_eq!(
            serialport::StopBits::from(StopBits::One),
            serialport::StopBits::One
        );
        assert_eq!(
            serialport::FlowControl::from(FlowControl::None),
            serialport::FlowControl::None
        );
    }
}
