//! Port handle abstraction and the serialport-backed implementation

use std::fmt;
use std::io::{self, Read, Write};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serialport::SerialPort;
use tracing::debug;

use crate::error::LinkError;

/// Parity checking mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    /// No parity bit
    #[default]
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
}

/// Number of bits per character
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataBits {
    Five,
    Six,
    Seven,
    #[default]
    Eight,
}

/// Number of stop bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopBits {
    #[default]
    One,
    Two,
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        }
    }
}

impl From<DataBits> for serialport::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => serialport::DataBits::Five,
            DataBits::Six => serialport::DataBits::Six,
            DataBits::Seven => serialport::DataBits::Seven,
            DataBits::Eight => serialport::DataBits::Eight,
        }
    }
}

impl From<StopBits> for serialport::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        }
    }
}

/// Line settings passed through to the port on every open
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortSettings {
    /// Baud rate
    pub baud_rate: u32,
    /// Parity
    pub parity: Parity,
    /// Data bits
    pub data_bits: DataBits,
    /// Stop bits
    pub stop_bits: StopBits,
    /// Read/write timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            parity: Parity::None,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            timeout_ms: 100,
        }
    }
}

impl PortSettings {
    /// Default settings at the given baud rate
    pub fn with_baud_rate(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            ..Default::default()
        }
    }

    /// Check the settings
    pub fn validate(&self) -> Result<(), LinkError> {
        if self.baud_rate == 0 {
            return Err(LinkError::Validation(
                "baud rate must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Read/write timeout as a duration
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// An OS serial connection that can be opened and closed repeatedly
pub trait PortHandle: Send {
    /// Open the named port with the given settings
    fn open(&mut self, port_name: &str, settings: &PortSettings) -> Result<(), LinkError>;

    /// Close the port, releasing the OS handle
    ///
    /// The handle is released even when an error is returned; the error
    /// reports what went wrong on the way out (unflushed output).
    fn close(&mut self) -> Result<(), LinkError>;

    /// Check if the port is open
    fn is_open(&self) -> bool;
}

/// Port handle backed by the `serialport` crate
#[derive(Default)]
pub struct SerialHandle {
    port: Option<Box<dyn SerialPort>>,
}

impl SerialHandle {
    /// Create a closed handle
    pub fn new() -> Self {
        Self::default()
    }

    /// The underlying port, if open
    pub fn port_mut(&mut self) -> Option<&mut Box<dyn SerialPort>> {
        self.port.as_mut()
    }

    fn open_port(&mut self) -> io::Result<&mut Box<dyn SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "port is not open"))
    }
}

impl PortHandle for SerialHandle {
    fn open(&mut self, port_name: &str, settings: &PortSettings) -> Result<(), LinkError> {
        if self.port.is_some() {
            return Err(LinkError::OpenFailed {
                port: port_name.to_string(),
                reason: "handle is already open".to_string(),
            });
        }

        let port = serialport::new(port_name, settings.baud_rate)
            .parity(settings.parity.into())
            .data_bits(settings.data_bits.into())
            .stop_bits(settings.stop_bits.into())
            .timeout(settings.timeout())
            .open()
            .map_err(|e| LinkError::OpenFailed {
                port: port_name.to_string(),
                reason: e.to_string(),
            })?;

        debug!("Opened {} at {} baud", port_name, settings.baud_rate);
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) -> Result<(), LinkError> {
        let Some(mut port) = self.port.take() else {
            return Ok(());
        };
        let name = port.name().unwrap_or_default();
        let flushed = port.flush();

        // Dropping the port releases the OS handle
        drop(port);
        debug!("Closed {}", name);

        flushed.map_err(|e| LinkError::CloseFailed {
            port: name,
            reason: e.to_string(),
        })
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }
}

impl Read for SerialHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.open_port()?.read(buf)
    }
}

impl Write for SerialHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.open_port()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.open_port()?.flush()
    }
}

impl fmt::Debug for SerialHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialHandle")
            .field("port", &self.port.as_ref().and_then(|p| p.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = PortSettings::default();
        assert_eq!(settings.baud_rate, 9600);
        assert_eq!(settings.parity, Parity::None);
        assert_eq!(settings.data_bits, DataBits::Eight);
        assert_eq!(settings.stop_bits, StopBits::One);
        assert_eq!(settings.timeout(), Duration::from_millis(100));
    }

    #[test]
    fn test_zero_baud_rejected() {
        assert!(matches!(
            PortSettings::with_baud_rate(0).validate(),
            Err(LinkError::Validation(_))
        ));
        assert!(PortSettings::with_baud_rate(115200).validate().is_ok());
    }

    #[test]
    fn test_closed_handle_io_fails() {
        let mut handle = SerialHandle::new();
        assert!(!handle.is_open());
        assert!(handle.close().is_ok());

        let err = handle.write(b"ping").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[test]
    fn test_open_missing_port_fails() {
        let mut handle = SerialHandle::new();
        let result = handle.open("/dev/hotcom-does-not-exist", &PortSettings::default());

        assert!(matches!(result, Err(LinkError::OpenFailed { .. })));
        assert!(!handle.is_open());
    }
}
