//! Line-framed scan devices
//!
//! Serial RFID readers emit one tag per line, framed by CR and/or LF.
//! [`LineChannel`] turns any async byte stream into scan events; bytes
//! received but not yet framed survive a cancelled read. [`LineDevice`]
//! opens a serial port with the configured line settings, or a named pipe
//! or capture file standing in for one.

use super::channel::{DeviceConnector, RawEvent, ScanChannel};
use async_trait::async_trait;
use mouser_common::config::{self, SerialConfig};
use mouser_common::{Error, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::Instant;
use tokio_serial::{DataBits, SerialPortBuilderExt, SerialPortType, StopBits};
use tracing::{debug, trace};

const READ_CHUNK: usize = 256;

pub struct LineChannel<R> {
    reader: Option<R>,
    pending: Vec<u8>,
    label: String,
}

impl<R: AsyncRead + Unpin + Send> LineChannel<R> {
    pub fn new(reader: R, label: impl Into<String>) -> Self {
        Self {
            reader: Some(reader),
            pending: Vec::new(),
            label: label.into(),
        }
    }

    /// Next non-empty frame already in the buffer
    fn take_frame(&mut self) -> Option<String> {
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n' || *b == b'\r') {
            let frame: Vec<u8> = self.pending.drain(..=pos).take(pos).collect();
            if !frame.is_empty() {
                return Some(String::from_utf8_lossy(&frame).into_owned());
            }
        }
        None
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> ScanChannel for LineChannel<R> {
    async fn read_event(&mut self, timeout: Duration) -> Result<Option<RawEvent>> {
        if let Some(frame) = self.take_frame() {
            return Ok(Some(RawEvent::new(frame)));
        }

        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            let reader = self
                .reader
                .as_mut()
                .ok_or_else(|| Error::DeviceUnavailable(format!("{} is closed", self.label)))?;

            let n = match tokio::time::timeout_at(deadline, reader.read(&mut chunk)).await {
                Err(_) => return Ok(None),
                Ok(result) => result?,
            };

            if n == 0 {
                // End of stream: hand out an unterminated last frame, then report the device gone
                if !self.pending.is_empty() {
                    let frame = String::from_utf8_lossy(&self.pending).into_owned();
                    self.pending.clear();
                    return Ok(Some(RawEvent::new(frame)));
                }
                debug!(device = %self.label, "Scan stream ended");
                return Err(Error::DeviceUnavailable(format!(
                    "{} reached end of input",
                    self.label
                )));
            }

            trace!(device = %self.label, bytes = n, "Scan bytes received");
            self.pending.extend_from_slice(&chunk[..n]);
            if let Some(frame) = self.take_frame() {
                return Ok(Some(RawEvent::new(frame)));
            }
        }
    }

    async fn close(&mut self) {
        if self.reader.take().is_some() {
            debug!(device = %self.label, "Scan channel closed");
        }
        self.pending.clear();
    }
}

/// Serial port visible to the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortInfo {
    pub name: String,
    pub description: String,
}

/// Serial ports the OS reports, in the order it reports them
pub fn available_ports() -> Result<Vec<PortInfo>> {
    let ports = tokio_serial::available_ports()
        .map_err(|e| Error::DeviceUnavailable(format!("cannot enumerate serial ports: {}", e)))?;

    Ok(ports
        .into_iter()
        .map(|port| {
            let description = match port.port_type {
                SerialPortType::UsbPort(usb) => {
                    let product = usb.product.unwrap_or_else(|| "USB serial".to_string());
                    match usb.manufacturer {
                        Some(manufacturer) => format!("{} ({})", product, manufacturer),
                        None => product,
                    }
                }
                SerialPortType::PciPort => "PCI serial".to_string(),
                SerialPortType::BluetoothPort => "Bluetooth serial".to_string(),
                _ => "serial".to_string(),
            };
            PortInfo {
                name: port.port_name,
                description,
            }
        })
        .collect())
}

enum DeviceKind {
    Serial,
    Fifo,
    File,
}

fn device_kind(metadata: &std::fs::Metadata) -> DeviceKind {
    #[cfg(unix)]
    {
        use std::os::unix::fs::FileTypeExt;
        if metadata.file_type().is_fifo() {
            return DeviceKind::Fifo;
        }
    }
    if metadata.is_file() {
        DeviceKind::File
    } else {
        DeviceKind::Serial
    }
}

fn serial_builder(path: &str, settings: &SerialConfig) -> tokio_serial::SerialPortBuilder {
    let data_bits = match settings.data_bits {
        5 => DataBits::Five,
        6 => DataBits::Six,
        7 => DataBits::Seven,
        _ => DataBits::Eight,
    };
    let stop_bits = match settings.stop_bits {
        2 => StopBits::Two,
        _ => StopBits::One,
    };
    let parity = match settings.parity {
        config::Parity::None => tokio_serial::Parity::None,
        config::Parity::Odd => tokio_serial::Parity::Odd,
        config::Parity::Even => tokio_serial::Parity::Even,
    };
    let flow_control = match settings.flow_control {
        config::FlowControl::None => tokio_serial::FlowControl::None,
        config::FlowControl::Software => tokio_serial::FlowControl::Software,
        config::FlowControl::Hardware => tokio_serial::FlowControl::Hardware,
    };

    tokio_serial::new(path, settings.baud_rate)
        .data_bits(data_bits)
        .parity(parity)
        .stop_bits(stop_bits)
        .flow_control(flow_control)
}

/// Scanner behind a serial port, named pipe or capture file
///
/// Serial ports and pipes are read through the reactor, so closing the
/// channel releases the descriptor even while a read is pending.
#[derive(Debug, Clone)]
pub struct LineDevice {
    path: PathBuf,
    serial: SerialConfig,
}

impl LineDevice {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            serial: SerialConfig::default(),
        }
    }

    pub fn with_serial(mut self, serial: SerialConfig) -> Self {
        self.serial = serial;
        self
    }

    fn unavailable(&self, e: impl std::fmt::Display) -> Error {
        Error::DeviceUnavailable(format!("{}: {}", self.path.display(), e))
    }

    fn open_serial(&self) -> Result<Box<dyn ScanChannel>> {
        let path = self.path.to_string_lossy();
        let port = serial_builder(&path, &self.serial)
            .open_native_async()
            .map_err(|e| self.unavailable(e))?;
        debug!(
            device = %path,
            baud_rate = self.serial.baud_rate,
            data_bits = self.serial.data_bits,
            parity = ?self.serial.parity,
            stop_bits = self.serial.stop_bits,
            flow_control = ?self.serial.flow_control,
            "Serial port opened"
        );
        Ok(Box::new(LineChannel::new(port, self.describe())))
    }

    #[cfg(unix)]
    fn open_fifo(&self) -> Result<Box<dyn ScanChannel>> {
        let mut options = tokio::net::unix::pipe::OpenOptions::new();
        // Holding the write side too keeps a writer hanging up from reading as end of input
        #[cfg(any(target_os = "linux", target_os = "android"))]
        options.read_write(true);
        let receiver = options
            .open_receiver(&self.path)
            .map_err(|e| self.unavailable(e))?;
        debug!(device = %self.path.display(), "Scan pipe opened");
        Ok(Box::new(LineChannel::new(receiver, self.describe())))
    }

    #[cfg(not(unix))]
    fn open_fifo(&self) -> Result<Box<dyn ScanChannel>> {
        self.open_serial()
    }
}

#[async_trait]
impl DeviceConnector for LineDevice {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn open(&self) -> Result<Box<dyn ScanChannel>> {
        let metadata = tokio::fs::metadata(&self.path)
            .await
            .map_err(|e| self.unavailable(e))?;

        match device_kind(&metadata) {
            DeviceKind::Serial => self.open_serial(),
            DeviceKind::Fifo => self.open_fifo(),
            DeviceKind::File => {
                let file = tokio::fs::File::open(&self.path)
                    .await
                    .map_err(|e| self.unavailable(e))?;
                debug!(device = %self.path.display(), "Scan capture file opened");
                Ok(Box::new(LineChannel::new(file, self.describe())))
            }
        }
    }
}

/// Scanner input typed or piped on standard input
#[derive(Debug, Clone, Copy, Default)]
pub struct StdinDevice;

#[async_trait]
impl DeviceConnector for StdinDevice {
    fn describe(&self) -> String {
        "stdin".to_string()
    }

    async fn open(&self) -> Result<Box<dyn ScanChannel>> {
        Ok(Box::new(LineChannel::new(tokio::io::stdin(), "stdin")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_frames_split_on_cr_and_lf() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let mut channel = LineChannel::new(reader, "duplex");

        writer.write_all(b"A1\r\nB2\nC3\r").await.unwrap();

        let timeout = Duration::from_millis(200);
        for expected in ["A1", "B2", "C3"] {
            let event = channel.read_event(timeout).await.unwrap().unwrap();
            assert_eq!(event.data, expected);
        }
    }

    #[tokio::test]
    async fn test_partial_frame_survives_timeout() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let mut channel = LineChannel::new(reader, "duplex");

        writer.write_all(b"98511").await.unwrap();
        assert!(channel
            .read_event(Duration::from_millis(30))
            .await
            .unwrap()
            .is_none());

        writer.write_all(b"2\n").await.unwrap();
        let event = channel
            .read_event(Duration::from_millis(200))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.data, "985112");
    }

    #[tokio::test]
    async fn test_end_of_stream_flushes_then_errors() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let mut channel = LineChannel::new(reader, "duplex");

        writer.write_all(b"LAST").await.unwrap();
        drop(writer);

        let timeout = Duration::from_millis(200);
        assert_eq!(channel.read_event(timeout).await.unwrap().unwrap().data, "LAST");
        assert!(matches!(
            channel.read_event(timeout).await,
            Err(Error::DeviceUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (_writer, reader) = tokio::io::duplex(64);
        let mut channel = LineChannel::new(reader, "duplex");
        channel.close().await;
        channel.close().await;
        assert!(channel.read_event(Duration::from_millis(10)).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_device_path() {
        let device = LineDevice::new("/nonexistent/mouser-scanner");
        assert!(matches!(device.open().await, Err(Error::DeviceUnavailable(_))));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_non_tty_device_rejected_as_serial_port() {
        let device = LineDevice::new("/dev/null");
        assert!(matches!(device.open().await, Err(Error::DeviceUnavailable(_))));
    }

    #[tokio::test]
    async fn test_capture_file_replayed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scans.txt");
        std::fs::write(&path, "F1\r\nF2\r\n").unwrap();

        let mut channel = LineDevice::new(&path).open().await.unwrap();
        let timeout = Duration::from_millis(200);
        assert_eq!(channel.read_event(timeout).await.unwrap().unwrap().data, "F1");
        assert_eq!(channel.read_event(timeout).await.unwrap().unwrap().data, "F2");
        assert!(matches!(
            channel.read_event(timeout).await,
            Err(Error::DeviceUnavailable(_))
        ));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_closed_pipe_leaves_no_reader_behind() {
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scanner");
        let status = std::process::Command::new("mkfifo")
            .arg(&path)
            .status()
            .unwrap();
        assert!(status.success());

        let device = LineDevice::new(&path);

        let mut first = device.open().await.unwrap();
        assert!(first
            .read_event(Duration::from_millis(30))
            .await
            .unwrap()
            .is_none());
        first.close().await;

        let mut second = device.open().await.unwrap();
        let mut writer = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        writer.write_all(b"T1\n").unwrap();

        let event = second
            .read_event(Duration::from_millis(500))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.data, "T1");
        second.close().await;
    }
}
