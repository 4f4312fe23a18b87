//! Serial port transport
//!
//! Opens the card's UART and feeds everything it receives into a
//! [`ChunkSink`] from a background reader thread.

use serialport::{SerialPort, SerialPortType};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{ChunkSink, ProtocolConfig, ProtocolError, Transport};

/// An available serial port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,
    /// USB product description, when known
    pub description: Option<String>,
}

/// List serial ports, sorted by name
pub fn list_ports() -> Vec<PortInfo> {
    let mut ports: Vec<PortInfo> = serialport::available_ports()
        .unwrap_or_default()
        .into_iter()
        .map(|info| PortInfo {
            description: match info.port_type {
                SerialPortType::UsbPort(usb) => usb.product.or(usb.manufacturer),
                _ => None,
            },
            name: info.port_name,
        })
        .collect();
    ports.sort_by(|a, b| a.name.cmp(&b.name));
    ports
}

/// Open a port at the configured baud rate, 8N1, no flow control
pub fn open_port(
    name: &str,
    config: &ProtocolConfig,
) -> Result<Box<dyn SerialPort>, ProtocolError> {
    serialport::new(name, config.baud_rate)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .timeout(Duration::from_millis(100))
        .open()
        .map_err(|e| ProtocolError::SerialError(e.to_string()))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// [`Transport`] over a serial port
pub struct SerialTransport {
    name: String,
    port: Mutex<Option<Box<dyn SerialPort>>>,
    running: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
    reader_poll: Duration,
}

impl SerialTransport {
    /// Open `name` with the given configuration
    pub fn open(name: &str, config: &ProtocolConfig) -> Result<Self, ProtocolError> {
        let port = open_port(name, config)?;
        if let Err(e) = port.clear(serialport::ClearBuffer::All) {
            warn!("could not clear buffers of {}: {}", name, e);
        }
        info!("opened {} at {} baud", name, config.baud_rate);

        Ok(Self {
            name: name.to_string(),
            port: Mutex::new(Some(port)),
            running: Arc::new(AtomicBool::new(false)),
            reader: Mutex::new(None),
            reader_poll: config.reader_poll(),
        })
    }

    /// Port name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start delivering received bytes to `sink`, one chunk per read
    pub fn start_reader(&self, sink: ChunkSink) -> Result<(), ProtocolError> {
        let mut reader = lock(&self.reader);
        if reader.is_some() {
            return Err(ProtocolError::SerialError(format!(
                "reader for {} already running",
                self.name
            )));
        }

        let mut port = lock(&self.port)
            .as_ref()
            .ok_or(ProtocolError::TransportNotReady)?
            .try_clone()
            .map_err(|e| ProtocolError::SerialError(e.to_string()))?;

        self.running.store(true, Ordering::Release);
        let running = self.running.clone();
        let poll = self.reader_poll;
        let name = self.name.clone();

        *reader = Some(thread::spawn(move || {
            let mut buffer = [0u8; 512];
            debug!("reader for {} started", name);
            while running.load(Ordering::Acquire) {
                let available = match port.bytes_to_read() {
                    Ok(n) => n as usize,
                    Err(e) => {
                        warn!("reader for {}: {}", name, e);
                        break;
                    }
                };
                if available == 0 {
                    thread::sleep(poll);
                    continue;
                }

                let to_read = available.min(buffer.len());
                match port.read(&mut buffer[..to_read]) {
                    Ok(0) => thread::sleep(poll),
                    Ok(n) => sink.deliver(&buffer[..n]),
                    Err(ref e)
                        if e.kind() == std::io::ErrorKind::TimedOut
                            || e.kind() == std::io::ErrorKind::WouldBlock => {}
                    Err(e) => {
                        warn!("reader for {}: {}", name, e);
                        break;
                    }
                }
            }
            debug!("reader for {} stopped", name);
        }));

        Ok(())
    }

    /// Stop the reader and release the port
    pub fn close(&self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = lock(&self.reader).take() {
            let _ = handle.join();
        }
        if lock(&self.port).take().is_some() {
            info!("closed {}", self.name);
        }
    }
}

impl Transport for SerialTransport {
    fn is_ready(&self) -> bool {
        lock(&self.port).is_some()
    }

    fn send(&self, bytes: &[u8]) -> Result<(), ProtocolError> {
        let mut guard = lock(&self.port);
        let port = guard.as_mut().ok_or(ProtocolError::TransportNotReady)?;
        port.write_all(bytes)?;
        port.flush()?;
        Ok(())
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_ports() {
        // Only checks that enumeration does not panic
        let ports = list_ports();
        assert!(ports.windows(2).all(|w| w[0].name <= w[1].name));
    }

    #[test]
    fn test_open_missing_port() {
        let result = SerialTransport::open("/dev/memlink-no-such-port", &ProtocolConfig::default());
        assert!(matches!(result, Err(ProtocolError::SerialError(_))));
    }
}
