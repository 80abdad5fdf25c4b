//! Serial-line CAN adapters (SLCAN ASCII protocol).
//!
//! A worker thread owns the serial port and groups outgoing lines; the
//! transport talks to it over crossbeam channels. Multi-channel adapters
//! take a channel digit in front of every command.

mod serial_worker;

pub use serial_worker::{decode_line, encode_frame};

use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, info, warn};

use super::{Connector, FrameSender, OutputControl, Transport};
use crate::bitrate::Bitrate;
use crate::error::TransportError;
use crate::frame::CanFrame;
use serial_worker::{Command, Event, SerialWorker};

/// Highest channel digit a multi-channel adapter accepts.
const MAX_PREFIXED_CHANNEL: u32 = 3;

#[derive(Debug, Clone)]
pub struct SlcanConfig {
    pub port: String,
    pub serial_baud: u32,
    /// Time window to group frames before writing them (e.g. 125us).
    pub group_window: Duration,
    /// Prefix each command with the channel digit.
    pub multi_channel: bool,
}

impl Default for SlcanConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyACM0".to_string(),
            serial_baud: 115_200,
            group_window: Duration::from_micros(125),
            multi_channel: true,
        }
    }
}

pub struct SlcanConnector {
    config: SlcanConfig,
}

impl SlcanConnector {
    pub fn new(config: SlcanConfig) -> Self {
        Self { config }
    }
}

impl Connector for SlcanConnector {
    fn open(&self, channel: u32, bitrate: Bitrate) -> Result<Box<dyn Transport>, TransportError> {
        let prefix = if self.config.multi_channel {
            if channel > MAX_PREFIXED_CHANNEL {
                return Err(TransportError::Unavailable {
                    channel,
                    reason: format!("adapter channels are 0..={}", MAX_PREFIXED_CHANNEL),
                });
            }
            Some(channel as u8)
        } else {
            if channel != 0 {
                return Err(TransportError::Unavailable {
                    channel,
                    reason: "single-channel adapter".to_string(),
                });
            }
            None
        };

        let port = serialport::new(&self.config.port, self.config.serial_baud)
            .timeout(Duration::from_millis(10))
            .open()
            .map_err(|e| TransportError::Unavailable {
                channel,
                reason: format!("{}: {}", self.config.port, e),
            })?;

        let transport = SlcanTransport::spawn(port, prefix, self.config.group_window)
            .map_err(|e| TransportError::Unavailable { channel, reason: e.to_string() })?;
        // Closed first: bitrate can only change while the channel is closed
        transport.send_cmd("C")?;
        transport.send_cmd(&bitrate_command(bitrate.bits_per_second()))?;
        info!("SLCAN {} channel {} configured at {}", self.config.port, channel, bitrate);
        Ok(Box::new(transport))
    }
}

/// `Sn` for the standard table, `yNNNNNN` for anything else.
pub fn bitrate_command(bitrate: u32) -> String {
    let idx = match bitrate {
        10_000 => Some(0),
        20_000 => Some(1),
        50_000 => Some(2),
        100_000 => Some(3),
        125_000 => Some(4),
        250_000 => Some(5),
        500_000 => Some(6),
        800_000 => Some(7),
        1_000_000 => Some(8),
        _ => None,
    };
    match idx {
        Some(i) => format!("S{}", i),
        None => format!("y{}", bitrate),
    }
}

pub struct SlcanTransport {
    prefix: Option<u8>,
    cmd_tx: Sender<Command>,
    event_rx: Receiver<Event>,
    worker_thread: Option<thread::JoinHandle<()>>,
    output: OutputControl,
}

impl SlcanTransport {
    fn spawn(
        port: Box<dyn serialport::SerialPort>,
        prefix: Option<u8>,
        group_window: Duration,
    ) -> std::io::Result<Self> {
        let (cmd_tx, cmd_rx) = unbounded();
        let (event_tx, event_rx) = unbounded();
        let worker = SerialWorker::new(port, cmd_rx, event_tx, group_window);
        let handle = thread::Builder::new()
            .name("slcan-worker".into())
            .spawn(move || worker.run())?;
        Ok(Self {
            prefix,
            cmd_tx,
            event_rx,
            worker_thread: Some(handle),
            output: OutputControl::Normal,
        })
    }

    fn send_cmd(&self, cmd: &str) -> Result<(), TransportError> {
        self.cmd_tx
            .send(Command::SendRaw(self.prefix, cmd.to_string()))
            .map_err(|_| TransportError::Disconnected)
    }

    fn shutdown(&mut self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
        if let Some(handle) = self.worker_thread.take() {
            if handle.join().is_err() {
                warn!("SLCAN worker panicked");
            }
        }
    }
}

impl Transport for SlcanTransport {
    fn set_output_control(&mut self, mode: OutputControl) -> Result<(), TransportError> {
        self.output = mode;
        Ok(())
    }

    fn bus_on(&mut self) -> Result<(), TransportError> {
        match self.output {
            OutputControl::Normal => self.send_cmd("O"),
            OutputControl::Silent => self.send_cmd("L"),
            OutputControl::Off => Err(TransportError::Unsupported("bus on with output control off")),
        }
    }

    fn bus_off(&mut self) -> Result<(), TransportError> {
        self.send_cmd("C")
    }

    fn sender(&self) -> Result<Box<dyn FrameSender>, TransportError> {
        if self.output != OutputControl::Normal {
            return Err(TransportError::Unsupported("transmit while silent"));
        }
        Ok(Box::new(SlcanSender { prefix: self.prefix, cmd_tx: self.cmd_tx.clone() }))
    }

    fn read(&mut self, timeout: Duration) -> Result<Option<CanFrame>, TransportError> {
        let deadline = Instant::now() + timeout;
        let wanted = self.prefix.unwrap_or(0);
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.event_rx.recv_timeout(remaining) {
                Ok(Event::FrameReceived(ch, frame)) if ch == wanted => return Ok(Some(frame)),
                Ok(Event::FrameReceived(ch, _)) => debug!("Ignoring frame for channel {}", ch),
                Ok(Event::Error(e)) => return Err(TransportError::Device(e)),
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => return Err(TransportError::Disconnected),
            }
        }
    }

    fn close(&mut self) -> Result<(), TransportError> {
        // The worker may already be gone after a device error
        let _ = self.send_cmd("C");
        self.shutdown();
        Ok(())
    }
}

impl Drop for SlcanTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Queues frames on the worker's command channel.
pub struct SlcanSender {
    prefix: Option<u8>,
    cmd_tx: Sender<Command>,
}

impl FrameSender for SlcanSender {
    fn send(&mut self, frame: &CanFrame) -> Result<(), TransportError> {
        self.cmd_tx
            .send(Command::SendFrame(self.prefix, frame.clone()))
            .map_err(|_| TransportError::Disconnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_rates_use_table_codes() {
        assert_eq!(bitrate_command(500_000), "S6");
        assert_eq!(bitrate_command(1_000_000), "S8");
        assert_eq!(bitrate_command(10_000), "S0");
    }

    #[test]
    fn odd_rates_use_custom_command() {
        assert_eq!(bitrate_command(Bitrate::K83.bits_per_second()), "y83333");
        assert_eq!(bitrate_command(Bitrate::K62.bits_per_second()), "y62500");
    }

    #[test]
    fn missing_port_is_unavailable() {
        let connector = SlcanConnector::new(SlcanConfig {
            port: "/nonexistent/slcan-port".to_string(),
            ..Default::default()
        });
        assert!(matches!(
            connector.open(0, Bitrate::K500),
            Err(TransportError::Unavailable { channel: 0, .. })
        ));
    }

    #[test]
    fn channel_digit_is_bounded() {
        let connector = SlcanConnector::new(SlcanConfig::default());
        assert!(matches!(
            connector.open(4, Bitrate::K500),
            Err(TransportError::Unavailable { channel: 4, .. })
        ));
    }
}
