//! In-process virtual CAN bus.
//!
//! Handles opened on the same channel number are wired together: a frame
//! written on one is delivered to every other handle whose bus is on. With
//! `echo` set, the writer gets its own frame back flagged `TX_ACK`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, info};

use super::{Connector, FrameSender, OutputControl, Transport};
use crate::bitrate::Bitrate;
use crate::error::TransportError;
use crate::frame::{CanFrame, FrameFlags};

#[derive(Debug, Clone)]
pub struct VirtualConfig {
    /// Number of virtual channels; valid channel numbers are `0..channels`.
    pub channels: u32,
    pub echo: bool,
}

impl Default for VirtualConfig {
    fn default() -> Self {
        Self { channels: 2, echo: false }
    }
}

struct Member {
    handle: u64,
    bitrate: Bitrate,
    tx: Sender<CanFrame>,
}

#[derive(Default)]
struct Hub {
    channels: HashMap<u32, Vec<Member>>,
}

/// Cloneable handle to one virtual bus; every clone sees the same wiring.
#[derive(Clone)]
pub struct VirtualBus {
    config: VirtualConfig,
    hub: Arc<Mutex<Hub>>,
    next_handle: Arc<AtomicU64>,
}

impl VirtualBus {
    pub fn new(config: VirtualConfig) -> Self {
        Self {
            config,
            hub: Arc::new(Mutex::new(Hub::default())),
            next_handle: Arc::new(AtomicU64::new(1)),
        }
    }

    fn hub(&self) -> MutexGuard<'_, Hub> {
        self.hub.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Handles currently on the bus for `channel`.
    pub fn members(&self, channel: u32) -> usize {
        self.hub().channels.get(&channel).map_or(0, Vec::len)
    }
}

impl Default for VirtualBus {
    fn default() -> Self {
        Self::new(VirtualConfig::default())
    }
}

impl Connector for VirtualBus {
    fn open(&self, channel: u32, bitrate: Bitrate) -> Result<Box<dyn Transport>, TransportError> {
        if channel >= self.config.channels {
            return Err(TransportError::Unavailable {
                channel,
                reason: format!("only {} virtual channels exist", self.config.channels),
            });
        }
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = unbounded();
        info!("Virtual channel {} opened (handle {}, {})", channel, handle, bitrate);
        Ok(Box::new(VirtualTransport {
            bus: self.clone(),
            channel,
            handle,
            bitrate,
            tx,
            rx,
            echo: self.config.echo,
            output: OutputControl::Normal,
            on_bus: false,
            opened: Instant::now(),
        }))
    }
}

pub struct VirtualTransport {
    bus: VirtualBus,
    channel: u32,
    handle: u64,
    bitrate: Bitrate,
    tx: Sender<CanFrame>,
    rx: Receiver<CanFrame>,
    echo: bool,
    output: OutputControl,
    on_bus: bool,
    opened: Instant,
}

impl VirtualTransport {
    fn leave(&mut self) {
        if !self.on_bus {
            return;
        }
        let mut hub = self.bus.hub();
        if let Some(members) = hub.channels.get_mut(&self.channel) {
            members.retain(|m| m.handle != self.handle);
        }
        self.on_bus = false;
    }
}

impl Transport for VirtualTransport {
    fn set_output_control(&mut self, mode: OutputControl) -> Result<(), TransportError> {
        self.output = mode;
        Ok(())
    }

    fn bus_on(&mut self) -> Result<(), TransportError> {
        if self.on_bus {
            return Ok(());
        }
        if self.output == OutputControl::Off {
            return Err(TransportError::Unsupported("bus on with output control off"));
        }
        let mut hub = self.bus.hub();
        hub.channels.entry(self.channel).or_default().push(Member {
            handle: self.handle,
            bitrate: self.bitrate,
            tx: self.tx.clone(),
        });
        self.on_bus = true;
        Ok(())
    }

    fn bus_off(&mut self) -> Result<(), TransportError> {
        self.leave();
        Ok(())
    }

    fn sender(&self) -> Result<Box<dyn FrameSender>, TransportError> {
        if !self.on_bus {
            return Err(TransportError::Unsupported("bus is off"));
        }
        if self.output != OutputControl::Normal {
            return Err(TransportError::Unsupported("transmit while silent"));
        }
        Ok(Box::new(VirtualSender {
            bus: self.bus.clone(),
            channel: self.channel,
            handle: self.handle,
            bitrate: self.bitrate,
            echo: self.echo,
        }))
    }

    fn read(&mut self, timeout: Duration) -> Result<Option<CanFrame>, TransportError> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => {
                let stamp = self.opened.elapsed().as_millis() as u64;
                Ok(Some(frame.with_timestamp(stamp)))
            }
            Err(RecvTimeoutError::Timeout) => Ok(None),
            // We hold our own sender, so this only happens if the hub is gone.
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Disconnected),
        }
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.leave();
        info!("Virtual channel {} closed (handle {})", self.channel, self.handle);
        Ok(())
    }
}

impl Drop for VirtualTransport {
    fn drop(&mut self) {
        self.leave();
    }
}

/// Writes straight into the hub; does not touch the owning transport.
pub struct VirtualSender {
    bus: VirtualBus,
    channel: u32,
    handle: u64,
    bitrate: Bitrate,
    echo: bool,
}

impl FrameSender for VirtualSender {
    fn send(&mut self, frame: &CanFrame) -> Result<(), TransportError> {
        let hub = self.bus.hub();
        let members = hub.channels.get(&self.channel).map_or(&[][..], Vec::as_slice);
        if !members.iter().any(|m| m.handle == self.handle) {
            return Err(TransportError::Unsupported("bus is off"));
        }
        for member in members {
            if member.handle == self.handle {
                if self.echo {
                    let _ = member.tx.send(frame.clone().with_flags(FrameFlags::TX_ACK));
                }
            } else if member.bitrate == self.bitrate {
                let _ = member.tx.send(frame.clone());
            } else {
                debug!(
                    "Virtual handle {} at {} cannot see frame sent at {}",
                    member.handle, member.bitrate, self.bitrate
                );
            }
        }
        Ok(())
    }
}
