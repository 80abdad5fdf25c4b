//! Linux SocketCAN binding.
//!
//! Channel `n` maps to interface `{prefix}{n}` (e.g. `can0`, `vcan1`). The
//! bitrate and bus state of a SocketCAN interface belong to the system
//! (`ip link`), so bus on/off only gates this handle.

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{info, warn};
use socketcan::{
    CanFrame as SocketFrame, CanSocket, EmbeddedFrame, ExtendedId, Frame, Socket, StandardId,
};

use super::{Connector, FrameSender, OutputControl, Transport};
use crate::bitrate::Bitrate;
use crate::error::TransportError;
use crate::frame::{CanFrame, FrameFlags};

pub struct SocketCanConnector {
    prefix: String,
}

impl SocketCanConnector {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }
}

impl Connector for SocketCanConnector {
    fn open(&self, channel: u32, bitrate: Bitrate) -> Result<Box<dyn Transport>, TransportError> {
        let ifname = format!("{}{}", self.prefix, channel);
        let socket = CanSocket::open(&ifname).map_err(|e| TransportError::Unavailable {
            channel,
            reason: format!("{}: {}", ifname, e),
        })?;
        warn!(
            "Bitrate {} requested; {} uses the bitrate configured on the interface",
            bitrate, ifname
        );
        info!("SocketCAN interface {} opened", ifname);
        Ok(Box::new(SocketCanTransport {
            ifname,
            socket: Some(Arc::new(socket)),
            output: OutputControl::Normal,
            on_bus: false,
            read_timeout: None,
            opened: Instant::now(),
        }))
    }
}

pub struct SocketCanTransport {
    ifname: String,
    socket: Option<Arc<CanSocket>>,
    output: OutputControl,
    on_bus: bool,
    read_timeout: Option<Duration>,
    opened: Instant,
}

impl SocketCanTransport {
    fn socket(&self) -> Result<&Arc<CanSocket>, TransportError> {
        self.socket.as_ref().ok_or(TransportError::Disconnected)
    }
}

impl Transport for SocketCanTransport {
    fn set_output_control(&mut self, mode: OutputControl) -> Result<(), TransportError> {
        if mode == OutputControl::Silent {
            warn!("{}: listen-only mode is an interface setting, frames will still be sent", self.ifname);
        }
        self.output = mode;
        Ok(())
    }

    fn bus_on(&mut self) -> Result<(), TransportError> {
        if self.output == OutputControl::Off {
            return Err(TransportError::Unsupported("bus on with output control off"));
        }
        self.on_bus = true;
        Ok(())
    }

    fn bus_off(&mut self) -> Result<(), TransportError> {
        self.on_bus = false;
        Ok(())
    }

    fn sender(&self) -> Result<Box<dyn FrameSender>, TransportError> {
        if !self.on_bus {
            return Err(TransportError::Unsupported("bus is off"));
        }
        Ok(Box::new(SocketCanSender { socket: self.socket()?.clone() }))
    }

    fn read(&mut self, timeout: Duration) -> Result<Option<CanFrame>, TransportError> {
        // A zero timeout would mean "block forever" to the kernel
        let timeout = timeout.max(Duration::from_millis(1));
        if self.read_timeout != Some(timeout) {
            self.socket()?.set_read_timeout(timeout)?;
            self.read_timeout = Some(timeout);
        }
        match self.socket()?.read_frame() {
            Ok(frame) => {
                let stamp = self.opened.elapsed().as_millis() as u64;
                Ok(Some(from_socket_frame(&frame)?.with_timestamp(stamp)))
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.on_bus = false;
        if self.socket.take().is_some() {
            info!("SocketCAN interface {} closed", self.ifname);
        }
        Ok(())
    }
}

/// Shares the socket with the reading half; the kernel orders writes.
pub struct SocketCanSender {
    socket: Arc<CanSocket>,
}

impl FrameSender for SocketCanSender {
    fn send(&mut self, frame: &CanFrame) -> Result<(), TransportError> {
        let out = to_socket_frame(frame)?;
        self.socket.write_frame(&out)?;
        Ok(())
    }
}

fn to_socket_frame(frame: &CanFrame) -> Result<SocketFrame, TransportError> {
    let bad = || TransportError::Unsupported("frame not representable on SocketCAN");
    let id: socketcan::Id = if frame.is_extended() {
        ExtendedId::new(frame.id()).ok_or_else(bad)?.into()
    } else {
        StandardId::new(frame.id() as u16).ok_or_else(bad)?.into()
    };
    let out = if frame.is_remote() {
        <SocketFrame as EmbeddedFrame>::new_remote(id, frame.dlc() as usize)
    } else {
        <SocketFrame as EmbeddedFrame>::new(id, frame.data())
    };
    out.ok_or_else(bad)
}

fn from_socket_frame(frame: &SocketFrame) -> Result<CanFrame, TransportError> {
    let id = frame.raw_id();
    let out = if frame.is_error_frame() {
        CanFrame::new_ext(id & crate::frame::MAX_EXT_ID, frame.data())?
            .with_flags(FrameFlags::ERROR_FRAME)
    } else if EmbeddedFrame::is_remote_frame(frame) {
        CanFrame::new_remote(id, EmbeddedFrame::dlc(frame) as u8, frame.is_extended())?
    } else if frame.is_extended() {
        CanFrame::new_ext(id, frame.data())?
    } else {
        CanFrame::new_std(id, frame.data())?
    };
    Ok(out)
}
