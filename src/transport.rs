//! Transport bindings.
//!
//! A [`Transport`] is one claimed channel on some CAN hardware (or the
//! in-process virtual bus). A [`Connector`] knows how to claim one. The
//! [`Session`](crate::session::Session) is the only caller. Control calls and
//! reads are serialized there; transmission goes through a separate
//! [`FrameSender`] so it never waits behind a blocking read.

use std::time::Duration;

use crate::bitrate::Bitrate;
use crate::error::TransportError;
use crate::frame::CanFrame;

pub mod slcan;
#[cfg(target_os = "linux")]
pub mod socket_can;
pub mod virtual_bus;

/// How the controller drives the bus once it is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputControl {
    /// Transmit and acknowledge.
    #[default]
    Normal,
    /// Listen only.
    Silent,
    /// Do not take part in bus traffic.
    Off,
}

pub trait Transport: Send {
    fn set_output_control(&mut self, mode: OutputControl) -> Result<(), TransportError>;

    fn bus_on(&mut self) -> Result<(), TransportError>;

    fn bus_off(&mut self) -> Result<(), TransportError>;

    /// Transmit half of this transport. Only valid while the bus is on with
    /// normal output control; it stops working once the transport is closed.
    fn sender(&self) -> Result<Box<dyn FrameSender>, TransportError>;

    /// Wait up to `timeout` for a frame. `Ok(None)` means nothing arrived.
    fn read(&mut self, timeout: Duration) -> Result<Option<CanFrame>, TransportError>;

    fn close(&mut self) -> Result<(), TransportError>;
}

pub trait FrameSender: Send {
    /// Queue a frame for transmission without waiting for the bus.
    fn send(&mut self, frame: &CanFrame) -> Result<(), TransportError>;
}

pub trait Connector: Send + Sync {
    /// Claim `channel` at `bitrate`. Fails with
    /// [`TransportError::Unavailable`] when the channel cannot be claimed.
    fn open(&self, channel: u32, bitrate: Bitrate) -> Result<Box<dyn Transport>, TransportError>;
}
