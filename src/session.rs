//! The channel handle: one open transport, split in two.
//!
//! Control calls and receives go through the transport under one lock. Once
//! the bus is on, sends go through the transport's [`FrameSender`] under a
//! second lock, so the generator never queues behind a blocking receive.
//! Lock order is transport then sender.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, info, warn};

use crate::bitrate::Bitrate;
use crate::error::SessionError;
use crate::frame::CanFrame;
use crate::transport::{Connector, FrameSender, OutputControl, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Active,
    Closed,
}

/// Outcome of one receive attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    Frame(CanFrame),
    NoMessage,
}

struct Inner {
    transport: Option<Box<dyn Transport>>,
    state: SessionState,
    output: OutputControl,
}

pub struct Session {
    channel: u32,
    bitrate: Bitrate,
    inner: Mutex<Inner>,
    /// `Some` only while active.
    sender: Mutex<Option<Box<dyn FrameSender>>>,
}

impl Session {
    pub fn open(connector: &dyn Connector, channel: u32, bitrate: Bitrate) -> Result<Self, SessionError> {
        let transport = connector
            .open(channel, bitrate)
            .map_err(|source| SessionError::ChannelUnavailable { channel, source })?;
        info!("Channel {} opened at {}", channel, bitrate);
        Ok(Self {
            channel,
            bitrate,
            inner: Mutex::new(Inner {
                transport: Some(transport),
                state: SessionState::Open,
                output: OutputControl::Normal,
            }),
            sender: Mutex::new(None),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_sender(&self) -> MutexGuard<'_, Option<Box<dyn FrameSender>>> {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn channel(&self) -> u32 {
        self.channel
    }

    pub fn bitrate(&self) -> Bitrate {
        self.bitrate
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn output_control(&self) -> OutputControl {
        self.lock().output
    }

    /// Normal output control, then bus on.
    pub fn activate(&self) -> Result<(), SessionError> {
        let mut inner = self.lock();
        match inner.state {
            SessionState::Active => return Ok(()),
            SessionState::Closed => return Err(SessionError::SessionClosed),
            SessionState::Open => {}
        }
        let transport = inner.transport.as_mut().ok_or(SessionError::SessionClosed)?;
        transport.set_output_control(OutputControl::Normal)?;
        transport.bus_on()?;
        let sender = match transport.sender() {
            Ok(sender) => sender,
            Err(e) => {
                let _ = transport.bus_off();
                return Err(e.into());
            }
        };
        *self.lock_sender() = Some(sender);
        inner.output = OutputControl::Normal;
        inner.state = SessionState::Active;
        info!("Channel {} bus on", self.channel);
        Ok(())
    }

    /// Does not wait for a receive in progress.
    pub fn send(&self, frame: &CanFrame) -> Result<(), SessionError> {
        let mut sender = self.lock_sender();
        let sender = sender.as_mut().ok_or(SessionError::SessionClosed)?;
        sender.send(frame)?;
        debug!("Channel {} sent id={:#x}", self.channel, frame.id());
        Ok(())
    }

    /// Wait up to `timeout` for a frame. Running out of time is
    /// `Received::NoMessage`, not an error.
    pub fn receive(&self, timeout: Duration) -> Result<Received, SessionError> {
        let mut inner = self.lock();
        let transport = active(&mut inner)?;
        match transport.read(timeout)? {
            Some(frame) => Ok(Received::Frame(frame)),
            None => Ok(Received::NoMessage),
        }
    }

    /// Bus off and close. Only the first call does anything; it returns
    /// `true`, later calls return `false`.
    pub fn close(&self) -> bool {
        let mut inner = self.lock();
        if inner.state == SessionState::Closed {
            return false;
        }
        let was_active = inner.state == SessionState::Active;
        inner.state = SessionState::Closed;
        // Waits for a send in flight; nothing is sent after this.
        self.lock_sender().take();
        if let Some(mut transport) = inner.transport.take() {
            if was_active {
                if let Err(e) = transport.bus_off() {
                    warn!("Channel {} bus off failed: {}", self.channel, e);
                }
            }
            if let Err(e) = transport.close() {
                warn!("Channel {} close failed: {}", self.channel, e);
            }
        }
        info!("Channel {} closed", self.channel);
        true
    }
}

fn active<'a>(inner: &'a mut MutexGuard<'_, Inner>) -> Result<&'a mut Box<dyn Transport>, SessionError> {
    if inner.state != SessionState::Active {
        return Err(SessionError::SessionClosed);
    }
    inner.transport.as_mut().ok_or(SessionError::SessionClosed)
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::virtual_bus::{VirtualBus, VirtualConfig};

    fn echo_bus() -> VirtualBus {
        VirtualBus::new(VirtualConfig { echo: true, ..Default::default() })
    }

    #[test]
    fn open_failure_is_channel_unavailable() {
        let bus = VirtualBus::default();
        let err = Session::open(&bus, 9, Bitrate::K500).err().unwrap();
        assert!(matches!(err, SessionError::ChannelUnavailable { channel: 9, .. }));
    }

    #[test]
    fn io_requires_activation() {
        let bus = echo_bus();
        let session = Session::open(&bus, 0, Bitrate::K500).unwrap();
        let frame = CanFrame::new_std(0x100, &[1]).unwrap();
        assert!(matches!(session.send(&frame), Err(SessionError::SessionClosed)));

        session.activate().unwrap();
        assert_eq!(session.state(), SessionState::Active);
        session.send(&frame).unwrap();
        match session.receive(Duration::from_millis(100)).unwrap() {
            Received::Frame(got) => assert_eq!(got.id(), 0x100),
            Received::NoMessage => panic!("expected echoed frame"),
        }
        assert_eq!(session.receive(Duration::from_millis(10)).unwrap(), Received::NoMessage);
    }

    #[test]
    fn close_runs_once_and_blocks_further_io() {
        let bus = echo_bus();
        let session = Session::open(&bus, 0, Bitrate::K500).unwrap();
        session.activate().unwrap();
        assert_eq!(bus.members(0), 1);

        assert!(session.close());
        assert!(!session.close());
        assert_eq!(bus.members(0), 0);
        assert!(matches!(
            session.receive(Duration::from_millis(1)),
            Err(SessionError::SessionClosed)
        ));
        assert!(matches!(session.activate(), Err(SessionError::SessionClosed)));
    }

    #[test]
    fn send_goes_ahead_of_a_blocked_receive() {
        let bus = VirtualBus::default();
        let session = std::sync::Arc::new(Session::open(&bus, 0, Bitrate::K500).unwrap());
        session.activate().unwrap();
        let peer = Session::open(&bus, 0, Bitrate::K500).unwrap();
        peer.activate().unwrap();

        let receiver = {
            let session = session.clone();
            std::thread::spawn(move || session.receive(Duration::from_millis(400)))
        };
        std::thread::sleep(Duration::from_millis(20));
        let start = std::time::Instant::now();
        for i in 0..3u8 {
            session.send(&CanFrame::new_std(0x300, &[i]).unwrap()).unwrap();
        }
        assert!(start.elapsed() < Duration::from_millis(100));
        for i in 0..3u8 {
            match peer.receive(Duration::from_millis(100)).unwrap() {
                Received::Frame(got) => assert_eq!(got.data(), &[i]),
                Received::NoMessage => panic!("frame {} missing", i),
            }
        }
        assert_eq!(receiver.join().unwrap().unwrap(), Received::NoMessage);
    }

    #[test]
    fn drop_tears_down() {
        let bus = echo_bus();
        {
            let session = Session::open(&bus, 1, Bitrate::K250).unwrap();
            session.activate().unwrap();
            assert_eq!(bus.members(1), 1);
        }
        assert_eq!(bus.members(1), 0);
    }
}
