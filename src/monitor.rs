//! The session loop: open the channel, run the simulator alongside the
//! receive+tick poll, and tear everything down on the way out.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{error, info};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::bitrate::Bitrate;
use crate::cancel::CancelToken;
use crate::display::Presenter;
use crate::error::{MonitorError, SessionError};
use crate::generator::{Generator, GeneratorConfig};
use crate::session::{Received, Session};
use crate::tick::TickScheduler;
use crate::transport::Connector;

/// What time the tick scheduler is fed after each poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TickAccounting {
    /// Measured duration of every poll, whether or not a frame arrived.
    #[default]
    WallClock,
    /// The poll timeout, only for polls that came back empty. Ticks fall
    /// behind while traffic keeps arriving.
    IdleOnly,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub channel: u32,
    pub bitrate: Bitrate,
    /// Seconds between ticks; `<= 0` disables them.
    pub ticktime: f64,
    pub accounting: TickAccounting,
    /// `None` runs as a pure monitor.
    pub simulate: Option<GeneratorConfig>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            channel: 0,
            bitrate: Bitrate::default(),
            ticktime: 0.0,
            accounting: TickAccounting::default(),
            simulate: Some(GeneratorConfig::default()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub received: u64,
    pub sent: u64,
    pub ticks: u64,
    pub reason: ExitReason,
}

pub struct Monitor {
    config: MonitorConfig,
    connector: Box<dyn Connector>,
    presenter: Arc<dyn Presenter>,
    cancel: CancelToken,
}

impl Monitor {
    pub fn new(
        config: MonitorConfig,
        connector: Box<dyn Connector>,
        presenter: Arc<dyn Presenter>,
        cancel: CancelToken,
    ) -> Self {
        Self { config, connector, presenter, cancel }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Blocks until the token is cancelled or the channel fails. The session
    /// is closed exactly once on every path out of the active state.
    pub fn run(&self) -> Result<SessionSummary, MonitorError> {
        let channel = self.config.channel;
        let session = Arc::new(Session::open(&*self.connector, channel, self.config.bitrate)?);
        if let Err(e) = session.activate() {
            session.close();
            let source = match e {
                SessionError::Transport(source) => source,
                other => return Err(other.into()),
            };
            return Err(SessionError::ChannelUnavailable { channel, source }.into());
        }

        let generator = match &self.config.simulate {
            Some(sim) => {
                let generator = Generator::new(
                    session.clone(),
                    self.cancel.clone(),
                    self.presenter.clone(),
                    sim.clone(),
                    StdRng::from_entropy(),
                );
                let spawned = thread::Builder::new()
                    .name("canmon-sim".into())
                    .spawn(move || generator.run());
                match spawned {
                    Ok(handle) => Some(handle),
                    Err(e) => {
                        session.close();
                        return Err(MonitorError::Spawn(e));
                    }
                }
            }
            None => None,
        };

        info!("Listening{} on channel {}", if generator.is_some() { " and simulating" } else { "" }, channel);
        // Also stops the simulator if a presenter panics inside the poll
        let stop = CancelOnDrop(&self.cancel);
        let polled = self.poll(&session);

        // Stop the simulator before closing so it never sees a half-closed channel
        drop(stop);
        let sent = match generator.map(|h| h.join()) {
            None => Ok(0),
            Some(Ok(result)) => result.map_err(MonitorError::from),
            Some(Err(_)) => Err(MonitorError::GeneratorPanicked),
        };
        session.close();

        let (received, ticks) = polled.inspect_err(|e| error!("Channel {} failed: {}", channel, e))?;
        let sent = sent?;
        info!("Stopped: {} received, {} sent, {} ticks", received, sent, ticks);
        Ok(SessionSummary { received, sent, ticks, reason: ExitReason::Interrupted })
    }

    /// The receive+tick loop. Returns (frames received, ticks emitted).
    fn poll(&self, session: &Session) -> Result<(u64, u64), SessionError> {
        let mut scheduler = TickScheduler::new(self.config.ticktime);
        let timeout = scheduler.timeout();
        let mut received = 0u64;
        let mut ticks = 0u64;

        while !self.cancel.is_cancelled() {
            let started = Instant::now();
            let elapsed = match session.receive(timeout)? {
                Received::Frame(frame) => {
                    received += 1;
                    self.presenter.frame_received(&frame);
                    match self.config.accounting {
                        TickAccounting::WallClock => started.elapsed(),
                        TickAccounting::IdleOnly => Duration::ZERO,
                    }
                }
                Received::NoMessage => match self.config.accounting {
                    TickAccounting::WallClock => started.elapsed(),
                    TickAccounting::IdleOnly => timeout,
                },
            };
            for _ in 0..scheduler.advance(elapsed) {
                ticks += 1;
                self.presenter.tick();
            }
        }
        Ok((received, ticks))
    }
}

struct CancelOnDrop<'a>(&'a CancelToken);

impl Drop for CancelOnDrop<'_> {
    fn drop(&mut self) {
        self.0.cancel();
    }
}
