use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info};
use rand::Rng;

use crate::cancel::CancelToken;
use crate::display::Presenter;
use crate::error::SessionError;
use crate::frame::CanFrame;
use crate::session::Session;

/// Lowest simulated identifier; the range below is left to real nodes.
pub const SIM_ID_MIN: u32 = 0x100;
pub const SIM_ID_MAX: u32 = 0x7FF;

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub interval: Duration,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self { interval: Duration::from_secs(1) }
    }
}

/// A standard frame with a random id in `SIM_ID_MIN..=SIM_ID_MAX` and
/// 8 random data bytes.
pub fn random_frame<R: Rng>(rng: &mut R) -> CanFrame {
    let id = rng.gen_range(SIM_ID_MIN..=SIM_ID_MAX);
    let mut data = [0u8; 8];
    rng.fill(&mut data[..]);
    CanFrame::new_std(id, &data).expect("simulated id and length are in range")
}

/// Pushes random frames through a shared session until cancelled.
pub struct Generator<R> {
    session: Arc<Session>,
    cancel: CancelToken,
    presenter: Arc<dyn Presenter>,
    config: GeneratorConfig,
    rng: R,
}

impl<R: Rng> Generator<R> {
    pub fn new(
        session: Arc<Session>,
        cancel: CancelToken,
        presenter: Arc<dyn Presenter>,
        config: GeneratorConfig,
        rng: R,
    ) -> Self {
        Self { session, cancel, presenter, config, rng }
    }

    /// Runs until the token is cancelled. Returns the number of frames sent.
    ///
    /// Sends are scheduled against a fixed start, so time spent sending
    /// does not push later frames back. After a stall longer than one
    /// interval the schedule restarts from now instead of bursting.
    ///
    /// A transport fault cancels the token, so the receive loop winds down
    /// too, and is returned. A closed session while stopping is not an error.
    pub fn run(mut self) -> Result<u64, SessionError> {
        info!("Starting CAN frame simulation (every {:?})", self.config.interval);
        let mut sent = 0u64;
        let mut next = Instant::now();
        while !self.cancel.is_cancelled() {
            let frame = random_frame(&mut self.rng);
            match self.session.send(&frame) {
                Ok(()) => {
                    sent += 1;
                    self.presenter.frame_sent(&frame);
                }
                Err(SessionError::SessionClosed) if self.cancel.is_cancelled() => break,
                Err(e) => {
                    error!("Simulation send failed: {}", e);
                    self.cancel.cancel();
                    return Err(e);
                }
            }
            next += self.config.interval;
            let now = Instant::now();
            if next < now {
                next = now;
            }
            if self.cancel.wait_timeout(next - now) {
                break;
            }
        }
        debug!("Simulation stopped after {} frames", sent);
        Ok(sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitrate::Bitrate;
    use crate::display::RecordingPresenter;
    use crate::frame::FrameFlags;
    use crate::session::Received;
    use crate::transport::virtual_bus::VirtualBus;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::thread;

    #[test]
    fn generated_frames_stay_in_range() {
        let mut rng = StdRng::seed_from_u64(0xCA11);
        for _ in 0..10_000 {
            let frame = random_frame(&mut rng);
            assert!((SIM_ID_MIN..=SIM_ID_MAX).contains(&frame.id()));
            assert_eq!(frame.data().len(), 8);
            assert_eq!(frame.dlc(), 8);
            assert_eq!(frame.flags(), FrameFlags::STD);
        }
    }

    #[test]
    fn sends_to_peers_until_cancelled() {
        let bus = VirtualBus::default();
        let session = Arc::new(Session::open(&bus, 0, Bitrate::K500).unwrap());
        session.activate().unwrap();
        let peer = Session::open(&bus, 0, Bitrate::K500).unwrap();
        peer.activate().unwrap();

        let cancel = CancelToken::new();
        let presenter = Arc::new(RecordingPresenter::default());
        let generator = Generator::new(
            session.clone(),
            cancel.clone(),
            presenter.clone(),
            GeneratorConfig { interval: Duration::from_millis(20) },
            StdRng::seed_from_u64(1),
        );
        let handle = thread::spawn(move || generator.run());

        let mut seen = 0;
        while seen < 3 {
            if let Received::Frame(frame) = peer.receive(Duration::from_secs(1)).unwrap() {
                assert!(frame.id() >= SIM_ID_MIN);
                seen += 1;
            }
        }
        cancel.cancel();
        let sent = handle.join().unwrap().unwrap();
        assert!(sent >= 3);
        assert_eq!(presenter.sent().len() as u64, sent);
    }

    #[test]
    fn cancel_interrupts_the_wait() {
        let bus = VirtualBus::default();
        let session = Arc::new(Session::open(&bus, 0, Bitrate::K500).unwrap());
        session.activate().unwrap();
        let cancel = CancelToken::new();
        let generator = Generator::new(
            session,
            cancel.clone(),
            Arc::new(RecordingPresenter::default()),
            GeneratorConfig { interval: Duration::from_secs(30) },
            StdRng::seed_from_u64(2),
        );
        let start = Instant::now();
        let handle = thread::spawn(move || generator.run());
        thread::sleep(Duration::from_millis(50));
        cancel.cancel();
        assert_eq!(handle.join().unwrap().unwrap(), 1);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn cadence_holds_while_a_receive_blocks() {
        let bus = VirtualBus::default();
        let session = Arc::new(Session::open(&bus, 0, Bitrate::K500).unwrap());
        session.activate().unwrap();
        let cancel = CancelToken::new();
        let presenter = Arc::new(RecordingPresenter::default());
        let generator = Generator::new(
            session.clone(),
            cancel.clone(),
            presenter.clone(),
            GeneratorConfig { interval: Duration::from_millis(50) },
            StdRng::seed_from_u64(4),
        );
        let handle = thread::spawn(move || generator.run());

        // Nothing arrives, so each receive holds its full timeout
        let start = Instant::now();
        while start.elapsed() < Duration::from_millis(1000) {
            assert_eq!(session.receive(Duration::from_millis(250)).unwrap(), Received::NoMessage);
        }
        cancel.cancel();
        let sent = handle.join().unwrap().unwrap();
        assert!((15..=30).contains(&sent), "sent {} frames in ~1s at 50ms", sent);
    }

    #[test]
    fn send_on_closed_session_is_an_error_while_running() {
        let bus = VirtualBus::default();
        let session = Arc::new(Session::open(&bus, 0, Bitrate::K500).unwrap());
        session.close();
        let cancel = CancelToken::new();
        let generator = Generator::new(
            session,
            cancel.clone(),
            Arc::new(RecordingPresenter::default()),
            GeneratorConfig::default(),
            StdRng::seed_from_u64(3),
        );
        assert!(matches!(generator.run(), Err(SessionError::SessionClosed)));
        assert!(cancel.is_cancelled());
    }
}
