//! Monitor a CAN channel while injecting synthetic traffic on it.
//!
//! A [`Monitor`] opens one [`Session`] through a [`Connector`], runs the
//! random-frame [`Generator`] on its own thread and polls for frames on the
//! caller's thread, printing a `tick` every configured interval regardless
//! of traffic. Everything stops through a shared [`CancelToken`].

pub mod bitrate;
pub mod cancel;
pub mod display;
pub mod error;
pub mod frame;
pub mod generator;
pub mod monitor;
pub mod session;
pub mod tick;
pub mod transport;

pub use bitrate::Bitrate;
pub use cancel::CancelToken;
pub use display::{ConsolePresenter, Presenter, RecordingPresenter};
pub use error::{FrameError, MonitorError, SessionError, TransportError};
pub use frame::{CanFrame, FrameFlags};
pub use generator::{Generator, GeneratorConfig};
pub use monitor::{ExitReason, Monitor, MonitorConfig, SessionSummary, TickAccounting};
pub use session::{Received, Session, SessionState};
pub use tick::TickScheduler;
pub use transport::{Connector, FrameSender, OutputControl, Transport};
