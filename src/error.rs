use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("identifier {id:#x} out of range for {} frame", frame_kind(.extended))]
    InvalidId { id: u32, extended: bool },
    #[error("payload of {0} bytes exceeds 8")]
    TooLong(usize),
    #[error("invalid DLC {0}")]
    InvalidDlc(u8),
}

fn frame_kind(extended: &bool) -> &'static str {
    if *extended {
        "extended"
    } else {
        "standard"
    }
}

/// Faults raised by a transport binding.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("channel {channel} unavailable: {reason}")]
    Unavailable { channel: u32, reason: String },
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("device error: {0}")]
    Device(String),
    #[error("transport disconnected")]
    Disconnected,
    #[error("invalid frame: {0}")]
    InvalidFrame(#[from] FrameError),
    #[error("{0}")]
    Unsupported(&'static str),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("could not open channel {channel}")]
    ChannelUnavailable {
        channel: u32,
        #[source]
        source: TransportError,
    },
    /// The session was used outside its active lifetime.
    #[error("session is closed")]
    SessionClosed,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("failed to start the simulation thread")]
    Spawn(#[source] std::io::Error),
    #[error("simulation thread panicked")]
    GeneratorPanicked,
}

impl MonitorError {
    pub fn is_channel_unavailable(&self) -> bool {
        matches!(self, MonitorError::Session(SessionError::ChannelUnavailable { .. }))
    }
}
