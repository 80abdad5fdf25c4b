//! Human-readable output for frames and ticks.

use std::fmt::Write as _;
use std::sync::{Mutex, PoisonError};

use terminal_size::Width;

use crate::frame::CanFrame;

/// Width used when the terminal size is unknown.
pub const DEFAULT_WIDTH: usize = 80;

/// Receives everything the monitor wants to show the operator.
pub trait Presenter: Send + Sync {
    fn frame_received(&self, frame: &CanFrame);
    fn frame_sent(&self, frame: &CanFrame);
    fn tick(&self);
    fn notice(&self, message: &str);
}

/// Banner plus one `name: value` line per frame field.
pub fn render_frame(frame: &CanFrame, width: usize) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{:═^w$}", " Frame received ", w = width.saturating_sub(1));
    let _ = writeln!(out, "id: {}", frame.id());
    let _ = writeln!(out, "hex id: {:#x}", frame.id());
    let _ = write!(out, "dataX: ");
    for b in frame.data() {
        let _ = write!(out, "{:02x}", b);
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "data: b\"{}\"", frame.data().escape_ascii());
    let _ = writeln!(out, "dlc: {}", frame.dlc());
    let _ = writeln!(out, "flags: {}", frame.flags());
    let _ = write!(out, "timestamp: {}", frame.timestamp());
    out
}

pub fn render_sent(frame: &CanFrame) -> String {
    format!("Simulated Frame Sent -> ID: {:#x}, Data: {:?}", frame.id(), frame.data())
}

/// Prints to stdout.
pub struct ConsolePresenter {
    width: usize,
}

impl ConsolePresenter {
    pub fn new(width: usize) -> Self {
        Self { width }
    }

    /// `COLUMNS` from the environment, else the size of the terminal on
    /// stdout, else [`DEFAULT_WIDTH`].
    pub fn terminal_width() -> usize {
        width_from(std::env::var("COLUMNS").ok().as_deref(), || {
            terminal_size::terminal_size().map(|(Width(w), _)| w as usize)
        })
    }
}

fn width_from(columns: Option<&str>, tty: impl FnOnce() -> Option<usize>) -> usize {
    columns
        .and_then(|c| c.trim().parse().ok())
        .filter(|&w: &usize| w > 1)
        .or_else(|| tty().filter(|&w| w > 1))
        .unwrap_or(DEFAULT_WIDTH)
}

impl Presenter for ConsolePresenter {
    fn frame_received(&self, frame: &CanFrame) {
        println!("{}", render_frame(frame, self.width));
    }

    fn frame_sent(&self, frame: &CanFrame) {
        println!("{}", render_sent(frame));
    }

    fn tick(&self) {
        println!("tick");
    }

    fn notice(&self, message: &str) {
        println!("{}", message);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shown {
    Received(CanFrame),
    Sent(CanFrame),
    Tick,
    Notice(String),
}

/// Keeps everything in memory, in order. Handy for tests and embedding.
#[derive(Debug, Default)]
pub struct RecordingPresenter {
    shown: Mutex<Vec<Shown>>,
}

impl RecordingPresenter {
    fn push(&self, item: Shown) {
        self.shown.lock().unwrap_or_else(PoisonError::into_inner).push(item);
    }

    pub fn shown(&self) -> Vec<Shown> {
        self.shown.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn received(&self) -> Vec<CanFrame> {
        self.shown()
            .into_iter()
            .filter_map(|s| match s {
                Shown::Received(f) => Some(f),
                _ => None,
            })
            .collect()
    }

    pub fn sent(&self) -> Vec<CanFrame> {
        self.shown()
            .into_iter()
            .filter_map(|s| match s {
                Shown::Sent(f) => Some(f),
                _ => None,
            })
            .collect()
    }

    pub fn ticks(&self) -> usize {
        self.shown().iter().filter(|s| **s == Shown::Tick).count()
    }
}

impl Presenter for RecordingPresenter {
    fn frame_received(&self, frame: &CanFrame) {
        self.push(Shown::Received(frame.clone()));
    }

    fn frame_sent(&self, frame: &CanFrame) {
        self.push(Shown::Sent(frame.clone()));
    }

    fn tick(&self) {
        self.push(Shown::Tick);
    }

    fn notice(&self, message: &str) {
        self.push(Shown::Notice(message.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn width_prefers_columns_then_terminal() {
        assert_eq!(width_from(Some(" 120 "), || Some(90)), 120);
        assert_eq!(width_from(None, || Some(90)), 90);
        assert_eq!(width_from(Some("wide"), || Some(90)), 90);
        assert_eq!(width_from(None, || None), DEFAULT_WIDTH);
        assert_eq!(width_from(Some("1"), || Some(0)), DEFAULT_WIDTH);
    }

    #[test]
    fn frame_block_lists_every_field() {
        let frame = CanFrame::new_std(0x123, &[0x11, 0x22, 0x41]).unwrap().with_timestamp(42);
        let text = render_frame(&frame, 30);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0].chars().count(), 29);
        assert!(lines[0].contains(" Frame received "));
        assert!(lines[0].starts_with('═'));
        assert_eq!(lines[1], "id: 291");
        assert_eq!(lines[2], "hex id: 0x123");
        assert_eq!(lines[3], "dataX: 112241");
        assert_eq!(lines[4], "data: b\"\\x11\\\"A\"");
        assert_eq!(lines[5], "dlc: 3");
        assert_eq!(lines[6], "flags: STD");
        assert_eq!(lines[7], "timestamp: 42");
    }

    #[test]
    fn narrow_width_still_shows_banner_text() {
        let frame = CanFrame::new_std(0x1, &[]).unwrap();
        let text = render_frame(&frame, 0);
        assert!(text.starts_with(" Frame received \n"));
    }

    #[test]
    fn sent_line_shows_hex_id_and_bytes() {
        let frame = CanFrame::new_std(0x7ff, &[1, 2]).unwrap();
        assert_eq!(render_sent(&frame), "Simulated Frame Sent -> ID: 0x7ff, Data: [1, 2]");
    }

    #[test]
    fn recorder_keeps_order() {
        let rec = RecordingPresenter::default();
        rec.tick();
        rec.notice("hi");
        rec.tick();
        assert_eq!(rec.ticks(), 2);
        assert_eq!(rec.shown()[1], Shown::Notice("hi".into()));
    }
}
