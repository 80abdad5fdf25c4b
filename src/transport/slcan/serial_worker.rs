use crate::error::TransportError;
use crate::frame::{dlc_to_len, CanFrame};
use crossbeam_channel::{select, Receiver, Sender};
use log::{debug, error, warn};
use serialport::SerialPort;
use std::fmt::Write as _;
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

pub enum Command {
    SendFrame(Option<u8>, CanFrame), // channel prefix, frame
    SendRaw(Option<u8>, String),     // channel prefix, raw command (without \r)
    Shutdown,
}

pub enum Event {
    FrameReceived(u8, CanFrame),
    Error(String),
}

pub struct SerialWorker {
    port: Box<dyn SerialPort>,
    cmd_rx: Receiver<Command>,
    event_tx: Sender<Event>,
    group_window: Duration,
    opened: Instant,
}

impl SerialWorker {
    pub fn new(
        port: Box<dyn SerialPort>,
        cmd_rx: Receiver<Command>,
        event_tx: Sender<Event>,
        group_window: Duration,
    ) -> Self {
        Self {
            port,
            cmd_rx,
            event_tx,
            group_window,
            opened: Instant::now(),
        }
    }

    pub fn run(mut self) {
        // Some CDC adapters stay silent until DTR is raised
        if let Err(e) = self.port.write_data_terminal_ready(true) {
            warn!("Failed to set DTR: {}", e);
        }

        let mut read_buf = [0u8; 1024];
        let mut line_buf = Vec::new();
        let mut write_buf = Vec::new();

        loop {
            match self.port.read(&mut read_buf) {
                Ok(n) if n > 0 => {
                    line_buf.extend_from_slice(&read_buf[..n]);
                    while let Some(pos) = line_buf.iter().position(|&b| b == b'\r' || b == 0x07) {
                        let line = line_buf.drain(..=pos).collect::<Vec<u8>>();
                        if line[line.len() - 1] == 0x07 {
                            debug!("Adapter rejected a command");
                            continue;
                        }
                        if let Ok(line_str) = std::str::from_utf8(&line[..line.len() - 1]) {
                            self.handle_line(line_str);
                        }
                    }
                }
                Ok(_) => {}
                Err(ref e) if e.kind() == io::ErrorKind::TimedOut => {}
                Err(e) => {
                    error!("Serial read error: {}", e);
                    let _ = self.event_tx.send(Event::Error(e.to_string()));
                    return;
                }
            }

            // Drain pending commands, grouping writes that arrive within the window
            let start_group = Instant::now();
            loop {
                if !write_buf.is_empty()
                    && (start_group.elapsed() > self.group_window || write_buf.len() > 1024)
                {
                    break;
                }

                let cmd = if write_buf.is_empty() {
                    select! {
                        recv(self.cmd_rx) -> msg => msg.ok(),
                        default(Duration::from_millis(1)) => None,
                    }
                } else {
                    self.cmd_rx.try_recv().ok()
                };

                match cmd {
                    Some(Command::Shutdown) => {
                        if !write_buf.is_empty() {
                            let _ = self.port.write_all(&write_buf);
                        }
                        return;
                    }
                    Some(Command::SendFrame(ch, frame)) => {
                        write_buf.extend_from_slice(encode_frame(ch, &frame).as_bytes());
                    }
                    Some(Command::SendRaw(ch, cmd)) => {
                        write_buf.extend_from_slice(encode_raw(ch, &cmd).as_bytes());
                    }
                    None => break,
                }
            }

            if !write_buf.is_empty() {
                if let Err(e) = self.port.write_all(&write_buf) {
                    error!("Serial write error: {}", e);
                    let _ = self.event_tx.send(Event::Error(e.to_string()));
                    return;
                }
                write_buf.clear();
            }
        }
    }

    fn handle_line(&self, line: &str) {
        match decode_line(line) {
            Ok(Some((channel, frame))) => {
                let stamp = self.opened.elapsed().as_millis() as u64;
                let _ = self
                    .event_tx
                    .send(Event::FrameReceived(channel, frame.with_timestamp(stamp)));
            }
            Ok(None) => debug!("Adapter response: {:?}", line),
            Err(e) => debug!("Unparseable line {:?}: {}", line, e),
        }
    }
}

pub fn encode_raw(channel: Option<u8>, cmd: &str) -> String {
    match channel {
        Some(ch) => format!("{}{}\r", ch, cmd),
        None => format!("{}\r", cmd),
    }
}

/// `[channel]CMD ID DLC DATA\r` with CMD one of t/T (data) or r/R (remote).
pub fn encode_frame(channel: Option<u8>, frame: &CanFrame) -> String {
    let cmd_char = match (frame.is_remote(), frame.is_extended()) {
        (false, false) => 't',
        (false, true) => 'T',
        (true, false) => 'r',
        (true, true) => 'R',
    };

    let mut line = String::new();
    if let Some(ch) = channel {
        let _ = write!(line, "{}", ch);
    }
    line.push(cmd_char);
    if frame.is_extended() {
        let _ = write!(line, "{:08X}", frame.id());
    } else {
        let _ = write!(line, "{:03X}", frame.id());
    }
    let _ = write!(line, "{:X}", frame.dlc());
    for b in frame.data() {
        let _ = write!(line, "{:02X}", b);
    }
    line.push('\r');
    line
}

/// Parses one line without its terminator. `Ok(None)` for lines that are
/// not frames (acks, version strings, status).
pub fn decode_line(line: &str) -> Result<Option<(u8, CanFrame)>, TransportError> {
    let mut rest = line;
    let channel = match rest.as_bytes().first() {
        Some(c @ b'0'..=b'3') => {
            rest = &rest[1..];
            c - b'0'
        }
        Some(_) => 0,
        None => return Ok(None),
    };

    let Some(cmd) = rest.chars().next() else {
        return Ok(None);
    };
    if !matches!(cmd, 't' | 'T' | 'r' | 'R') {
        return Ok(None);
    }
    let content = &rest[1..];
    let extended = cmd.is_ascii_uppercase();
    let remote = matches!(cmd, 'r' | 'R');

    let id_len = if extended { 8 } else { 3 };
    if content.len() < id_len + 1 || !content.is_ascii() {
        return Err(malformed("line too short"));
    }
    let id = u32::from_str_radix(&content[..id_len], 16).map_err(|_| malformed("bad id"))?;
    let dlc = content.as_bytes()[id_len];
    let dlc = (dlc as char).to_digit(16).ok_or_else(|| malformed("bad dlc"))? as u8;

    let frame = if remote {
        CanFrame::new_remote(id, dlc.min(8), extended)?
    } else {
        let len = dlc_to_len(dlc);
        let data_str = &content[id_len + 1..];
        if data_str.len() < len * 2 {
            return Err(malformed("missing data bytes"));
        }
        let mut data = Vec::with_capacity(len);
        for i in 0..len {
            let byte = u8::from_str_radix(&data_str[i * 2..i * 2 + 2], 16)
                .map_err(|_| malformed("bad data byte"))?;
            data.push(byte);
        }
        if extended {
            CanFrame::new_ext(id, &data)?
        } else {
            CanFrame::new_std(id, &data)?
        }
    };
    Ok(Some((channel, frame)))
}

fn malformed(what: &str) -> TransportError {
    TransportError::Device(format!("malformed SLCAN frame: {}", what))
}
