use bitflags::bitflags;
use std::fmt;

use crate::error::FrameError;

/// Highest 11-bit identifier.
pub const MAX_STD_ID: u32 = 0x7FF;
/// Highest 29-bit identifier.
pub const MAX_EXT_ID: u32 = 0x1FFF_FFFF;
/// Classic CAN payload limit.
pub const MAX_DATA_LEN: usize = 8;

bitflags! {
    /// Message flags, numbered the way vendor drivers report them.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FrameFlags: u16 {
        const RTR = 0x0001;
        const STD = 0x0002;
        const EXT = 0x0004;
        const ERROR_FRAME = 0x0020;
        /// Our own transmission, reported back by the transport.
        const TX_ACK = 0x0040;
    }
}

impl fmt::Display for FrameFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("NONE");
        }
        let mut first = true;
        for (name, _) in self.iter_names() {
            if !first {
                f.write_str(" | ")?;
            }
            f.write_str(name)?;
            first = false;
        }
        Ok(())
    }
}

/// A classic CAN frame. Immutable once built; the timestamp is stamped by
/// the transport that received it (milliseconds since that transport opened).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanFrame {
    id: u32,
    data: Vec<u8>,
    dlc: u8,
    flags: FrameFlags,
    timestamp: u64,
}

impl CanFrame {
    pub fn new_std(id: u32, data: &[u8]) -> Result<Self, FrameError> {
        check_id(id, false)?;
        check_len(data.len())?;
        Ok(Self {
            id,
            data: data.to_vec(),
            dlc: data.len() as u8,
            flags: FrameFlags::STD,
            timestamp: 0,
        })
    }

    pub fn new_ext(id: u32, data: &[u8]) -> Result<Self, FrameError> {
        check_id(id, true)?;
        check_len(data.len())?;
        Ok(Self {
            id,
            data: data.to_vec(),
            dlc: data.len() as u8,
            flags: FrameFlags::EXT,
            timestamp: 0,
        })
    }

    /// Remote request: carries a DLC but no payload.
    pub fn new_remote(id: u32, dlc: u8, extended: bool) -> Result<Self, FrameError> {
        check_id(id, extended)?;
        if dlc as usize > MAX_DATA_LEN {
            return Err(FrameError::InvalidDlc(dlc));
        }
        let kind = if extended { FrameFlags::EXT } else { FrameFlags::STD };
        Ok(Self {
            id,
            data: Vec::new(),
            dlc,
            flags: kind | FrameFlags::RTR,
            timestamp: 0,
        })
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Adds flags that describe how the frame was seen (e.g. `TX_ACK`).
    /// The frame kind bits (`STD`/`EXT`/`RTR`) cannot be changed this way.
    pub fn with_flags(mut self, extra: FrameFlags) -> Self {
        let kind = FrameFlags::STD | FrameFlags::EXT | FrameFlags::RTR;
        self.flags |= extra.difference(kind);
        self
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn dlc(&self) -> u8 {
        self.dlc
    }

    pub fn flags(&self) -> FrameFlags {
        self.flags
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn is_extended(&self) -> bool {
        self.flags.contains(FrameFlags::EXT)
    }

    pub fn is_remote(&self) -> bool {
        self.flags.contains(FrameFlags::RTR)
    }
}

fn check_id(id: u32, extended: bool) -> Result<(), FrameError> {
    let max = if extended { MAX_EXT_ID } else { MAX_STD_ID };
    if id > max {
        return Err(FrameError::InvalidId { id, extended });
    }
    Ok(())
}

fn check_len(len: usize) -> Result<(), FrameError> {
    if len > MAX_DATA_LEN {
        return Err(FrameError::TooLong(len));
    }
    Ok(())
}

// Classic CAN: DLC codes 9..=15 still mean 8 data bytes.
pub fn dlc_to_len(dlc: u8) -> usize {
    (dlc as usize).min(MAX_DATA_LEN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn std_frame_rejects_wide_ids() {
        assert!(CanFrame::new_std(0x7FF, &[]).is_ok());
        assert_eq!(
            CanFrame::new_std(0x800, &[]),
            Err(FrameError::InvalidId { id: 0x800, extended: false })
        );
        assert!(CanFrame::new_ext(0x800, &[]).is_ok());
        assert!(CanFrame::new_ext(MAX_EXT_ID + 1, &[]).is_err());
    }

    #[test]
    fn payload_is_capped_at_eight_bytes() {
        let frame = CanFrame::new_std(0x123, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        assert_eq!(frame.dlc(), 8);
        assert_eq!(CanFrame::new_std(0x123, &[0; 9]), Err(FrameError::TooLong(9)));
    }

    #[test]
    fn remote_frame_keeps_dlc_without_data() {
        let frame = CanFrame::new_remote(0x10, 4, false).unwrap();
        assert!(frame.is_remote());
        assert!(frame.data().is_empty());
        assert_eq!(frame.dlc(), 4);
        assert_eq!(frame.flags(), FrameFlags::STD | FrameFlags::RTR);
    }

    #[test]
    fn with_flags_cannot_change_frame_kind() {
        let frame = CanFrame::new_std(0x1, &[]).unwrap().with_flags(FrameFlags::EXT | FrameFlags::TX_ACK);
        assert!(!frame.is_extended());
        assert!(frame.flags().contains(FrameFlags::TX_ACK));
    }

    #[test]
    fn flags_display_lists_names() {
        assert_eq!((FrameFlags::STD | FrameFlags::TX_ACK).to_string(), "STD | TX_ACK");
        assert_eq!(FrameFlags::empty().to_string(), "NONE");
    }

    #[test]
    fn dlc_codes_above_eight_clamp() {
        assert_eq!(dlc_to_len(3), 3);
        assert_eq!(dlc_to_len(15), 8);
    }
}
